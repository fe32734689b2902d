//! Image reference extraction from post markup.
//!
//! Two forms are recognized:
//!
//! - HTML `<img ... src="..." width="..." alt="...">` elements, any attribute
//!   order, single, double or no quotes, case-insensitive tag and attribute names
//! - Markdown `![alt](url "title")` images
//!
//! Only references whose URL host is an accepted asset host are returned.
//! Each reference records the byte range of the whole element and of the URL
//! inside it, so the rewriter can replace the URL and nothing else.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;
use url::Url;

/// Asset hosts used when none are configured.
pub const DEFAULT_ASSET_HOSTS: [&str; 2] = ["img.esa.io", "files.esa.io"];

/// Matches one `<img ...>` element.
#[allow(clippy::expect_used)]
static IMG_TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<img\b[^>]*>").expect("img tag regex is valid") // Static pattern, safe to panic
});

/// Matches `name=value` attributes inside a tag; value in group 2, 3 or 4.
#[allow(clippy::expect_used)]
static ATTRIBUTE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("attribute regex is valid") // Static pattern, safe to panic
});

/// Matches a Markdown image with an absolute http(s) URL.
#[allow(clippy::expect_used)]
static MARKDOWN_IMAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!\[([^\]]*)\]\(\s*<?(https?://[^\s)>]+)>?(?:\s+"[^"]*")?\s*\)"#)
        .expect("markdown image regex is valid") // Static pattern, safe to panic
});

/// Matches a width attribute value such as `400` or `400px`.
#[allow(clippy::expect_used)]
static WIDTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,6})\s*(?:px)?\s*$").expect("width regex is valid") // Static pattern, safe to panic
});

/// Syntax a reference was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// HTML `<img>` element.
    HtmlImg,
    /// Markdown `![alt](url)`.
    Markdown,
}

/// One embedded image found in markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Absolute URL of the image (HTML `&amp;` decoded).
    pub source_url: String,
    /// Width requested by the author, in pixels.
    pub declared_width: Option<u32>,
    /// Alternative text, when present.
    pub alt_text: Option<String>,
    /// Byte range of the whole element in the markup.
    pub span: Range<usize>,
    /// Byte range of the URL text inside the markup.
    pub url_span: Range<usize>,
    /// Syntax of the reference.
    pub kind: ReferenceKind,
}

/// Set of hosts whose images are downloaded.
///
/// A host matches exactly or as a parent domain (`esa.io` accepts
/// `img.esa.io`). An empty set accepts every http(s) host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHosts {
    hosts: Vec<String>,
}

impl Default for AssetHosts {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_HOSTS)
    }
}

impl AssetHosts {
    /// Builds a host set; entries are trimmed and lowercased, blanks dropped.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Accepts any http(s) host.
    #[must_use]
    pub fn any() -> Self {
        Self { hosts: Vec::new() }
    }

    /// Returns true when `url` is an absolute http(s) URL on an accepted host.
    #[must_use]
    pub fn accepts(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        self.hosts.is_empty()
            || self.hosts.iter().any(|accepted| {
                host == *accepted
                    || host
                        .strip_suffix(accepted.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
    }
}

/// Extracts accepted image references in document order.
///
/// References that overlap an earlier one are dropped.
#[must_use]
pub fn extract_references(markup: &str, hosts: &AssetHosts) -> Vec<ImageReference> {
    let mut found: Vec<ImageReference> = html_references(markup)
        .chain(markdown_references(markup))
        .filter(|reference| {
            let accepted = hosts.accepts(&reference.source_url);
            if !accepted {
                trace!(url = %reference.source_url, "skipping image on foreign host");
            }
            accepted
        })
        .collect();
    found.sort_by_key(|reference| reference.span.start);

    let mut references: Vec<ImageReference> = Vec::with_capacity(found.len());
    for reference in found {
        if references
            .last()
            .is_some_and(|previous| reference.span.start < previous.span.end)
        {
            continue;
        }
        references.push(reference);
    }
    references
}

fn html_references(markup: &str) -> impl Iterator<Item = ImageReference> + '_ {
    IMG_TAG_PATTERN.find_iter(markup).filter_map(|tag| {
        let offset = tag.start();
        let mut src: Option<(String, Range<usize>)> = None;
        let mut width = None;
        let mut alt = None;

        for attr in ATTRIBUTE_PATTERN.captures_iter(tag.as_str()) {
            let (Some(name), Some(value)) = (
                attr.get(1),
                attr.get(2).or_else(|| attr.get(3)).or_else(|| attr.get(4)),
            ) else {
                continue;
            };
            match name.as_str().to_ascii_lowercase().as_str() {
                "src" if src.is_none() => {
                    let range = (offset + value.start())..(offset + value.end());
                    src = Some((value.as_str().trim().replace("&amp;", "&"), range));
                }
                "width" if width.is_none() => width = parse_width(value.as_str()),
                "alt" if alt.is_none() => alt = Some(value.as_str().to_string()),
                _ => {}
            }
        }

        let (source_url, url_span) = src?;
        Some(ImageReference {
            source_url,
            declared_width: width,
            alt_text: alt,
            span: tag.range(),
            url_span,
            kind: ReferenceKind::HtmlImg,
        })
    })
}

fn markdown_references(markup: &str) -> impl Iterator<Item = ImageReference> + '_ {
    MARKDOWN_IMAGE_PATTERN.captures_iter(markup).filter_map(|caps| {
        let whole = caps.get(0)?;
        let url = caps.get(2)?;
        let alt = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .filter(|alt| !alt.is_empty());
        Some(ImageReference {
            source_url: url.as_str().to_string(),
            declared_width: None,
            alt_text: alt,
            span: whole.range(),
            url_span: url.range(),
            kind: ReferenceKind::Markdown,
        })
    })
}

/// Parses `400` / `400px` into a positive pixel width.
fn parse_width(value: &str) -> Option<u32> {
    WIDTH_PATTERN
        .captures(value)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse::<u32>().ok())
        .filter(|width| *width > 0)
}
