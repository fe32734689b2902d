//! Typed views of the content API's search and post resources.
//!
//! Raw JSON is decoded into the private `Wire*` structs and converted into
//! [`DocumentSummary`] / [`DocumentBody`] at the client boundary, so nothing
//! downstream handles untyped JSON.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use super::error::ApiError;

/// Maximum page size accepted by the API.
pub const MAX_PAGE_SIZE: u8 = 100;

/// Sort keys understood by the search endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Last update time.
    #[default]
    Updated,
    /// Creation time.
    Created,
    /// Post number.
    Number,
    /// Star count.
    Stars,
    /// Watch count.
    Watches,
    /// Comment count.
    Comments,
    /// Search relevance.
    BestMatch,
}

impl SortKey {
    /// Wire value for the `sort` query parameter.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Created => "created",
            Self::Number => "number",
            Self::Stars => "stars",
            Self::Watches => "watches",
            Self::Comments => "comments",
            Self::BestMatch => "best_match",
        }
    }
}

/// Sort direction for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    #[default]
    Desc,
}

impl SortOrder {
    /// Wire value for the `order` query parameter.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Error returned when parsing a sort key or order from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseSortError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl FromStr for SortKey {
    type Err = ParseSortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "updated" => Ok(Self::Updated),
            "created" => Ok(Self::Created),
            "number" => Ok(Self::Number),
            "stars" => Ok(Self::Stars),
            "watches" => Ok(Self::Watches),
            "comments" => Ok(Self::Comments),
            "best_match" | "best-match" => Ok(Self::BestMatch),
            _ => Err(ParseSortError {
                kind: "sort key",
                value: s.to_string(),
                expected: "updated, created, number, stars, watches, comments, best_match",
            }),
        }
    }
}

impl FromStr for SortOrder {
    type Err = ParseSortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(ParseSortError {
                kind: "sort order",
                value: s.to_string(),
                expected: "asc, desc",
            }),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable search request against one team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    team: String,
    raw_query: String,
    page_size: u8,
    sort_key: SortKey,
    sort_order: SortOrder,
}

impl SearchQuery {
    /// Starts a query for `team` with the maximum page size and default ordering.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidQuery`] when the team name is empty or
    /// contains characters other than ASCII alphanumerics and `-`.
    pub fn new(team: impl Into<String>) -> Result<Self, ApiError> {
        let team = team.into();
        if team.is_empty() {
            return Err(ApiError::invalid_query("team name is empty"));
        }
        if !team.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ApiError::invalid_query(format!(
                "team name '{team}' may only contain ASCII letters, digits and '-'"
            )));
        }
        Ok(Self {
            team,
            raw_query: String::new(),
            page_size: MAX_PAGE_SIZE,
            sort_key: SortKey::default(),
            sort_order: SortOrder::default(),
        })
    }

    /// Sets the search expression (e.g. `tag:public category:開発`).
    #[must_use]
    pub fn with_query(mut self, raw_query: impl Into<String>) -> Self {
        self.raw_query = raw_query.into().trim().to_string();
        self
    }

    /// Sets the page size, clamped to `1..=100`.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u8) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Sets sort key and direction.
    #[must_use]
    pub fn with_sort(mut self, sort_key: SortKey, sort_order: SortOrder) -> Self {
        self.sort_key = sort_key;
        self.sort_order = sort_order;
        self
    }

    /// Team name.
    #[must_use]
    pub fn team(&self) -> &str {
        &self.team
    }

    /// Search expression; empty means "all posts".
    #[must_use]
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    /// Items per page.
    #[must_use]
    pub fn page_size(&self) -> u8 {
        self.page_size
    }

    /// Sort key.
    #[must_use]
    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    /// Sort direction.
    #[must_use]
    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }
}

/// A document as returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    /// Post number, unique within the team.
    pub id: u64,
    /// Post title.
    pub title: String,
    /// Category plus title, as shown by the source system.
    pub full_path: String,
    /// Tags in server order.
    pub tags: Vec<String>,
    /// Slash-delimited category; empty when uncategorized.
    pub category: String,
    /// Creation timestamp (RFC 3339, as sent by the server).
    pub created_at: String,
    /// Last update timestamp (RFC 3339, as sent by the server).
    pub updated_at: String,
    /// Screen name of the author.
    pub created_by: String,
    /// Screen name of the last editor.
    pub updated_by: String,
    /// Work-in-progress flag.
    pub wip: bool,
    /// Web URL of the post, when provided.
    pub url: Option<String>,
}

/// A document with its full markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBody {
    /// Metadata shared with the summary.
    pub summary: DocumentSummary,
    /// Markdown source.
    pub body_markup: String,
    /// Server-rendered HTML.
    pub body_html: String,
}

impl DocumentBody {
    /// Returns the same document with its markup replaced.
    #[must_use]
    pub fn with_markup(mut self, body_markup: String) -> Self {
        self.body_markup = body_markup;
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Documents on this page, in server order.
    pub items: Vec<DocumentSummary>,
    /// Next page number, `None` when exhausted.
    pub next_page: Option<u32>,
    /// Total number of matches across all pages.
    pub total_count: u64,
}

impl SearchPage {
    /// Returns true when the server signalled another page.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.next_page.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(default)]
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct WirePost {
    number: u64,
    name: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    wip: bool,
    #[serde(default)]
    body_md: Option<String>,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created_by: Option<WireUser>,
    #[serde(default)]
    updated_by: Option<WireUser>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSearchPage {
    posts: Vec<WirePost>,
    #[serde(default)]
    next_page: Option<u32>,
    #[serde(default)]
    total_count: u64,
}

impl WirePost {
    fn into_parts(self) -> (DocumentSummary, Option<String>, Option<String>) {
        let summary = DocumentSummary {
            id: self.number,
            title: self.name,
            full_path: self.full_name,
            tags: self.tags,
            category: self.category.unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by.map(|u| u.screen_name).unwrap_or_default(),
            updated_by: self.updated_by.map(|u| u.screen_name).unwrap_or_default(),
            wip: self.wip,
            url: self.url,
        };
        (summary, self.body_md, self.body_html)
    }
}

/// Decodes a search response body.
pub(crate) fn parse_search_page(url: &str, body: &[u8]) -> Result<SearchPage, ApiError> {
    let wire: WireSearchPage =
        serde_json::from_slice(body).map_err(|e| ApiError::protocol(url, e.to_string()))?;
    Ok(SearchPage {
        items: wire
            .posts
            .into_iter()
            .map(|post| post.into_parts().0)
            .collect(),
        next_page: wire.next_page,
        total_count: wire.total_count,
    })
}

/// Decodes a single post response body.
///
/// A post without `body_md` is rejected: persisting it would silently drop content.
pub(crate) fn parse_document_body(url: &str, body: &[u8]) -> Result<DocumentBody, ApiError> {
    let wire: WirePost =
        serde_json::from_slice(body).map_err(|e| ApiError::protocol(url, e.to_string()))?;
    let (summary, body_md, body_html) = wire.into_parts();
    let body_markup = body_md.ok_or_else(|| ApiError::protocol(url, "missing field `body_md`"))?;
    Ok(DocumentBody {
        summary,
        body_markup,
        body_html: body_html.unwrap_or_default(),
    })
}
