//! Download, resize, write and relink the images of one document.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::ImageProcessingError;
use super::extract::{AssetHosts, ImageReference, extract_references};
use super::resize::resize_to_width;
use crate::api::ApiClient;
use crate::persist::{DEFAULT_IO_TIMEOUT, write_atomically};
use crate::sanitize::{MAX_SEGMENT_BYTES, sanitize_segment, truncate_to_byte_limit};

/// Default number of concurrent image downloads per document.
pub const DEFAULT_IMAGE_CONCURRENCY: usize = 4;

/// Subdirectory used when images are kept apart from the document.
pub const IMAGES_SUBDIR: &str = "images";

/// An image written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    /// Remote URL the image came from.
    pub source_url: String,
    /// File name inside the image directory.
    pub local_filename: String,
    /// Size of the written file.
    pub byte_size: u64,
    /// Whether the bytes were resized to a declared width.
    pub resized: bool,
}

/// An image that was left pointing at its remote URL.
#[derive(Debug)]
pub struct ImageFailure {
    /// Remote URL of the image.
    pub source_url: String,
    /// Why it was not saved.
    pub error: ImageProcessingError,
}

/// Result of transforming one document's markup.
#[derive(Debug)]
pub struct TransformOutcome {
    /// Markup with every saved image relinked to its local path.
    pub markup: String,
    /// Images written, in document order.
    pub saved: Vec<SavedImage>,
    /// Images skipped, in document order.
    pub failures: Vec<ImageFailure>,
}

impl TransformOutcome {
    fn unchanged(markup: &str) -> Self {
        Self {
            markup: markup.to_string(),
            saved: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Failures other than interrupt cancellations.
    #[must_use]
    pub fn real_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| !failure.error.is_cancelled())
            .count()
    }
}

/// One download: a distinct (URL, declared width) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedImage {
    source_url: String,
    declared_width: Option<u32>,
    filename: String,
}

/// Extracts, downloads, resizes and relinks images embedded in markup.
#[derive(Debug)]
pub struct ImageTransformEngine {
    client: Arc<ApiClient>,
    asset_hosts: AssetHosts,
    concurrency: usize,
    io_timeout: Duration,
    interrupted: Arc<AtomicBool>,
}

impl ImageTransformEngine {
    /// Creates an engine downloading through `client`.
    #[must_use]
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            asset_hosts: AssetHosts::default(),
            concurrency: DEFAULT_IMAGE_CONCURRENCY,
            io_timeout: DEFAULT_IO_TIMEOUT,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Restricts downloads to `asset_hosts`.
    #[must_use]
    pub fn with_asset_hosts(mut self, asset_hosts: AssetHosts) -> Self {
        self.asset_hosts = asset_hosts;
        self
    }

    /// Sets the download parallelism (minimum 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the timeout for one image write.
    #[must_use]
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Shares the run's interrupt flag; once set, no new downloads start.
    #[must_use]
    pub fn with_interrupt_flag(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Processes every accepted image in `markup`.
    ///
    /// Images are written to `target_dir` (or `target_dir/images`). Only the
    /// URL text of successfully saved references is replaced; a failed image
    /// keeps its remote URL. Per-image failures never fail the document.
    #[instrument(skip(self, markup, target_dir), fields(target_dir = %target_dir.display()))]
    pub async fn process(
        &self,
        markup: &str,
        target_dir: &Path,
        use_images_subdir: bool,
    ) -> TransformOutcome {
        let references = extract_references(markup, &self.asset_hosts);
        if references.is_empty() {
            return TransformOutcome::unchanged(markup);
        }

        let (plans, plan_of) = plan_downloads(&references);
        let image_dir = image_dir_for(target_dir, use_images_subdir);
        let prefix = if use_images_subdir {
            format!("{IMAGES_SUBDIR}/")
        } else {
            String::new()
        };
        debug!(
            references = references.len(),
            downloads = plans.len(),
            "processing images"
        );

        let image_dir = &image_dir;
        let mut results: Vec<(usize, Result<SavedImage, ImageProcessingError>)> =
            stream::iter(plans.iter().enumerate())
                .map(|(index, plan)| async move {
                    (index, self.fetch_and_store(plan, image_dir).await)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut links: Vec<Option<String>> = vec![None; plans.len()];
        let mut saved = Vec::new();
        let mut failures = Vec::new();
        for (index, result) in results {
            match result {
                Ok(image) => {
                    links[index] = Some(relative_link(&prefix, &image.local_filename));
                    saved.push(image);
                }
                Err(error) => {
                    if !error.is_cancelled() {
                        warn!(error = %error, "image skipped, keeping remote reference");
                    }
                    failures.push(ImageFailure {
                        source_url: plans[index].source_url.clone(),
                        error,
                    });
                }
            }
        }

        TransformOutcome {
            markup: rewrite_references(markup, &references, &plan_of, &links),
            saved,
            failures,
        }
    }

    async fn fetch_and_store(
        &self,
        plan: &PlannedImage,
        image_dir: &Path,
    ) -> Result<SavedImage, ImageProcessingError> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(ImageProcessingError::Cancelled {
                url: plan.source_url.clone(),
            });
        }

        let bytes = self
            .client
            .retrieve_bytes(&plan.source_url)
            .await
            .map_err(|e| ImageProcessingError::download(&plan.source_url, e))?;

        let (bytes, resized) = match plan.declared_width {
            Some(width) => resize_off_thread(&plan.source_url, bytes, width).await,
            None => (bytes, false),
        };

        tokio::fs::create_dir_all(image_dir)
            .await
            .map_err(|e| ImageProcessingError::write(image_dir, e))?;
        let path = image_dir.join(&plan.filename);
        write_atomically(&path, &bytes, self.io_timeout)
            .await
            .map_err(|e| ImageProcessingError::write(&path, e))?;

        debug!(url = %plan.source_url, file = %plan.filename, resized, "image saved");
        Ok(SavedImage {
            source_url: plan.source_url.clone(),
            local_filename: plan.filename.clone(),
            byte_size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            resized,
        })
    }
}

/// Resizes on the blocking pool; any failure keeps the original bytes.
async fn resize_off_thread(url: &str, bytes: Vec<u8>, width: u32) -> (Vec<u8>, bool) {
    let original = Arc::new(bytes);
    let input = Arc::clone(&original);
    let outcome = tokio::task::spawn_blocking(move || resize_to_width(&input, width)).await;

    let keep_original =
        |original: Arc<Vec<u8>>| Arc::try_unwrap(original).unwrap_or_else(|shared| (*shared).clone());

    match outcome {
        Ok(Ok(Some(resized))) => (resized, true),
        Ok(Ok(None)) => (keep_original(original), false),
        Ok(Err(error)) => {
            warn!(error = %ImageProcessingError::decode(url, error), "keeping original image bytes");
            (keep_original(original), false)
        }
        Err(error) => {
            warn!(url, error = %error, "resize task failed, keeping original image bytes");
            (keep_original(original), false)
        }
    }
}

/// Groups references into downloads and names each file.
///
/// Returns the plans plus, for every reference, the index of its plan.
fn plan_downloads(references: &[ImageReference]) -> (Vec<PlannedImage>, Vec<usize>) {
    let mut plans: Vec<PlannedImage> = Vec::new();
    let mut by_key: HashMap<(&str, Option<u32>), usize> = HashMap::new();
    let mut used_names: HashSet<String> = HashSet::new();
    let mut plan_of = Vec::with_capacity(references.len());

    for reference in references {
        let key = (reference.source_url.as_str(), reference.declared_width);
        let index = *by_key.entry(key).or_insert_with(|| {
            let position = plans.len() + 1;
            let candidate = filename_from_url(&reference.source_url)
                .unwrap_or_else(|| format!("image_{position}.png"));
            plans.push(PlannedImage {
                source_url: reference.source_url.clone(),
                declared_width: reference.declared_width,
                filename: unique_filename(candidate, &mut used_names),
            });
            plans.len() - 1
        });
        plan_of.push(index);
    }
    (plans, plan_of)
}

/// Percent-decoded, sanitized last path segment; `None` without an extension.
fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let raw = parsed.path_segments()?.next_back()?;
    if raw.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |s| s.into_owned());
    let name = sanitize_segment(&decoded);
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => Some(name),
        _ => None,
    }
}

/// Appends `_1`, `_2`, ... before the extension until the name is unused.
fn unique_filename(candidate: String, used: &mut HashSet<String>) -> String {
    if used.insert(candidate.clone()) {
        return candidate;
    }
    let (stem, ext) = match candidate.rfind('.') {
        Some(pos) if pos > 0 => candidate.split_at(pos),
        _ => (candidate.as_str(), ""),
    };
    let mut n: u32 = 1;
    loop {
        let suffix = format!("_{n}{ext}");
        let stem = truncate_to_byte_limit(stem, MAX_SEGMENT_BYTES.saturating_sub(suffix.len()));
        let name = format!("{stem}{suffix}");
        if used.insert(name.clone()) {
            return name;
        }
        n += 1;
    }
}

/// Relative link to a saved file, escaping characters that break URLs.
fn relative_link(prefix: &str, filename: &str) -> String {
    let mut link = String::with_capacity(prefix.len() + filename.len());
    link.push_str(prefix);
    for ch in filename.chars() {
        match ch {
            ' ' => link.push_str("%20"),
            '%' => link.push_str("%25"),
            '#' => link.push_str("%23"),
            '&' => link.push_str("%26"),
            '\'' => link.push_str("%27"),
            '(' => link.push_str("%28"),
            ')' => link.push_str("%29"),
            c => link.push(c),
        }
    }
    link
}

/// Replaces the URL span of every reference whose plan produced a link.
fn rewrite_references(
    markup: &str,
    references: &[ImageReference],
    plan_of: &[usize],
    links: &[Option<String>],
) -> String {
    let mut out = markup.to_string();
    // Back to front so earlier spans stay valid.
    for (reference, plan) in references.iter().zip(plan_of).rev() {
        if let Some(link) = &links[*plan] {
            out.replace_range(reference.url_span.clone(), link);
        }
    }
    out
}

/// Directory images of a document in `target_dir` are written to.
#[must_use]
pub fn image_dir_for(target_dir: &Path, use_images_subdir: bool) -> PathBuf {
    if use_images_subdir {
        target_dir.join(IMAGES_SUBDIR)
    } else {
        target_dir.to_path_buf()
    }
}
