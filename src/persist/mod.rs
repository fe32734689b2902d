//! Document persistence: category directories, file names and file writes.
//!
//! Layout: `{output_root}/{category segments}/{id}_{title}.md`. Every segment
//! is sanitized on its own, so a category like `開発/仕様: v2` becomes the two
//! directories `開発` and `仕様- v2`.

mod front_matter;
mod writer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::api::DocumentBody;
use crate::sanitize::{MAX_SEGMENT_BYTES, sanitize_segment, sanitize_segment_with_limit};

pub use front_matter::{render_document, render_front_matter};
pub(crate) use writer::write_atomically;

/// Extension of persisted documents.
pub const DOCUMENT_EXTENSION: &str = "md";

/// Default bound for one file write.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while persisting a document.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Creating a directory or writing the file failed.
    #[error("IO error writing {path}: {source}")]
    Io {
        /// The path being created or written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl PersistenceError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Maps a slash-delimited category onto nested directories below `base_dir`.
///
/// Empty segments (`a//b`, leading or trailing `/`) are dropped; an empty
/// category maps to `base_dir` itself.
///
/// ```
/// use std::path::Path;
/// use esa_export::persist::resolve_target_dir;
///
/// let dir = resolve_target_dir(Path::new("out"), "開発/仕様書");
/// assert_eq!(dir, Path::new("out").join("開発").join("仕様書"));
/// assert_eq!(resolve_target_dir(Path::new("out"), ""), Path::new("out"));
/// ```
#[must_use]
pub fn resolve_target_dir(base_dir: &Path, category: &str) -> PathBuf {
    category
        .split('/')
        .filter(|segment| !segment.trim().is_empty())
        .fold(base_dir.to_path_buf(), |dir, segment| {
            dir.join(sanitize_segment(segment))
        })
}

/// File name for a document: `{id}_{sanitized title}.md`, at most 255 bytes.
#[must_use]
pub fn document_filename(id: u64, title: &str) -> String {
    let prefix = format!("{id}_");
    let suffix = format!(".{DOCUMENT_EXTENSION}");
    let budget = MAX_SEGMENT_BYTES.saturating_sub(prefix.len() + suffix.len());
    let title = sanitize_segment_with_limit(title, budget);
    format!("{prefix}{title}{suffix}")
}

/// Writes documents below an output root.
#[derive(Debug, Clone)]
pub struct DocumentPersister {
    output_root: PathBuf,
    io_timeout: Duration,
}

impl DocumentPersister {
    /// Creates a persister rooted at `output_root`.
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Sets the timeout for one file write.
    #[must_use]
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Output root.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory for a document in `category`.
    #[must_use]
    pub fn target_dir(&self, category: &str) -> PathBuf {
        resolve_target_dir(&self.output_root, category)
    }

    /// Full path a document would be written to.
    #[must_use]
    pub fn target_path(&self, id: u64, title: &str, category: &str) -> PathBuf {
        self.target_dir(category).join(document_filename(id, title))
    }

    /// Writes `document` (front matter plus its current markup) into `target_dir`.
    ///
    /// The directory is created when missing and an existing file is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Io`] when the directory or file cannot be written.
    #[instrument(skip(self, document), fields(id = document.summary.id))]
    pub async fn save(
        &self,
        document: &DocumentBody,
        target_dir: &Path,
    ) -> Result<PathBuf, PersistenceError> {
        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| PersistenceError::io(target_dir, e))?;

        let path = target_dir.join(document_filename(
            document.summary.id,
            &document.summary.title,
        ));
        let contents = render_document(&document.summary, &document.body_markup);
        write_atomically(&path, contents.as_bytes(), self.io_timeout)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;

        debug!(path = %path.display(), bytes = contents.len(), "document saved");
        Ok(path)
    }
}
