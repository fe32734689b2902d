//! Error type for per-image failures.
//!
//! None of these end the run or the document: a failed image keeps its
//! original remote reference and is counted in the run summary.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiError;

/// Errors that can occur while processing one embedded image.
#[derive(Debug, Error)]
pub enum ImageProcessingError {
    /// The image could not be downloaded.
    #[error("failed to download image {url}: {source}")]
    Download {
        /// The image URL.
        url: String,
        /// The API error after retries.
        #[source]
        source: ApiError,
    },

    /// The image bytes could not be decoded, resized or re-encoded.
    #[error("failed to resize image {url}: {source}")]
    Decode {
        /// The image URL.
        url: String,
        /// The decoder error.
        #[source]
        source: image::ImageError,
    },

    /// Writing the image file failed.
    #[error("failed to write image {path}: {source}")]
    Write {
        /// The destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The run was interrupted before this image was fetched.
    #[error("cancelled before downloading {url}")]
    Cancelled {
        /// The image URL.
        url: String,
    },
}

impl ImageProcessingError {
    /// Creates a download error.
    pub fn download(url: impl Into<String>, source: ApiError) -> Self {
        Self::Download {
            url: url.into(),
            source,
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, source: image::ImageError) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Creates a write error.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the image was skipped because of an interrupt.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
