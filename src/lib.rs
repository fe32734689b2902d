//! esa-export Core Library
//!
//! Exports esa.io posts into a category-structured tree of Markdown files,
//! downloading (and optionally resizing) the images they embed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`api`] - Content API client with pagination, retries and request spacing
//! - [`images`] - Image reference extraction, resize and relink engine
//! - [`persist`] - Category directories, front matter and atomic writes
//! - [`pipeline`] - Search → fetch → transform → persist orchestration
//! - [`sanitize`] - Filesystem-safe path segments
//! - [`config`] - Validated run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod images;
pub mod persist;
pub mod pipeline;
pub mod sanitize;
mod user_agent;

// Re-export commonly used types
pub use api::{
    AccessToken, ApiClient, ApiError, DocumentBody, DocumentSummary, RateLimiter, RetryPolicy,
    SearchPage, SearchQuery, SortKey, SortOrder,
};
pub use config::{ConfigError, ExportConfig, TOKEN_ENV_VAR};
pub use images::{AssetHosts, ImageTransformEngine, TransformOutcome};
pub use persist::{DocumentPersister, PersistenceError};
pub use pipeline::{ExportError, ExportOptions, Exporter, RunOutcome, RunReport, RunStats};
pub use sanitize::sanitize_segment;
