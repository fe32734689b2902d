//! Embedded image handling: extract references, download, resize to the
//! declared width, write next to the document and relink.
//!
//! | Step | Where |
//! |------|-------|
//! | Find `<img>` / `![]()` references | [`extract_references`] |
//! | Width math | [`scaled_dimensions`] |
//! | Decode, Lanczos3 resize, re-encode | [`resize_to_width`] |
//! | Download, write, relink | [`ImageTransformEngine::process`] |

mod engine;
mod error;
mod extract;
mod resize;

pub use engine::{
    DEFAULT_IMAGE_CONCURRENCY, IMAGES_SUBDIR, ImageFailure, ImageTransformEngine, SavedImage,
    TransformOutcome, image_dir_for,
};
pub use error::ImageProcessingError;
pub use extract::{
    AssetHosts, DEFAULT_ASSET_HOSTS, ImageReference, ReferenceKind, extract_references,
};
pub use resize::{resize_to_width, scaled_dimensions};
