//! Proportional resizing to an author-declared width.
//!
//! [`scaled_dimensions`] is the pure dimension math; [`resize_to_width`] does
//! the decode / Lanczos3 resample / re-encode round trip in the source format.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ColorType, ImageError, ImageFormat, ImageReader, Limits};

/// Target size for `natural` scaled to `declared_width`, keeping the aspect ratio.
///
/// The height is `round(h × declared / w)`, never less than 1.
///
/// ```
/// use esa_export::images::scaled_dimensions;
///
/// assert_eq!(scaled_dimensions((800, 600), 400), (400, 300));
/// assert_eq!(scaled_dimensions((3, 2), 2), (2, 1));
/// ```
#[must_use]
pub fn scaled_dimensions(natural: (u32, u32), declared_width: u32) -> (u32, u32) {
    let (width, height) = natural;
    if width == 0 || declared_width == 0 {
        return natural;
    }
    let (w, h, d) = (
        u64::from(width),
        u64::from(height),
        u64::from(declared_width),
    );
    let scaled = (h * d * 2 + w) / (w * 2);
    let new_height = u32::try_from(scaled).unwrap_or(u32::MAX).max(1);
    (declared_width, new_height)
}

/// Resizes encoded image `bytes` to `declared_width`.
///
/// Returns `Ok(None)` when the natural width already equals the declared
/// width, otherwise the re-encoded bytes in the original format.
///
/// # Errors
///
/// Returns the [`ImageError`] when the format is unknown, the data cannot
/// be decoded or re-encoded, or the target size exceeds the default
/// [`Limits`] allocation budget.
pub fn resize_to_width(bytes: &[u8], declared_width: u32) -> Result<Option<Vec<u8>>, ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().unwrap_or(ImageFormat::Png);
    let decoded = reader.decode()?;

    let natural = (decoded.width(), decoded.height());
    if natural.0 == declared_width {
        return Ok(None);
    }

    let (width, height) = scaled_dimensions(natural, declared_width);
    // Output buffer plus the f32 intermediate of the horizontal pass.
    let mut budget = Limits::default();
    budget.reserve_buffer(width, height, decoded.color())?;
    budget.reserve_buffer(width, natural.1, ColorType::Rgba32F)?;

    let resized = decoded.resize_exact(width, height, FilterType::Lanczos3);

    let mut out = Vec::new();
    resized.write_to(&mut Cursor::new(&mut out), format)?;
    Ok(Some(out))
}
