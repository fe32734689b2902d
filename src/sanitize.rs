//! Path segment sanitization for untrusted titles, categories and image names.
//!
//! Every string that ends up as a directory or file name on disk passes through
//! [`sanitize_segment`]. The mapping is deterministic and total: it never fails,
//! it only substitutes, trims, truncates, or falls back to [`PLACEHOLDER`].

/// Maximum encoded length of a single path segment in bytes.
pub const MAX_SEGMENT_BYTES: usize = 255;

/// Name used when sanitization leaves nothing behind.
pub const PLACEHOLDER: &str = "untitled";

/// Maps one character to its filesystem-safe substitute.
///
/// | Input | Output |
/// |-------|--------|
/// | `/` `\` `*` `?` `\|` | `_` |
/// | `:` | `-` |
/// | `"` | `'` |
/// | `<` | `(` |
/// | `>` | `)` |
/// | control characters | space |
fn substitute(ch: char) -> char {
    match ch {
        '/' | '\\' | '*' | '?' | '|' => '_',
        ':' => '-',
        '"' => '\'',
        '<' => '(',
        '>' => ')',
        c if c.is_control() => ' ',
        c => c,
    }
}

/// Sanitizes a string into a single path segment of at most [`MAX_SEGMENT_BYTES`] bytes.
///
/// # Examples
///
/// ```
/// use esa_export::sanitize::sanitize_segment;
///
/// assert_eq!(sanitize_segment("設計: a/b?"), "設計- a_b_");
/// assert_eq!(sanitize_segment("  ..  "), "untitled");
/// ```
#[must_use]
pub fn sanitize_segment(input: &str) -> String {
    sanitize_segment_with_limit(input, MAX_SEGMENT_BYTES)
}

/// Sanitizes a string into a path segment of at most `max_bytes` bytes.
///
/// Leading and trailing spaces and dots are trimmed so that the result can
/// never be `.` or `..`. Non-Latin scripts pass through unchanged.
#[must_use]
pub fn sanitize_segment_with_limit(input: &str, max_bytes: usize) -> String {
    let substituted: String = input.chars().map(substitute).collect();
    let trimmed = trim_segment(&substituted);
    let truncated = trim_segment(truncate_to_byte_limit(trimmed, max_bytes));

    if truncated.is_empty() {
        return truncate_to_byte_limit(PLACEHOLDER, max_bytes.max(1)).to_string();
    }
    truncated.to_string()
}

/// Truncates `value` to at most `max_bytes` bytes without splitting a character.
#[must_use]
pub fn truncate_to_byte_limit(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn trim_segment(value: &str) -> &str {
    value.trim_matches(|c| c == ' ' || c == '.')
}
