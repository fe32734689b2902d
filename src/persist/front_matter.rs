//! Front matter rendering.
//!
//! Fields are always emitted in the same order with the same formatting, so
//! exporting an unchanged post twice yields byte-identical files:
//!
//! ```text
//! ---
//! number: 42
//! title: API仕様
//! tags: ["api", "spec"]
//! category: 開発/仕様書
//! created_at: 2024-01-02T03:04:05+09:00
//! updated_at: 2024-02-03T04:05:06+09:00
//! created_by: alice
//! updated_by: bob
//! wip: false
//! ---
//!
//! ```

use std::fmt::Write as _;

use crate::api::DocumentSummary;

/// Renders the front matter block, including the trailing blank line.
#[must_use]
pub fn render_front_matter(summary: &DocumentSummary) -> String {
    let mut out = String::with_capacity(256);
    out.push_str("---\n");
    // Writing into a String cannot fail.
    let _ = writeln!(out, "number: {}", summary.id);
    let _ = writeln!(out, "title: {}", scalar(&summary.title));
    let _ = writeln!(out, "tags: {}", tag_list(&summary.tags));
    let _ = writeln!(out, "category: {}", scalar(&summary.category));
    let _ = writeln!(out, "created_at: {}", scalar(&summary.created_at));
    let _ = writeln!(out, "updated_at: {}", scalar(&summary.updated_at));
    let _ = writeln!(out, "created_by: {}", scalar(&summary.created_by));
    let _ = writeln!(out, "updated_by: {}", scalar(&summary.updated_by));
    let _ = writeln!(out, "wip: {}", summary.wip);
    out.push_str("---\n\n");
    out
}

/// Renders the full document: front matter, blank line, body.
#[must_use]
pub fn render_document(summary: &DocumentSummary, body: &str) -> String {
    let mut out = render_front_matter(summary);
    out.push_str(body);
    out
}

/// `["a", "b"]` with `", "` separators and non-ASCII kept as-is.
fn tag_list(tags: &[String]) -> String {
    let items: Vec<String> = tags.iter().map(|tag| quoted(tag)).collect();
    format!("[{}]", items.join(", "))
}

/// Emits `value` plain when it reads back as the same string, quoted otherwise.
fn scalar(value: &str) -> String {
    if needs_quoting(value) {
        quoted(value)
    } else {
        value.to_string()
    }
}

fn quoted(value: &str) -> String {
    // A JSON string literal is also a valid double-quoted YAML scalar.
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.escape_default()))
}

fn needs_quoting(value: &str) -> bool {
    const RESERVED: [&str; 8] = ["true", "false", "yes", "no", "null", "on", "off", "~"];

    let Some(first) = value.chars().next() else {
        return true;
    };
    value != value.trim()
        || "-?:,[]{}#&*!|>'\"%@`".contains(first)
        || value.contains(": ")
        || value.contains(" #")
        || value.ends_with(':')
        || value.chars().any(char::is_control)
        || RESERVED.contains(&value.to_ascii_lowercase().as_str())
        || value.parse::<f64>().is_ok()
}
