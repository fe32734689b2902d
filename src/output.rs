//! CLI output formatting and display helpers.

use std::path::Path;

use esa_export::{RunOutcome, RunReport};
use tracing::info;

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }

    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Completed => "completed",
        RunOutcome::LimitReached => "stopped at --limit",
        RunOutcome::Interrupted => "interrupted",
    }
}

/// Notice logged after Ctrl-C. Runs never resume; a new run exports everything again.
pub(crate) fn interrupted_notice(saved: usize) -> String {
    format!("Interrupted; {saved} post(s) saved before stopping.")
}

/// Lines of the end-of-run summary. Skip reasons are listed only when
/// `verbose` is set.
pub(crate) fn summary_lines(report: &RunReport, verbose: bool, width: usize) -> Vec<String> {
    let mut lines = Vec::new();

    if report.dry_run {
        lines.push(format!(
            "Dry run ({}): {} of {} matching posts would be written",
            outcome_label(report.outcome),
            report.planned.len(),
            report.total_matched
        ));
        for planned in &report.planned {
            lines.push(truncate_to_width(
                &format!("  #{} {}", planned.id, planned.target_path.display()),
                width,
            ));
        }
        return lines;
    }

    lines.push(format!(
        "Export {}: {} saved, {} skipped, {} matched ({} pages)",
        outcome_label(report.outcome),
        report.saved(),
        report.skipped.len(),
        report.total_matched,
        report.pages_requested
    ));
    lines.push(format!(
        "Images: {} saved, {} failed",
        report.images_saved, report.image_failures
    ));

    if !report.skipped.is_empty() {
        if verbose {
            lines.push("Skipped posts:".to_string());
            for skipped in &report.skipped {
                lines.push(truncate_to_width(
                    &format!("- #{} {}: {}", skipped.id, skipped.title, skipped.reason),
                    width,
                ));
            }
        } else {
            lines.push("Run with -v to list skipped posts and reasons".to_string());
        }
    }

    if report.outcome == RunOutcome::Interrupted {
        lines.push("Interrupted. Run again to finish; existing files are overwritten.".to_string());
    }

    lines
}

/// Prints the end-of-run summary to stdout.
pub(crate) fn print_completion_summary(report: &RunReport, output_dir: &Path, verbose: bool) {
    info!(
        saved = report.saved(),
        skipped = report.skipped.len(),
        output_dir = %output_dir.display(),
        "Export Summary"
    );
    for line in summary_lines(report, verbose, terminal_width()) {
        println!("{line}");
    }
}
