//! Progress UI (spinner) for export runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use esa_export::RunStats;
use indicatif::{ProgressBar, ProgressStyle};

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    stats: Arc<RunStats>,
    limit: Option<usize>,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(stats, limit, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(
    stats: Arc<RunStats>,
    limit: Option<usize>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            spinner.set_message(progress_message(&stats, limit));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}

/// `[processed/total] phase... (saved N, skipped M)`; total is unknown until
/// the first page arrives.
pub(crate) fn progress_message(stats: &RunStats, limit: Option<usize>) -> String {
    let matched = usize::try_from(stats.matched()).unwrap_or(usize::MAX);
    let total = match (matched, limit) {
        (0, _) => None,
        (matched, Some(limit)) => Some(matched.min(limit)),
        (matched, None) => Some(matched),
    };
    let position = total.map_or_else(
        || format!("[{}]", stats.processed()),
        |total| format!("[{}/{}]", stats.processed().min(total), total),
    );
    format!(
        "{position} {}... (saved {}, skipped {}, images {})",
        stats.phase(),
        stats.saved(),
        stats.skipped(),
        stats.images_saved()
    )
}
