//! Exit code logic for the export process.
//!
//! Single responsibility: map a finished run report to the process exit outcome.

use esa_export::{RunOutcome, RunReport};

use crate::ProcessExit;

/// Determines the process exit outcome from a finished run.
pub(crate) fn determine_exit_outcome(report: &RunReport) -> ProcessExit {
    if report.outcome == RunOutcome::Interrupted {
        return ProcessExit::Failure;
    }
    let saved = report.saved();
    let skipped = report.skipped.len();
    if skipped == 0 {
        ProcessExit::Success
    } else if saved > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
