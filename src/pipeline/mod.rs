//! Pipeline orchestration: search → fetch → transform images → persist.
//!
//! [`Exporter::run`] walks search pages in order, handles one document at a
//! time and returns a [`RunReport`]. Live counters are exposed through
//! [`RunStats`] for the progress spinner.

mod orchestrator;
mod report;

pub use orchestrator::{DEFAULT_OUTPUT_DIR, ExportError, ExportOptions, Exporter};
pub use report::{PlannedDocument, RunOutcome, RunPhase, RunReport, RunStats, SkippedDocument};
