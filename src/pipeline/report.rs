//! Run counters, phases and the final run report.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use tracing::debug;

/// Where the orchestrator currently is.
///
/// `Idle → Searching → (Fetching → Transforming → Persisting)* → Done | Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunPhase {
    /// Not started.
    Idle = 0,
    /// Requesting a search page.
    Searching = 1,
    /// Requesting a post's full body.
    Fetching = 2,
    /// Downloading and relinking images.
    Transforming = 3,
    /// Writing the document.
    Persisting = 4,
    /// Finished normally, by limit or by interrupt.
    Done = 5,
    /// Stopped by a run-fatal error.
    Aborted = 6,
}

impl RunPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Searching,
            2 => Self::Fetching,
            3 => Self::Transforming,
            4 => Self::Persisting,
            5 => Self::Done,
            6 => Self::Aborted,
            _ => Self::Idle,
        }
    }

    /// Lowercase label for progress output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Fetching => "fetching",
            Self::Transforming => "images",
            Self::Persisting => "saving",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Live counters for one run, shared with the progress display.
#[derive(Debug, Default)]
pub struct RunStats {
    phase: AtomicU8,
    matched: AtomicU64,
    pages_requested: AtomicUsize,
    processed: AtomicUsize,
    saved: AtomicUsize,
    skipped: AtomicUsize,
    images_saved: AtomicUsize,
    image_failures: AtomicUsize,
}

impl RunStats {
    /// Creates zeroed counters in [`RunPhase::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Total matches reported by the server.
    #[must_use]
    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::SeqCst)
    }

    /// Search pages requested so far.
    #[must_use]
    pub fn pages_requested(&self) -> usize {
        self.pages_requested.load(Ordering::SeqCst)
    }

    /// Documents handled so far (saved, skipped or planned).
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Documents written.
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    /// Documents skipped.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Images written.
    #[must_use]
    pub fn images_saved(&self) -> usize {
        self.images_saved.load(Ordering::SeqCst)
    }

    /// Images left remote because of an error.
    #[must_use]
    pub fn image_failures(&self) -> usize {
        self.image_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn set_phase(&self, phase: RunPhase) {
        let previous = RunPhase::from_u8(self.phase.swap(phase as u8, Ordering::SeqCst));
        if previous != phase {
            debug!(from = %previous, to = %phase, "phase transition");
        }
    }

    pub(crate) fn set_matched(&self, matched: u64) {
        self.matched.store(matched, Ordering::SeqCst);
    }

    pub(crate) fn increment_pages(&self) {
        self.pages_requested.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_saved(&self) {
        self.saved.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_images(&self, saved: usize, failed: usize) {
        self.images_saved.fetch_add(saved, Ordering::SeqCst);
        self.image_failures.fetch_add(failed, Ordering::SeqCst);
    }
}

/// How a run that was not aborted ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every matching document was handled.
    Completed,
    /// The configured limit stopped the run with matches left.
    LimitReached,
    /// The interrupt flag stopped the run.
    Interrupted,
}

/// A document that was not saved, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    /// Post number.
    pub id: u64,
    /// Post title.
    pub title: String,
    /// Human-readable reason.
    pub reason: String,
}

/// A document a dry run would have written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDocument {
    /// Post number.
    pub id: u64,
    /// Post title.
    pub title: String,
    /// Path the document would be written to.
    pub target_path: PathBuf,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Whether nothing was fetched in full or written.
    pub dry_run: bool,
    /// Total matches reported by the server.
    pub total_matched: u64,
    /// Search pages requested.
    pub pages_requested: usize,
    /// Paths written, in processing order.
    pub saved_paths: Vec<PathBuf>,
    /// Documents skipped, in processing order.
    pub skipped: Vec<SkippedDocument>,
    /// Dry-run targets, in processing order.
    pub planned: Vec<PlannedDocument>,
    /// Images written.
    pub images_saved: usize,
    /// Images left remote because of an error.
    pub image_failures: usize,
}

impl RunReport {
    pub(crate) fn new(dry_run: bool) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            dry_run,
            total_matched: 0,
            pages_requested: 0,
            saved_paths: Vec::new(),
            skipped: Vec::new(),
            planned: Vec::new(),
            images_saved: 0,
            image_failures: 0,
        }
    }

    /// Documents written.
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved_paths.len()
    }

    /// True when at least one matching document was skipped.
    ///
    /// Image failures alone do not make a run partial: the document is still
    /// saved with its remote references.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}
