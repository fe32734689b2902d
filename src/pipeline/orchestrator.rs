//! The export loop: paginate search results, then fetch, transform and
//! persist each document in page order.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::report::{PlannedDocument, RunOutcome, RunPhase, RunReport, RunStats, SkippedDocument};
use crate::api::{ApiClient, ApiError, DocumentSummary, SearchQuery};
use crate::images::{AssetHosts, DEFAULT_IMAGE_CONCURRENCY, ImageTransformEngine};
use crate::persist::{DEFAULT_IO_TIMEOUT, DocumentPersister};

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "./esa_posts";

/// Errors that end a run early.
#[derive(Debug, Error)]
pub enum ExportError {
    /// A run-fatal API error (auth, rate limit exhausted, bad query, search failure).
    #[error("export aborted after {pages_requested} page(s), {saved} document(s) saved")]
    Aborted {
        /// The error that stopped the run.
        #[source]
        source: ApiError,
        /// Search pages requested before the abort.
        pages_requested: usize,
        /// Documents written before the abort.
        saved: usize,
    },
}

impl ExportError {
    /// The API error behind the abort.
    #[must_use]
    pub fn api_error(&self) -> &ApiError {
        match self {
            Self::Aborted { source, .. } => source,
        }
    }
}

/// Knobs for one export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Root directory of the exported tree.
    pub output_root: PathBuf,
    /// Maximum number of documents to handle; `None` for all.
    pub limit: Option<usize>,
    /// List targets without fetching bodies or writing anything.
    pub dry_run: bool,
    /// Put images in an `images/` directory next to each document.
    pub use_images_subdir: bool,
    /// Concurrent image downloads per document.
    pub image_concurrency: usize,
    /// Hosts whose images are downloaded.
    pub asset_hosts: AssetHosts,
    /// Bound for one file write.
    pub io_timeout: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            limit: None,
            dry_run: false,
            use_images_subdir: false,
            image_concurrency: DEFAULT_IMAGE_CONCURRENCY,
            asset_hosts: AssetHosts::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// Drives one export from search query to files on disk.
#[derive(Debug)]
pub struct Exporter {
    client: Arc<ApiClient>,
    options: ExportOptions,
    persister: DocumentPersister,
    images: ImageTransformEngine,
    stats: Arc<RunStats>,
    interrupted: Arc<AtomicBool>,
}

impl Exporter {
    /// Creates an exporter over `client`.
    #[must_use]
    pub fn new(client: Arc<ApiClient>, options: ExportOptions) -> Self {
        let interrupted = Arc::new(AtomicBool::new(false));
        let persister =
            DocumentPersister::new(&options.output_root).with_io_timeout(options.io_timeout);
        let images = ImageTransformEngine::new(Arc::clone(&client))
            .with_asset_hosts(options.asset_hosts.clone())
            .with_concurrency(options.image_concurrency)
            .with_io_timeout(options.io_timeout)
            .with_interrupt_flag(Arc::clone(&interrupted));
        Self {
            client,
            options,
            persister,
            images,
            stats: Arc::new(RunStats::new()),
            interrupted,
        }
    }

    /// Shares an externally owned interrupt flag (set by the Ctrl-C handler).
    #[must_use]
    pub fn with_interrupt_flag(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.images = self.images.with_interrupt_flag(Arc::clone(&interrupted));
        self.interrupted = interrupted;
        self
    }

    /// Live counters, for progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    /// Options this exporter was built with.
    #[must_use]
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Runs the export for `query`.
    ///
    /// Per-document problems (missing posts, exhausted transient errors,
    /// malformed bodies, write failures) are recorded in the report and the
    /// run continues.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Aborted`] when a search page cannot be fetched
    /// or a detail request fails with a run-fatal error.
    #[instrument(skip(self, query), fields(team = %query.team(), dry_run = self.options.dry_run))]
    pub async fn run(&self, query: &SearchQuery) -> Result<RunReport, ExportError> {
        let mut report = RunReport::new(self.options.dry_run);
        let mut remaining = self.options.limit;
        let mut page = 1_u32;

        info!(query = %query.raw_query(), limit = ?remaining, "starting export");

        let outcome = 'pages: loop {
            if self.is_interrupted() {
                break RunOutcome::Interrupted;
            }
            if remaining == Some(0) {
                break RunOutcome::LimitReached;
            }

            self.stats.set_phase(RunPhase::Searching);
            let results = match self.client.search(query, page).await {
                Ok(results) => results,
                Err(source) => return Err(self.abort(source, &report)),
            };
            self.stats.increment_pages();
            report.pages_requested += 1;
            if page == 1 {
                report.total_matched = results.total_count;
                self.stats.set_matched(results.total_count);
            }
            debug!(page, items = results.items.len(), "processing page");

            for summary in results.items {
                if remaining == Some(0) {
                    break 'pages RunOutcome::LimitReached;
                }
                if self.is_interrupted() {
                    break 'pages RunOutcome::Interrupted;
                }

                if let Err(source) = self.handle_document(query.team(), summary, &mut report).await {
                    return Err(self.abort(source, &report));
                }
                remaining = remaining.map(|n| n.saturating_sub(1));
            }

            match results.next_page {
                None => break RunOutcome::Completed,
                Some(_) if remaining == Some(0) => break RunOutcome::LimitReached,
                Some(next) if next <= page => {
                    warn!(page, next, "server returned a non-advancing next_page, stopping");
                    break RunOutcome::Completed;
                }
                Some(next) => page = next,
            }
        };

        report.outcome = outcome;
        report.images_saved = self.stats.images_saved();
        report.image_failures = self.stats.image_failures();
        self.stats.set_phase(RunPhase::Done);

        info!(
            outcome = ?outcome,
            matched = report.total_matched,
            pages = report.pages_requested,
            saved = report.saved(),
            skipped = report.skipped.len(),
            planned = report.planned.len(),
            images_saved = report.images_saved,
            image_failures = report.image_failures,
            "export finished"
        );
        Ok(report)
    }

    /// Handles one summary; `Err` only for run-fatal API errors.
    async fn handle_document(
        &self,
        team: &str,
        summary: DocumentSummary,
        report: &mut RunReport,
    ) -> Result<(), ApiError> {
        self.stats.increment_processed();

        if self.options.dry_run {
            let target_path = self
                .persister
                .target_path(summary.id, &summary.title, &summary.category);
            info!(id = summary.id, title = %summary.title, path = %target_path.display(), "would save");
            report.planned.push(PlannedDocument {
                id: summary.id,
                title: summary.title,
                target_path,
            });
            return Ok(());
        }

        self.stats.set_phase(RunPhase::Fetching);
        let document = match self.client.fetch_detail(team, summary.id).await {
            Ok(document) => document,
            Err(error) if error.is_run_fatal() => return Err(error),
            Err(error) => {
                self.skip(report, &summary, error.to_string());
                return Ok(());
            }
        };

        let target_dir = self.persister.target_dir(&document.summary.category);

        self.stats.set_phase(RunPhase::Transforming);
        let transformed = self
            .images
            .process(&document.body_markup, &target_dir, self.options.use_images_subdir)
            .await;
        self.stats
            .add_images(transformed.saved.len(), transformed.real_failures());
        let document = document.with_markup(transformed.markup);

        self.stats.set_phase(RunPhase::Persisting);
        match self.persister.save(&document, &target_dir).await {
            Ok(path) => {
                info!(id = document.summary.id, path = %path.display(), "saved");
                self.stats.increment_saved();
                report.saved_paths.push(path);
            }
            Err(error) => self.skip(report, &document.summary, error.to_string()),
        }
        Ok(())
    }

    fn skip(&self, report: &mut RunReport, summary: &DocumentSummary, reason: String) {
        warn!(id = summary.id, title = %summary.title, reason = %reason, "document skipped");
        self.stats.increment_skipped();
        report.skipped.push(SkippedDocument {
            id: summary.id,
            title: summary.title.clone(),
            reason,
        });
    }

    fn abort(&self, source: ApiError, report: &RunReport) -> ExportError {
        self.stats.set_phase(RunPhase::Aborted);
        warn!(error = %source, "aborting export");
        ExportError::Aborted {
            source,
            pages_requested: report.pages_requested,
            saved: report.saved(),
        }
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::api::{
        AccessToken, HttpExecutor, HttpRequest, HttpResponse, RateLimiter, RetryPolicy,
        TransportError,
    };

    /// Answers by request path (plus `page` for searches) and counts calls.
    #[derive(Default)]
    struct RoutedExecutor {
        routes: HashMap<String, HttpResponse>,
        calls: Mutex<Vec<String>>,
    }

    impl RoutedExecutor {
        fn route(mut self, key: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
            self.routes
                .insert(key.to_string(), HttpResponse::new(status, body));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpExecutor for RoutedExecutor {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let url = request.full_url()?;
            let page = url
                .query_pairs()
                .find(|(k, _)| k == "page")
                .map(|(_, v)| format!("?page={v}"))
                .unwrap_or_default();
            let key = format!("{}{page}", url.path());
            self.calls.lock().unwrap().push(key.clone());
            Ok(self
                .routes
                .get(&key)
                .cloned()
                .unwrap_or_else(|| HttpResponse::new(404, "{}")))
        }
    }

    fn search_page(ids: &[u64], next_page: Option<u32>, total: u64) -> String {
        let posts: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"number": {id}, "name": "post {id}", "category": "dev/notes"}}"#))
            .collect();
        let next = next_page.map_or_else(|| "null".to_string(), |n| n.to_string());
        format!(
            r#"{{"posts": [{}], "next_page": {next}, "total_count": {total}}}"#,
            posts.join(",")
        )
    }

    fn detail(id: u64) -> String {
        format!(
            r#"{{"number": {id}, "name": "post {id}", "category": "dev/notes", "tags": ["a"], "body_md": "hello {id}"}}"#
        )
    }

    fn exporter(executor: Arc<RoutedExecutor>, options: ExportOptions) -> Exporter {
        let client = ApiClient::new(executor, "https://api.esa.io", AccessToken::new("t"))
            .unwrap()
            .with_rate_limiter(Arc::new(RateLimiter::disabled()))
            .with_retry_policy(
                RetryPolicy::default()
                    .with_jitter(Duration::ZERO)
                    .with_transient_delay(Duration::ZERO),
            );
        Exporter::new(Arc::new(client), options)
    }

    fn options(dir: &TempDir) -> ExportOptions {
        ExportOptions {
            output_root: dir.path().to_path_buf(),
            ..ExportOptions::default()
        }
    }

    const POSTS: &str = "/v1/teams/docs/posts";

    #[tokio::test]
    async fn test_run_saves_every_document_across_pages() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(
            RoutedExecutor::default()
                .route(&format!("{POSTS}?page=1"), 200, search_page(&[1, 2], Some(2), 3))
                .route(&format!("{POSTS}?page=2"), 200, search_page(&[3], None, 3))
                .route(&format!("{POSTS}/1"), 200, detail(1))
                .route(&format!("{POSTS}/2"), 200, detail(2))
                .route(&format!("{POSTS}/3"), 200, detail(3)),
        );
        let exporter = exporter(executor.clone(), options(&dir));

        let report = exporter.run(&SearchQuery::new("docs").unwrap()).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.total_matched, 3);
        assert_eq!(report.pages_requested, 2);
        assert_eq!(report.saved(), 3);
        assert!(!report.is_partial());
        let first = dir.path().join("dev").join("notes").join("1_post 1.md");
        assert_eq!(report.saved_paths[0], first);
        let text = std::fs::read_to_string(first).unwrap();
        assert!(text.ends_with("hello 1"));
        assert_eq!(exporter.stats().phase(), RunPhase::Done);
    }

    #[tokio::test]
    async fn test_limit_stops_without_requesting_more_pages() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(
            RoutedExecutor::default()
                .route(&format!("{POSTS}?page=1"), 200, search_page(&[1, 2], Some(2), 4))
                .route(&format!("{POSTS}/1"), 200, detail(1))
                .route(&format!("{POSTS}/2"), 200, detail(2)),
        );
        let exporter = exporter(
            executor.clone(),
            ExportOptions {
                limit: Some(2),
                ..options(&dir)
            },
        );

        let report = exporter.run(&SearchQuery::new("docs").unwrap()).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::LimitReached);
        assert_eq!(report.saved(), 2);
        assert!(!executor.calls().iter().any(|c| c.ends_with("?page=2")));
    }

    #[tokio::test]
    async fn test_missing_detail_is_skipped_and_run_continues() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(
            RoutedExecutor::default()
                .route(&format!("{POSTS}?page=1"), 200, search_page(&[1, 2], None, 2))
                .route(&format!("{POSTS}/2"), 200, detail(2)),
        );
        let exporter = exporter(executor, options(&dir));

        let report = exporter.run(&SearchQuery::new("docs").unwrap()).await.unwrap();

        assert_eq!(report.saved(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].id, 1);
        assert!(report.is_partial());
    }

    #[tokio::test]
    async fn test_auth_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RoutedExecutor::default().route(
            &format!("{POSTS}?page=1"),
            401,
            "{}",
        ));
        let exporter = exporter(executor, options(&dir));

        let error = exporter
            .run(&SearchQuery::new("docs").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(error.api_error(), ApiError::Auth { .. }));
        assert_eq!(exporter.stats().phase(), RunPhase::Aborted);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_fetching_details() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RoutedExecutor::default().route(
            &format!("{POSTS}?page=1"),
            200,
            search_page(&[7], None, 1),
        ));
        let exporter = exporter(
            executor.clone(),
            ExportOptions {
                dry_run: true,
                ..options(&dir)
            },
        );

        let report = exporter.run(&SearchQuery::new("docs").unwrap()).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.planned.len(), 1);
        assert_eq!(
            report.planned[0].target_path,
            dir.path().join("dev").join("notes").join("7_post 7.md")
        );
        assert_eq!(executor.calls().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_before_start_requests_nothing() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RoutedExecutor::default());
        let flag = Arc::new(AtomicBool::new(true));
        let exporter = exporter(executor.clone(), options(&dir)).with_interrupt_flag(flag);

        let report = exporter.run(&SearchQuery::new("docs").unwrap()).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Interrupted);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_requests_nothing() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RoutedExecutor::default());
        let exporter = exporter(
            executor.clone(),
            ExportOptions {
                limit: Some(0),
                ..options(&dir)
            },
        );

        let report = exporter.run(&SearchQuery::new("docs").unwrap()).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::LimitReached);
        assert_eq!(report.pages_requested, 0);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_advancing_next_page_stops() {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(
            RoutedExecutor::default()
                .route(&format!("{POSTS}?page=1"), 200, search_page(&[1], Some(1), 5))
                .route(&format!("{POSTS}/1"), 200, detail(1)),
        );
        let exporter = exporter(executor.clone(), options(&dir));

        let report = exporter.run(&SearchQuery::new("docs").unwrap()).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.pages_requested, 1);
    }
}
