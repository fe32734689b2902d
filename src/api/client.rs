//! Content API client: search pages, post details and raw asset bytes.
//!
//! All three operations share one retry loop ([`ApiClient::execute_with_retry`])
//! that spaces requests per host, bounds each attempt with a timeout and
//! drives a fresh [`RetryState`](super::retry::RetryState) per call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use url::Url;

use super::error::{ApiError, TransportError};
use super::executor::{AccessToken, HttpExecutor, HttpRequest, HttpResponse};
use super::models::{self, DocumentBody, SearchPage, SearchQuery};
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_status};

/// Default public API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.esa.io";

/// Default minimum interval between requests to one host.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(500);

/// Default upper bound for a single attempt, body included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Client for the content API.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ApiClient {
    executor: Arc<dyn HttpExecutor>,
    base_url: Url,
    token: AccessToken,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    call_timeout: Duration,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token)
            .field("retry_policy", &self.retry_policy)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client with default retry, spacing and timeout settings.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidQuery`] when `base_url` is not an absolute
    /// http(s) URL.
    pub fn new(
        executor: Arc<dyn HttpExecutor>,
        base_url: &str,
        token: AccessToken,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::invalid_query(format!("API base URL '{base_url}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::invalid_query(format!(
                "API base URL must be http(s), got '{base_url}'"
            )));
        }
        Ok(Self {
            executor,
            base_url,
            token,
            retry_policy: RetryPolicy::default(),
            rate_limiter: Arc::new(RateLimiter::new(DEFAULT_REQUEST_INTERVAL)),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Replaces the request spacing limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// API base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Fetches one page of search results (`page` is 1-indexed).
    ///
    /// # Errors
    ///
    /// - [`ApiError::InvalidQuery`] for `page == 0`
    /// - [`ApiError::Auth`] on 401
    /// - [`ApiError::RateLimitExceeded`] / [`ApiError::Transient`] when retries run out
    /// - [`ApiError::Protocol`] when the body is not a search page
    #[instrument(skip(self, query), fields(team = %query.team()))]
    pub async fn search(&self, query: &SearchQuery, page: u32) -> Result<SearchPage, ApiError> {
        if page == 0 {
            return Err(ApiError::invalid_query("page numbers start at 1"));
        }

        let url = format!("{}/v1/teams/{}/posts", self.base_url(), query.team());
        let mut request = self.authorized(HttpRequest::get(&url));
        if !query.raw_query().is_empty() {
            request = request.query_param("q", query.raw_query());
        }
        let request = request
            .query_param("page", page.to_string())
            .query_param("per_page", query.page_size().to_string())
            .query_param("sort", query.sort_key().as_str())
            .query_param("order", query.sort_order().as_str());

        let response = self.execute_with_retry(&request).await?;
        let page_result = models::parse_search_page(&url, &response.body)?;
        debug!(
            items = page_result.items.len(),
            next_page = ?page_result.next_page,
            total_count = page_result.total_count,
            "search page received"
        );
        Ok(page_result)
    }

    /// Fetches the full post `id` of `team`.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] for 403/404; otherwise as [`ApiClient::search`].
    #[instrument(skip(self))]
    pub async fn fetch_detail(&self, team: &str, id: u64) -> Result<DocumentBody, ApiError> {
        let url = format!("{}/v1/teams/{team}/posts/{id}", self.base_url());
        let request = self.authorized(HttpRequest::get(&url));
        let response = self.execute_with_retry(&request).await?;
        models::parse_document_body(&url, &response.body)
    }

    /// Downloads raw bytes (image assets) with the same retry policy.
    ///
    /// The access token is only sent when `url` has the same origin as the API.
    ///
    /// # Errors
    ///
    /// As [`ApiClient::search`]; an unparseable URL is a [`ApiError::Protocol`] error.
    #[instrument(skip(self))]
    pub async fn retrieve_bytes(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let parsed = Url::parse(url).map_err(|_| ApiError::protocol(url, "invalid URL"))?;
        let mut request = HttpRequest::get(url);
        if parsed.origin() == self.base_url.origin() {
            request = self.authorized(request);
        }
        let response = self.execute_with_retry(&request).await?;
        Ok(response.body)
    }

    fn authorized(&self, request: HttpRequest) -> HttpRequest {
        request
            .header("Authorization", self.token.bearer_header())
            .header("Accept", "application/json")
    }

    /// Runs `request` until it succeeds or the retry policy gives up.
    async fn execute_with_retry(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let url = request.url.as_str();
        let mut state = self.retry_policy.start();

        loop {
            self.rate_limiter.acquire(url).await;
            debug!(?request, attempt = state.attempt(), "sending request");

            let outcome =
                match tokio::time::timeout(self.call_timeout, self.executor.execute(request)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::timeout(url)),
                };

            let (failure, retry_after, detail) = match outcome {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status;
                    match classify_status(status) {
                        FailureType::Unauthorized => return Err(ApiError::auth(url, status)),
                        FailureType::NotFound => return Err(ApiError::not_found(url, status)),
                        FailureType::Permanent => return Err(ApiError::http_status(url, status)),
                        failure => (
                            failure,
                            response.header("retry-after").and_then(parse_retry_after),
                            format!("HTTP {status}"),
                        ),
                    }
                }
                Err(TransportError::InvalidUrl { url }) => {
                    return Err(ApiError::protocol(url, "invalid URL"));
                }
                Err(error) => (FailureType::Transient, None, error.to_string()),
            };

            match state.on_failure(failure, retry_after) {
                RetryDecision::Retry { delay, attempt } => {
                    if failure == FailureType::RateLimited {
                        self.rate_limiter.record_rate_limit(url, delay);
                    }
                    warn!(
                        url,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        detail = %detail,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    let attempts = state.attempt();
                    debug!(url, attempts, reason = %reason, "giving up");
                    return Err(if failure == FailureType::RateLimited {
                        ApiError::RateLimitExceeded {
                            url: url.to_string(),
                            attempts,
                        }
                    } else {
                        ApiError::Transient {
                            url: url.to_string(),
                            attempts,
                            detail,
                        }
                    });
                }
            }
        }
    }
}
