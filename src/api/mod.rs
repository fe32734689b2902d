//! Content API access: typed models, the HTTP executor seam, retries and
//! per-host request spacing.
//!
//! The flow of one call:
//!
//! ```text
//! ApiClient::search / fetch_detail / retrieve_bytes
//!   └─ execute_with_retry
//!        ├─ RateLimiter::acquire(host)
//!        ├─ HttpExecutor::execute (bounded by the call timeout)
//!        └─ RetryState::on_failure → Retry { delay } | DoNotRetry
//! ```

mod client;
mod error;
mod executor;
mod models;
pub mod rate_limiter;
mod retry;

pub use client::{ApiClient, DEFAULT_API_BASE_URL, DEFAULT_CALL_TIMEOUT, DEFAULT_REQUEST_INTERVAL};
pub use error::{ApiError, TransportError};
pub use executor::{
    AccessToken, CONNECT_TIMEOUT_SECS, HttpExecutor, HttpRequest, HttpResponse, READ_TIMEOUT_SECS,
    ReqwestExecutor,
};
pub use models::{
    DocumentBody, DocumentSummary, MAX_PAGE_SIZE, ParseSortError, SearchPage, SearchQuery,
    SortKey, SortOrder,
};
pub use rate_limiter::RateLimiter;
pub use retry::{
    DEFAULT_MAX_RATE_LIMIT_ATTEMPTS, DEFAULT_MAX_TRANSIENT_ATTEMPTS, FailureType, RetryDecision,
    RetryPolicy, RetryState, classify_status,
};
