//! Run configuration: one explicit context object built from CLI arguments
//! and validated before any network call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::api::{
    AccessToken, ApiClient, ApiError, CONNECT_TIMEOUT_SECS, DEFAULT_API_BASE_URL,
    DEFAULT_MAX_RATE_LIMIT_ATTEMPTS, DEFAULT_MAX_TRANSIENT_ATTEMPTS, MAX_PAGE_SIZE,
    READ_TIMEOUT_SECS, RateLimiter, ReqwestExecutor, RetryPolicy, SearchQuery, SortKey, SortOrder,
};
use crate::images::{AssetHosts, DEFAULT_ASSET_HOSTS, DEFAULT_IMAGE_CONCURRENCY};
use crate::persist::DEFAULT_IO_TIMEOUT;
use crate::pipeline::{DEFAULT_OUTPUT_DIR, ExportOptions};

/// Environment variable holding the API access token.
pub const TOKEN_ENV_VAR: &str = "ESA_ACCESS_TOKEN";

/// Default minimum delay between requests to one host, in milliseconds.
pub const DEFAULT_REQUEST_INTERVAL_MS: u64 = 500;

/// Upper bound for `request_interval_ms`.
pub const MAX_REQUEST_INTERVAL_MS: u64 = 60_000;

/// Upper bound for `image_concurrency`.
pub const MAX_IMAGE_CONCURRENCY: u8 = 32;

/// Upper bound for both retry budgets.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Errors raised while validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No token was supplied.
    #[error(
        "What: Missing access token\nWhy: {TOKEN_ENV_VAR} is not set\nFix: export {TOKEN_ENV_VAR}=<token> or pass --token"
    )]
    MissingToken,

    /// The team name cannot appear in an API path.
    #[error(
        "What: Invalid team name '{team}'\nWhy: team names use ASCII letters, digits and '-'\nFix: pass the subdomain of <team>.esa.io"
    )]
    InvalidTeam {
        /// The rejected team name.
        team: String,
    },

    /// A numeric option is outside its accepted range.
    #[error("What: Invalid {name} ({value})\nWhy: accepted range is {min}..={max}")]
    OutOfRange {
        /// Option name as shown on the command line.
        name: &'static str,
        /// The rejected value.
        value: u64,
        /// Smallest accepted value.
        min: u64,
        /// Largest accepted value.
        max: u64,
    },

    /// The API base URL is unusable.
    #[error("What: Invalid API base URL '{url}'\nWhy: {reason}")]
    InvalidBaseUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error(transparent)]
    Client(#[from] ApiError),
}

/// Everything one export run needs.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Team subdomain.
    pub team: String,
    /// Access token.
    pub token: AccessToken,
    /// API base URL.
    pub api_base_url: String,
    /// Root of the exported tree.
    pub output_root: PathBuf,
    /// Raw search query; empty exports every post.
    pub query: String,
    /// Search results per page.
    pub per_page: u8,
    /// Sort key.
    pub sort: SortKey,
    /// Sort order.
    pub order: SortOrder,
    /// Maximum documents to handle.
    pub limit: Option<usize>,
    /// List targets only.
    pub dry_run: bool,
    /// Put images in an `images/` directory.
    pub use_images_subdir: bool,
    /// Concurrent image downloads per document.
    pub image_concurrency: usize,
    /// Hosts whose images are downloaded; empty accepts every host.
    pub asset_hosts: Vec<String>,
    /// Per-attempt network timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts for transient failures.
    pub max_retries: u32,
    /// Attempts for rate-limited responses.
    pub rate_limit_retries: u32,
    /// Minimum delay between requests to one host; 0 disables spacing.
    pub request_interval_ms: u64,
}

impl ExportConfig {
    /// Creates a configuration with defaults for everything but team and token.
    #[must_use]
    pub fn new(team: impl Into<String>, token: AccessToken) -> Self {
        Self {
            team: team.into(),
            token,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            query: String::new(),
            per_page: MAX_PAGE_SIZE,
            sort: SortKey::default(),
            order: SortOrder::default(),
            limit: None,
            dry_run: false,
            use_images_subdir: false,
            image_concurrency: DEFAULT_IMAGE_CONCURRENCY,
            asset_hosts: DEFAULT_ASSET_HOSTS.iter().map(ToString::to_string).collect(),
            timeout_secs: READ_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_TRANSIENT_ATTEMPTS,
            rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_ATTEMPTS,
            request_interval_ms: DEFAULT_REQUEST_INTERVAL_MS,
        }
    }

    /// Checks every field that could fail later in the run.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_blank() {
            return Err(ConfigError::MissingToken);
        }
        if SearchQuery::new(self.team.clone()).is_err() {
            return Err(ConfigError::InvalidTeam {
                team: self.team.clone(),
            });
        }
        check_range("--per-page", u64::from(self.per_page), 1, u64::from(MAX_PAGE_SIZE))?;
        check_range(
            "--image-concurrency",
            u64::try_from(self.image_concurrency).unwrap_or(u64::MAX),
            1,
            u64::from(MAX_IMAGE_CONCURRENCY),
        )?;
        check_range("--max-retries", u64::from(self.max_retries), 1, u64::from(MAX_RETRY_ATTEMPTS))?;
        check_range(
            "--rate-limit-retries",
            u64::from(self.rate_limit_retries),
            1,
            u64::from(MAX_RETRY_ATTEMPTS),
        )?;
        check_range("--request-interval", self.request_interval_ms, 0, MAX_REQUEST_INTERVAL_MS)?;
        check_range("--timeout", self.timeout_secs, 1, 3600)?;

        match url::Url::parse(&self.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            Ok(url) => Err(ConfigError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: format!("scheme '{}' is not http(s)", url.scheme()),
            }),
            Err(e) => Err(ConfigError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Builds the search query.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTeam`] for an unusable team name.
    pub fn search_query(&self) -> Result<SearchQuery, ConfigError> {
        let query = SearchQuery::new(self.team.clone()).map_err(|_| ConfigError::InvalidTeam {
            team: self.team.clone(),
        })?;
        Ok(query
            .with_query(self.query.clone())
            .with_page_size(self.per_page)
            .with_sort(self.sort, self.order))
    }

    /// Builds the pipeline options.
    #[must_use]
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            output_root: self.output_root.clone(),
            limit: self.limit,
            dry_run: self.dry_run,
            use_images_subdir: self.use_images_subdir,
            image_concurrency: self.image_concurrency,
            asset_hosts: AssetHosts::new(self.asset_hosts.iter().map(String::as_str)),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Retry policy from the configured budgets.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_transient_attempts(self.max_retries)
            .with_max_rate_limit_attempts(self.rate_limit_retries)
    }

    /// Per-host request spacing.
    #[must_use]
    pub fn rate_limiter(&self) -> RateLimiter {
        if self.request_interval_ms == 0 {
            debug!("request spacing disabled");
            RateLimiter::disabled()
        } else {
            RateLimiter::new(Duration::from_millis(self.request_interval_ms))
        }
    }

    /// Builds the production API client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Client`] when the HTTP client cannot be built
    /// or the base URL is rejected.
    pub fn build_client(&self) -> Result<ApiClient, ConfigError> {
        let executor = ReqwestExecutor::with_timeouts(CONNECT_TIMEOUT_SECS, self.timeout_secs)?;
        let client = ApiClient::new(Arc::new(executor), &self.api_base_url, self.token.clone())?
            .with_retry_policy(self.retry_policy())
            .with_rate_limiter(Arc::new(self.rate_limiter()))
            .with_call_timeout(Duration::from_secs(self.timeout_secs.saturating_add(CONNECT_TIMEOUT_SECS)));
        Ok(client)
    }
}

fn check_range(name: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}
