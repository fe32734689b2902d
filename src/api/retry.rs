//! Retry state machine for API calls.
//!
//! Every outbound call owns one [`RetryState`]. After each failed attempt the
//! failure is classified into a [`FailureType`] and fed to
//! [`RetryState::on_failure`], which answers with a [`RetryDecision`]:
//!
//! - [`FailureType::Transient`] (transport errors, 408, 5xx): linear backoff,
//!   `transient_delay × failures` plus jitter, bounded by
//!   `max_transient_attempts`.
//! - [`FailureType::RateLimited`] (429): exponential backoff
//!   `base × 2^(n-1)`, raised to the server's `Retry-After` hint when larger,
//!   capped at `max_rate_limit_wait`, bounded by `max_rate_limit_attempts`.
//! - Everything else is final on the first attempt.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use esa_export::api::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default().with_jitter(Duration::ZERO);
//! let mut state = policy.start();
//!
//! match state.on_failure(FailureType::RateLimited, Some(Duration::from_secs(3))) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(3));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Default number of attempts for transient failures (initial attempt included).
pub const DEFAULT_MAX_TRANSIENT_ATTEMPTS: u32 = 3;

/// Default number of attempts for rate-limited responses (initial attempt included).
pub const DEFAULT_MAX_RATE_LIMIT_ATTEMPTS: u32 = 5;

/// Default linear backoff step for transient failures.
const DEFAULT_TRANSIENT_DELAY: Duration = Duration::from_millis(500);

/// Default first wait after a 429.
const DEFAULT_RATE_LIMIT_BASE: Duration = Duration::from_secs(1);

/// Default cap on a single 429 wait.
const DEFAULT_MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Default upper bound of the random jitter added to transient delays.
const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(250);

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeout, connection failure, 408 or 5xx. May succeed on retry.
    Transient,

    /// HTTP 429. Retried with exponential backoff.
    RateLimited,

    /// HTTP 401. The token is wrong; retrying cannot help.
    Unauthorized,

    /// HTTP 403/404. The resource is gone or hidden.
    NotFound,

    /// Any other status the server will keep returning.
    Permanent,
}

impl FailureType {
    /// Returns true when the failure type is ever worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Decision after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt` (1-indexed).
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
        /// Number of the attempt about to be made.
        attempt: u32,
    },

    /// Stop and surface the failure.
    DoNotRetry {
        /// Why the call ends here.
        reason: String,
    },
}

/// Classifies an HTTP status code.
///
/// | Status | Type |
/// |--------|------|
/// | 401 | Unauthorized |
/// | 403, 404 | NotFound |
/// | 408 | Transient |
/// | 429 | RateLimited |
/// | other 4xx | Permanent |
/// | 5xx | Transient |
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn classify_status(status: u16) -> FailureType {
    match status {
        401 => FailureType::Unauthorized,
        403 | 404 => FailureType::NotFound,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Retry limits and delays shared by every call a client makes.
///
/// # Default Values
///
/// - `max_transient_attempts`: 3
/// - `transient_delay`: 500ms (linear)
/// - `max_rate_limit_attempts`: 5
/// - `rate_limit_base`: 1s (exponential)
/// - `max_rate_limit_wait`: 60s
/// - `max_jitter`: 250ms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_transient_attempts: u32,
    transient_delay: Duration,
    max_rate_limit_attempts: u32,
    rate_limit_base: Duration,
    max_rate_limit_wait: Duration,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_attempts: DEFAULT_MAX_TRANSIENT_ATTEMPTS,
            transient_delay: DEFAULT_TRANSIENT_DELAY,
            max_rate_limit_attempts: DEFAULT_MAX_RATE_LIMIT_ATTEMPTS,
            rate_limit_base: DEFAULT_RATE_LIMIT_BASE,
            max_rate_limit_wait: DEFAULT_MAX_RATE_LIMIT_WAIT,
            max_jitter: DEFAULT_MAX_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Sets the maximum attempts for transient failures (minimum 1).
    #[must_use]
    pub fn with_max_transient_attempts(mut self, attempts: u32) -> Self {
        self.max_transient_attempts = attempts.max(1);
        self
    }

    /// Sets the maximum attempts for rate-limited responses (minimum 1).
    #[must_use]
    pub fn with_max_rate_limit_attempts(mut self, attempts: u32) -> Self {
        self.max_rate_limit_attempts = attempts.max(1);
        self
    }

    /// Sets the linear backoff step for transient failures. Zero retries immediately.
    #[must_use]
    pub fn with_transient_delay(mut self, delay: Duration) -> Self {
        self.transient_delay = delay;
        self
    }

    /// Sets the exponential base and the cap for 429 waits.
    #[must_use]
    pub fn with_rate_limit_backoff(mut self, base: Duration, max_wait: Duration) -> Self {
        self.rate_limit_base = base;
        self.max_rate_limit_wait = max_wait.max(base);
        self
    }

    /// Sets the upper bound of the random jitter. Zero disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Maximum attempts for transient failures.
    #[must_use]
    pub fn max_transient_attempts(&self) -> u32 {
        self.max_transient_attempts
    }

    /// Maximum attempts for rate-limited responses.
    #[must_use]
    pub fn max_rate_limit_attempts(&self) -> u32 {
        self.max_rate_limit_attempts
    }

    /// Starts the retry state for one call.
    #[must_use]
    pub fn start(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempt: 1,
            transient_failures: 0,
            rate_limited_failures: 0,
            last_rate_limit_wait: Duration::ZERO,
        }
    }

    fn transient_delay_for(&self, failures: u32) -> Duration {
        if self.transient_delay.is_zero() {
            return Duration::ZERO;
        }
        self.transient_delay.saturating_mul(failures) + self.jitter()
    }

    fn rate_limit_backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.rate_limit_base
            .saturating_mul(1_u32 << exponent)
            .min(self.max_rate_limit_wait)
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Per-call retry bookkeeping; every call starts from a fresh state.
#[derive(Debug)]
pub struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
    transient_failures: u32,
    rate_limited_failures: u32,
    last_rate_limit_wait: Duration,
}

impl RetryState<'_> {
    /// Number of the attempt currently in flight (1-indexed).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failed attempt and decides what happens next.
    ///
    /// `retry_after` is the server's wait hint, only consulted for
    /// [`FailureType::RateLimited`].
    pub fn on_failure(
        &mut self,
        failure: FailureType,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        let decision = match failure {
            FailureType::Transient => {
                self.transient_failures += 1;
                if self.transient_failures >= self.policy.max_transient_attempts {
                    RetryDecision::DoNotRetry {
                        reason: format!(
                            "max transient attempts ({}) exhausted",
                            self.policy.max_transient_attempts
                        ),
                    }
                } else {
                    self.next(self.policy.transient_delay_for(self.transient_failures))
                }
            }
            FailureType::RateLimited => {
                self.rate_limited_failures += 1;
                if self.rate_limited_failures >= self.policy.max_rate_limit_attempts {
                    RetryDecision::DoNotRetry {
                        reason: format!(
                            "max rate-limited attempts ({}) exhausted",
                            self.policy.max_rate_limit_attempts
                        ),
                    }
                } else {
                    let backoff = self.policy.rate_limit_backoff_for(self.rate_limited_failures);
                    let wait = retry_after
                        .map_or(backoff, |hint| hint.max(backoff))
                        .min(self.policy.max_rate_limit_wait)
                        .max(self.last_rate_limit_wait);
                    self.last_rate_limit_wait = wait;
                    self.next(wait)
                }
            }
            FailureType::Unauthorized => RetryDecision::DoNotRetry {
                reason: "credentials rejected".to_string(),
            },
            FailureType::NotFound => RetryDecision::DoNotRetry {
                reason: "resource not found".to_string(),
            },
            FailureType::Permanent => RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            },
        };

        debug!(?failure, attempt = self.attempt, ?decision, "retry decision");
        decision
    }

    fn next(&mut self, delay: Duration) -> RetryDecision {
        self.attempt += 1;
        RetryDecision::Retry {
            delay,
            attempt: self.attempt,
        }
    }
}
