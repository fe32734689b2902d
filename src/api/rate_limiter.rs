//! Per-host request spacing and `Retry-After` parsing.
//!
//! The API and the image hosts are spaced independently: a burst of image
//! downloads from `img.esa.io` never delays the next search page on
//! `api.esa.io`.
//!
//! ```
//! use std::time::Duration;
//! use esa_export::api::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_millis(500));
//! limiter.acquire("https://api.esa.io/v1/teams/docs/posts?page=1").await;
//! // waits ~500ms
//! limiter.acquire("https://api.esa.io/v1/teams/docs/posts?page=2").await;
//! // different host, immediate
//! limiter.acquire("https://img.esa.io/uploads/a.png").await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Cumulative wait per host after which a warning is logged.
const EXCESSIVE_WAIT_THRESHOLD: Duration = Duration::from_secs(30);

/// Upper bound for any server-supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Enforces a minimum interval between requests to the same host.
///
/// Shared behind an `Arc` by the API client; `Send + Sync`.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    hosts: DashMap<String, Arc<HostSlot>>,
}

#[derive(Debug, Default)]
struct HostSlot {
    /// `None` until the first request; the first request never waits.
    last_request: Mutex<Option<Instant>>,
    waited_ms: AtomicU64,
}

impl HostSlot {
    fn add_wait(&self, wait: Duration) -> Duration {
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        let total = self
            .waited_ms
            .fetch_add(wait_ms, Ordering::SeqCst)
            .saturating_add(wait_ms);
        Duration::from_millis(total)
    }

    fn waited(&self) -> Duration {
        Duration::from_millis(self.waited_ms.load(Ordering::SeqCst))
    }
}

impl RateLimiter {
    /// Creates a limiter with `interval` between requests to one host.
    ///
    /// A zero interval disables spacing.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            hosts: DashMap::new(),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns true when no spacing is applied.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }

    /// Minimum interval between requests to one host.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time spent waiting on `host` so far (spacing plus recorded 429 waits).
    #[must_use]
    pub fn waited_on(&self, host: &str) -> Duration {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .map_or(Duration::ZERO, |slot| slot.waited())
    }

    /// Waits until a request to `url`'s host is allowed, then claims the slot.
    #[instrument(level = "trace", skip(self), fields(host))]
    pub async fn acquire(&self, url: &str) {
        if self.is_disabled() {
            return;
        }

        let host = host_of(url);
        tracing::Span::current().record("host", host.as_str());

        // Clone the Arc so the DashMap shard lock is not held across the await.
        let slot = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostSlot::default()))
            .clone();

        let mut last_request = slot.last_request.lock().await;
        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                let total = slot.add_wait(wait);
                debug!(host = %host, wait_ms = wait.as_millis(), total_ms = total.as_millis(), "spacing request");
                if total >= EXCESSIVE_WAIT_THRESHOLD {
                    warn!(host = %host, total_wait_secs = total.as_secs(), "excessive request spacing for host");
                }
                tokio::time::sleep(wait).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    /// Records a server-mandated wait (HTTP 429) against `url`'s host.
    pub fn record_rate_limit(&self, url: &str, wait: Duration) {
        let host = host_of(url);
        let slot = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| Arc::new(HostSlot::default()))
            .clone();
        let total = slot.add_wait(wait);
        debug!(host = %host, wait_ms = wait.as_millis(), total_ms = total.as_millis(), "server rate limit recorded");
        if total >= EXCESSIVE_WAIT_THRESHOLD {
            warn!(host = %host, total_wait_secs = total.as_secs(), "server keeps rate limiting this host");
        }
    }
}

/// Lowercase host of `url`, or `"unknown"` when it cannot be parsed.
///
/// ```
/// use esa_export::api::rate_limiter::host_of;
///
/// assert_eq!(host_of("https://API.esa.io/v1/teams"), "api.esa.io");
/// assert_eq!(host_of("http://127.0.0.1:8080/x"), "127.0.0.1");
/// assert_eq!(host_of("garbage"), "unknown");
/// ```
#[must_use]
pub fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a `Retry-After` value: delta seconds or an HTTP-date.
///
/// Dates in the past yield zero; anything above one hour is capped.
///
/// ```
/// use std::time::Duration;
/// use esa_export::api::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    let wait = if let Ok(seconds) = value.parse::<u64>() {
        Duration::from_secs(seconds)
    } else if let Ok(at) = httpdate::parse_http_date(value) {
        at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO)
    } else {
        debug!(value, "ignoring unparseable Retry-After");
        return None;
    };

    if wait > MAX_RETRY_AFTER {
        warn!(
            wait_secs = wait.as_secs(),
            "Retry-After above one hour, capping"
        );
        return Some(MAX_RETRY_AFTER);
    }
    Some(wait)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_limiter_never_waits() {
        tokio::time::pause();
        let limiter = RateLimiter::disabled();
        assert!(limiter.is_disabled());
        let start = Instant::now();
        for page in 1..=5 {
            limiter
                .acquire(&format!("https://api.esa.io/v1/teams/docs/posts?page={page}"))
                .await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_same_host_is_spaced() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();

        limiter.acquire("https://api.esa.io/v1/a").await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire("https://api.esa.io/v1/b").await;
        assert!(start.elapsed() >= Duration::from_millis(500));

        limiter.acquire("https://api.esa.io/v1/c").await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(limiter.waited_on("api.esa.io") >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        tokio::time::pause();
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire("https://api.esa.io/v1/a").await;

        let start = Instant::now();
        limiter.acquire("https://img.esa.io/uploads/a.png").await;
        limiter.acquire("https://files.esa.io/uploads/b.png").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[test]
    fn test_record_rate_limit_accumulates_per_host() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        limiter.record_rate_limit("https://api.esa.io/v1/a", Duration::from_secs(2));
        limiter.record_rate_limit("https://API.esa.io/v1/b", Duration::from_secs(3));
        limiter.record_rate_limit("https://img.esa.io/x.png", Duration::from_secs(1));

        assert_eq!(limiter.waited_on("api.esa.io"), Duration::from_secs(5));
        assert_eq!(limiter.waited_on("img.esa.io"), Duration::from_secs(1));
        assert_eq!(limiter.waited_on("files.esa.io"), Duration::ZERO);
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://api.esa.io/v1"), "api.esa.io");
        assert_eq!(host_of("https://IMG.ESA.IO/a.png"), "img.esa.io");
        assert_eq!(host_of("http://localhost:3000/x"), "localhost");
        assert_eq!(host_of(""), "unknown");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after("later"), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );

        let future = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(60));
        let wait = parse_retry_after(&future).unwrap();
        assert!(
            wait >= Duration::from_secs(55) && wait <= Duration::from_secs(61),
            "expected ~60s, got {wait:?}"
        );
    }
}
