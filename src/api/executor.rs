//! HTTP executor seam between the API client and the network.
//!
//! The API client never touches reqwest directly; it builds an [`HttpRequest`]
//! and hands it to an [`HttpExecutor`]. Production code uses
//! [`ReqwestExecutor`]; tests can plug in scripted executors.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tracing::{debug, instrument};
use url::Url;

use super::error::{ApiError, TransportError};
use crate::user_agent;

/// Default connect timeout for API and image requests (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default read timeout for API and image requests (60 seconds).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Personal access token for the content API.
///
/// The token is only ever rendered by [`AccessToken::bearer_header`]; the
/// `Debug` output is redacted so it can never leak through log fields.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the `Authorization` header value.
    #[must_use]
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Returns true when the token is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// A single outbound request.
#[derive(Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Request headers as (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Query parameters, appended in order.
    pub query: Vec<(String, String)>,
}

impl HttpRequest {
    /// Creates a GET request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Returns the full URL including the encoded query string.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] when `url` cannot be parsed.
    pub fn full_url(&self) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.url).map_err(|_| TransportError::invalid_url(&self.url))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    /// Returns the value of the first header named `name` (case-insensitive).
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case("authorization") {
                    (name.as_str(), "Bearer ***")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("query", &self.query)
            .finish()
    }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header (stored lowercase).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Executes HTTP requests on behalf of the API client.
///
/// Implementations return `Ok` for every response that carries a status code,
/// including 4xx/5xx; only failures without a status surface as
/// [`TransportError`], which the client treats as retryable.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// Performs the request and buffers the full response body.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed executor used in production.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    /// Creates an executor with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Client`] when the reqwest client cannot be built.
    pub fn new() -> Result<Self, ApiError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates an executor with explicit timeouts in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Client`] when the reqwest client cannot be built.
    #[instrument(level = "debug")]
    pub fn with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(|source| ApiError::Client { source })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.full_url()?;
        let url_text = request.url.clone();

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timeout(&url_text)
            } else {
                TransportError::network(&url_text, e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timeout(&url_text)
            } else {
                TransportError::network(&url_text, e.to_string())
            }
        })?;

        debug!(status, bytes = body.len(), url = %url_text, "response received");

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}
