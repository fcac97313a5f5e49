//! Outbound HTTP used for code exchange, refresh and JWKS retrieval.
//!
//! The toolkit never talks to the network directly; it goes through an
//! [`HttpFetcher`]. [`ReqwestFetcher`] is the default implementation and
//! [`MockFetcher`](crate::testing::MockFetcher) is used in tests.

use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A single outbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Request body, already encoded
    pub body: Option<String>,
}

impl FetchRequest {
    /// Create a GET request expecting JSON.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
        }
    }

    /// Create a form-encoded POST request expecting JSON.
    pub fn post_form(url: impl Into<String>, params: &[(&str, String)]) -> Self {
        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Self {
            method: Method::POST,
            url: url.into(),
            headers: vec![
                (
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            body: Some(body),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Decode the form body into key/value pairs.
    pub fn form(&self) -> HashMap<String, String> {
        self.body
            .as_deref()
            .and_then(|body| serde_urlencoded::from_str(body).ok())
            .unwrap_or_default()
    }

    /// Look up a single form field.
    pub fn form_field(&self, name: &str) -> Option<String> {
        self.form().remove(name)
    }
}

/// Failure reported by an [`HttpFetcher`].
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// Response status code
        status: u16,
        /// Parsed JSON body, or the raw text as a JSON string
        body: Value,
    },

    /// The request could not be sent or the response not read.
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response whose body is not JSON.
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// Capability to perform an HTTP request and parse the JSON response.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Perform the request.
    async fn fetch(&self, request: FetchRequest) -> Result<Value, FetchError>;
}

/// Parse a response body: JSON when possible, otherwise the raw text.
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_fetcher::ReqwestFetcher;

#[cfg(feature = "reqwest")]
mod reqwest_fetcher {
    use super::{parse_body, FetchError, FetchRequest, HttpFetcher};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    /// [`HttpFetcher`] backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestFetcher {
        client: reqwest::Client,
    }

    impl ReqwestFetcher {
        /// Create a fetcher whose requests time out after `timeout`.
        pub fn new(timeout: Duration) -> Result<Self, FetchError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            Ok(Self { client })
        }

        /// Wrap an existing client.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpFetcher for ReqwestFetcher {
        async fn fetch(&self, request: FetchRequest) -> Result<Value, FetchError> {
            let mut builder = self.client.request(request.method.clone(), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    body: parse_body(&text),
                });
            }

            serde_json::from_str(&text).map_err(|e| FetchError::InvalidBody(e.to_string()))
        }
    }
}
