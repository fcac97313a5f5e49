//! Test doubles for the two collaborators of the OAuth flow.
//!
//! [`MemoryContext`] stands in for the request/response transport and
//! [`MockFetcher`] for the outbound HTTP client.
//!
//! # Example
//!
//! ```rust
//! use rustapi_oauth::testing::{MockFetcher, MockResponse, RequestMatcher};
//! use serde_json::json;
//!
//! let fetcher = MockFetcher::new();
//! fetcher
//!     .expect(RequestMatcher::new().url("https://app.clio.com/oauth/token"))
//!     .respond_with(MockResponse::new().json(json!({"access_token": "clio-token"})))
//!     .once();
//! ```

mod context;
mod fetcher;

pub use context::MemoryContext;
pub use fetcher::{
    Expectation, ExpectationBuilder, MockFetcher, MockResponse, RequestMatcher, Times,
};
