use crate::fetch::{FetchError, FetchRequest, HttpFetcher};
use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Matcher for outbound requests
#[derive(Debug, Clone, Default)]
pub struct RequestMatcher {
    pub(crate) method: Option<Method>,
    pub(crate) url: Option<String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) form_fields: Vec<(String, String)>,
}

impl RequestMatcher {
    /// Create a new matcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a specific HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Match an exact URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Match a specific header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Match a form-encoded body field
    pub fn form_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_fields.push((key.into(), value.into()));
        self
    }

    /// Check if the matcher matches a request
    pub fn matches(&self, request: &FetchRequest) -> bool {
        if let Some(m) = &self.method {
            if *m != request.method {
                return false;
            }
        }

        if let Some(url) = &self.url {
            if *url != request.url {
                return false;
            }
        }

        for (k, v) in &self.headers {
            let found = request
                .headers
                .iter()
                .any(|(name, value)| name.eq_ignore_ascii_case(k) && value == v);
            if !found {
                return false;
            }
        }

        if !self.form_fields.is_empty() {
            let form = request.form();
            for (k, v) in &self.form_fields {
                if form.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }
}

/// Define how many times an expectation should be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    /// Exactly one call
    Once,
    /// Exactly `n` calls
    Exactly(usize),
    /// At least `n` calls
    AtLeast(usize),
    /// At most `n` calls
    AtMost(usize),
    /// Any number of calls
    Any,
}

impl Times {
    fn exhausted(&self, calls: usize) -> bool {
        match *self {
            Times::Once => calls >= 1,
            Times::Exactly(n) | Times::AtMost(n) => calls >= n,
            Times::AtLeast(_) | Times::Any => false,
        }
    }
}

/// A mocked response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub(crate) status: StatusCode,
    pub(crate) body: Value,
    pub(crate) transport_error: Option<String>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            body: Value::Null,
            transport_error: None,
        }
    }
}

impl MockResponse {
    /// Empty 200 response
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-success response with a body
    pub fn error(status: u16, body: Value) -> Self {
        Self::new()
            .status(StatusCode::from_u16(status).unwrap())
            .json(body)
    }

    /// Fail the request without a response
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            transport_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Set the status
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Set the JSON body
    pub fn json(mut self, body: impl serde::Serialize) -> Self {
        self.body = serde_json::to_value(body).unwrap();
        self
    }

    fn to_result(&self) -> Result<Value, FetchError> {
        if let Some(message) = &self.transport_error {
            return Err(FetchError::Transport(message.clone()));
        }
        if !self.status.is_success() {
            return Err(FetchError::Status {
                status: self.status.as_u16(),
                body: self.body.clone(),
            });
        }
        Ok(self.body.clone())
    }
}

/// An expectation for a request
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) matcher: RequestMatcher,
    pub(crate) response: MockResponse,
    pub(crate) times: Times,
    pub(crate) call_count: usize,
}

impl Expectation {
    /// Create a new expectation
    pub fn new(matcher: RequestMatcher) -> Self {
        Self {
            matcher,
            response: MockResponse::default(),
            times: Times::Any,
            call_count: 0,
        }
    }
}

#[derive(Debug, Default)]
struct FetcherState {
    expectations: Vec<Expectation>,
    requests: Vec<FetchRequest>,
    unmatched_requests: Vec<FetchRequest>,
}

/// [`HttpFetcher`] answering from registered expectations.
///
/// Later expectations take priority; ones that reached their call limit are
/// skipped. Unmatched requests get a 404.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    state: Arc<Mutex<FetcherState>>,
}

impl MockFetcher {
    /// Create a fetcher with no expectations
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an expectation
    pub fn expect(&self, matcher: RequestMatcher) -> ExpectationBuilder {
        ExpectationBuilder {
            state: self.state.clone(),
            expectation: Some(Expectation::new(matcher)),
        }
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Number of requests received
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    /// Get requests that didn't match any expectation
    pub fn unmatched_requests(&self) -> Vec<FetchRequest> {
        self.state.lock().unwrap().unmatched_requests.clone()
    }

    /// Verify that all expectations were met
    pub fn verify(&self) {
        let state = self.state.lock().unwrap();
        for exp in &state.expectations {
            match exp.times {
                Times::Once => assert_eq!(
                    exp.call_count, 1,
                    "Expectation {:?} expected 1 call, got {}",
                    exp.matcher, exp.call_count
                ),
                Times::Exactly(n) => assert_eq!(
                    exp.call_count, n,
                    "Expectation {:?} expected {} calls, got {}",
                    exp.matcher, n, exp.call_count
                ),
                Times::AtLeast(n) => assert!(
                    exp.call_count >= n,
                    "Expectation {:?} expected at least {} calls, got {}",
                    exp.matcher,
                    n,
                    exp.call_count
                ),
                Times::AtMost(n) => assert!(
                    exp.call_count <= n,
                    "Expectation {:?} expected at most {} calls, got {}",
                    exp.matcher,
                    n,
                    exp.call_count
                ),
                Times::Any => {}
            }
        }
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<Value, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let matching_idx = state
            .expectations
            .iter()
            .enumerate()
            .rev()
            .find(|(_, exp)| !exp.times.exhausted(exp.call_count) && exp.matcher.matches(&request))
            .map(|(i, _)| i);

        match matching_idx {
            Some(idx) => {
                let exp = &mut state.expectations[idx];
                exp.call_count += 1;
                exp.response.to_result()
            }
            None => {
                state.unmatched_requests.push(request);
                Err(FetchError::Status {
                    status: 404,
                    body: Value::String("No expectation matched".into()),
                })
            }
        }
    }
}

/// Registers its expectation when dropped
pub struct ExpectationBuilder {
    state: Arc<Mutex<FetcherState>>,
    expectation: Option<Expectation>,
}

impl ExpectationBuilder {
    /// Set the response
    pub fn respond_with(mut self, response: MockResponse) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.response = response;
        }
        self
    }

    /// Expect exactly `n` calls
    pub fn times(mut self, n: usize) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.times = Times::Exactly(n);
        }
        self
    }

    /// Expect exactly one call
    pub fn once(mut self) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.times = Times::Once;
        }
        self
    }

    /// Expect at least one call
    pub fn at_least_once(mut self) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.times = Times::AtLeast(1);
        }
        self
    }

    /// Expect no calls
    pub fn never(mut self) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.times = Times::Exactly(0);
        }
        self
    }
}

impl Drop for ExpectationBuilder {
    fn drop(&mut self) {
        if let Some(exp) = self.expectation.take() {
            let mut state = self.state.lock().unwrap();
            state.expectations.push(exp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn method_strategy() -> impl Strategy<Value = Method> {
        prop_oneof![
            Just(Method::GET),
            Just(Method::POST),
            Just(Method::PUT),
            Just(Method::DELETE),
        ]
    }

    #[tokio::test]
    async fn test_exhausted_expectations_fall_through() {
        let fetcher = MockFetcher::new();
        fetcher
            .expect(RequestMatcher::new().url("https://a"))
            .respond_with(MockResponse::new().json(json!({"n": 1})))
            .once();

        assert_eq!(fetcher.fetch(FetchRequest::get("https://a")).await.unwrap()["n"], 1);
        let second = fetcher.fetch(FetchRequest::get("https://a")).await;
        assert!(matches!(second, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(fetcher.unmatched_requests().len(), 1);
        assert_eq!(fetcher.request_count(), 2);
        fetcher.verify();
    }

    #[tokio::test]
    async fn test_error_and_network_responses() {
        let fetcher = MockFetcher::new();
        fetcher
            .expect(RequestMatcher::new().url("https://down"))
            .respond_with(MockResponse::network_error("connection refused"));
        fetcher
            .expect(RequestMatcher::new().url("https://bad"))
            .respond_with(MockResponse::error(400, json!({"error": "invalid_request"})));

        assert!(matches!(
            fetcher.fetch(FetchRequest::get("https://down")).await,
            Err(FetchError::Transport(_))
        ));
        match fetcher.fetch(FetchRequest::get("https://bad")).await {
            Err(FetchError::Status { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body["error"], "invalid_request");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_empty_matcher_matches_all(
            method in method_strategy(),
            url in "https://[a-z]{3,8}\\.example\\.com/[a-z]{0,8}",
        ) {
            let mut request = FetchRequest::get(url);
            request.method = method;
            prop_assert!(RequestMatcher::new().matches(&request));
        }

        #[test]
        fn prop_form_field_matcher(code in "[A-Za-z0-9]{1,16}", other in "[A-Za-z0-9]{1,16}") {
            let request = FetchRequest::post_form("https://t", &[("code", code.clone())]);
            prop_assert!(RequestMatcher::new().form_field("code", code.clone()).matches(&request));
            if other != code {
                prop_assert!(!RequestMatcher::new().form_field("code", other).matches(&request));
            }
        }
    }
}
