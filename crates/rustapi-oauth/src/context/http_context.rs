use super::{ContextBag, CookieAttributes, RequestContext};
use crate::error::Result;
use cookie::{Cookie, CookieJar};
use http::header::{HeaderValue, COOKIE, LOCATION, SET_COOKIE};
use http::{HeaderMap, StatusCode};
use std::collections::HashMap;

/// [`RequestContext`] over an `http` request head.
///
/// Incoming cookies are parsed from the `Cookie` header; cookies set or
/// deleted during the call are tracked in a [`CookieJar`] delta and written
/// as `Set-Cookie` headers by [`apply`](Self::apply).
#[derive(Debug, Default)]
pub struct HttpContext {
    jar: CookieJar,
    query: HashMap<String, String>,
    bag: ContextBag,
    redirect: Option<(String, StatusCode)>,
}

impl HttpContext {
    /// Build from a query string and request headers.
    pub fn new(query: Option<&str>, headers: &HeaderMap) -> Self {
        let mut jar = CookieJar::new();
        for header in headers.get_all(COOKIE) {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            for cookie in Cookie::split_parse_encoded(raw.to_owned()).flatten() {
                jar.add_original(cookie);
            }
        }

        let query = query
            .and_then(|q| serde_urlencoded::from_str::<HashMap<String, String>>(q).ok())
            .unwrap_or_default();

        Self {
            jar,
            query,
            bag: ContextBag::new(),
            redirect: None,
        }
    }

    /// Build from the parts of an `http::Request`.
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        Self::new(parts.uri.query(), &parts.headers)
    }

    /// `Set-Cookie` values for every cookie added or removed.
    pub fn set_cookie_headers(&self) -> Vec<HeaderValue> {
        self.jar
            .delta()
            .filter_map(|cookie| HeaderValue::from_str(&cookie.encoded().to_string()).ok())
            .collect()
    }

    /// Pending redirect, if one was requested.
    pub fn redirect_target(&self) -> Option<(&str, StatusCode)> {
        self.redirect
            .as_ref()
            .map(|(location, status)| (location.as_str(), *status))
    }

    /// Write cookies and any redirect into a response.
    pub fn apply<B>(&self, response: &mut http::Response<B>) {
        for value in self.set_cookie_headers() {
            response.headers_mut().append(SET_COOKIE, value);
        }
        if let Some((location, status)) = &self.redirect {
            if let Ok(value) = HeaderValue::from_str(location) {
                *response.status_mut() = *status;
                response.headers_mut().insert(LOCATION, value);
            }
        }
    }
}

impl RequestContext for HttpContext {
    fn cookie(&self, name: &str) -> Option<String> {
        self.jar.get(name).map(|c| c.value().to_string())
    }

    fn set_cookie(&mut self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()> {
        self.jar.add(attributes.to_cookie(name, value));
        Ok(())
    }

    fn delete_cookie(&mut self, name: &str, attributes: &CookieAttributes) -> Result<()> {
        let mut removal = Cookie::build((name.to_owned(), "")).path(attributes.path.clone());
        if let Some(domain) = &attributes.domain {
            removal = removal.domain(domain.clone());
        }
        self.jar.remove(removal.build());
        Ok(())
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    fn bag(&self) -> &ContextBag {
        &self.bag
    }

    fn bag_mut(&mut self) -> &mut ContextBag {
        &mut self.bag
    }

    fn redirect(&mut self, url: &str, status: StatusCode) {
        self.redirect = Some((url.to_string(), status));
    }
}
