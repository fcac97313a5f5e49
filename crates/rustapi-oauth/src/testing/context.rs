use crate::context::{ContextBag, CookieAttributes, RequestContext};
use crate::error::Result;
use http::StatusCode;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    attributes: CookieAttributes,
}

/// In-memory [`RequestContext`].
///
/// Cookies persist across [`next_request`](Self::next_request) the way a
/// browser would resend them; query, bag and redirect do not.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    cookies: BTreeMap<String, StoredCookie>,
    deleted: BTreeSet<String>,
    query: HashMap<String, String>,
    bag: ContextBag,
    redirect: Option<(String, StatusCode)>,
}

impl MemoryContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request cookie.
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(
            name.into(),
            StoredCookie {
                value: value.into(),
                attributes: CookieAttributes::default(),
            },
        );
        self
    }

    /// Add a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_query(name, value);
        self
    }

    /// Set a query parameter.
    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.query.insert(name.into(), value.into());
    }

    /// Attributes a cookie was last written with.
    pub fn cookie_attributes(&self, name: &str) -> Option<CookieAttributes> {
        self.cookies.get(name).map(|c| c.attributes.clone())
    }

    /// Names of all current cookies, sorted.
    pub fn cookie_names(&self) -> Vec<String> {
        self.cookies.keys().cloned().collect()
    }

    /// Whether a cookie was deleted during this request.
    pub fn was_deleted(&self, name: &str) -> bool {
        self.deleted.contains(name)
    }

    /// Redirect requested during this request.
    pub fn redirect_target(&self) -> Option<(&str, StatusCode)> {
        self.redirect
            .as_ref()
            .map(|(location, status)| (location.as_str(), *status))
    }

    /// A follow-up request from the same browser.
    pub fn next_request(&self) -> Self {
        Self {
            cookies: self.cookies.clone(),
            ..Self::default()
        }
    }
}

impl RequestContext for MemoryContext {
    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).map(|c| c.value.clone())
    }

    fn set_cookie(&mut self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()> {
        self.deleted.remove(name);
        self.cookies.insert(
            name.to_string(),
            StoredCookie {
                value: value.to_string(),
                attributes: attributes.clone(),
            },
        );
        Ok(())
    }

    fn delete_cookie(&mut self, name: &str, _attributes: &CookieAttributes) -> Result<()> {
        self.cookies.remove(name);
        self.deleted.insert(name.to_string());
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
