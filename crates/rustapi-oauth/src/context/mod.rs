//! Request-scoped collaborator: cookies, query parameters, a per-request
//! value bag, and a redirect primitive.
//!
//! Every OAuth operation works against a [`RequestContext`]. Transports
//! provide their own implementation; [`HttpContext`] covers anything built
//! on the `http` crate and [`MemoryContext`](crate::testing::MemoryContext)
//! is used in tests.

mod http_context;

pub use http_context::HttpContext;

use crate::error::Result;
use cookie::{Cookie, SameSite};
use http::StatusCode;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Prefix of bag entries holding injected access tokens.
pub const ACCESS_TOKEN_PREFIX: &str = "oauth.access_token.";

/// Access to the request/response pair of one call.
pub trait RequestContext: Send {
    /// Read a cookie sent with the request (or set earlier in this request).
    fn cookie(&self, name: &str) -> Option<String>;

    /// Set a cookie on the response.
    fn set_cookie(&mut self, name: &str, value: &str, attributes: &CookieAttributes)
        -> Result<()>;

    /// Delete a cookie. `attributes` supplies the path and domain to match.
    fn delete_cookie(&mut self, name: &str, attributes: &CookieAttributes) -> Result<()>;

    /// Read a query-string parameter.
    fn query_param(&self, name: &str) -> Option<String>;

    /// Per-request values visible to downstream handlers.
    fn bag(&self) -> &ContextBag;

    /// Mutable access to the per-request values.
    fn bag_mut(&mut self) -> &mut ContextBag;

    /// Answer the request with a redirect.
    fn redirect(&mut self, url: &str, status: StatusCode);
}

/// Attributes written with every cookie.
///
/// Defaults are secure: `HttpOnly`, `Secure`, `SameSite=Lax`, `Path=/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    /// Hide the cookie from scripts.
    pub http_only: bool,
    /// Only send over HTTPS.
    pub secure: bool,
    /// SameSite policy.
    pub same_site: SameSite,
    /// Cookie path.
    pub path: String,
    /// Cookie domain.
    pub domain: Option<String>,
    /// Lifetime; `None` for a session cookie.
    pub max_age: Option<Duration>,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            domain: None,
            max_age: None,
        }
    }
}

impl CookieAttributes {
    /// Set the lifetime.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Apply caller overrides on top of these attributes.
    pub fn merge(mut self, overrides: Option<&CookieOverrides>) -> Self {
        let Some(o) = overrides else {
            return self;
        };
        if let Some(http_only) = o.http_only {
            self.http_only = http_only;
        }
        if let Some(secure) = o.secure {
            self.secure = secure;
        }
        if let Some(same_site) = o.same_site {
            self.same_site = same_site;
        }
        if let Some(path) = &o.path {
            self.path = path.clone();
        }
        if let Some(domain) = &o.domain {
            self.domain = Some(domain.clone());
        }
        if let Some(max_age) = o.max_age {
            self.max_age = Some(max_age);
        }
        self
    }

    /// Build a `cookie::Cookie` carrying these attributes.
    pub fn to_cookie(&self, name: &str, value: &str) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_owned(), value.to_owned()))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site);

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(max_age) = self.max_age {
            let secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
            builder = builder.max_age(cookie::time::Duration::seconds(secs));
        }

        builder.build()
    }
}

/// Caller-supplied cookie attribute overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOverrides {
    /// Override `HttpOnly`.
    pub http_only: Option<bool>,
    /// Override `Secure`.
    pub secure: Option<bool>,
    /// Override `SameSite`.
    pub same_site: Option<SameSite>,
    /// Override `Path`.
    pub path: Option<String>,
    /// Set `Domain`.
    pub domain: Option<String>,
    /// Set `Max-Age`.
    pub max_age: Option<Duration>,
}

impl CookieOverrides {
    /// Create an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override `SameSite`.
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Override `Path`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set `Domain`.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Override `Secure`.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Override `HttpOnly`.
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = Some(http_only);
        self
    }

    /// Set `Max-Age`.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Mutable per-request value bag.
#[derive(Clone, Default)]
pub struct ContextBag {
    values: HashMap<String, Value>,
}

impl ContextBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Read a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Store the access token for a provider key.
    pub fn set_access_token(&mut self, provider_key: &str, token: impl Into<String>) {
        self.values.insert(
            format!("{}{}", ACCESS_TOKEN_PREFIX, provider_key),
            Value::String(token.into()),
        );
    }

    /// Access token injected for a provider key.
    pub fn access_token(&self, provider_key: &str) -> Option<&str> {
        self.values
            .get(&format!("{}{}", ACCESS_TOKEN_PREFIX, provider_key))
            .and_then(Value::as_str)
    }

    /// Every injected access token, keyed by provider key.
    pub fn access_tokens(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter_map(|(key, value)| {
                let provider_key = key.strip_prefix(ACCESS_TOKEN_PREFIX)?;
                Some((provider_key.to_string(), value.as_str()?.to_string()))
            })
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ContextBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("ContextBag").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_attributes_are_secure() {
        let attrs = CookieAttributes::default();
        assert!(attrs.http_only);
        assert!(attrs.secure);
        assert_eq!(attrs.same_site, SameSite::Lax);
        assert_eq!(attrs.path, "/");
    }

    #[test]
    fn test_overrides_merge_over_defaults() {
        let overrides = CookieOverrides::new()
            .same_site(SameSite::None)
            .path("/app");
        let attrs = CookieAttributes::default().merge(Some(&overrides));

        assert_eq!(attrs.same_site, SameSite::None);
        assert_eq!(attrs.path, "/app");
        assert!(attrs.http_only);
        assert!(attrs.secure);
    }

    #[test]
    fn test_to_cookie() {
        let cookie = CookieAttributes::default()
            .with_max_age(Duration::from_secs(300))
            .to_cookie("oauth_csrf_clio", "abc");
        let rendered = cookie.to_string();

        assert!(rendered.starts_with("oauth_csrf_clio=abc"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("Secure"));
        assert!(rendered.contains("SameSite=Lax"));
        assert!(rendered.contains("Max-Age=300"));
    }

    #[test]
    fn test_bag_access_tokens() {
        let mut bag = ContextBag::new();
        bag.set_access_token("clio", "clio-token");
        bag.set_access_token("azure:tenantA", "azure-token");
        bag.insert("unrelated", Value::Bool(true));

        assert_eq!(bag.access_token("clio"), Some("clio-token"));
        let tokens = bag.access_tokens();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens["azure:tenantA"], "azure-token");
        assert!(!format!("{:?}", bag).contains("clio-token"));
    }
}
