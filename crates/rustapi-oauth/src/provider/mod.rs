//! Provider configuration and registry
//!
//! A provider is registered once per family (`clio`) or per tenant instance
//! (`azure:contoso`). Each registration holds a [`ProviderConfig`] whose
//! [`ProviderKind`] resolves endpoints and the cookie field schema.
//!
//! # Example
//!
//! ```rust
//! use rustapi_oauth::provider::{ClioRegion, ProviderConfig, ProviderKind, ProviderRegistry};
//!
//! let registry = ProviderRegistry::new();
//! let config = ProviderConfig::new(
//!     ProviderKind::Clio { region: ClioRegion::Us },
//!     "client-id",
//!     "client-secret",
//!     "https://myapp.com/oauth/clio/callback",
//! )
//! .scopes(["read"]);
//!
//! let key = registry.register("clio", None, config).unwrap();
//! assert_eq!(key.to_string(), "clio");
//! ```

mod fields;
mod key;
mod kind;
mod registry;

pub use fields::{
    coerce_stored, parse_verbatim, serialize_default, serialize_space_joined, FieldDescriptor,
    Parser, Serializer,
};
pub(crate) use fields::value_text;
pub use key::{IntoProviderKey, ProviderKey};
pub use kind::{ClientAuth, ClioRegion, IntuitEnvironment, ProviderKind};
pub use registry::ProviderRegistry;

use crate::error::{OAuthError, Result};
use std::fmt;

/// Configuration for one registered provider.
///
/// Immutable once registered.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Provider preset (endpoints and field schema).
    pub kind: ProviderKind,
    /// Client ID issued by the provider.
    pub client_id: String,
    /// Client secret issued by the provider.
    pub client_secret: String,
    /// Redirect URI for the authorization callback.
    pub redirect_uri: String,
    /// Scopes to request.
    pub scopes: Vec<String>,
    /// Whether to use PKCE (Proof Key for Code Exchange).
    pub pkce: bool,
    /// Extra query parameters added to every authorization URL.
    pub authorize_params: Vec<(String, String)>,
}

impl ProviderConfig {
    /// Create a configuration with the preset's default scopes and PKCE setting.
    pub fn new(
        kind: ProviderKind,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            scopes: kind.default_scopes(),
            pkce: kind.supports_pkce(),
            kind,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            authorize_params: Vec::new(),
        }
    }

    /// Add a scope to request.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Set multiple scopes (replaces existing).
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable PKCE.
    pub fn pkce(mut self, enabled: bool) -> Self {
        self.pkce = enabled;
        self
    }

    /// Add a query parameter to every authorization URL.
    pub fn authorize_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.authorize_params.push((name.into(), value.into()));
        self
    }

    /// Check that every required base field is present.
    pub fn validate(&self) -> Result<()> {
        let authorize_url = self.kind.authorize_url();
        let token_url = self.kind.token_url();
        let required = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("authorize_url", authorize_url.as_str()),
            ("token_url", token_url.as_str()),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(OAuthError::configuration(format!(
                "provider \"{}\" is missing required fields: {}",
                self.kind.name(),
                missing.join(", ")
            )));
        }

        if let ProviderKind::AzureAd { tenant_id } = &self.kind {
            if tenant_id.trim().is_empty() {
                return Err(OAuthError::configuration(
                    "provider \"azure\" is missing required fields: tenant_id",
                ));
            }
        }

        if self.pkce && !self.kind.supports_pkce() {
            return Err(OAuthError::configuration(format!(
                "provider \"{}\" does not support PKCE",
                self.kind.name()
            )));
        }

        Ok(())
    }

    /// Space-separated scope string.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Provider-specific cookie fields.
    pub fn fields(&self) -> Vec<FieldDescriptor> {
        self.kind.fields()
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("pkce", &self.pkce)
            .field("authorize_params", &self.authorize_params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clio() -> ProviderConfig {
        ProviderConfig::new(
            ProviderKind::Clio {
                region: ClioRegion::Us,
            },
            "id",
            "secret",
            "https://example.com/callback",
        )
    }

    #[test]
    fn test_defaults_from_kind() {
        let config = ProviderConfig::new(
            ProviderKind::Google,
            "id",
            "secret",
            "https://example.com/callback",
        );
        assert!(config.pkce);
        assert!(config.scopes.contains(&"openid".to_string()));
    }

    #[test]
    fn test_scope_builder() {
        let config = ProviderConfig::new(
            ProviderKind::GitHub,
            "id",
            "secret",
            "https://example.com/callback",
        )
        .scope("repo")
        .scope("repo");

        assert_eq!(config.scope_string(), "user:email read:user repo");
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        assert!(clio().validate().is_ok());

        let mut config = clio();
        config.client_secret = String::new();
        config.redirect_uri = " ".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("client_secret"));
        assert!(err.contains("redirect_uri"));

        assert!(ProviderConfig::new(ProviderKind::azure_ad(""), "id", "s", "https://x")
            .validate()
            .is_err());
        assert!(clio().pkce(true).validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", clio());
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("***"));
    }
}
