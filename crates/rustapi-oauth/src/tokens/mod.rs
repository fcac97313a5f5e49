//! OAuth2 token types, validity checks and the token-endpoint client.

mod exchange;

pub use exchange::TokenExchanger;

use crate::error::{OAuthError, Result};
use crate::provider::ProviderConfig;
use crate::store::StoredFields;
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const BASE_RESPONSE_FIELDS: [&str; 4] = ["access_token", "refresh_token", "token_type", "expires_in"];

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Normalized tokens for one provider instance.
#[derive(Clone, PartialEq)]
pub struct TokenSet {
    /// The access token.
    pub access_token: String,
    /// Refresh token (if provided).
    pub refresh_token: Option<String>,
    /// The token type (usually "Bearer").
    pub token_type: String,
    /// Lifetime in seconds as reported by the provider.
    pub expires_in: Option<u64>,
    /// Absolute expiry (Unix seconds), once computed.
    pub expires_at: Option<u64>,
    /// Provider-specific response fields and captured callback parameters.
    pub extra: Map<String, Value>,
}

impl TokenSet {
    /// Create a token set with only an access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_in: None,
            expires_at: None,
            extra: Map::new(),
        }
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the relative lifetime.
    pub fn with_expires_in(mut self, expires_in: u64) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    /// Set the absolute expiry.
    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Add a provider-specific field.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Parse a token endpoint response.
    ///
    /// `expires_in` may be a number or a numeric string. A body carrying an
    /// `error` and no `access_token` is reported as an upstream failure.
    pub fn from_response(body: Value) -> Result<Self> {
        let Value::Object(mut map) = body else {
            return Err(OAuthError::Upstream {
                status: None,
                message: "token response is not a JSON object".into(),
            });
        };

        let access_token = map
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let Some(access_token) = access_token else {
            let message = provider_error_message(&Value::Object(map))
                .unwrap_or_else(|| "token response has no access_token".to_string());
            return Err(OAuthError::Upstream {
                status: None,
                message,
            });
        };

        let refresh_token = map
            .get("refresh_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let token_type = map
            .get("token_type")
            .and_then(Value::as_str)
            .unwrap_or("Bearer")
            .to_string();

        let expires_in = map.get("expires_in").and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

        for field in BASE_RESPONSE_FIELDS {
            map.remove(field);
        }

        Ok(Self {
            access_token,
            refresh_token,
            token_type,
            expires_in,
            expires_at: None,
            extra: map,
        })
    }

    /// Look up a field by logical name, base fields included.
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "access_token" => Some(Value::String(self.access_token.clone())),
            "refresh_token" => self.refresh_token.clone().map(Value::String),
            "token_type" => Some(Value::String(self.token_type.clone())),
            "expires_in" => self.expires_in.map(Value::from),
            "access_token_expires_at" => self.expires_at.map(Value::from),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Whether the absolute expiry has passed at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(expires_at) if now > expires_at)
    }

    /// Get the Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Result of checking stored tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValidity {
    /// The access token is still usable.
    Valid(TokenSet),
    /// The absolute expiry has passed; refresh before use.
    Expired(TokenSet),
}

impl TokenValidity {
    /// The reconstructed tokens.
    pub fn tokens(&self) -> &TokenSet {
        match self {
            TokenValidity::Valid(tokens) | TokenValidity::Expired(tokens) => tokens,
        }
    }

    /// Take the reconstructed tokens.
    pub fn into_tokens(self) -> TokenSet {
        match self {
            TokenValidity::Valid(tokens) | TokenValidity::Expired(tokens) => tokens,
        }
    }

    /// Whether a refresh is needed.
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenValidity::Expired(_))
    }
}

/// Rebuild tokens from stored fields and classify them.
///
/// Returns `None` when the access token or absolute expiry is missing or
/// malformed.
pub fn check_validity(stored: &StoredFields, config: &ProviderConfig) -> Option<TokenValidity> {
    check_validity_at(stored, config, unix_now())
}

/// [`check_validity`] against an explicit clock.
pub fn check_validity_at(
    stored: &StoredFields,
    config: &ProviderConfig,
    now: u64,
) -> Option<TokenValidity> {
    let access_token = stored.access_token().filter(|t| !t.is_empty())?;
    let expires_at = stored.expires_at()?;

    let mut tokens = TokenSet::new(access_token).with_expires_at(expires_at);
    tokens.refresh_token = stored.refresh_token();
    for field in config.fields() {
        if let Some(value) = stored.get(&field.key) {
            tokens.extra.insert(field.key.clone(), value.clone());
        }
    }

    if tokens.is_expired_at(now) {
        Some(TokenValidity::Expired(tokens))
    } else {
        Some(TokenValidity::Valid(tokens))
    }
}

/// Message from an OAuth error body: `error: error_description`, either
/// part alone, or `None` when the body carries neither.
pub fn provider_error_message(body: &Value) -> Option<String> {
    let text = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    match (text("error"), text("error_description")) {
        (Some(error), Some(description)) => Some(format!("{}: {}", error, description)),
        (Some(error), None) => Some(error.to_string()),
        (None, Some(description)) => Some(description.to_string()),
        (None, None) => body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{IntuitEnvironment, ProviderKind};
    use serde_json::json;

    fn intuit() -> ProviderConfig {
        ProviderConfig::new(
            ProviderKind::Intuit {
                environment: IntuitEnvironment::Sandbox,
            },
            "id",
            "secret",
            "https://example.com/callback",
        )
    }

    #[test]
    fn test_from_response() {
        let tokens = TokenSet::from_response(json!({
            "access_token": "access123",
            "refresh_token": "refresh456",
            "token_type": "bearer",
            "expires_in": "3600",
            "x_refresh_token_expires_in": 8726400
        }))
        .unwrap();

        assert_eq!(tokens.access_token, "access123");
        assert_eq!(tokens.refresh_token.as_deref(), Some("refresh456"));
        assert_eq!(tokens.expires_in, Some(3600));
        assert_eq!(tokens.extra["x_refresh_token_expires_in"], 8726400);
        assert!(!tokens.extra.contains_key("access_token"));
        assert_eq!(tokens.authorization_header(), "bearer access123");
    }

    #[test]
    fn test_from_response_error_body() {
        let err = TokenSet::from_response(json!({
            "error": "invalid_grant",
            "error_description": "Code expired"
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid_grant: Code expired");

        assert!(TokenSet::from_response(json!("nope")).is_err());
    }

    #[test]
    fn test_provider_error_message() {
        assert_eq!(
            provider_error_message(&json!({"error_description": "bad"})).as_deref(),
            Some("bad")
        );
        assert_eq!(
            provider_error_message(&json!({"error": {"message": "quota"}})).as_deref(),
            Some("quota")
        );
        assert_eq!(provider_error_message(&json!("Bad Gateway")), None);
    }

    #[test]
    fn test_check_validity() {
        let mut stored = StoredFields::default();
        stored.insert("access_token", json!("tok"));
        stored.insert("refresh_token", json!("ref"));
        stored.insert("access_token_expires_at", json!(1_000));
        stored.insert("realm_id", json!(4620816365u64));

        let valid = check_validity_at(&stored, &intuit(), 1_000).unwrap();
        assert!(!valid.is_expired());
        assert_eq!(valid.tokens().extra["realm_id"], 4620816365u64);
        assert_eq!(valid.tokens().refresh_token.as_deref(), Some("ref"));

        let expired = check_validity_at(&stored, &intuit(), 1_001).unwrap();
        assert!(expired.is_expired());
    }

    #[test]
    fn test_check_validity_rejects_malformed() {
        let mut stored = StoredFields::default();
        stored.insert("access_token", json!("tok"));
        stored.insert("access_token_expires_at", json!("soon"));
        assert!(check_validity_at(&stored, &intuit(), 0).is_none());

        let mut stored = StoredFields::default();
        stored.insert("access_token", json!(""));
        stored.insert("access_token_expires_at", json!(10));
        assert!(check_validity_at(&stored, &intuit(), 0).is_none());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let tokens = TokenSet::new("secret-access").with_refresh_token("secret-refresh");
        let rendered = format!("{:?}", tokens);
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }
}
