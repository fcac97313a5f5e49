//! Error types for rustapi-oauth

use crate::config::ConfigError;
use http::StatusCode;
use thiserror::Error;

/// Result type alias for OAuth operations
pub type Result<T, E = OAuthError> = std::result::Result<T, E>;

/// Coarse classification of an [`OAuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid provider config, or a bad encryption secret.
    Configuration,
    /// Malformed or forged callback (missing code/state, CSRF mismatch).
    Protocol,
    /// Missing, invalid or unrefreshable tokens.
    Auth,
    /// A provider's token endpoint rejected the request.
    Upstream,
    /// Anything else (transport, crypto).
    Internal,
}

/// Errors raised by the OAuth flow.
///
/// JWT claim and signature failures are not represented here; they are
/// returned as [`ValidationResult`](crate::jwt::ValidationResult) data.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Invalid provider configuration or encryption secret.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No provider registered under the requested key.
    #[error("Provider \"{0}\" is not registered")]
    NotRegistered(String),

    /// The extra login state could not be encoded or the state value is unreadable.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The callback carried no state, or the CSRF cookie is gone.
    #[error("Missing state: {0}")]
    MissingState(String),

    /// The CSRF value in the state does not match the cookie.
    #[error("OAuth state mismatch - possible CSRF attack")]
    StateMismatch,

    /// The callback carried no authorization code.
    #[error("Missing authorization code")]
    MissingCode,

    /// The provider redirected back with an `error` parameter.
    #[error("Authorization denied by provider: {}", .description.as_deref().unwrap_or(.error.as_str()))]
    ProviderDenied {
        /// OAuth error code (`access_denied`, ...)
        error: String,
        /// Optional `error_description`
        description: Option<String>,
    },

    /// Tokens are missing, invalid, or could not be refreshed.
    #[error("{0}")]
    Unauthorized(String),

    /// Non-success response from a token endpoint.
    #[error("{message}")]
    Upstream {
        /// HTTP status returned by the provider, when there was one
        status: Option<u16>,
        /// Message extracted from the provider's error body
        message: String,
    },

    /// The provider rejected a refresh-token grant.
    #[error("Token refresh rejected: {0}")]
    RefreshRejected(String),

    /// The HTTP call itself failed.
    #[error("Network error: {0}")]
    Transport(String),

    /// Refresh-token encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl OAuthError {
    /// Create an `Unauthorized` error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create a `Configuration` error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::NotRegistered(_) => ErrorKind::Configuration,
            Self::InvalidState(_)
            | Self::MissingState(_)
            | Self::StateMismatch
            | Self::MissingCode
            | Self::ProviderDenied { .. } => ErrorKind::Protocol,
            Self::Unauthorized(_) | Self::RefreshRejected(_) => ErrorKind::Auth,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Transport(_) | Self::Crypto(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Protocol => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Configuration | ErrorKind::Upstream | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Error type identifier, matching the `ApiError` vocabulary.
    pub fn error_type(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Protocol => "bad_request",
            ErrorKind::Auth => "unauthorized",
            ErrorKind::Upstream => "upstream_error",
            ErrorKind::Configuration | ErrorKind::Internal => "internal_error",
        }
    }

    /// JSON body in the `{"error": {"type", "message"}}` shape.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<ConfigError> for OAuthError {
    fn from(err: ConfigError) -> Self {
        OAuthError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_bad_request() {
        for err in [
            OAuthError::MissingCode,
            OAuthError::StateMismatch,
            OAuthError::MissingState("cookie".into()),
            OAuthError::InvalidState("not an object".into()),
        ] {
            assert_eq!(err.kind(), ErrorKind::Protocol);
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_unauthorized_maps_to_401() {
        let err = OAuthError::unauthorized("Missing or invalid tokens for \"clio\"");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_type(), "unauthorized");
        assert_eq!(err.to_string(), "Missing or invalid tokens for \"clio\"");
    }

    #[test]
    fn test_upstream_maps_to_500() {
        let err = OAuthError::Upstream {
            status: Some(400),
            message: "invalid_grant: code expired".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_json()["error"]["message"], "invalid_grant: code expired");
    }

    #[test]
    fn test_provider_denied_prefers_description() {
        let err = OAuthError::ProviderDenied {
            error: "access_denied".into(),
            description: Some("User cancelled".into()),
        };
        assert_eq!(err.to_string(), "Authorization denied by provider: User cancelled");

        let err = OAuthError::ProviderDenied {
            error: "access_denied".into(),
            description: None,
        };
        assert_eq!(err.to_string(), "Authorization denied by provider: access_denied");
    }
}
