use super::{provider_error_message, TokenSet};
use crate::error::{OAuthError, Result};
use crate::fetch::{FetchError, FetchRequest, HttpFetcher};
use crate::provider::{ClientAuth, ProviderConfig, ProviderKey};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::sync::Arc;

/// Client for a provider's token endpoint.
#[derive(Clone)]
pub struct TokenExchanger {
    fetcher: Arc<dyn HttpFetcher>,
}

impl TokenExchanger {
    /// Create an exchanger over an HTTP fetcher.
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// A non-success response becomes [`OAuthError::Upstream`] carrying the
    /// provider's `error`/`error_description`, or a generic message.
    pub async fn exchange_code(
        &self,
        code: &str,
        config: &ProviderConfig,
        pkce_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", config.redirect_uri.clone()),
        ];

        // Add PKCE verifier if provided
        if let Some(verifier) = pkce_verifier {
            params.push(("code_verifier", verifier.to_string()));
        }

        let body = self
            .token_request(config, params)
            .await
            .map_err(|e| match e {
                FetchError::Status { status, body } => OAuthError::Upstream {
                    status: Some(status),
                    message: provider_error_message(&body)
                        .unwrap_or_else(|| format!("Token exchange failed with HTTP {}", status)),
                },
                other => transport_error(other),
            })?;

        TokenSet::from_response(body)
    }

    /// Redeem a refresh token.
    ///
    /// A rejected grant becomes [`OAuthError::RefreshRejected`]. The result
    /// is the raw response; fields the provider omitted are filled in by
    /// [`CookieTokenStore::normalize_refreshed`](crate::store::CookieTokenStore::normalize_refreshed).
    pub async fn refresh(
        &self,
        refresh_token: &str,
        config: &ProviderConfig,
        key: &ProviderKey,
    ) -> Result<TokenSet> {
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];

        let body = self
            .token_request(config, params)
            .await
            .map_err(|e| match e {
                FetchError::Status { status, body } => {
                    let message = provider_error_message(&body)
                        .unwrap_or_else(|| format!("refresh failed with HTTP {}", status));
                    tracing::warn!(provider_key = %key, status, "Token refresh rejected");
                    OAuthError::RefreshRejected(message)
                }
                other => transport_error(other),
            })?;

        let tokens = TokenSet::from_response(body).map_err(|e| match e {
            OAuthError::Upstream { message, .. } => OAuthError::RefreshRejected(message),
            other => other,
        })?;

        tracing::info!(provider_key = %key, "Access token refreshed");
        Ok(tokens)
    }

    /// Make a token request to the authorization server.
    async fn token_request(
        &self,
        config: &ProviderConfig,
        mut params: Vec<(&str, String)>,
    ) -> std::result::Result<serde_json::Value, FetchError> {
        let token_url = config.kind.token_url();

        let request = match config.kind.client_auth() {
            ClientAuth::RequestBody => {
                params.push(("client_id", config.client_id.clone()));
                params.push(("client_secret", config.client_secret.clone()));
                FetchRequest::post_form(&token_url, &params)
            }
            ClientAuth::BasicHeader => {
                let credentials = STANDARD.encode(format!(
                    "{}:{}",
                    config.client_id, config.client_secret
                ));
                FetchRequest::post_form(&token_url, &params)
                    .header("Authorization", format!("Basic {}", credentials))
            }
        };

        tracing::debug!(url = %token_url, "Calling token endpoint");
        self.fetcher.fetch(request).await
    }
}

fn transport_error(err: FetchError) -> OAuthError {
    match err {
        FetchError::InvalidBody(message) => OAuthError::Upstream {
            status: None,
            message: format!("invalid token response: {}", message),
        },
        other => OAuthError::Transport(other.to_string()),
    }
}

impl fmt::Debug for TokenExchanger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenExchanger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ClioRegion, IntuitEnvironment, ProviderKind};
    use crate::testing::{MockFetcher, MockResponse, RequestMatcher};
    use http::Method;
    use serde_json::json;

    fn clio() -> ProviderConfig {
        ProviderConfig::new(
            ProviderKind::Clio {
                region: ClioRegion::Us,
            },
            "clio-id",
            "clio-secret",
            "https://app.example.com/oauth/clio/callback",
        )
    }

    #[tokio::test]
    async fn test_exchange_code_posts_form() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .expect(
                RequestMatcher::new()
                    .method(Method::POST)
                    .url("https://app.clio.com/oauth/token")
                    .form_field("grant_type", "authorization_code")
                    .form_field("code", "abc")
                    .form_field("client_id", "clio-id")
                    .form_field("client_secret", "clio-secret"),
            )
            .respond_with(MockResponse::new().json(json!({
                "access_token": "clio-token",
                "refresh_token": "clio-refresh",
                "expires_in": 604800,
                "token_type": "bearer"
            })))
            .times(1);

        let exchanger = TokenExchanger::new(fetcher.clone());
        let tokens = exchanger.exchange_code("abc", &clio(), None).await.unwrap();

        assert_eq!(tokens.access_token, "clio-token");
        assert_eq!(tokens.expires_in, Some(604800));
        fetcher.verify();
    }

    #[tokio::test]
    async fn test_exchange_error_message() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .expect(RequestMatcher::new().method(Method::POST))
            .respond_with(MockResponse::error(
                400,
                json!({"error": "invalid_grant", "error_description": "Code was already redeemed"}),
            ));

        let exchanger = TokenExchanger::new(fetcher);
        let err = exchanger.exchange_code("abc", &clio(), None).await.unwrap_err();
        match err {
            OAuthError::Upstream { status, message } => {
                assert_eq!(status, Some(400));
                assert_eq!(message, "invalid_grant: Code was already redeemed");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exchange_generic_message() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .expect(RequestMatcher::new())
            .respond_with(MockResponse::error(502, json!("Bad Gateway")));

        let exchanger = TokenExchanger::new(fetcher);
        let err = exchanger.exchange_code("abc", &clio(), None).await.unwrap_err();
        assert_eq!(err.to_string(), "Token exchange failed with HTTP 502");
    }

    #[tokio::test]
    async fn test_basic_auth_for_intuit() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .expect(RequestMatcher::new().form_field("code", "abc"))
            .respond_with(MockResponse::new().json(json!({"access_token": "qb"})));

        let config = ProviderConfig::new(
            ProviderKind::Intuit {
                environment: IntuitEnvironment::Sandbox,
            },
            "qb-id",
            "qb-secret",
            "https://app.example.com/cb",
        );
        let exchanger = TokenExchanger::new(fetcher.clone());
        exchanger
            .exchange_code("abc", &config, Some("verifier"))
            .await
            .unwrap();

        let request = &fetcher.requests()[0];
        assert!(request.form_field("client_secret").is_none());
        assert_eq!(request.form_field("code_verifier").as_deref(), Some("verifier"));
        let auth = request
            .headers
            .iter()
            .find(|(name, _)| name == "Authorization")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert_eq!(auth, format!("Basic {}", STANDARD.encode("qb-id:qb-secret")));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .expect(RequestMatcher::new().form_field("grant_type", "refresh_token"))
            .respond_with(MockResponse::error(401, json!({"error": "invalid_grant"})));

        let exchanger = TokenExchanger::new(fetcher);
        let err = exchanger
            .refresh("stale", &clio(), &ProviderKey::new("clio"))
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::RefreshRejected(ref m) if m == "invalid_grant"));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher
            .expect(RequestMatcher::new().form_field("refresh_token", "r1"))
            .respond_with(MockResponse::new().json(json!({"access_token": "a2", "expires_in": 3600})));

        let exchanger = TokenExchanger::new(fetcher);
        let tokens = exchanger
            .refresh("r1", &clio(), &ProviderKey::new("clio"))
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "a2");
        assert_eq!(tokens.refresh_token, None);
    }
}
