//! Route protection across one or more providers.
//!
//! A [`RouteGuard`] checks the stored tokens of every required provider,
//! refreshes the expired ones, and only when all of them succeeded writes
//! the refreshed cookies and exposes the access tokens in the request's
//! [`ContextBag`](crate::context::ContextBag).
//!
//! # Example
//!
//! ```rust,no_run
//! use rustapi_oauth::{OAuthService, RequestContext};
//!
//! # async fn run(service: OAuthService, ctx: &mut dyn RequestContext) -> rustapi_oauth::Result<()> {
//! let guard = service.guard(["clio", "azure:tenantA"])?;
//!
//! let matters = guard
//!     .protect(ctx, |tokens| async move {
//!         format!("clio token: {}", tokens["clio"])
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::context::{CookieOverrides, RequestContext};
use crate::error::{OAuthError, Result};
use crate::provider::{ProviderConfig, ProviderKey, ProviderRegistry};
use crate::store::CookieTokenStore;
use crate::tokens::{check_validity, TokenExchanger, TokenSet, TokenValidity};
use futures_util::future::try_join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Access tokens handed to a protected handler, keyed by storage key
/// (`provider` or `provider:instance`).
pub type AccessTokens = BTreeMap<String, String>;

/// Guards a route behind one or more providers.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    registry: ProviderRegistry,
    store: CookieTokenStore,
    exchanger: TokenExchanger,
    providers: Vec<ProviderKey>,
    overrides: Option<CookieOverrides>,
}

struct Checked {
    key: ProviderKey,
    config: Arc<ProviderConfig>,
    validity: TokenValidity,
}

impl RouteGuard {
    pub(crate) fn new(
        registry: ProviderRegistry,
        store: CookieTokenStore,
        exchanger: TokenExchanger,
        providers: Vec<ProviderKey>,
    ) -> Self {
        Self {
            registry,
            store,
            exchanger,
            providers,
            overrides: None,
        }
    }

    /// Cookie attribute overrides applied when refreshed tokens are written.
    pub fn cookie_overrides(mut self, overrides: CookieOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Providers this guard requires.
    pub fn providers(&self) -> &[ProviderKey] {
        &self.providers
    }

    /// Check, refresh and inject tokens for every required provider.
    ///
    /// Fails with [`OAuthError::Unauthorized`] if any provider is no longer
    /// registered, has no usable tokens or cannot be refreshed. Nothing is
    /// written to the context unless every refresh succeeded and every
    /// refreshed token set was sealed.
    pub async fn authorize(&self, ctx: &mut dyn RequestContext) -> Result<AccessTokens> {
        let mut checked = Vec::with_capacity(self.providers.len());
        for key in &self.providers {
            let config = self.registry.get(key).map_err(|e| {
                tracing::warn!(provider_key = %key, error = %e, "Guarded provider not registered");
                OAuthError::unauthorized(format!("Missing or invalid tokens for \"{}\"", key))
            })?;
            let validity = self
                .store
                .read(&*ctx, &config, key)
                .and_then(|stored| check_validity(&stored, &config))
                .ok_or_else(|| {
                    tracing::debug!(provider_key = %key, "No usable stored tokens");
                    OAuthError::unauthorized(format!("Missing or invalid tokens for \"{}\"", key))
                })?;
            checked.push(Checked {
                key: key.clone(),
                config,
                validity,
            });
        }

        let refreshed = try_join_all(
            checked
                .iter()
                .filter(|c| c.validity.is_expired())
                .map(|c| self.refresh(c)),
        )
        .await?;

        // Seal every refreshed set before the first cookie is written
        let mut sealed = Vec::with_capacity(refreshed.len());
        for (key, tokens) in &refreshed {
            let config = checked
                .iter()
                .find(|c| &c.key == key)
                .map(|c| Arc::clone(&c.config))
                .ok_or_else(|| OAuthError::NotRegistered(key.storage_key()))?;
            sealed.push(
                self.store
                    .seal(tokens, &config, key, self.overrides.as_ref())?,
            );
        }
        for tokens in sealed {
            tokens.write(ctx)?;
        }

        let mut access = AccessTokens::new();
        for c in &checked {
            let token = refreshed
                .iter()
                .find(|(key, _)| key == &c.key)
                .map(|(_, tokens)| tokens.access_token.clone())
                .unwrap_or_else(|| c.validity.tokens().access_token.clone());
            access.insert(c.key.storage_key(), token);
        }

        let bag = ctx.bag_mut();
        for (storage_key, token) in &access {
            bag.set_access_token(storage_key, token.clone());
        }

        tracing::debug!(
            providers = access.len(),
            refreshed = refreshed.len(),
            "Route authorized"
        );
        Ok(access)
    }

    /// Run `handler` with the access tokens once [`authorize`](Self::authorize) succeeds.
    pub async fn protect<F, Fut, T>(&self, ctx: &mut dyn RequestContext, handler: F) -> Result<T>
    where
        F: FnOnce(AccessTokens) -> Fut,
        Fut: Future<Output = T>,
    {
        let tokens = self.authorize(ctx).await?;
        Ok(handler(tokens).await)
    }

    async fn refresh(&self, checked: &Checked) -> Result<(ProviderKey, TokenSet)> {
        let key = &checked.key;
        let previous = checked.validity.tokens();
        let failed = |reason: String| {
            OAuthError::unauthorized(format!("Token refresh failed for \"{}\": {}", key, reason))
        };

        let refresh_token = previous
            .refresh_token
            .as_deref()
            .ok_or_else(|| failed("no refresh token stored".to_string()))?;

        let raw = self
            .exchanger
            .refresh(refresh_token, &checked.config, key)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let tokens = self
            .store
            .normalize_refreshed(raw, &checked.config, previous);
        Ok((key.clone(), tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::TokenCipher;
    use crate::provider::{ClioRegion, ProviderKind};
    use crate::testing::{MemoryContext, MockFetcher, MockResponse, RequestMatcher};
    use crate::tokens::unix_now;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        registry: ProviderRegistry,
        store: CookieTokenStore,
        fetcher: Arc<MockFetcher>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = ProviderRegistry::new();
            for name in ["clio", "billing"] {
                registry
                    .register(
                        name,
                        None,
                        ProviderConfig::new(
                            ProviderKind::Clio {
                                region: ClioRegion::Us,
                            },
                            format!("{}-id", name),
                            format!("{}-secret", name),
                            "https://app.example.com/cb",
                        ),
                    )
                    .unwrap();
            }
            Self {
                registry,
                store: CookieTokenStore::new(
                    Arc::new(TokenCipher::new(&[9u8; 32])),
                    Duration::from_secs(3600),
                ),
                fetcher: Arc::new(MockFetcher::new()),
            }
        }

        fn guard(&self, providers: &[&str]) -> RouteGuard {
            RouteGuard::new(
                self.registry.clone(),
                self.store.clone(),
                TokenExchanger::new(self.fetcher.clone()),
                providers.iter().map(|p| ProviderKey::new(*p)).collect(),
            )
        }

        fn seed(&self, ctx: &mut MemoryContext, provider: &str, tokens: TokenSet) {
            let key = ProviderKey::new(provider);
            let config = self.registry.get(&key).unwrap();
            self.store.persist(ctx, &tokens, &config, &key, None).unwrap();
        }
    }

    fn expired(access: &str, refresh: &str) -> TokenSet {
        TokenSet::new(access)
            .with_refresh_token(refresh)
            .with_expires_at(unix_now() - 60)
    }

    #[tokio::test]
    async fn test_valid_tokens_are_injected() {
        let fx = Fixture::new();
        let mut ctx = MemoryContext::new();
        fx.seed(&mut ctx, "clio", TokenSet::new("clio-token").with_expires_in(600));

        let tokens = fx.guard(&["clio"]).authorize(&mut ctx).await.unwrap();
        assert_eq!(tokens["clio"], "clio-token");
        assert_eq!(ctx.bag().access_token("clio"), Some("clio-token"));
        assert_eq!(fx.fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_tokens_rejected() {
        let fx = Fixture::new();
        let mut ctx = MemoryContext::new();

        let err = fx.guard(&["clio"]).authorize(&mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing or invalid tokens for \"clio\"");
        assert_eq!(err.status_code(), http::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_tokens_refreshed_and_persisted() {
        let fx = Fixture::new();
        fx.fetcher
            .expect(RequestMatcher::new().form_field("refresh_token", "r1"))
            .respond_with(MockResponse::new().json(json!({"access_token": "fresh", "expires_in": 600})))
            .once();

        let mut ctx = MemoryContext::new();
        fx.seed(&mut ctx, "clio", expired("stale", "r1"));

        let tokens = fx.guard(&["clio"]).authorize(&mut ctx).await.unwrap();
        assert_eq!(tokens["clio"], "fresh");
        assert_eq!(ctx.cookie("clio_access_token").as_deref(), Some("fresh"));

        let config = fx.registry.get(&ProviderKey::new("clio")).unwrap();
        let stored = fx.store.read(&ctx, &config, &ProviderKey::new("clio")).unwrap();
        assert_eq!(stored.refresh_token().as_deref(), Some("r1"));
        fx.fetcher.verify();
    }

    #[tokio::test]
    async fn test_failed_refresh_commits_nothing() {
        let fx = Fixture::new();
        fx.fetcher
            .expect(RequestMatcher::new().form_field("refresh_token", "r-clio"))
            .respond_with(MockResponse::new().json(json!({"access_token": "clio-fresh"})));
        fx.fetcher
            .expect(RequestMatcher::new().form_field("refresh_token", "r-billing"))
            .respond_with(MockResponse::error(400, json!({"error": "invalid_grant"})));

        let mut ctx = MemoryContext::new();
        fx.seed(&mut ctx, "clio", expired("clio-stale", "r-clio"));
        fx.seed(&mut ctx, "billing", expired("billing-stale", "r-billing"));

        let err = fx
            .guard(&["clio", "billing"])
            .authorize(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Token refresh failed for \"billing\""));
        assert!(ctx.bag().is_empty());
        assert_eq!(ctx.cookie("clio_access_token").as_deref(), Some("clio-stale"));
    }

    #[tokio::test]
    async fn test_unregistered_provider_rejected_as_unauthorized() {
        let fx = Fixture::new();
        let mut ctx = MemoryContext::new();
        fx.seed(&mut ctx, "clio", TokenSet::new("clio-token").with_expires_in(600));

        let err = fx
            .guard(&["clio", "ghost"])
            .authorize(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing or invalid tokens for \"ghost\"");
        assert_eq!(err.status_code(), http::StatusCode::UNAUTHORIZED);
        assert!(ctx.bag().is_empty());
    }

    #[tokio::test]
    async fn test_all_refreshed_providers_written_together() {
        let fx = Fixture::new();
        fx.fetcher
            .expect(RequestMatcher::new().form_field("refresh_token", "r-clio"))
            .respond_with(MockResponse::new().json(json!({"access_token": "clio-fresh", "expires_in": 600})));
        fx.fetcher
            .expect(RequestMatcher::new().form_field("refresh_token", "r-billing"))
            .respond_with(
                MockResponse::new()
                    .json(json!({"access_token": "billing-fresh", "refresh_token": "r-billing-2"})),
            );

        let mut ctx = MemoryContext::new();
        fx.seed(&mut ctx, "clio", expired("clio-stale", "r-clio"));
        fx.seed(&mut ctx, "billing", expired("billing-stale", "r-billing"));

        let tokens = fx
            .guard(&["clio", "billing"])
            .authorize(&mut ctx)
            .await
            .unwrap();
        assert_eq!(tokens["clio"], "clio-fresh");
        assert_eq!(tokens["billing"], "billing-fresh");
        assert_eq!(ctx.cookie("clio_access_token").as_deref(), Some("clio-fresh"));
        assert_eq!(ctx.cookie("billing_access_token").as_deref(), Some("billing-fresh"));

        let key = ProviderKey::new("billing");
        let config = fx.registry.get(&key).unwrap();
        let stored = fx.store.read(&ctx, &config, &key).unwrap();
        assert_eq!(stored.refresh_token().as_deref(), Some("r-billing-2"));
    }

    #[tokio::test]
    async fn test_protect_skips_handler_on_failure() {
        let fx = Fixture::new();
        let mut ctx = MemoryContext::new();
        let mut called = false;

        let result = fx
            .guard(&["clio"])
            .protect(&mut ctx, |_| {
                called = true;
                async {}
            })
            .await;
        assert!(result.is_err());
        assert!(!called);
    }
}
