//! The root object applications hold.
//!
//! [`OAuthService`] owns the provider registry, the cookie token store, the
//! token exchanger and the JWKS cache. It is cheap to clone; clones share
//! registry and cache.

use crate::config::OAuthSettings;
use crate::context::{CookieOverrides, RequestContext};
use crate::crypto::TokenCipher;
use crate::error::{OAuthError, Result};
use crate::fetch::HttpFetcher;
use crate::guard::RouteGuard;
use crate::jwt::{self, DecodedJwt, JwksCache, JwtError, JwtValidator, ValidationOptions, ValidationResult};
use crate::provider::{IntoProviderKey, ProviderConfig, ProviderKey, ProviderRegistry};
use crate::state::{DecodedState, StateCodec, UserState};
use crate::store::CookieTokenStore;
use crate::tokens::{TokenExchanger, TokenSet};
use http::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Options for [`OAuthService::login`].
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// Extra state carried through the redirect.
    pub state: Option<UserState>,
    /// Issue a `302` to the authorization URL on the context.
    pub redirect: bool,
    /// Extra query parameters for this authorization URL only.
    pub params: Vec<(String, String)>,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            state: None,
            redirect: true,
            params: Vec::new(),
        }
    }
}

impl LoginOptions {
    /// Redirecting login without extra state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Carry application state through the redirect.
    pub fn state(mut self, state: impl Into<UserState>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Whether to redirect or only return the URL.
    pub fn redirect(mut self, redirect: bool) -> Self {
        self.redirect = redirect;
        self
    }

    /// Add an authorization query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

/// Hook that may turn a failed callback into a response body.
pub type CallbackErrorHook =
    Arc<dyn Fn(&OAuthError, &mut dyn RequestContext, &str) -> Option<Value> + Send + Sync>;

/// Options for [`OAuthService::callback`].
#[derive(Clone, Default)]
pub struct CallbackOptions {
    /// Redirect here after storing the tokens.
    pub redirect_to: Option<String>,
    /// Attribute overrides for the token cookies.
    pub cookie_overrides: Option<CookieOverrides>,
    /// Called with any callback failure. Returning `None` re-raises the error.
    pub on_error: Option<CallbackErrorHook>,
}

impl CallbackOptions {
    /// Store tokens and return them without redirecting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirect after a successful callback.
    pub fn redirect_to(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }

    /// Override token cookie attributes.
    pub fn cookie_overrides(mut self, overrides: CookieOverrides) -> Self {
        self.cookie_overrides = Some(overrides);
        self
    }

    /// Install an error hook.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&OAuthError, &mut dyn RequestContext, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CallbackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackOptions")
            .field("redirect_to", &self.redirect_to)
            .field("cookie_overrides", &self.cookie_overrides)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A completed callback.
#[derive(Debug, Clone)]
pub struct CallbackResult {
    /// Key the tokens were stored under.
    pub provider_key: ProviderKey,
    /// Tokens as persisted, with absolute expiry.
    pub tokens: TokenSet,
    /// Verified login state.
    pub state: DecodedState,
    /// Where the context was redirected, if anywhere.
    pub redirected_to: Option<String>,
}

/// Outcome of [`OAuthService::callback`].
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Tokens were exchanged and stored.
    Authorized(CallbackResult),
    /// The callback failed and the error hook produced this body instead.
    Recovered(Value),
}

impl CallbackOutcome {
    /// The result of a successful callback.
    pub fn authorized(self) -> Option<CallbackResult> {
        match self {
            CallbackOutcome::Authorized(result) => Some(result),
            CallbackOutcome::Recovered(_) => None,
        }
    }
}

/// Multi-provider OAuth service.
#[derive(Debug, Clone)]
pub struct OAuthService {
    settings: OAuthSettings,
    registry: ProviderRegistry,
    codec: StateCodec,
    store: CookieTokenStore,
    exchanger: TokenExchanger,
    validator: JwtValidator,
}

impl OAuthService {
    /// Build a service. Fails when the encryption key is not 64 hex characters.
    pub fn new(settings: OAuthSettings, fetcher: Arc<dyn HttpFetcher>) -> Result<Self> {
        settings.validate()?;
        let cipher = Arc::new(TokenCipher::from_hex(&settings.encryption_key)?);

        Ok(Self {
            registry: ProviderRegistry::new(),
            codec: StateCodec::new(settings.csrf_ttl_duration()),
            store: CookieTokenStore::new(cipher, settings.default_token_lifetime_duration()),
            exchanger: TokenExchanger::new(Arc::clone(&fetcher)),
            validator: JwtValidator::new(JwksCache::new(fetcher)),
            settings,
        })
    }

    /// Build a service from `OAUTH_*` environment variables and a
    /// [`ReqwestFetcher`](crate::fetch::ReqwestFetcher).
    #[cfg(feature = "reqwest")]
    pub fn from_env() -> Result<Self> {
        let settings = OAuthSettings::from_env()?;
        let fetcher = crate::fetch::ReqwestFetcher::new(settings.http_timeout_duration())
            .map_err(|e| OAuthError::configuration(e.to_string()))?;
        Self::new(settings, Arc::new(fetcher))
    }

    /// Active settings.
    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// Provider registry.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Cookie token store.
    pub fn store(&self) -> &CookieTokenStore {
        &self.store
    }

    /// Register a provider, optionally scoped to a tenant instance.
    pub fn register(
        &self,
        provider: &str,
        instance: Option<&str>,
        config: ProviderConfig,
    ) -> Result<ProviderKey> {
        self.registry.register(provider, instance, config)
    }

    /// Start a login: set the CSRF (and PKCE) cookies and build the
    /// authorization URL. Redirects the context when `options.redirect` is set.
    pub fn login(
        &self,
        ctx: &mut dyn RequestContext,
        key: impl IntoProviderKey,
        options: LoginOptions,
    ) -> Result<String> {
        let key = key.into_provider_key()?;
        let config = self.registry.get(&key)?;

        let state = self.codec.encode(ctx, &key, options.state.as_ref())?;

        let mut params: Vec<(String, String)> = vec![
            ("client_id".into(), config.client_id.clone()),
            ("redirect_uri".into(), config.redirect_uri.clone()),
            ("response_type".into(), "code".into()),
        ];
        if !config.scopes.is_empty() {
            params.push(("scope".into(), config.scope_string()));
        }
        if config.pkce {
            let pkce = self.codec.issue_pkce(ctx, &key)?;
            params.push(("code_challenge".into(), pkce.challenge().to_string()));
            params.push(("code_challenge_method".into(), pkce.method().to_string()));
        }
        for (name, value) in config.kind.extra_authorize_params() {
            params.push((name.to_string(), value.to_string()));
        }
        params.extend(config.authorize_params.iter().cloned());
        params.extend(options.params);

        // state is already URL-safe
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .chain(std::iter::once(format!("state={}", state)))
            .collect::<Vec<_>>()
            .join("&");

        let authorize_url = config.kind.authorize_url();
        let separator = if authorize_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", authorize_url, separator, query);

        tracing::info!(provider_key = %key, pkce = config.pkce, "Login started");
        if options.redirect {
            ctx.redirect(&url, StatusCode::FOUND);
        }
        Ok(url)
    }

    /// Handle the authorization callback for a provider family.
    ///
    /// Verifies the state against the CSRF cookie, exchanges the code,
    /// clears sibling tenant cookies (unless the key carries `:preserve`),
    /// stores the tokens and deletes the login cookies. On failure the
    /// `on_error` hook may produce a response body instead.
    pub async fn callback(
        &self,
        ctx: &mut dyn RequestContext,
        provider: &str,
        options: CallbackOptions,
    ) -> Result<CallbackOutcome> {
        match self.handle_callback(ctx, provider, &options).await {
            Ok(result) => Ok(CallbackOutcome::Authorized(result)),
            Err(err) => {
                tracing::warn!(provider = %provider, error = %err, "OAuth callback failed");
                if let Some(hook) = &options.on_error {
                    if let Some(body) = hook(&err, ctx, provider) {
                        return Ok(CallbackOutcome::Recovered(body));
                    }
                }
                // Declined or no hook: the typed error already carries the generic
                // status and body through status_code() and to_json()
                Err(err)
            }
        }
    }

    async fn handle_callback(
        &self,
        ctx: &mut dyn RequestContext,
        provider: &str,
        options: &CallbackOptions,
    ) -> Result<CallbackResult> {
        if let Some(error) = ctx.query_param("error") {
            return Err(OAuthError::ProviderDenied {
                error,
                description: ctx.query_param("error_description"),
            });
        }

        let code = ctx
            .query_param("code")
            .filter(|c| !c.is_empty())
            .ok_or(OAuthError::MissingCode)?;
        let raw_state = ctx
            .query_param("state")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OAuthError::MissingState("no state parameter in callback".into()))?;

        let key = StateCodec::peek_provider_key(&raw_state)?;
        if key.provider() != provider {
            tracing::warn!(provider = %provider, provider_key = %key, "State issued for another provider");
            return Err(OAuthError::StateMismatch);
        }

        let state = self.codec.decode(&*ctx, &key, Some(&raw_state))?;
        let config = self.registry.get(&key)?;

        let verifier = if config.pkce {
            let verifier = self.codec.pkce_verifier(&*ctx, &key).ok_or_else(|| {
                OAuthError::MissingState(format!("PKCE cookie \"{}\" not found", key.pkce_cookie()))
            })?;
            Some(verifier)
        } else {
            None
        };

        let mut tokens = self
            .exchanger
            .exchange_code(&code, &config, verifier.as_deref())
            .await?;
        for (param, field) in config.kind.callback_params() {
            if let Some(value) = ctx.query_param(param) {
                tokens.extra.insert(field.to_string(), Value::String(value));
            }
        }

        let overrides = options.cookie_overrides.as_ref();
        self.store
            .clear_siblings(ctx, &self.registry, &key, overrides)?;
        let tokens = self.store.persist(ctx, &tokens, &config, &key, overrides)?;
        self.codec.clear(ctx, &key, None)?;

        let redirected_to = options.redirect_to.clone();
        if let Some(url) = &redirected_to {
            ctx.redirect(url, StatusCode::FOUND);
        }

        tracing::info!(provider_key = %key, "OAuth callback completed");
        Ok(CallbackResult {
            provider_key: key,
            tokens,
            state,
            redirected_to,
        })
    }

    /// Delete every stored token field for a key. Returns how many cookies
    /// were removed.
    pub fn logout(
        &self,
        ctx: &mut dyn RequestContext,
        key: impl IntoProviderKey,
        overrides: Option<&CookieOverrides>,
    ) -> Result<usize> {
        let key = key.into_provider_key()?;
        let config = self.registry.get(&key)?;
        let removed = self.store.clear(ctx, &config, &key, overrides)?;
        tracing::info!(provider_key = %key, removed, "Logged out");
        Ok(removed)
    }

    /// A guard requiring every listed provider.
    ///
    /// Providers are looked up per request, so a guard may be built before
    /// its providers are registered. A provider still unregistered at
    /// request time is rejected as unauthorized.
    pub fn guard<I, K>(&self, keys: I) -> Result<RouteGuard>
    where
        I: IntoIterator<Item = K>,
        K: IntoProviderKey,
    {
        let providers = keys
            .into_iter()
            .map(IntoProviderKey::into_provider_key)
            .collect::<Result<Vec<_>>>()?;
        if providers.is_empty() {
            return Err(OAuthError::configuration("a guard needs at least one provider"));
        }

        Ok(RouteGuard::new(
            self.registry.clone(),
            self.store.clone(),
            self.exchanger.clone(),
            providers,
        ))
    }

    /// Split a bearer token without verifying it.
    pub fn decode_token(&self, token: &str) -> std::result::Result<DecodedJwt, JwtError> {
        jwt::decode(token)
    }

    /// Validate a bearer token. Only a malformed token is an `Err`.
    pub async fn validate_token(
        &self,
        token: &str,
        options: &ValidationOptions,
    ) -> std::result::Result<ValidationResult, JwtError> {
        self.validator.validate(token, options).await
    }

    /// Drop one cached key set, or all of them.
    pub fn clear_jwks_cache(&self, uri: Option<&str>) {
        self.validator.jwks().clear(uri);
        tracing::debug!(uri = ?uri, "JWKS cache cleared");
    }

    /// Number of cached key sets.
    pub fn jwks_cache_len(&self) -> usize {
        self.validator.jwks().len()
    }

    /// Forget every registered provider and cached key set.
    pub fn reset(&self) {
        self.registry.clear();
        self.validator.jwks().clear(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ClioRegion, IntuitEnvironment, ProviderKind};
    use crate::testing::{MemoryContext, MockFetcher, MockResponse, RequestMatcher};
    use serde_json::json;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn service() -> (OAuthService, Arc<MockFetcher>) {
        let fetcher = Arc::new(MockFetcher::new());
        let service = OAuthService::new(OAuthSettings::new(KEY), fetcher.clone()).unwrap();
        (service, fetcher)
    }

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

    fn state_param(url: &str) -> String {
        url.split(['?', '&'])
            .find_map(|pair| pair.strip_prefix("state="))
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_rejects_bad_encryption_key() {
        let err = OAuthService::new(OAuthSettings::new("abc"), Arc::new(MockFetcher::new())).unwrap_err();
        assert!(matches!(err, OAuthError::Configuration(_)));
    }

    #[test]
    fn test_login_url_and_redirect() {
        let (service, _) = service();
        service.register("clio", None, clio().scope("read")).unwrap();

        let mut ctx = MemoryContext::new();
        let url = service
            .login(&mut ctx, "clio", LoginOptions::new().param("login_hint", "a@b.c"))
            .unwrap();

        assert!(url.starts_with("https://app.clio.com/oauth/authorize?client_id=clio-id&"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=read"));
        assert!(url.contains("login_hint=a%40b.c"));
        assert_eq!(ctx.redirect_target(), Some((url.as_str(), StatusCode::FOUND)));
        assert!(ctx.cookie("oauth_csrf_clio").is_some());
    }

    #[test]
    fn test_login_with_pkce_sets_cookie() {
        let (service, _) = service();
        service
            .register("azure", None, ProviderConfig::new(ProviderKind::azure_ad("t1"), "id", "secret", "https://app/cb"))
            .unwrap();

        let mut ctx = MemoryContext::new();
        let url = service
            .login(&mut ctx, "azure", LoginOptions::new().redirect(false))
            .unwrap();
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("response_mode=query"));
        assert!(ctx.cookie("oauth_pkce_azure").is_some());
        assert!(ctx.redirect_target().is_none());
    }

    #[test]
    fn test_login_unregistered() {
        let (service, _) = service();
        let err = service
            .login(&mut MemoryContext::new(), "clio", LoginOptions::new())
            .unwrap_err();
        assert!(matches!(err, OAuthError::NotRegistered(ref k) if k == "clio"));
    }

    #[tokio::test]
    async fn test_callback_captures_realm_id() {
        let (service, fetcher) = service();
        service
            .register(
                "quickbooks",
                None,
                ProviderConfig::new(
                    ProviderKind::Intuit {
                        environment: IntuitEnvironment::Sandbox,
                    },
                    "qb-id",
                    "qb-secret",
                    "https://app/cb",
                )
                .pkce(false),
            )
            .unwrap();
        fetcher
            .expect(RequestMatcher::new().form_field("code", "c1"))
            .respond_with(MockResponse::new().json(json!({
                "access_token": "qb-token",
                "refresh_token": "qb-refresh",
                "expires_in": 3600,
                "x_refresh_token_expires_in": 8726400
            })));

        let mut login = MemoryContext::new();
        let url = service
            .login(&mut login, "quickbooks", LoginOptions::new().redirect(false))
            .unwrap();

        let mut ctx = login
            .next_request()
            .with_query("code", "c1")
            .with_query("state", state_param(&url))
            .with_query("realmId", "4620816365");
        let result = service
            .callback(&mut ctx, "quickbooks", CallbackOptions::new().redirect_to("/home"))
            .await
            .unwrap()
            .authorized()
            .unwrap();

        assert_eq!(result.tokens.extra["realm_id"], "4620816365");
        assert_eq!(ctx.cookie("quickbooks_realm_id").as_deref(), Some("4620816365"));
        assert_eq!(ctx.cookie("quickbooks_refresh_token_expires_in").as_deref(), Some("8726400"));
        assert!(ctx.was_deleted("oauth_csrf_quickbooks"));
        assert_eq!(ctx.redirect_target(), Some(("/home", StatusCode::FOUND)));
    }

    #[tokio::test]
    async fn test_callback_provider_denied() {
        let (service, _) = service();
        service.register("clio", None, clio()).unwrap();

        let mut ctx = MemoryContext::new()
            .with_query("error", "access_denied")
            .with_query("error_description", "User cancelled");
        let err = service
            .callback(&mut ctx, "clio", CallbackOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Authorization denied by provider: User cancelled");
    }

    #[tokio::test]
    async fn test_callback_missing_code_and_state() {
        let (service, _) = service();
        service.register("clio", None, clio()).unwrap();

        let mut ctx = MemoryContext::new().with_query("state", "x");
        let err = service.callback(&mut ctx, "clio", CallbackOptions::new()).await.unwrap_err();
        assert!(matches!(err, OAuthError::MissingCode));

        let mut ctx = MemoryContext::new().with_query("code", "c");
        let err = service.callback(&mut ctx, "clio", CallbackOptions::new()).await.unwrap_err();
        assert!(matches!(err, OAuthError::MissingState(_)));
    }

    #[tokio::test]
    async fn test_callback_rejects_other_provider_state() {
        let (service, _) = service();
        service.register("clio", None, clio()).unwrap();
        service.register("other", None, clio()).unwrap();

        let mut login = MemoryContext::new();
        let url = service
            .login(&mut login, "other", LoginOptions::new().redirect(false))
            .unwrap();

        let mut ctx = login
            .next_request()
            .with_query("code", "c")
            .with_query("state", state_param(&url));
        let err = service.callback(&mut ctx, "clio", CallbackOptions::new()).await.unwrap_err();
        assert!(matches!(err, OAuthError::StateMismatch));
    }

    #[tokio::test]
    async fn test_error_hook_recovers() {
        let (service, _) = service();
        let mut ctx = MemoryContext::new().with_query("code", "c");

        let outcome = service
            .callback(
                &mut ctx,
                "clio",
                CallbackOptions::new().on_error(|err, ctx, provider| {
                    ctx.redirect("/login?failed=1", StatusCode::FOUND);
                    Some(json!({"provider": provider, "error": err.error_type()}))
                }),
            )
            .await
            .unwrap();

        match outcome {
            CallbackOutcome::Recovered(body) => {
                assert_eq!(body, json!({"provider": "clio", "error": "bad_request"}));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(ctx.redirect_target(), Some(("/login?failed=1", StatusCode::FOUND)));
    }

    #[tokio::test]
    async fn test_error_hook_declines() {
        let (service, _) = service();
        let mut ctx = MemoryContext::new();
        let err = service
            .callback(&mut ctx, "clio", CallbackOptions::new().on_error(|_, _, _| None))
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::MissingCode));
    }

    #[tokio::test]
    async fn test_logout_and_reset() {
        let (service, _) = service();
        let key = service.register("clio", None, clio()).unwrap();

        let mut ctx = MemoryContext::new();
        let config = service.registry().get(&key).unwrap();
        service
            .store()
            .persist(&mut ctx, &TokenSet::new("t").with_expires_in(60), &config, &key, None)
            .unwrap();

        assert_eq!(service.logout(&mut ctx, "clio", None).unwrap(), 3);
        assert!(ctx.cookie_names().is_empty());

        service.reset();
        assert!(service.registry().is_empty());
        // Guards resolve providers per request
        let err = service
            .guard(["clio"])
            .unwrap()
            .authorize(&mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::UNAUTHORIZED);
        assert!(service.guard(Vec::<&str>::new()).is_err());
    }
}
