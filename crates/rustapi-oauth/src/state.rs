//! CSRF-bound authorization state and PKCE verifiers.
//!
//! The state sent through the authorization redirect is
//! `urlencode(base64url(json))` of `{csrf, providerKey, instanceKey?, ...user}`.
//! The CSRF value is also written to the short-lived `oauth_csrf_<key>`
//! cookie; the callback is accepted only when both match.

use crate::context::{CookieAttributes, CookieOverrides, RequestContext};
use crate::crypto::constant_time_eq;
use crate::error::{OAuthError, Result};
use crate::provider::ProviderKey;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of the CSRF and PKCE cookies.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(300);

const CSRF_FIELD: &str = "csrf";
const PROVIDER_KEY_FIELD: &str = "providerKey";
const INSTANCE_KEY_FIELD: &str = "instanceKey";
const TOKEN_BYTES: usize = 32;

type StateFn = dyn Fn(&dyn RequestContext) -> Value + Send + Sync;

/// Extra application state carried through the redirect.
#[derive(Clone)]
pub enum UserState {
    /// A fixed value.
    Value(Value),
    /// Computed from the login request.
    Computed(Arc<StateFn>),
}

impl UserState {
    /// State computed from the login request.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&dyn RequestContext) -> Value + Send + Sync + 'static,
    {
        UserState::Computed(Arc::new(f))
    }

    /// Resolve to a key/value object.
    pub fn resolve(&self, ctx: &dyn RequestContext) -> Result<Map<String, Value>> {
        let value = match self {
            UserState::Value(value) => value.clone(),
            UserState::Computed(f) => f(ctx),
        };

        match value {
            Value::Object(map) => Ok(map),
            Value::Array(_) => Err(OAuthError::InvalidState(
                "login state must be a key/value object, got an array".into(),
            )),
            Value::Null => Err(OAuthError::InvalidState(
                "login state must be a key/value object, got null".into(),
            )),
            other => Err(OAuthError::InvalidState(format!(
                "login state must be a key/value object, got {}",
                json_type_name(&other)
            ))),
        }
    }
}

impl From<Value> for UserState {
    fn from(value: Value) -> Self {
        UserState::Value(value)
    }
}

impl fmt::Debug for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserState::Value(value) => f.debug_tuple("Value").field(value).finish(),
            UserState::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// State recovered from a verified callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedState {
    /// Key the login was started for, including any preserve flag.
    pub provider_key: ProviderKey,
    /// Tenant instance. The key's instance wins over a payload `instanceKey`.
    pub instance_key: Option<String>,
    /// Application state, without the reserved `csrf` and `providerKey` fields.
    pub payload: Map<String, Value>,
}

/// Generate a URL-safe random token.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Encoder/verifier for the authorization `state` parameter.
#[derive(Debug, Clone)]
pub struct StateCodec {
    ttl: Duration,
}

impl Default for StateCodec {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL)
    }
}

impl StateCodec {
    /// Codec whose cookies live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Lifetime of the CSRF and PKCE cookies.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cookie_attributes(&self, overrides: Option<&CookieOverrides>) -> CookieAttributes {
        CookieAttributes::default()
            .merge(overrides)
            .with_max_age(self.ttl)
    }

    /// Build the state value for a login and set the CSRF cookie.
    pub fn encode(
        &self,
        ctx: &mut dyn RequestContext,
        key: &ProviderKey,
        user_state: Option<&UserState>,
    ) -> Result<String> {
        let mut payload = match user_state {
            Some(state) => state.resolve(&*ctx)?,
            None => Map::new(),
        };

        let csrf = random_token(TOKEN_BYTES);
        ctx.set_cookie(&key.csrf_cookie(), &csrf, &self.cookie_attributes(None))?;

        payload.insert(CSRF_FIELD.into(), Value::String(csrf));
        payload.insert(PROVIDER_KEY_FIELD.into(), Value::String(key.to_string()));
        if let Some(instance) = key.instance_key() {
            payload.insert(INSTANCE_KEY_FIELD.into(), Value::String(instance.into()));
        }

        let json = serde_json::to_vec(&Value::Object(payload))
            .map_err(|e| OAuthError::InvalidState(e.to_string()))?;
        let encoded = URL_SAFE_NO_PAD.encode(json);

        tracing::debug!(provider_key = %key, "Authorization state issued");
        Ok(urlencoding::encode(&encoded).into_owned())
    }

    /// Parse a raw state value without verifying it.
    pub fn parse_payload(raw: &str) -> Result<Map<String, Value>> {
        let raw = urlencoding::decode(raw.trim())
            .map_err(|_| OAuthError::InvalidState("state is not valid UTF-8".into()))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .map_err(|_| OAuthError::InvalidState("state is not base64url".into()))?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(OAuthError::InvalidState("state is not a JSON object".into())),
            Err(_) => Err(OAuthError::InvalidState("state is not JSON".into())),
        }
    }

    /// Provider key embedded in a raw state value.
    pub fn peek_provider_key(raw: &str) -> Result<ProviderKey> {
        let payload = Self::parse_payload(raw)?;
        let key = payload
            .get(PROVIDER_KEY_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| OAuthError::InvalidState("state has no provider key".into()))?;
        ProviderKey::parse(key).map_err(|e| OAuthError::InvalidState(e.to_string()))
    }

    /// Verify a callback's state against the CSRF cookie for `key`.
    pub fn decode(
        &self,
        ctx: &dyn RequestContext,
        key: &ProviderKey,
        raw: Option<&str>,
    ) -> Result<DecodedState> {
        let raw = raw
            .filter(|r| !r.is_empty())
            .ok_or_else(|| OAuthError::MissingState("no state parameter in callback".into()))?;

        let cookie_name = key.csrf_cookie();
        let expected = ctx
            .cookie(&cookie_name)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                OAuthError::MissingState(format!("CSRF cookie \"{}\" not found", cookie_name))
            })?;

        let mut payload = Self::parse_payload(raw)?;

        let csrf = payload
            .remove(CSRF_FIELD)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| OAuthError::InvalidState("state has no CSRF value".into()))?;
        let embedded_key = payload
            .remove(PROVIDER_KEY_FIELD)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| OAuthError::InvalidState("state has no provider key".into()))?;

        if embedded_key != key.to_string()
            || !constant_time_eq(csrf.as_bytes(), expected.as_bytes())
        {
            tracing::warn!(provider_key = %key, "OAuth state mismatch");
            return Err(OAuthError::StateMismatch);
        }

        let instance_key = key.instance_key().map(str::to_string).or_else(|| {
            payload
                .get(INSTANCE_KEY_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        Ok(DecodedState {
            provider_key: key.clone(),
            instance_key,
            payload,
        })
    }

    /// Generate a PKCE verifier and keep it in the `oauth_pkce_<key>` cookie.
    pub fn issue_pkce(&self, ctx: &mut dyn RequestContext, key: &ProviderKey) -> Result<PkceVerifier> {
        let pkce = PkceVerifier::generate();
        ctx.set_cookie(&key.pkce_cookie(), pkce.verifier(), &self.cookie_attributes(None))?;
        Ok(pkce)
    }

    /// PKCE verifier stored for `key`.
    pub fn pkce_verifier(&self, ctx: &dyn RequestContext, key: &ProviderKey) -> Option<String> {
        ctx.cookie(&key.pkce_cookie()).filter(|v| !v.is_empty())
    }

    /// Delete the CSRF and PKCE cookies of a finished login.
    pub fn clear(
        &self,
        ctx: &mut dyn RequestContext,
        key: &ProviderKey,
        overrides: Option<&CookieOverrides>,
    ) -> Result<()> {
        let attrs = self.cookie_attributes(overrides);
        ctx.delete_cookie(&key.csrf_cookie(), &attrs)?;
        if ctx.cookie(&key.pkce_cookie()).is_some() {
            ctx.delete_cookie(&key.pkce_cookie(), &attrs)?;
        }
        Ok(())
    }
}

/// PKCE (Proof Key for Code Exchange) verifier.
#[derive(Clone)]
pub struct PkceVerifier {
    verifier: String,
    challenge: String,
}

impl PkceVerifier {
    /// Generate a new PKCE verifier with S256 challenge.
    pub fn generate() -> Self {
        Self::from_verifier(random_token(TOKEN_BYTES))
    }

    /// Rebuild from a stored verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        use sha2::{Digest, Sha256};

        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    /// Get the code verifier (for token exchange).
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Get the code challenge (for authorization request).
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Get the challenge method.
    pub fn method(&self) -> &'static str {
        "S256"
    }
}

impl fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"***")
            .field("challenge", &self.challenge)
            .finish()
    }
}
