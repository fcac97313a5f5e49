//! Cookie-backed token persistence.
//!
//! Every token set is written as one cookie per field, named
//! `<providerKey>_<field>`: the three base fields (`access_token`,
//! `refresh_token`, `access_token_expires_at`) plus the provider's declared
//! [`FieldDescriptor`](crate::provider::FieldDescriptor)s. Only the refresh
//! token is encrypted. Reads are all-or-nothing.

use crate::context::{CookieAttributes, CookieOverrides, RequestContext};
use crate::crypto::TokenCipher;
use crate::error::Result;
use crate::provider::{
    coerce_stored, value_text, FieldDescriptor, ProviderConfig, ProviderKey, ProviderRegistry,
};
use crate::tokens::{unix_now, TokenSet};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Base field: the access token.
pub const ACCESS_TOKEN_FIELD: &str = "access_token";
/// Base field: the encrypted refresh token.
pub const REFRESH_TOKEN_FIELD: &str = "refresh_token";
/// Base field: absolute access-token expiry in Unix seconds.
pub const EXPIRES_AT_FIELD: &str = "access_token_expires_at";

/// Values read back from cookies, keyed by logical field name.
///
/// The refresh token is already decrypted.
#[derive(Clone, Default, PartialEq)]
pub struct StoredFields {
    values: Map<String, Value>,
}

impl StoredFields {
    /// Set a field.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Access token as text.
    pub fn access_token(&self) -> Option<String> {
        self.values.get(ACCESS_TOKEN_FIELD).and_then(value_text)
    }

    /// Decrypted refresh token, `None` when empty.
    pub fn refresh_token(&self) -> Option<String> {
        self.values
            .get(REFRESH_TOKEN_FIELD)
            .and_then(value_text)
            .filter(|t| !t.is_empty())
    }

    /// Absolute expiry.
    pub fn expires_at(&self) -> Option<u64> {
        self.values.get(EXPIRES_AT_FIELD).and_then(Value::as_u64)
    }

    /// All fields.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was read.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for StoredFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredFields")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reads and writes token sets through request cookies.
#[derive(Debug, Clone)]
pub struct CookieTokenStore {
    cipher: Arc<TokenCipher>,
    default_lifetime: Duration,
}

impl CookieTokenStore {
    /// Create a store. `default_lifetime` applies when a response carries
    /// no `expires_in` and no prior expiry is known.
    pub fn new(cipher: Arc<TokenCipher>, default_lifetime: Duration) -> Self {
        Self {
            cipher,
            default_lifetime,
        }
    }

    fn attributes(overrides: Option<&CookieOverrides>) -> CookieAttributes {
        CookieAttributes::default().merge(overrides)
    }

    /// Write a token set for `key`.
    ///
    /// Returns the tokens with their absolute expiry filled in. Declared
    /// provider fields the token set lacks are written empty so the
    /// all-or-nothing read still succeeds.
    pub fn persist(
        &self,
        ctx: &mut dyn RequestContext,
        tokens: &TokenSet,
        config: &ProviderConfig,
        key: &ProviderKey,
        overrides: Option<&CookieOverrides>,
    ) -> Result<TokenSet> {
        self.seal(tokens, config, key, overrides)?.write(ctx)
    }

    /// Encrypt and serialize a token set without touching the response.
    ///
    /// Every fallible step of [`persist`](Self::persist) happens here, so a
    /// caller storing several providers can seal all of them before
    /// writing any cookie.
    pub fn seal(
        &self,
        tokens: &TokenSet,
        config: &ProviderConfig,
        key: &ProviderKey,
        overrides: Option<&CookieOverrides>,
    ) -> Result<SealedTokens> {
        let expires_at = match (tokens.expires_in, tokens.expires_at) {
            (Some(expires_in), _) => unix_now().saturating_add(expires_in),
            (None, Some(expires_at)) => expires_at,
            (None, None) => unix_now().saturating_add(self.default_lifetime.as_secs()),
        };

        let refresh_plain = tokens.refresh_token.as_deref().unwrap_or_default();
        let refresh_sealed = self.cipher.encrypt(refresh_plain)?;

        let mut cookies = vec![
            (key.field_key(ACCESS_TOKEN_FIELD), tokens.access_token.clone()),
            (key.field_key(REFRESH_TOKEN_FIELD), refresh_sealed),
            (key.field_key(EXPIRES_AT_FIELD), expires_at.to_string()),
        ];
        for field in config.fields() {
            let serialized = tokens
                .field(&field.key)
                .and_then(|value| (field.serialize)(&value))
                .unwrap_or_default();
            cookies.push((key.field_key(field.storage_name()), serialized));
        }

        let mut tokens = tokens.clone();
        tokens.expires_at = Some(expires_at);
        Ok(SealedTokens {
            storage_key: key.storage_key(),
            cookies,
            attrs: Self::attributes(overrides),
            tokens,
        })
    }

    /// Read every declared field for `key`.
    ///
    /// Returns `None` if any field is missing or the refresh token does not
    /// decrypt. All-digit values come back as numbers.
    pub fn read(
        &self,
        ctx: &dyn RequestContext,
        config: &ProviderConfig,
        key: &ProviderKey,
    ) -> Option<StoredFields> {
        let mut stored = StoredFields::default();

        let read_raw = |name: &str| {
            let value = ctx.cookie(&key.field_key(name));
            if value.is_none() {
                tracing::debug!(provider_key = %key.storage_key(), field = name, "Stored field missing");
            }
            value
        };

        let access_token = read_raw(ACCESS_TOKEN_FIELD)?;
        stored.insert(ACCESS_TOKEN_FIELD, coerce_stored(&access_token));

        let sealed = read_raw(REFRESH_TOKEN_FIELD)?;
        let refresh_token = match self.cipher.decrypt(&sealed) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::warn!(provider_key = %key.storage_key(), error = %e, "Stored refresh token unreadable");
                return None;
            }
        };
        stored.insert(REFRESH_TOKEN_FIELD, Value::String(refresh_token));

        let expires_at = read_raw(EXPIRES_AT_FIELD)?;
        stored.insert(EXPIRES_AT_FIELD, coerce_stored(&expires_at));

        for field in config.fields() {
            let raw = read_raw(field.storage_name())?;
            stored.insert(field.key.clone(), (field.parse)(&raw));
        }

        Some(stored)
    }

    /// Delete every stored field for `key`.
    pub fn clear(
        &self,
        ctx: &mut dyn RequestContext,
        config: &ProviderConfig,
        key: &ProviderKey,
        overrides: Option<&CookieOverrides>,
    ) -> Result<usize> {
        let attrs = Self::attributes(overrides);
        let mut removed = 0;

        for name in field_names(&config.fields()) {
            let cookie = key.field_key(&name);
            if ctx.cookie(&cookie).is_some() {
                ctx.delete_cookie(&cookie, &attrs)?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Delete stored fields of every other registered instance of `key`'s
    /// provider family. Skipped when `key` carries `:preserve`.
    pub fn clear_siblings(
        &self,
        ctx: &mut dyn RequestContext,
        registry: &ProviderRegistry,
        key: &ProviderKey,
        overrides: Option<&CookieOverrides>,
    ) -> Result<usize> {
        if key.is_preserve() {
            tracing::debug!(provider_key = %key, "Preserve flag set, sibling cookies kept");
            return Ok(0);
        }

        let own = key.storage_key();
        let mut removed = 0;
        for sibling in registry.instances(key.provider()) {
            if sibling.storage_key() == own {
                continue;
            }
            let config = registry.get(&sibling)?;
            removed += self.clear(ctx, &config, &sibling, overrides)?;
        }

        if removed > 0 {
            tracing::debug!(provider_key = %own, removed, "Cleared sibling instance cookies");
        }
        Ok(removed)
    }

    /// Fill fields a refresh response omitted from the previous token set.
    ///
    /// The refresh token is carried forward when not rotated, and declared
    /// provider fields (such as values captured at callback time) are kept.
    /// The old absolute expiry is dropped so persisting recomputes it.
    pub fn normalize_refreshed(
        &self,
        raw: TokenSet,
        config: &ProviderConfig,
        previous: &TokenSet,
    ) -> TokenSet {
        let mut tokens = raw;

        if tokens.refresh_token.is_none() {
            tokens.refresh_token = previous.refresh_token.clone();
        }

        for field in config.fields() {
            if !tokens.extra.contains_key(&field.key) {
                if let Some(value) = previous.extra.get(&field.key) {
                    tokens.extra.insert(field.key.clone(), value.clone());
                }
            }
        }

        tokens.expires_at = None;
        tokens
    }
}

/// A token set ready to be written as cookies.
///
/// Produced by [`CookieTokenStore::seal`].
pub struct SealedTokens {
    storage_key: String,
    cookies: Vec<(String, String)>,
    attrs: CookieAttributes,
    tokens: TokenSet,
}

impl fmt::Debug for SealedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedTokens")
            .field("provider_key", &self.storage_key)
            .field("cookies", &self.cookie_names().collect::<Vec<_>>())
            .finish()
    }
}

impl SealedTokens {
    /// Names of the cookies [`write`](Self::write) will set.
    pub fn cookie_names(&self) -> impl Iterator<Item = &str> {
        self.cookies.iter().map(|(name, _)| name.as_str())
    }

    /// Set every cookie and return the tokens with their absolute expiry.
    pub fn write(self, ctx: &mut dyn RequestContext) -> Result<TokenSet> {
        for (name, value) in &self.cookies {
            ctx.set_cookie(name, value, &self.attrs)?;
        }

        tracing::debug!(
            provider_key = %self.storage_key,
            expires_at = self.tokens.expires_at,
            has_refresh_token = self.tokens.refresh_token.is_some(),
            "Tokens persisted"
        );
        Ok(self.tokens)
    }
}

fn field_names(fields: &[FieldDescriptor]) -> Vec<String> {
    let mut names = vec![
        ACCESS_TOKEN_FIELD.to_string(),
        REFRESH_TOKEN_FIELD.to_string(),
        EXPIRES_AT_FIELD.to_string(),
    ];
    names.extend(fields.iter().map(|f| f.storage_name().to_string()));
    names
}
