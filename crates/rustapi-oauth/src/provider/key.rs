//! Provider identity strings: `<provider>[:<instance>][:preserve]`.

use crate::error::{OAuthError, Result};
use std::fmt;
use std::str::FromStr;

const PRESERVE: &str = "preserve";

/// Identity of a registered provider, optionally scoped to a tenant instance.
///
/// The `:preserve` flag only travels through one login/callback round trip;
/// it is never part of [`storage_key`](Self::storage_key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    provider: String,
    instance: Option<String>,
    preserve: bool,
}

impl ProviderKey {
    /// Key for an unscoped provider.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            instance: None,
            preserve: false,
        }
    }

    /// Key for a tenant instance of a provider.
    pub fn instance(provider: impl Into<String>, instance: impl Into<String>) -> Self {
        let instance = instance.into();
        Self {
            provider: provider.into(),
            instance: (!instance.is_empty()).then_some(instance),
            preserve: false,
        }
    }

    /// Parse a key string.
    ///
    /// With three or more segments the middle one is the instance; with two,
    /// the second is the instance unless it is `preserve`. A trailing
    /// `preserve` segment sets the preserve flag.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        let provider = parts[0].trim();
        if provider.is_empty() {
            return Err(OAuthError::configuration(format!(
                "provider key \"{}\" has no provider name",
                raw
            )));
        }

        let (instance, preserve) = match parts.as_slice() {
            [_] => (None, false),
            [_, second] if *second == PRESERVE => (None, true),
            [_, second] => (Some(*second), false),
            [_, middle, .., last] => (Some(*middle), *last == PRESERVE),
            [] => (None, false),
        };

        Ok(Self {
            provider: provider.to_string(),
            instance: instance.filter(|i| !i.is_empty()).map(str::to_string),
            preserve,
        })
    }

    /// Set the preserve flag.
    pub fn with_preserve(mut self, preserve: bool) -> Self {
        self.preserve = preserve;
        self
    }

    /// Provider family name.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Tenant instance, if scoped.
    pub fn instance_key(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Whether sibling-instance cookies survive the callback.
    pub fn is_preserve(&self) -> bool {
        self.preserve
    }

    /// Persisted identity: `provider` or `provider:instance`.
    pub fn storage_key(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}:{}", self.provider, instance),
            None => self.provider.clone(),
        }
    }

    /// Same key without the preserve flag.
    pub fn without_preserve(&self) -> Self {
        self.clone().with_preserve(false)
    }

    /// Persisted field name: `<storage_key>_<field>`.
    pub fn field_key(&self, field: &str) -> String {
        format!("{}_{}", self.storage_key(), field)
    }

    /// Name of the CSRF cookie for this key.
    pub fn csrf_cookie(&self) -> String {
        format!("oauth_csrf_{}", self)
    }

    /// Name of the PKCE verifier cookie for this key.
    pub fn pkce_cookie(&self) -> String {
        format!("oauth_pkce_{}", self)
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.provider)?;
        if let Some(instance) = &self.instance {
            write!(f, ":{}", instance)?;
        }
        if self.preserve {
            write!(f, ":{}", PRESERVE)?;
        }
        Ok(())
    }
}

impl FromStr for ProviderKey {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Conversion into a [`ProviderKey`], parsing strings.
pub trait IntoProviderKey {
    /// Convert, failing on an empty provider name.
    fn into_provider_key(self) -> Result<ProviderKey>;
}

impl IntoProviderKey for ProviderKey {
    fn into_provider_key(self) -> Result<ProviderKey> {
        Ok(self)
    }
}

impl IntoProviderKey for &ProviderKey {
    fn into_provider_key(self) -> Result<ProviderKey> {
        Ok(self.clone())
    }
}

impl IntoProviderKey for &str {
    fn into_provider_key(self) -> Result<ProviderKey> {
        ProviderKey::parse(self)
    }
}

impl IntoProviderKey for String {
    fn into_provider_key(self) -> Result<ProviderKey> {
        ProviderKey::parse(&self)
    }
}

impl IntoProviderKey for &String {
    fn into_provider_key(self) -> Result<ProviderKey> {
        ProviderKey::parse(self)
    }
}
