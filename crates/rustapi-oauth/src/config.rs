//! Settings loaded from the environment.
//!
//! Exactly one variable is required: `OAUTH_ENCRYPTION_KEY`, a 64-character
//! hexadecimal string (32 bytes) used to encrypt refresh tokens at rest.
//! Startup must fail when it is absent or malformed, so loading validates it
//! eagerly.
//!
//! # Example
//!
//! ```ignore
//! use rustapi_oauth::config::OAuthSettings;
//!
//! // Reads .env (if present) and OAUTH_* variables
//! let settings = OAuthSettings::from_env().expect("invalid OAuth settings");
//! ```

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Prefix of every environment variable read by [`OAuthSettings::from_env`].
pub const ENV_PREFIX: &str = "OAUTH_";

/// Required length of the hex-encoded encryption key.
pub const ENCRYPTION_KEY_HEX_LEN: usize = 64;

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigError {
    /// Environment variable deserialization failed.
    EnvyError(envy::Error),
    /// A required environment variable is missing.
    MissingVar(String),
    /// The encryption key is empty, the wrong length, or not hex.
    InvalidKey(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvyError(e) => write!(f, "Configuration error: {}", e),
            ConfigError::MissingVar(var) => {
                write!(f, "Missing required environment variable: {}", var)
            }
            ConfigError::InvalidKey(reason) => write!(f, "Invalid encryption key: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::EnvyError(e) => Some(e),
            ConfigError::MissingVar(_) | ConfigError::InvalidKey(_) => None,
        }
    }
}

impl From<envy::Error> for ConfigError {
    fn from(err: envy::Error) -> Self {
        match err {
            envy::Error::MissingValue(ref field) => {
                ConfigError::MissingVar(format!("{}{}", ENV_PREFIX, field.to_uppercase()))
            }
            other => ConfigError::EnvyError(other),
        }
    }
}

fn default_csrf_ttl_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_token_lifetime_secs() -> u64 {
    3600
}

/// Runtime settings for the OAuth service.
#[derive(Clone, Deserialize)]
pub struct OAuthSettings {
    /// Hex-encoded 256-bit key for refresh-token encryption (`OAUTH_ENCRYPTION_KEY`).
    pub encryption_key: String,
    /// Lifetime of the CSRF and PKCE cookies (`OAUTH_CSRF_TTL_SECS`, default 300).
    #[serde(default = "default_csrf_ttl_secs")]
    pub csrf_ttl_secs: u64,
    /// Timeout for token and JWKS requests (`OAUTH_HTTP_TIMEOUT_SECS`, default 30).
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Access-token lifetime assumed when a provider omits `expires_in`
    /// (`OAUTH_DEFAULT_TOKEN_LIFETIME_SECS`, default 3600).
    #[serde(default = "default_token_lifetime_secs")]
    pub default_token_lifetime_secs: u64,
}

impl OAuthSettings {
    /// Create settings with the given key and default timings.
    pub fn new(encryption_key: impl Into<String>) -> Self {
        Self {
            encryption_key: encryption_key.into(),
            csrf_ttl_secs: default_csrf_ttl_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            default_token_lifetime_secs: default_token_lifetime_secs(),
        }
    }

    /// Load settings from `OAUTH_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    ///
    /// # Errors
    ///
    /// Fails when `OAUTH_ENCRYPTION_KEY` is absent or invalid, or when an
    /// optional variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let settings = envy::prefixed(ENV_PREFIX).from_env::<Self>()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the encryption key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_encryption_key(&self.encryption_key).map(|_| ())
    }

    /// Set the CSRF cookie lifetime.
    pub fn csrf_ttl(mut self, ttl: Duration) -> Self {
        self.csrf_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the outbound HTTP timeout.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the fallback access-token lifetime.
    pub fn default_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_token_lifetime_secs = lifetime.as_secs();
        self
    }

    /// CSRF cookie lifetime.
    pub fn csrf_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.csrf_ttl_secs)
    }

    /// Outbound HTTP timeout.
    pub fn http_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Fallback access-token lifetime.
    pub fn default_token_lifetime_duration(&self) -> Duration {
        Duration::from_secs(self.default_token_lifetime_secs)
    }
}

impl fmt::Debug for OAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthSettings")
            .field("encryption_key", &"***")
            .field("csrf_ttl_secs", &self.csrf_ttl_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("default_token_lifetime_secs", &self.default_token_lifetime_secs)
            .finish()
    }
}

/// Decode a 64-character hex string into a 32-byte key.
pub fn parse_encryption_key(hex_key: &str) -> Result<[u8; 32], ConfigError> {
    let hex_key = hex_key.trim();
    if hex_key.is_empty() {
        return Err(ConfigError::InvalidKey("key is empty".to_string()));
    }
    if hex_key.len() != ENCRYPTION_KEY_HEX_LEN {
        return Err(ConfigError::InvalidKey(format!(
            "expected {} hex characters (32 bytes), got {}",
            ENCRYPTION_KEY_HEX_LEN,
            hex_key.len()
        )));
    }

    let bytes = hex::decode(hex_key)
        .map_err(|e| ConfigError::InvalidKey(format!("not a hex string: {}", e)))?;

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
