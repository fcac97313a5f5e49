use super::{decode, DecodedJwt, JwksCache, JwtError, ValidationErrorCode, ValidationResult};
use crate::tokens::unix_now;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Caller-supplied check over the token claims. `Err` carries the message
/// reported with [`ValidationErrorCode::CustomValidationFailed`].
pub type CustomValidator =
    Arc<dyn Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync + 'static>;

/// What [`JwtValidator::validate`] checks.
#[derive(Clone)]
pub struct ValidationOptions {
    /// Leeway in seconds applied to `exp`, `nbf` and `iat`.
    pub clock_tolerance: u64,
    /// Maximum age in seconds measured from `iat`.
    pub max_token_age: Option<u64>,
    /// Accepted issuers; empty accepts any.
    pub issuers: Vec<String>,
    /// Audience that must appear in `aud`.
    pub audience: Option<String>,
    /// Expected `sub`.
    pub subject: Option<String>,
    /// Extra check run after the registered claims.
    pub custom: Option<CustomValidator>,
    /// Whether to verify the signature when a JWKS URI is set.
    pub verify_signature: bool,
    /// Where to fetch signing keys from.
    pub jwks_uri: Option<String>,
    /// Accepted `alg` header values.
    pub algorithms: Vec<Algorithm>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            clock_tolerance: 0,
            max_token_age: None,
            issuers: Vec::new(),
            audience: None,
            subject: None,
            custom: None,
            verify_signature: true,
            jwks_uri: None,
            algorithms: vec![
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::ES256,
                Algorithm::ES384,
            ],
        }
    }
}

impl ValidationOptions {
    /// Claims-only validation with no leeway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clock tolerance in seconds.
    pub fn clock_tolerance(mut self, seconds: u64) -> Self {
        self.clock_tolerance = seconds;
        self
    }

    /// Reject tokens issued more than `seconds` ago.
    pub fn max_token_age(mut self, seconds: u64) -> Self {
        self.max_token_age = Some(seconds);
        self
    }

    /// Accept an issuer. May be called repeatedly to build an allow-list.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuers.push(issuer.into());
        self
    }

    /// Require an audience.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Require a subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Add a custom claim check.
    pub fn custom<F>(mut self, check: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(check));
        self
    }

    /// Verify signatures against the key set at `uri`.
    pub fn jwks_uri(mut self, uri: impl Into<String>) -> Self {
        self.jwks_uri = Some(uri.into());
        self
    }

    /// Turn signature verification on or off.
    pub fn verify_signature(mut self, verify: bool) -> Self {
        self.verify_signature = verify;
        self
    }

    /// Replace the accepted algorithms.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }
}

impl fmt::Debug for ValidationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationOptions")
            .field("clock_tolerance", &self.clock_tolerance)
            .field("max_token_age", &self.max_token_age)
            .field("issuers", &self.issuers)
            .field("audience", &self.audience)
            .field("subject", &self.subject)
            .field("custom", &self.custom.is_some())
            .field("verify_signature", &self.verify_signature)
            .field("jwks_uri", &self.jwks_uri)
            .field("algorithms", &self.algorithms)
            .finish()
    }
}

/// Validates bearer tokens, verifying signatures through a [`JwksCache`].
#[derive(Debug, Clone)]
pub struct JwtValidator {
    jwks: JwksCache,
}

impl JwtValidator {
    /// Create a validator over a key-set cache.
    pub fn new(jwks: JwksCache) -> Self {
        Self { jwks }
    }

    /// The key-set cache.
    pub fn jwks(&self) -> &JwksCache {
        &self.jwks
    }

    /// Validate `token` against the current time.
    ///
    /// Only a malformed token is an `Err`; every claim or signature failure
    /// is an invalid [`ValidationResult`].
    pub async fn validate(
        &self,
        token: &str,
        options: &ValidationOptions,
    ) -> Result<ValidationResult, JwtError> {
        self.validate_at(token, options, unix_now()).await
    }

    /// Validate `token` as of `now` (seconds since the epoch).
    pub async fn validate_at(
        &self,
        token: &str,
        options: &ValidationOptions,
        now: u64,
    ) -> Result<ValidationResult, JwtError> {
        let decoded = decode(token)?;

        if let Err(failure) = check_claims(&decoded.payload, options, now) {
            tracing::debug!(code = ?failure.error_code, "JWT claims rejected");
            return Ok(failure);
        }

        if options.verify_signature {
            if let Some(uri) = options.jwks_uri.as_deref() {
                if let Err(failure) = self.verify_signature(&decoded, uri, options).await {
                    return Ok(failure);
                }
            }
        }

        Ok(ValidationResult::success(decoded.payload))
    }

    async fn verify_signature(
        &self,
        decoded: &DecodedJwt,
        uri: &str,
        options: &ValidationOptions,
    ) -> Result<(), ValidationResult> {
        let alg_name = decoded.algorithm().unwrap_or("none");
        let algorithm = Algorithm::from_str(alg_name)
            .ok()
            .filter(|alg| options.algorithms.contains(alg))
            .ok_or_else(|| {
                ValidationResult::failure(
                    Some(ValidationErrorCode::InvalidSignature),
                    format!("Algorithm {} not allowed", alg_name),
                )
            })?;

        let invalid = || {
            ValidationResult::failure(
                Some(ValidationErrorCode::InvalidSignature),
                "Invalid token signature",
            )
        };

        let jwks = match self.jwks.get(uri).await {
            Ok(jwks) => jwks,
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "Failed to fetch JWKS");
                return Err(invalid());
            }
        };

        let Some(jwk) = select_key(&jwks.keys, decoded.key_id()) else {
            tracing::debug!(uri = %uri, kid = ?decoded.key_id(), "No matching signing key");
            return Err(invalid());
        };

        let key = DecodingKey::from_jwk(jwk).map_err(|e| {
            tracing::debug!(uri = %uri, error = %e, "Unusable JWK");
            invalid()
        })?;

        match jsonwebtoken::crypto::verify(
            &decoded.signature,
            decoded.signing_input().as_bytes(),
            &key,
            algorithm,
        ) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(uri = %uri, "JWT signature mismatch");
                Err(invalid())
            }
            Err(e) => {
                tracing::debug!(uri = %uri, error = %e, "JWT signature check failed");
                Err(invalid())
            }
        }
    }
}

/// Signing keys only; the `kid` match, or the sole key when the token has none.
fn select_key<'a>(keys: &'a [Jwk], kid: Option<&str>) -> Option<&'a Jwk> {
    let mut signing = keys
        .iter()
        .filter(|k| !matches!(k.common.public_key_use, Some(PublicKeyUse::Encryption)));

    match kid {
        Some(kid) => signing.find(|k| k.common.key_id.as_deref() == Some(kid)),
        None => {
            let first = signing.next()?;
            signing.next().is_none().then_some(first)
        }
    }
}

fn numeric_claim(payload: &Map<String, Value>, name: &str) -> Option<i64> {
    let value = payload.get(name)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn check_claims(
    payload: &Map<String, Value>,
    options: &ValidationOptions,
    now: u64,
) -> Result<(), ValidationResult> {
    // i128 holds every i64 claim plus any u64 offset without overflow
    let now = i128::from(now);
    let tolerance = i128::from(options.clock_tolerance);

    if let Some(exp) = numeric_claim(payload, "exp").map(i128::from) {
        if exp <= now - tolerance {
            return Err(ValidationResult::failure(
                Some(ValidationErrorCode::Expired),
                "Token has expired",
            ));
        }
    }

    if let Some(nbf) = numeric_claim(payload, "nbf").map(i128::from) {
        if nbf > now + tolerance {
            return Err(ValidationResult::failure(
                Some(ValidationErrorCode::NotYetValid),
                "Token is not yet valid",
            ));
        }
    }

    if let Some(max_age) = options.max_token_age {
        match numeric_claim(payload, "iat").map(i128::from) {
            Some(iat) if iat + i128::from(max_age) + tolerance < now => {
                return Err(ValidationResult::failure(
                    Some(ValidationErrorCode::Expired),
                    "Token is too old",
                ));
            }
            Some(_) => {}
            None => {
                return Err(ValidationResult::failure(
                    Some(ValidationErrorCode::Expired),
                    "Token has no iat claim to check its age",
                ));
            }
        }
    }

    if !options.issuers.is_empty() {
        let iss = payload.get("iss").and_then(Value::as_str);
        if !iss.is_some_and(|iss| options.issuers.iter().any(|accepted| accepted == iss)) {
            return Err(ValidationResult::failure(
                Some(ValidationErrorCode::InvalidIssuer),
                "Invalid token issuer",
            ));
        }
    }

    if let Some(expected) = options.audience.as_deref() {
        let matched = match payload.get("aud") {
            Some(Value::String(aud)) => aud == expected,
            Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(expected)),
            _ => false,
        };
        if !matched {
            return Err(ValidationResult::failure(
                Some(ValidationErrorCode::InvalidAudience),
                "Invalid token audience",
            ));
        }
    }

    if let Some(expected) = options.subject.as_deref() {
        if payload.get("sub").and_then(Value::as_str) != Some(expected) {
            return Err(ValidationResult::failure(None, "Invalid subject"));
        }
    }

    if let Some(check) = &options.custom {
        if let Err(message) = check(payload) {
            return Err(ValidationResult::failure(
                Some(ValidationErrorCode::CustomValidationFailed),
                message,
            ));
        }
    }

    Ok(())
}
