//! Bearer token decoding and validation.
//!
//! [`decode`] splits a compact JWT into its header, payload and signature
//! without verifying anything. [`JwtValidator::validate`] runs the claim
//! checks and, when a JWKS URI is configured, verifies the signature against
//! a key set held in a [`JwksCache`].
//!
//! Claim and signature failures are reported as [`ValidationResult`] data;
//! only a structurally malformed token is an error.
//!
//! # Example
//!
//! ```rust,no_run
//! use rustapi_oauth::jwt::{JwksCache, JwtValidator, ValidationOptions};
//! use rustapi_oauth::HttpFetcher;
//! use std::sync::Arc;
//!
//! # async fn run(fetcher: Arc<dyn HttpFetcher>, token: &str) -> Result<(), rustapi_oauth::jwt::JwtError> {
//! let validator = JwtValidator::new(JwksCache::new(fetcher));
//! let options = ValidationOptions::new()
//!     .issuer("https://login.microsoftonline.com/tenant/v2.0")
//!     .audience("api://my-app")
//!     .jwks_uri("https://login.microsoftonline.com/tenant/discovery/v2.0/keys");
//!
//! let result = validator.validate(token, &options).await?;
//! if !result.valid {
//!     println!("rejected: {:?}", result.error_code);
//! }
//! # Ok(())
//! # }
//! ```

mod jwks;
mod validate;

pub use jwks::JwksCache;
pub use validate::{CustomValidator, JwtValidator, ValidationOptions};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Structural failure decoding a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JwtError {
    /// Wrong segment count, bad base64url, or a segment that is not a JSON object.
    #[error("Malformed token: {0}")]
    Malformed(String),
}

impl JwtError {
    /// The error code this failure is reported under.
    pub fn code(&self) -> ValidationErrorCode {
        match self {
            JwtError::Malformed(_) => ValidationErrorCode::Malformed,
        }
    }
}

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    /// `exp` has passed, or the token is older than `max_token_age`
    Expired,
    /// `nbf` is still in the future
    NotYetValid,
    /// `iss` is not an accepted issuer
    InvalidIssuer,
    /// `aud` does not contain the expected audience
    InvalidAudience,
    /// Signature, algorithm or key lookup failed
    InvalidSignature,
    /// The caller's custom check rejected the payload
    CustomValidationFailed,
    /// Not a three-segment JWT (only produced by [`decode`])
    Malformed,
}

/// Outcome of [`JwtValidator::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Whether every enabled check passed
    pub valid: bool,
    /// Token claims, present when valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    /// Failure category; `None` for a subject mismatch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ValidationErrorCode>,
    /// Human readable failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub(crate) fn success(payload: Map<String, Value>) -> Self {
        Self {
            valid: true,
            payload: Some(payload),
            error_code: None,
            error: None,
        }
    }

    pub(crate) fn failure(code: Option<ValidationErrorCode>, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            payload: None,
            error_code: code,
            error: Some(message.into()),
        }
    }
}

/// A token split into its parts. Nothing has been verified.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedJwt {
    /// JOSE header
    pub header: Map<String, Value>,
    /// Claims
    pub payload: Map<String, Value>,
    /// Raw base64url signature segment
    pub signature: String,
    signing_input: String,
}

impl DecodedJwt {
    /// The `alg` header.
    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// The `kid` header.
    pub fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// `header.payload`, the bytes the signature covers.
    pub fn signing_input(&self) -> &str {
        &self.signing_input
    }
}

/// Split a compact JWT into header, payload and signature.
pub fn decode(token: &str) -> Result<DecodedJwt, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(JwtError::Malformed(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }

    let header = decode_segment(parts[0], "header")?;
    let payload = decode_segment(parts[1], "payload")?;

    Ok(DecodedJwt {
        header,
        payload,
        signature: parts[2].to_string(),
        signing_input: format!("{}.{}", parts[0], parts[1]),
    })
}

fn decode_segment(segment: &str, name: &str) -> Result<Map<String, Value>, JwtError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| JwtError::Malformed(format!("{} is not base64url: {}", name, e)))?;

    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(JwtError::Malformed(format!("{} is not a JSON object", name))),
        Err(e) => Err(JwtError::Malformed(format!("{} is not JSON: {}", name, e))),
    }
}

#[cfg(test)]
pub(crate) fn unsigned_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.c2ln", header, body)
}
