//! Refresh-token encryption at rest.
//!
//! Values are sealed with AES-256-GCM under the 32-byte key from
//! [`OAuthSettings`](crate::config::OAuthSettings) and stored as
//! `<nonce hex>:<ciphertext hex>`.

use crate::config::{parse_encryption_key, ConfigError};
use crate::error::{OAuthError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use std::fmt;

const NONCE_LEN: usize = 12;

/// Symmetric cipher for values persisted in cookies.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Create a cipher from raw key bytes.
    pub fn new(key: &[u8; 32]) -> Self {
        let key: [u8; 32] = *key;
        let key = key.into();
        let cipher = Aes256Gcm::new(&key);
        Self { cipher }
    }

    /// Create a cipher from a 64-character hex key.
    pub fn from_hex(hex_key: &str) -> std::result::Result<Self, ConfigError> {
        parse_encryption_key(hex_key).map(|key| Self::new(&key))
    }

    /// Encrypt a string into `nonce:ciphertext` hex.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| OAuthError::Crypto(format!("AES-GCM encryption failed: {}", e)))?;

        Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    ///
    /// Anything that is not exactly two colon-separated hex strings fails.
    pub fn decrypt(&self, value: &str) -> Result<String> {
        let (nonce_hex, data_hex) = value
            .split_once(':')
            .ok_or_else(|| OAuthError::Crypto("encrypted value is not nonce:ciphertext".into()))?;

        if data_hex.contains(':') {
            return Err(OAuthError::Crypto(
                "encrypted value has more than two segments".into(),
            ));
        }

        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|e| OAuthError::Crypto(format!("invalid nonce encoding: {}", e)))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(OAuthError::Crypto("invalid nonce length".into()));
        }

        let ciphertext = hex::decode(data_hex)
            .map_err(|e| OAuthError::Crypto(format!("invalid ciphertext encoding: {}", e)))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| OAuthError::Crypto(format!("AES-GCM decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| OAuthError::Crypto(format!("decrypted value is not UTF-8: {}", e)))
    }
}

/// Compare two byte slices in constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCipher").field("key", &"***").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: &str = "8f3c1a9e0b7d4c2f6a5e9d8c7b6a5f4e3d2c1b0a9f8e7d6c5b4a3f2e1d0c9b8a";

    fn cipher() -> TokenCipher {
        TokenCipher::from_hex(KEY).unwrap()
    }

    #[test]
    fn test_encrypted_shape() {
        let sealed = cipher().encrypt("refresh-123").unwrap();
        let (nonce, data) = sealed.split_once(':').unwrap();
        assert_eq!(nonce.len(), NONCE_LEN * 2);
        assert!(hex::decode(data).is_ok());
        assert!(!sealed.contains("refresh-123"));
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt("secret").unwrap();
        let other = TokenCipher::new(&[7u8; 32]);
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_rejects_malformed_values() {
        let c = cipher();
        for bad in ["", "abc", "zz:zz", "00:", ":00", "a:b:c", "0011:2233:4455"] {
            assert!(c.decrypt(bad).is_err(), "{:?} should not decrypt", bad);
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(plaintext in ".{0,256}") {
            let c = cipher();
            let sealed = c.encrypt(&plaintext).unwrap();
            prop_assert_eq!(c.decrypt(&sealed).unwrap(), plaintext);
        }

        #[test]
        fn prop_non_hex_pairs_fail(left in "[g-z]{1,24}", right in "[0-9a-f]{0,64}") {
            let c = cipher();
            let candidate = format!("{}:{}", left, right);
            prop_assert!(c.decrypt(&candidate).is_err());
            prop_assert!(c.decrypt(&left).is_err());
        }
    }
}
