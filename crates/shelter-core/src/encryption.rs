//! Secret codec for provider credentials stored in the settings store
//!
//! Values are encrypted with AES-256-GCM under a key derived (SHA-256) from the
//! operator secret. The stored form is `hex(nonce):hex(ciphertext)`.

use crate::BackupError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use sha2::{Digest, Sha256};

/// Used when no `SHELTER_SECRET_KEY` is configured. Only acceptable for
/// single-tenant local deployments; `Config::validate` rejects it elsewhere.
const FALLBACK_SECRET: &str = "shelter-local-fallback-secret-v1";

const NONCE_LEN: usize = 12;

/// Symmetric codec for refresh/access tokens
#[derive(Clone)]
pub struct SecretCodec {
    cipher: Aes256Gcm,
    fallback: bool,
}

impl SecretCodec {
    /// Create a codec from the operator secret, or the built-in fallback when `None`.
    pub fn new(secret: Option<&str>) -> Self {
        let (secret, fallback) = match secret.filter(|s| !s.is_empty()) {
            Some(s) => (s, false),
            None => (FALLBACK_SECRET, true),
        };
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
            fallback,
        }
    }

    /// Whether this codec was built from the hard-coded fallback secret
    pub fn uses_fallback_key(&self) -> bool {
        self.fallback
    }

    /// Encrypt a plaintext string with a fresh random nonce
    pub fn encrypt(&self, plaintext: &str) -> Result<String, BackupError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| BackupError::Crypto(format!("Encryption failed: {}", e)))?;

        Ok(format!(
            "{}:{}",
            hex::encode(nonce),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a value produced by [`SecretCodec::encrypt`], failing on anything else
    pub fn try_decrypt(&self, encrypted: &str) -> Result<String, BackupError> {
        let (nonce_hex, cipher_hex) = encrypted
            .split_once(':')
            .ok_or_else(|| BackupError::Crypto("Missing nonce delimiter".to_string()))?;

        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|e| BackupError::Crypto(format!("Invalid nonce encoding: {}", e)))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(BackupError::Crypto(format!(
                "Nonce must be {} bytes, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            )));
        }
        let ciphertext = hex::decode(cipher_hex)
            .map_err(|e| BackupError::Crypto(format!("Invalid ciphertext encoding: {}", e)))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| BackupError::Crypto(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| BackupError::Crypto(format!("Invalid UTF-8 in decrypted data: {}", e)))
    }

    /// Decrypt a stored value, returning it unchanged when it cannot be decrypted.
    ///
    /// Settings written before tokens were encrypted are plain strings; those
    /// pass through silently. A value that is shaped like ciphertext but fails
    /// to decrypt (wrong key, tampering) also passes through, with a warning.
    pub fn decrypt_or_passthrough(&self, value: &str) -> String {
        match self.try_decrypt(value) {
            Ok(plaintext) => plaintext,
            Err(e) if looks_encrypted(value) => {
                tracing::warn!(
                    error = %e,
                    "Stored secret looks encrypted but could not be decrypted, using it verbatim"
                );
                value.to_string()
            }
            Err(_) => {
                tracing::debug!("Stored secret is legacy plaintext, using it verbatim");
                value.to_string()
            }
        }
    }
}

fn looks_encrypted(value: &str) -> bool {
    match value.split_once(':') {
        Some((nonce, cipher)) => {
            nonce.len() == NONCE_LEN * 2
                && !cipher.is_empty()
                && nonce
                    .chars()
                    .chain(cipher.chars())
                    .all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_codec() -> SecretCodec {
        SecretCodec::new(Some("01234567890123456789012345678901"))
    }

    #[test]
    fn test_encryption_decryption() {
        let codec = test_codec();
        let plaintext = "1//0refresh-token-abc";

        let encrypted = codec.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);

        let (nonce, cipher) = encrypted.split_once(':').unwrap();
        assert_eq!(nonce.len(), 24);
        assert!(hex::decode(cipher).is_ok());

        assert_eq!(codec.try_decrypt(&encrypted).unwrap(), plaintext);
        assert_eq!(codec.decrypt_or_passthrough(&encrypted), plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let codec = test_codec();
        let a = codec.encrypt("same").unwrap();
        let b = codec.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_round_trip_various_inputs() {
        let codec = test_codec();
        for input in ["x", "with:colon", "ünïcödé", &"long".repeat(500)] {
            let encrypted = codec.encrypt(input).unwrap();
            assert_eq!(codec.decrypt_or_passthrough(&encrypted), input);
        }
    }

    #[test]
    fn test_legacy_value_passes_through() {
        let codec = test_codec();
        let legacy = "not-encrypted-legacy-value";
        assert!(codec.try_decrypt(legacy).is_err());
        assert_eq!(codec.decrypt_or_passthrough(legacy), legacy);
        assert_eq!(codec.decrypt_or_passthrough("abc:def"), "abc:def");
    }

    #[test]
    fn test_wrong_key_passes_through() {
        let encrypted = test_codec().encrypt("secret").unwrap();
        let other = SecretCodec::new(Some("another-operator-secret"));
        assert!(looks_encrypted(&encrypted));
        assert!(other.try_decrypt(&encrypted).is_err());
        assert_eq!(other.decrypt_or_passthrough(&encrypted), encrypted);
    }

    #[test]
    fn test_fallback_key() {
        assert!(SecretCodec::new(None).uses_fallback_key());
        assert!(SecretCodec::new(Some("")).uses_fallback_key());
        assert!(!test_codec().uses_fallback_key());

        let a = SecretCodec::new(None);
        let b = SecretCodec::new(None);
        let encrypted = a.encrypt("token").unwrap();
        assert_eq!(b.try_decrypt(&encrypted).unwrap(), "token");
    }
}
