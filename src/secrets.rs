//! Encryption of stored root credentials.
//!
//! Uses AES-256-GCM with a per-secret key derived from the node's master key:
//!
//! ```text
//! master_key ─┬─► HKDF-SHA256 ─► derived_key (per secret)
//!             │
//! salt ───────┘
//! ```
//!
//! The stored text is `base64(salt || nonce || ciphertext || tag)`, so a
//! single column holds everything needed to decrypt.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng, rand_core::RngCore},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

/// Size of the AES-256 key in bytes.
const KEY_SIZE: usize = 32;

/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Size of the per-secret salt for key derivation.
const SALT_SIZE: usize = 16;

const HKDF_INFO: &[u8] = b"lyra-root-credential-v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// Master key shorter than [`KEY_SIZE`] bytes.
    InvalidMasterKey,
    EncryptionFailed(String),
    /// Ciphertext is malformed or fails authentication.
    DecryptionFailed,
}

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMasterKey => {
                write!(f, "Master key must be at least {} bytes", KEY_SIZE)
            }
            Self::EncryptionFailed(msg) => write!(f, "Encryption failed: {}", msg),
            Self::DecryptionFailed => write!(f, "Decryption failed"),
        }
    }
}

impl std::error::Error for SecretError {}

/// Holds the master key and performs encrypt/decrypt of credentials.
pub struct SecretsCrypto {
    master_key: SecretString,
}

impl SecretsCrypto {
    pub fn new(master_key: SecretString) -> Result<Self, SecretError> {
        if master_key.expose_secret().len() < KEY_SIZE {
            return Err(SecretError::InvalidMasterKey);
        }
        Ok(Self { master_key })
    }

    pub fn encrypt_secret(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let cipher = self.cipher(&salt)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::EncryptionFailed(e.to_string()))?;

        let mut packed = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        packed.extend_from_slice(&salt);
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(packed))
    }

    pub fn decrypt_secret(&self, encoded: &str) -> Result<SecretString, SecretError> {
        let packed = STANDARD
            .decode(encoded.trim())
            .map_err(|_| SecretError::DecryptionFailed)?;
        if packed.len() < SALT_SIZE + NONCE_SIZE {
            return Err(SecretError::DecryptionFailed);
        }

        let (salt, rest) = packed.split_at(SALT_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
        let cipher = self.cipher(salt).map_err(|_| SecretError::DecryptionFailed)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::DecryptionFailed)?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| SecretError::DecryptionFailed)
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm, SecretError> {
        let hk = Hkdf::<Sha256>::new(Some(salt), self.master_key.expose_secret().as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|_| SecretError::EncryptionFailed("key derivation failed".to_string()))?;
        Aes256Gcm::new_from_slice(&key).map_err(|e| SecretError::EncryptionFailed(e.to_string()))
    }
}

impl fmt::Debug for SecretsCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsCrypto")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto() -> SecretsCrypto {
        SecretsCrypto::new(SecretString::from("0123456789abcdef0123456789abcdef")).unwrap()
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let c = crypto();
        let encrypted = c.encrypt_secret("hunter22").unwrap();
        assert!(!encrypted.contains("hunter22"));
        assert_eq!(c.decrypt_secret(&encrypted).unwrap().expose_secret(), "hunter22");
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let c = crypto();
        assert_ne!(
            c.encrypt_secret("same").unwrap(),
            c.encrypt_secret("same").unwrap()
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let c = crypto();
        let mut packed = STANDARD.decode(c.encrypt_secret("secret").unwrap()).unwrap();
        let last = packed.len() - 1;
        packed[last] ^= 0xff;
        assert_eq!(
            c.decrypt_secret(&STANDARD.encode(packed)).unwrap_err(),
            SecretError::DecryptionFailed
        );
        assert_eq!(c.decrypt_secret("not base64!").unwrap_err(), SecretError::DecryptionFailed);
    }

    #[test]
    fn test_master_key_too_short() {
        assert_eq!(
            SecretsCrypto::new(SecretString::from("short")).unwrap_err(),
            SecretError::InvalidMasterKey
        );
    }

    #[test]
    fn test_debug_redacts_master_key() {
        let debug = format!("{:?}", crypto());
        assert!(!debug.contains("0123456789abcdef"));
    }
}
