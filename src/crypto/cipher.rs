//! Default local-license encryption using ChaCha20-Poly1305.
//!
//! Blob layout: `nonce (12 bytes) || ciphertext+tag`.

use super::CryptoProvider;
use crate::errors::{ErrorKind, LicenseError, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// ChaCha20-Poly1305 provider keyed by `SHA-256(key ":" salt)`.
pub struct DefaultCryptoProvider {
    key: [u8; 32],
}

impl DefaultCryptoProvider {
    /// Derive the cipher key from a key string and salt.
    pub fn new(key: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(b":");
        hasher.update(salt.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl std::fmt::Debug for DefaultCryptoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCryptoProvider").finish_non_exhaustive()
    }
}

impl CryptoProvider for DefaultCryptoProvider {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| LicenseError::storage(format!("Failed to encrypt license: {}", e)))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(LicenseError::new(
                ErrorKind::LocalLicenseCorrupted,
                "local license is too short",
            ));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                LicenseError::new(
                    ErrorKind::LocalLicenseCorrupted,
                    "local license failed to decrypt (wrong key or tampered data)",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let provider = DefaultCryptoProvider::new("app-key", "salt");
        let blob = provider.encrypt(b"license payload").unwrap();
        assert_eq!(provider.decrypt(&blob).unwrap(), b"license payload");
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let provider = DefaultCryptoProvider::new("app-key", "salt");
        let a = provider.encrypt(b"same").unwrap();
        let b = provider.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_salt_is_corruption() {
        let blob = DefaultCryptoProvider::new("app-key", "salt-a")
            .encrypt(b"payload")
            .unwrap();
        let err = DefaultCryptoProvider::new("app-key", "salt-b")
            .decrypt(&blob)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalLicenseCorrupted);
    }

    #[test]
    fn test_tampered_blob_is_corruption() {
        let provider = DefaultCryptoProvider::new("app-key", "salt");
        let mut blob = provider.encrypt(b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert_eq!(
            provider.decrypt(&blob).unwrap_err().kind,
            ErrorKind::LocalLicenseCorrupted
        );
        assert!(provider.decrypt(&[0u8; 4]).is_err());
    }
}
