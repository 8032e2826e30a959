//! Cryptographic primitives: local license encryption, offline file
//! signature verification and digests.

pub mod cipher;
pub mod digest;
pub mod verify;

use crate::errors::Result;

/// Encrypts and decrypts the locally stored license blob.
///
/// Key material is supplied at construction. A failed decryption must be
/// reported as `LocalLicenseCorrupted`.
pub trait CryptoProvider: Send + Sync {
    /// Encrypt plaintext into an opaque blob.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by [`CryptoProvider::encrypt`].
    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

pub use cipher::DefaultCryptoProvider;
