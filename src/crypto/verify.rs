//! Ed25519 signed documents.
//!
//! Offline license files are `base64url(payload).base64url(signature)`, with
//! the signature computed over the base64url payload text.

use crate::errors::{ErrorKind, LicenseError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::RwLock;

/// Cache for decoded verifying keys.
static KEY_CACHE: OnceCell<RwLock<HashMap<String, VerifyingKey>>> = OnceCell::new();

/// Decode a hex-encoded Ed25519 public key.
///
/// The key is cached after first decode.
pub fn decode_public_key(hex_key: &str) -> Result<VerifyingKey> {
    let cache = KEY_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    if let Ok(guard) = cache.read() {
        if let Some(key) = guard.get(hex_key) {
            return Ok(*key);
        }
    }

    let bytes = hex::decode(hex_key)
        .map_err(|e| LicenseError::config(format!("Invalid public key hex: {}", e)))?;

    let key_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LicenseError::config("Public key must be 32 bytes"))?;

    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| LicenseError::config(format!("Invalid Ed25519 public key: {}", e)))?;

    // Best-effort insert. If locking fails, still return the decoded key.
    if let Ok(mut guard) = cache.write() {
        guard.insert(hex_key.to_string(), verifying_key);
    }

    Ok(verifying_key)
}

fn mismatch(message: impl Into<String>) -> LicenseError {
    LicenseError::new(ErrorKind::SignatureMismatch, message)
}

/// Verify a signed document and return its decoded payload.
pub fn open_signed(document: &str, key: &VerifyingKey) -> Result<Vec<u8>> {
    let (payload_b64, signature_b64) = document
        .trim()
        .split_once('.')
        .ok_or_else(|| mismatch("signed document must have two dot-separated parts"))?;

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| mismatch(format!("Invalid signature base64: {}", e)))?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| mismatch("Invalid signature length"))?;

    key.verify(payload_b64.as_bytes(), &signature)
        .map_err(|_| mismatch("Signature verification failed"))?;

    URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| mismatch(format!("Invalid payload base64: {}", e)))
}

/// Produce a signed document for `payload`.
///
/// Used by vendor tooling to issue offline license files.
pub fn seal_signed(payload: &[u8], key: &SigningKey) -> String {
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let signature = key.sign(payload_b64.as_bytes());
    format!(
        "{}.{}",
        payload_b64,
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn test_decode_public_key_valid() {
        let hex_key = hex::encode(signing_key().verifying_key().to_bytes());
        assert!(decode_public_key(&hex_key).is_ok());
        // Second call is served from the cache.
        assert!(decode_public_key(&hex_key).is_ok());
    }

    #[test]
    fn test_decode_public_key_invalid_hex() {
        let err = decode_public_key("not-valid-hex").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_decode_public_key_wrong_length() {
        let err = decode_public_key("0000").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_seal_then_open() {
        let key = signing_key();
        let doc = seal_signed(br#"{"product":"demo"}"#, &key);
        let payload = open_signed(&doc, &key.verifying_key()).unwrap();
        assert_eq!(payload, br#"{"product":"demo"}"#);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let key = signing_key();
        let doc = seal_signed(b"payload", &key);
        let (_, sig) = doc.split_once('.').unwrap();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(b"payl0ad"), sig);
        let err = open_signed(&forged, &key.verifying_key()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SignatureMismatch);
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let doc = seal_signed(b"payload", &signing_key());
        let other = SigningKey::from_bytes(&[9u8; 32]).verifying_key();
        assert!(open_signed(&doc, &other).is_err());
        assert!(open_signed("no-dot-here", &other).is_err());
    }
}
