//! SHA-256 helpers.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Base64-encoded SHA-256 of `data`, formatted as `sha-256=<base64>`.
pub fn sha256_digest_field(data: &[u8]) -> String {
    format!("sha-256={}", STANDARD.encode(Sha256::digest(data)))
}

/// Whether `field` is the `sha-256=` digest of `data`. Compared in
/// constant time; only a length mismatch returns early.
pub fn digest_matches(data: &[u8], field: &str) -> bool {
    let expected = sha256_digest_field(data);
    field.trim().as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_digest_field(b""),
            "sha-256=47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_digest_matches() {
        let field = sha256_digest_field(b"request");
        assert!(digest_matches(b"request", &field));
        assert!(!digest_matches(b"request!", &field));
        assert!(digest_matches(b"request", &format!("  {}\n", field)));
    }

    #[test]
    fn test_digest_rejects_other_lengths() {
        let field = sha256_digest_field(b"request");
        assert!(!digest_matches(b"request", ""));
        assert!(!digest_matches(b"request", "sha-256="));
        assert!(!digest_matches(b"request", &field[..field.len() - 1]));
        assert!(!digest_matches(b"request", &format!("{}=", field)));
    }
}
