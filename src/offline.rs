//! Offline license files and deactivation requests.
//!
//! Offline activation and update use a license file issued by the vendor:
//! a signed document (see [`crate::crypto::verify`]) whose payload is an
//! [`OfflineLicense`]. Offline deactivation produces a [`DeactivationRequest`]
//! file that the user hands back to the vendor.

use crate::crypto::digest::{digest_matches, sha256_digest_field};
use crate::crypto::verify::{decode_public_key, open_signed, seal_signed};
use crate::errors::{ErrorKind, LicenseError, Result};
use crate::model::{LicenseId, LicenseRecord};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Payload of a vendor-issued offline license file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineLicense {
    /// Product the file was issued for.
    pub product_code: String,
    /// Device the file was issued for.
    pub device_id: String,
    /// When the vendor issued the file.
    pub issued_at: DateTime<Utc>,
    /// The license as the vendor sees it.
    pub license: LicenseRecord,
}

impl OfflineLicense {
    /// Sign this payload into file contents.
    pub fn issue(&self, key: &SigningKey) -> Result<String> {
        let payload = serde_json::to_vec(self).map_err(|e| {
            LicenseError::config(format!("Failed to serialize offline license: {}", e))
        })?;
        Ok(seal_signed(&payload, key))
    }

    /// Verify file contents against the vendor's public key.
    pub fn open(contents: &str, public_key_hex: &str) -> Result<Self> {
        if public_key_hex.is_empty() {
            return Err(LicenseError::config(
                "public_key_hex is required for offline licenses",
            ));
        }
        let key = decode_public_key(public_key_hex)?;
        let payload = open_signed(contents, &key)?;
        serde_json::from_slice(&payload).map_err(|e| {
            LicenseError::new(
                ErrorKind::SignatureMismatch,
                format!("Malformed offline license payload: {}", e),
            )
        })
    }

    /// Read and verify an offline license file.
    pub fn read(path: &Path, public_key_hex: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            LicenseError::storage(format!(
                "Failed to read offline license {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::open(&contents, public_key_hex)
    }

    /// The file must target this product and device.
    pub fn ensure_matches(&self, product_code: &str, device_id: &str) -> Result<()> {
        if self.product_code != product_code || self.license.product_code != product_code {
            return Err(LicenseError::new(
                ErrorKind::ProductMismatch,
                format!("offline license is for product '{}'", self.product_code),
            ));
        }
        if self.device_id != device_id {
            return Err(LicenseError::new(
                ErrorKind::DeviceNotLicensed,
                "offline license was issued for another device",
            ));
        }
        Ok(())
    }
}

/// Body of an offline deactivation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationRequest {
    /// Product code.
    pub product_code: String,
    /// Device being deactivated.
    pub device_id: String,
    /// License being deactivated.
    pub license: LicenseId,
    /// When the request was created.
    pub requested_at: DateTime<Utc>,
    /// Unsynced consumption at the time of deactivation.
    pub local_consumption: i64,
}

#[derive(Serialize, Deserialize)]
struct RequestFile {
    request: serde_json::Value,
    digest: String,
}

impl DeactivationRequest {
    /// Render the request with a `sha-256=` digest over its JSON body.
    pub fn to_file_contents(&self) -> Result<String> {
        let request = serde_json::to_value(self).map_err(|e| {
            LicenseError::storage(format!("Failed to serialize deactivation request: {}", e))
        })?;
        let body = request.to_string();
        let file = RequestFile {
            digest: sha256_digest_field(body.as_bytes()),
            request,
        };
        serde_json::to_string_pretty(&file).map_err(|e| {
            LicenseError::storage(format!("Failed to serialize deactivation request: {}", e))
        })
    }

    /// Parse request file contents and check the digest.
    pub fn from_file_contents(contents: &str) -> Result<Self> {
        let corrupt = |msg: String| LicenseError::new(ErrorKind::InvalidConfirmationCode, msg);
        let file: RequestFile = serde_json::from_str(contents)
            .map_err(|e| corrupt(format!("Malformed deactivation request: {}", e)))?;
        if !digest_matches(file.request.to_string().as_bytes(), &file.digest) {
            return Err(corrupt("deactivation request digest mismatch".to_string()));
        }
        serde_json::from_value(file.request)
            .map_err(|e| corrupt(format!("Malformed deactivation request: {}", e)))
    }

    /// Write the request file to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let contents = self.to_file_contents()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LicenseError::storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        fs::write(path, contents).map_err(|e| {
            LicenseError::storage(format!(
                "Failed to write deactivation request {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn vendor_key() -> SigningKey {
        SigningKey::from_bytes(&[42u8; 32])
    }

    fn public_hex() -> String {
        hex::encode(vendor_key().verifying_key().to_bytes())
    }

    fn offline_license() -> OfflineLicense {
        OfflineLicense {
            product_code: "demo".to_string(),
            device_id: "dev-a".to_string(),
            issued_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            license: LicenseRecord::new(LicenseId::from_key("KEY-OFF"), "demo"),
        }
    }

    #[test]
    fn test_issue_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("license.lic");
        fs::write(&path, offline_license().issue(&vendor_key()).unwrap()).unwrap();

        let opened = OfflineLicense::read(&path, &public_hex()).unwrap();
        assert_eq!(opened, offline_license());
        assert!(opened.ensure_matches("demo", "dev-a").is_ok());
    }

    #[test]
    fn test_wrong_vendor_key() {
        let contents = offline_license()
            .issue(&SigningKey::from_bytes(&[1u8; 32]))
            .unwrap();
        let err = OfflineLicense::open(&contents, &public_hex()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SignatureMismatch);
    }

    #[test]
    fn test_missing_public_key_is_configuration_error() {
        let contents = offline_license().issue(&vendor_key()).unwrap();
        let err = OfflineLicense::open(&contents, "").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_mismatches() {
        let license = offline_license();
        assert_eq!(
            license.ensure_matches("other", "dev-a").unwrap_err().kind,
            ErrorKind::ProductMismatch
        );
        assert_eq!(
            license.ensure_matches("demo", "dev-b").unwrap_err().kind,
            ErrorKind::DeviceNotLicensed
        );
    }

    #[test]
    fn test_deactivation_request_digest() {
        let request = DeactivationRequest {
            product_code: "demo".to_string(),
            device_id: "dev-a".to_string(),
            license: LicenseId::from_key("KEY-1"),
            requested_at: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
            local_consumption: 3,
        };
        let contents = request.to_file_contents().unwrap();
        assert_eq!(
            DeactivationRequest::from_file_contents(&contents).unwrap(),
            request
        );

        let tampered = contents.replace("dev-a", "dev-z");
        assert_eq!(
            DeactivationRequest::from_file_contents(&tampered)
                .unwrap_err()
                .kind,
            ErrorKind::InvalidConfirmationCode
        );
    }
}
