//! Local license envelope.
//!
//! The record is wrapped in a versioned JSON envelope and encrypted with the
//! configured [`CryptoProvider`]. Anything that fails to decrypt or parse is
//! reported as `LocalLicenseCorrupted`.

use crate::crypto::CryptoProvider;
use crate::errors::{ErrorKind, LicenseError, Result};
use crate::model::LicenseRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current envelope format.
pub const FORMAT_VERSION: u32 = 1;

/// Plaintext form of the stored license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseEnvelope {
    /// Envelope format version.
    pub format_version: u32,
    /// When the envelope was written.
    pub saved_at: DateTime<Utc>,
    /// The license record.
    pub record: LicenseRecord,
}

impl LicenseEnvelope {
    /// Wrap a record.
    pub fn new(record: LicenseRecord, saved_at: DateTime<Utc>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            saved_at,
            record,
        }
    }

    /// Serialize the envelope to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| LicenseError::storage(format!("Failed to serialize license: {}", e)))
    }

    /// Deserialize an envelope from JSON.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(json).map_err(|e| {
            LicenseError::new(
                ErrorKind::LocalLicenseCorrupted,
                format!("Failed to parse local license: {}", e),
            )
        })?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(LicenseError::new(
                ErrorKind::LocalLicenseCorrupted,
                format!(
                    "Unsupported local license format {}",
                    envelope.format_version
                ),
            ));
        }
        Ok(envelope)
    }
}

/// Encode and encrypt a record for storage.
pub fn seal(
    record: &LicenseRecord,
    crypto: &dyn CryptoProvider,
    now: DateTime<Utc>,
) -> Result<Vec<u8>> {
    let json = LicenseEnvelope::new(record.clone(), now).to_json()?;
    crypto.encrypt(&json)
}

/// Decrypt and decode a stored blob. An empty blob means no license.
pub fn open(blob: &[u8], crypto: &dyn CryptoProvider) -> Result<Option<LicenseRecord>> {
    if blob.is_empty() {
        return Ok(None);
    }
    let json = crypto.decrypt(blob)?;
    Ok(Some(LicenseEnvelope::from_json(&json)?.record))
}
