//! License identifiers.

use crate::errors::{ErrorKind, LicenseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a license either by key or by user credentials.
///
/// Exactly one of `key` and `user` is non-empty for a valid id. The password
/// is only held in memory for the activation call and is never serialized.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseId {
    /// License key, empty for user-based licenses.
    #[serde(default)]
    pub key: String,

    /// User login, empty for key-based licenses.
    #[serde(default)]
    pub user: String,

    #[serde(skip)]
    password: String,
}

impl LicenseId {
    /// Key-based id. Surrounding whitespace is trimmed.
    pub fn from_key(key: &str) -> Self {
        Self {
            key: key.trim().to_string(),
            ..Self::default()
        }
    }

    /// User-based id. Surrounding whitespace is trimmed from both parts.
    pub fn from_user(user: &str, password: &str) -> Self {
        Self {
            user: user.trim().to_string(),
            password: password.trim().to_string(),
            ..Self::default()
        }
    }

    /// Password supplied at construction (empty after a reload from storage).
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether this id refers to a license key.
    pub fn is_key_based(&self) -> bool {
        !self.key.is_empty()
    }

    /// Exactly one of key and user is set.
    pub fn is_valid(&self) -> bool {
        self.key.is_empty() != self.user.is_empty()
    }

    /// Return `InvalidLicenseId` unless [`LicenseId::is_valid`] holds.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(LicenseError::new(
                ErrorKind::InvalidLicenseId,
                "exactly one of license key or user must be provided",
            ))
        }
    }
}

impl fmt::Debug for LicenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseId")
            .field("key", &self.key)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

impl fmt::Display for LicenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_key_based() {
            f.write_str(&self.key)
        } else {
            f.write_str(&self.user)
        }
    }
}
