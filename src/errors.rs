//! Leasewarden error types.
//!
//! Every fallible operation returns a [`LicenseError`]: a machine-matchable
//! [`ErrorKind`] plus a human-readable message. Kinds are grouped into
//! [`ErrorCategory`] values so callers can decide whether a failure is
//! recoverable (connectivity, which the grace period may absorb) or fatal.

use std::fmt;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, LicenseError>;

/// Broad classification of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The backend could not be reached or answered with a server error.
    Connectivity,
    /// The license itself is not in a usable state.
    LicenseState,
    /// The current device is not allowed to use the license.
    Device,
    /// A capacity limit (seats, consumption, borrow time) was hit.
    Capacity,
    /// Signed or encrypted data failed verification.
    Integrity,
    /// The caller used the API incorrectly.
    Programmer,
    /// Local persistence failed.
    Storage,
}

/// Specific failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No network connection to the backend.
    NoInternet,
    /// The backend did not answer in time.
    NetworkTimeout,
    /// The backend answered with a 5xx-class error.
    ServerError,

    /// License is disabled on the backend.
    LicenseDisabled,
    /// License is not active (never activated, or deactivated).
    LicenseInactive,
    /// Validity period has ended.
    LicenseExpired,
    /// Maintenance period has ended.
    MaintenanceExpired,
    /// The floating lease was not renewed in time.
    FloatingTimeoutExpired,
    /// The backend does not know this license.
    LicenseNotFound,
    /// No license is loaded locally.
    NoLocalLicense,

    /// License is bound to a different device.
    DeviceNotLicensed,
    /// This device has been blacklisted.
    DeviceBlacklisted,
    /// The system clock is behind the last recorded check.
    ClockTampered,
    /// Running in a virtual machine is not permitted.
    VmNotAllowed,
    /// The license belongs to another product.
    ProductMismatch,
    /// User credentials were rejected.
    InvalidCredential,

    /// All floating seats are in use.
    MaxFloatingReached,
    /// The consumption ceiling would be exceeded.
    NotEnoughConsumption,
    /// Requested borrow period exceeds the permitted maximum.
    BorrowExceedsMax,
    /// The license does not allow borrowing.
    BorrowingNotAllowed,
    /// All activations have been used.
    NoAvailableActivations,

    /// Signature over offline or server data did not verify.
    SignatureMismatch,
    /// The locally stored license could not be decrypted or parsed.
    LocalLicenseCorrupted,

    /// No feature with the given code exists on the license.
    InvalidFeatureCode,
    /// The feature does not support the requested operation.
    InvalidLicenseFeature,
    /// The feature is not floating.
    FeatureNotFloating,
    /// The floating feature is not registered on this device.
    FloatingFeatureDeviceNotInUse,
    /// The license is not floating.
    LicenseNotFloating,
    /// The license type does not support the requested operation.
    InvalidLicenseType,
    /// A watchdog could not be created or controlled.
    WatchdogError,
    /// An offline confirmation code was rejected.
    InvalidConfirmationCode,
    /// The license identifier is malformed.
    InvalidLicenseId,
    /// Engine configuration is invalid.
    Configuration,

    /// Reading or writing local storage failed.
    Storage,
}

impl ErrorKind {
    /// Category this kind belongs to.
    pub fn category(self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            NoInternet | NetworkTimeout | ServerError => ErrorCategory::Connectivity,
            LicenseDisabled | LicenseInactive | LicenseExpired | MaintenanceExpired
            | FloatingTimeoutExpired | LicenseNotFound | NoLocalLicense => {
                ErrorCategory::LicenseState
            }
            DeviceNotLicensed | DeviceBlacklisted | ClockTampered | VmNotAllowed
            | ProductMismatch | InvalidCredential => ErrorCategory::Device,
            MaxFloatingReached | NotEnoughConsumption | BorrowExceedsMax
            | BorrowingNotAllowed | NoAvailableActivations => ErrorCategory::Capacity,
            SignatureMismatch | LocalLicenseCorrupted => ErrorCategory::Integrity,
            InvalidFeatureCode
            | InvalidLicenseFeature
            | FeatureNotFloating
            | FloatingFeatureDeviceNotInUse
            | LicenseNotFloating
            | InvalidLicenseType
            | WatchdogError
            | InvalidConfirmationCode
            | InvalidLicenseId
            | Configuration => ErrorCategory::Programmer,
            Storage => ErrorCategory::Storage,
        }
    }

    /// Stable upper-case code, suitable for logs and telemetry.
    pub fn code(self) -> &'static str {
        use ErrorKind::*;
        match self {
            NoInternet => "NO_INTERNET",
            NetworkTimeout => "NETWORK_TIMEOUT",
            ServerError => "SERVER_ERROR",
            LicenseDisabled => "LICENSE_DISABLED",
            LicenseInactive => "LICENSE_INACTIVE",
            LicenseExpired => "LICENSE_EXPIRED",
            MaintenanceExpired => "MAINTENANCE_EXPIRED",
            FloatingTimeoutExpired => "FLOATING_TIMEOUT_EXPIRED",
            LicenseNotFound => "LICENSE_NOT_FOUND",
            NoLocalLicense => "NO_LOCAL_LICENSE",
            DeviceNotLicensed => "DEVICE_NOT_LICENSED",
            DeviceBlacklisted => "DEVICE_BLACKLISTED",
            ClockTampered => "CLOCK_TAMPERED",
            VmNotAllowed => "VM_NOT_ALLOWED",
            ProductMismatch => "PRODUCT_MISMATCH",
            InvalidCredential => "INVALID_CREDENTIAL",
            MaxFloatingReached => "MAX_FLOATING_REACHED",
            NotEnoughConsumption => "NOT_ENOUGH_CONSUMPTION",
            BorrowExceedsMax => "BORROW_EXCEEDS_MAX",
            BorrowingNotAllowed => "BORROWING_NOT_ALLOWED",
            NoAvailableActivations => "NO_AVAILABLE_ACTIVATIONS",
            SignatureMismatch => "SIGNATURE_MISMATCH",
            LocalLicenseCorrupted => "LOCAL_LICENSE_CORRUPTED",
            InvalidFeatureCode => "INVALID_FEATURE_CODE",
            InvalidLicenseFeature => "INVALID_LICENSE_FEATURE",
            FeatureNotFloating => "FEATURE_NOT_FLOATING",
            FloatingFeatureDeviceNotInUse => "FLOATING_FEATURE_DEVICE_NOT_IN_USE",
            LicenseNotFloating => "LICENSE_NOT_FLOATING",
            InvalidLicenseType => "INVALID_LICENSE_TYPE",
            WatchdogError => "WATCHDOG_ERROR",
            InvalidConfirmationCode => "INVALID_CONFIRMATION_CODE",
            InvalidLicenseId => "INVALID_LICENSE_ID",
            Configuration => "CONFIGURATION",
            Storage => "STORAGE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned by every fallible leasewarden operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct LicenseError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Details for humans.
    pub message: String,
}

impl LicenseError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Category of the underlying kind.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Whether the grace period may absorb this failure.
    pub fn is_connectivity(&self) -> bool {
        self.category() == ErrorCategory::Connectivity
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub(crate) fn no_local_license() -> Self {
        Self::new(ErrorKind::NoLocalLicense, "no license is loaded")
    }

    pub(crate) fn unknown_feature(code: &str) -> Self {
        Self::new(
            ErrorKind::InvalidFeatureCode,
            format!("feature '{}' does not exist on this license", code),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_kinds_are_recoverable() {
        for kind in [
            ErrorKind::NoInternet,
            ErrorKind::NetworkTimeout,
            ErrorKind::ServerError,
        ] {
            assert!(LicenseError::new(kind, "down").is_connectivity());
        }
        assert!(!LicenseError::new(ErrorKind::LicenseExpired, "x").is_connectivity());
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ErrorKind::MaxFloatingReached.category(),
            ErrorCategory::Capacity
        );
        assert_eq!(
            ErrorKind::LocalLicenseCorrupted.category(),
            ErrorCategory::Integrity
        );
        assert_eq!(
            ErrorKind::FeatureNotFloating.category(),
            ErrorCategory::Programmer
        );
        assert_eq!(ErrorKind::ClockTampered.category(), ErrorCategory::Device);
        assert_eq!(ErrorKind::Storage.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_display_includes_code_and_message() {
        let err = LicenseError::new(ErrorKind::NotEnoughConsumption, "need 2, have 1");
        assert_eq!(err.to_string(), "NOT_ENOUGH_CONSUMPTION: need 2, have 1");
    }
}
