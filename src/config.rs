//! Leasewarden configuration.

use crate::device::DeviceIdAlgorithm;
use crate::errors::{LicenseError, Result};
use std::time::Duration;

/// Default grace period applied when the backend is unreachable.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(48 * 60 * 60);

/// Default network timeout hint passed to backend implementations.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default tolerance before a clock behind the last check counts as tampering.
pub const DEFAULT_CLOCK_TAMPER_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Default time to wait for the local license file lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1500);

/// Smallest accepted lock timeout.
pub const MIN_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Configuration for a [`crate::LicenseEngine`].
///
/// Product-identifying fields are `&'static str` because they should be
/// compiled into the application, not read from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Product code the license must belong to.
    pub product_code: &'static str,

    /// Application name, reported to the backend.
    pub app_name: &'static str,

    /// Application version, reported to the backend.
    pub app_version: &'static str,

    /// Ed25519 public key (hex, 64 characters) used to verify offline
    /// license files. Empty disables offline activation.
    pub public_key_hex: &'static str,

    /// Storage namespace; the default file storage lives under
    /// `dirs::data_dir()/<namespace>/`.
    pub storage_namespace: &'static str,

    /// How long a license stays usable after the last successful check
    /// when the backend cannot be reached. Zero disables the grace period.
    pub grace_period: Duration,

    /// Handed to the backend with every call as
    /// `DeviceContext::network_timeout`; calls that take longer fail with
    /// `NetworkTimeout`. Zero means no limit.
    pub network_timeout: Duration,

    /// Algorithm used to fingerprint this device.
    pub device_id_algorithm: DeviceIdAlgorithm,

    /// Overrides the computed device fingerprint when set.
    pub hardware_id: Option<String>,

    /// Reject licenses that do not allow VMs when running inside one.
    pub vm_detection: bool,

    /// How far the clock may run behind the last check before
    /// `ClockTampered` is reported.
    pub clock_tamper_tolerance: Duration,

    /// Time to wait for the local storage lock. Applied by
    /// `FileStorage::from_config`.
    pub lock_timeout: Duration,
}

impl EngineConfig {
    /// Configuration with defaults for everything but the product code.
    pub fn new(product_code: &'static str) -> Self {
        Self {
            product_code,
            app_name: "",
            app_version: "",
            public_key_hex: "",
            storage_namespace: product_code,
            grace_period: DEFAULT_GRACE_PERIOD,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
            device_id_algorithm: DeviceIdAlgorithm::default(),
            hardware_id: None,
            vm_detection: false,
            clock_tamper_tolerance: DEFAULT_CLOCK_TAMPER_TOLERANCE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Grace period in whole hours.
    pub fn grace_period_hours(&self) -> u32 {
        u32::try_from(self.grace_period.as_secs() / 3600).unwrap_or(u32::MAX)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<()> {
        if self.product_code.trim().is_empty() {
            return Err(LicenseError::config("product_code cannot be empty"));
        }
        if self.storage_namespace.trim().is_empty() {
            return Err(LicenseError::config("storage_namespace cannot be empty"));
        }
        if !self.public_key_hex.is_empty() && self.public_key_hex.len() != 64 {
            return Err(LicenseError::config(format!(
                "public_key_hex must be 64 hex characters, got {}",
                self.public_key_hex.len()
            )));
        }
        if self.lock_timeout < MIN_LOCK_TIMEOUT {
            return Err(LicenseError::config(format!(
                "lock_timeout must be at least {}ms",
                MIN_LOCK_TIMEOUT.as_millis()
            )));
        }
        if matches!(&self.hardware_id, Some(id) if id.trim().is_empty()) {
            return Err(LicenseError::config("hardware_id cannot be blank"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new("demo");
        assert_eq!(config.grace_period_hours(), 48);
        assert_eq!(config.network_timeout, Duration::from_secs(5));
        assert_eq!(config.storage_namespace, "demo");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_product() {
        let err = EngineConfig::new("  ").validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_rejects_short_public_key() {
        let mut config = EngineConfig::new("demo");
        config.public_key_hex = "abcd";
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_lock_timeout() {
        let mut config = EngineConfig::new("demo");
        config.lock_timeout = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_grace_is_allowed() {
        let mut config = EngineConfig::new("demo");
        config.grace_period = Duration::ZERO;
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_period_hours(), 0);
    }
}
