//! Offline validation of the cached record.

use crate::errors::{ErrorKind, LicenseError, Result};
use crate::model::LicenseRecord;
use chrono::{DateTime, Duration, Utc};

/// Facts about the running environment needed by [`local_check`].
#[derive(Debug, Clone)]
pub struct LocalEnvironment<'a> {
    /// Product the application was built for.
    pub product_code: &'a str,
    /// Fingerprint of this device.
    pub device_id: &'a str,
    /// Whether VM detection is enabled.
    pub vm_detection: bool,
    /// Whether this device is a virtual machine.
    pub is_virtual_machine: bool,
    /// How far the clock may lag the last check.
    pub clock_tamper_tolerance: Duration,
    /// Current time.
    pub now: DateTime<Utc>,
}

/// Validate the cached record without contacting the backend.
///
/// Checks, in order:
/// 1. The record belongs to this product
/// 2. The license is enabled, active, unexpired and its floating lease live
/// 3. The record is bound to this device
/// 4. The device is not a disallowed virtual machine
/// 5. The clock has not been moved behind the last check
pub fn local_check(record: &LicenseRecord, env: &LocalEnvironment<'_>) -> Result<()> {
    if record.product_code != env.product_code {
        return Err(LicenseError::new(
            ErrorKind::ProductMismatch,
            format!(
                "license belongs to product '{}', expected '{}'",
                record.product_code, env.product_code
            ),
        ));
    }
    if !record.enabled {
        return Err(LicenseError::new(
            ErrorKind::LicenseDisabled,
            "license is disabled",
        ));
    }
    if !record.active {
        return Err(LicenseError::new(
            ErrorKind::LicenseInactive,
            "license is not active",
        ));
    }
    if record.is_expired(env.now) {
        return Err(LicenseError::new(
            ErrorKind::LicenseExpired,
            "license validity ended",
        ));
    }
    if record.is_floating_expired(env.now) {
        return Err(LicenseError::new(
            ErrorKind::FloatingTimeoutExpired,
            "floating lease was not renewed in time",
        ));
    }
    if !record.device_id.is_empty() && record.device_id != env.device_id {
        return Err(LicenseError::new(
            ErrorKind::DeviceNotLicensed,
            "license is bound to another device",
        ));
    }
    if env.vm_detection && env.is_virtual_machine && !record.vm_allowed {
        return Err(LicenseError::new(
            ErrorKind::VmNotAllowed,
            "license does not allow virtual machines",
        ));
    }
    if let Some(last_check) = record.last_check {
        if env.now + env.clock_tamper_tolerance < last_check {
            return Err(LicenseError::new(
                ErrorKind::ClockTampered,
                "system clock is behind the last license check",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LeaseState, LicenseId};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
    }

    fn env() -> LocalEnvironment<'static> {
        LocalEnvironment {
            product_code: "demo",
            device_id: "dev-a",
            vm_detection: true,
            is_virtual_machine: false,
            clock_tamper_tolerance: Duration::minutes(5),
            now: now(),
        }
    }

    fn record() -> LicenseRecord {
        let mut record = LicenseRecord::new(LicenseId::from_key("K"), "demo");
        record.active = true;
        record.device_id = "dev-a".to_string();
        record.last_check = Some(now());
        record
    }

    fn kind(record: &LicenseRecord, env: &LocalEnvironment<'_>) -> ErrorKind {
        local_check(record, env).unwrap_err().kind
    }

    #[test]
    fn test_healthy_record_passes() {
        assert!(local_check(&record(), &env()).is_ok());
    }

    #[test]
    fn test_state_failures() {
        let mut r = record();
        r.product_code = "other".to_string();
        assert_eq!(kind(&r, &env()), ErrorKind::ProductMismatch);

        let mut r = record();
        r.enabled = false;
        assert_eq!(kind(&r, &env()), ErrorKind::LicenseDisabled);

        let mut r = record();
        r.active = false;
        assert_eq!(kind(&r, &env()), ErrorKind::LicenseInactive);

        let mut r = record();
        r.validity_end = Some(now() - Duration::seconds(1));
        assert_eq!(kind(&r, &env()), ErrorKind::LicenseExpired);

        let mut r = record();
        r.is_floating = true;
        r.floating.state = LeaseState::Registered;
        r.floating.ends_at = Some(now() - Duration::seconds(1));
        assert_eq!(kind(&r, &env()), ErrorKind::FloatingTimeoutExpired);
    }

    #[test]
    fn test_device_mismatch() {
        let mut e = env();
        e.device_id = "dev-b";
        assert_eq!(kind(&record(), &e), ErrorKind::DeviceNotLicensed);
    }

    #[test]
    fn test_vm_rules() {
        let mut e = env();
        e.is_virtual_machine = true;
        assert_eq!(kind(&record(), &e), ErrorKind::VmNotAllowed);

        let mut r = record();
        r.vm_allowed = true;
        assert!(local_check(&r, &e).is_ok());

        e.vm_detection = false;
        assert!(local_check(&record(), &e).is_ok());
    }

    #[test]
    fn test_clock_tamper_respects_tolerance() {
        let mut e = env();
        e.now = now() - Duration::minutes(4);
        assert!(local_check(&record(), &e).is_ok());
        e.now = now() - Duration::minutes(6);
        assert_eq!(kind(&record(), &e), ErrorKind::ClockTampered);
    }
}
