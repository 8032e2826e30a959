//! Grace-period policy.
//!
//! Decides whether a failed backend reconciliation may fall back to the
//! cached record, and until when.

use crate::errors::{ErrorKind, LicenseError, Result};
use crate::model::LicenseRecord;
use chrono::{DateTime, Duration, Utc};

/// Floating leases with this many minutes or fewer left get no grace.
pub const FLOATING_GRACE_MARGIN_MINUTES: i64 = 60;

/// Grace-period rules for one engine.
#[derive(Debug, Clone, Copy)]
pub struct GracePolicy {
    grace: Duration,
}

impl GracePolicy {
    /// Policy with the given grace period. Zero disables grace.
    pub fn new(grace: std::time::Duration) -> Self {
        Self {
            grace: Duration::from_std(grace).unwrap_or_else(|_| Duration::weeks(52 * 1000)),
        }
    }

    /// Whether any grace is configured.
    pub fn is_enabled(&self) -> bool {
        self.grace > Duration::zero()
    }

    /// Decide how a failed reconciliation affects the cached record.
    ///
    /// # Returns
    /// * `Ok(end)` - The cached record stays usable until `end`
    /// * `Err(error)` - The failure is fatal; `FloatingTimeoutExpired` and
    ///   `LicenseExpired` take precedence over the original error
    pub fn absorb(
        &self,
        record: &LicenseRecord,
        error: LicenseError,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        if !error.is_connectivity() {
            return Err(error);
        }

        // 1. A lapsed floating lease is fatal regardless of grace.
        if record.is_floating_expired(now) {
            return Err(LicenseError::new(
                ErrorKind::FloatingTimeoutExpired,
                "floating lease expired while the backend was unreachable",
            ));
        }

        // 2. An expired license cannot be carried by grace.
        if record.is_expired(now) {
            return Err(LicenseError::new(
                ErrorKind::LicenseExpired,
                "license validity ended",
            ));
        }

        let floating_end = if record.is_floating && record.floating.is_held() {
            record.floating.ends_at
        } else {
            None
        };

        // 3. A borrowed lease is usable offline until the borrow ends.
        if record.is_borrowed() {
            if let Some(end) = floating_end {
                return Ok(end);
            }
        }

        // 4. Registered floating leases need more than the margin left.
        if let Some(end) = floating_end {
            if end - now <= Duration::minutes(FLOATING_GRACE_MARGIN_MINUTES) {
                return Err(error);
            }
        }

        if !self.is_enabled() {
            return Err(error);
        }
        let Some(last_check) = record.last_check else {
            return Err(error);
        };
        if now - last_check > self.grace {
            return Err(error);
        }

        let grace_end = last_check + self.grace;
        Ok(match floating_end {
            Some(end) => grace_end.min(end),
            None => grace_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LeaseState, LicenseId};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()
    }

    fn offline() -> LicenseError {
        LicenseError::new(ErrorKind::NoInternet, "offline")
    }

    fn record(hours_since_check: i64) -> LicenseRecord {
        let mut record = LicenseRecord::new(LicenseId::from_key("K"), "demo");
        record.active = true;
        record.last_check = Some(now() - Duration::hours(hours_since_check));
        record
    }

    fn policy() -> GracePolicy {
        GracePolicy::new(std::time::Duration::from_secs(48 * 3600))
    }

    #[test]
    fn test_within_grace_degrades() {
        let end = policy().absorb(&record(40), offline(), now()).unwrap();
        assert_eq!(end, now() + Duration::hours(8));
    }

    #[test]
    fn test_exact_boundary_still_degrades() {
        assert!(policy().absorb(&record(48), offline(), now()).is_ok());
    }

    #[test]
    fn test_past_grace_is_fatal_with_original_error() {
        let err = policy().absorb(&record(49), offline(), now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoInternet);
    }

    #[test]
    fn test_non_connectivity_errors_pass_through() {
        let err = policy()
            .absorb(
                &record(1),
                LicenseError::new(ErrorKind::LicenseDisabled, "off"),
                now(),
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::LicenseDisabled);
    }

    #[test]
    fn test_zero_grace_disables() {
        let policy = GracePolicy::new(std::time::Duration::ZERO);
        assert!(!policy.is_enabled());
        assert!(policy.absorb(&record(0), offline(), now()).is_err());
    }

    #[test]
    fn test_never_checked_is_fatal() {
        let mut record = record(0);
        record.last_check = None;
        assert!(policy().absorb(&record, offline(), now()).is_err());
    }

    #[test]
    fn test_floating_window_is_capped_by_lease() {
        let mut record = record(1);
        record.is_floating = true;
        record.floating.state = LeaseState::Registered;
        record.floating.ends_at = Some(now() + Duration::hours(3));
        let end = policy().absorb(&record, offline(), now()).unwrap();
        assert_eq!(end, now() + Duration::hours(3));
    }

    #[test]
    fn test_floating_within_margin_is_fatal() {
        let mut record = record(1);
        record.is_floating = true;
        record.floating.state = LeaseState::Registered;
        record.floating.ends_at = Some(now() + Duration::minutes(60));
        let err = policy().absorb(&record, offline(), now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoInternet);
    }

    #[test]
    fn test_lapsed_floating_takes_precedence() {
        let mut record = record(1);
        record.is_floating = true;
        record.floating.state = LeaseState::Registered;
        record.floating.ends_at = Some(now() - Duration::minutes(1));
        let err = policy().absorb(&record, offline(), now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FloatingTimeoutExpired);
    }

    #[test]
    fn test_borrowed_lease_degrades_until_borrow_end() {
        let mut record = record(100);
        record.is_floating = true;
        record.floating.state = LeaseState::Borrowed;
        record.floating.ends_at = Some(now() + Duration::days(3));
        let end = policy().absorb(&record, offline(), now()).unwrap();
        assert_eq!(end, now() + Duration::days(3));
    }
}
