//! Floating lease rules.
//!
//! The engine performs the backend calls; this module owns the local
//! decisions around them: which errors apply before calling out, how a
//! grant updates a lease, and how long a borrow may last.

pub mod session;

use crate::client::models::FloatingGrant;
use crate::errors::{ErrorKind, LicenseError, Result};
use crate::model::{Feature, FloatingLease, LeaseState, LicenseRecord};
use crate::watchdog::DEFAULT_INTERVAL;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::time::Duration as StdDuration;

pub use session::FloatingSession;

/// Format accepted by [`BorrowPeriod::Until`].
pub const BORROW_END_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// How long to borrow a floating license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorrowPeriod {
    /// Relative period. Zero days and zero hours means [`BorrowPeriod::Max`].
    For {
        /// Days to borrow.
        days: u32,
        /// Hours to borrow, on top of `days`.
        hours: u32,
    },
    /// Absolute UTC end, formatted as `%Y-%m-%dT%H:%M:%SZ`. Empty means
    /// [`BorrowPeriod::Max`].
    Until(String),
    /// The longest period the license allows.
    Max,
}

/// The license must be floating.
pub fn ensure_floating(record: &LicenseRecord) -> Result<()> {
    if record.is_floating {
        Ok(())
    } else {
        Err(LicenseError::new(
            ErrorKind::LicenseNotFloating,
            "license is not floating",
        ))
    }
}

/// The feature must be floating.
pub fn ensure_feature_floating(feature: &Feature) -> Result<()> {
    if feature.floats() {
        Ok(())
    } else {
        Err(LicenseError::new(
            ErrorKind::FeatureNotFloating,
            format!("feature '{}' is not floating", feature.code),
        ))
    }
}

/// Apply a backend grant to a lease.
///
/// A grant reporting more seats in use than exist is rejected with
/// `MaxFloatingReached` and leaves the lease untouched.
pub fn apply_grant(
    lease: &mut FloatingLease,
    grant: &FloatingGrant,
    state: LeaseState,
    now: DateTime<Utc>,
) -> Result<()> {
    let max_users = if grant.max_users > 0 {
        grant.max_users
    } else {
        lease.max_users
    };
    if grant.in_use_count > max_users {
        return Err(LicenseError::new(
            ErrorKind::MaxFloatingReached,
            format!(
                "{} of {} floating seats in use",
                grant.in_use_count, max_users
            ),
        ));
    }
    if grant.timeout_minutes > 0 {
        lease.timeout_minutes = grant.timeout_minutes;
    }
    lease.max_users = max_users;
    lease.in_use_count = grant.in_use_count;
    lease.started_at = Some(grant.started_at.unwrap_or(now));
    lease.ends_at = Some(grant.ends_at.unwrap_or_else(|| now + lease.timeout()));
    lease.state = state;
    Ok(())
}

/// Give back this device's seat locally.
pub fn release_locally(lease: &mut FloatingLease) {
    if lease.is_held() {
        lease.in_use_count = lease.in_use_count.saturating_sub(1);
    }
    lease.clear();
}

/// Resolve a borrow request to an end time.
///
/// # Errors
/// * `BorrowingNotAllowed` - the license allows no borrowing
/// * `BorrowExceedsMax` - the end is past the allowed maximum or not in the future
/// * `Configuration` - `Until` is not in the expected format
pub fn borrow_end(
    period: &BorrowPeriod,
    max_borrow_hours: u32,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    if max_borrow_hours == 0 {
        return Err(LicenseError::new(
            ErrorKind::BorrowingNotAllowed,
            "license does not allow borrowing",
        ));
    }
    let latest = now + Duration::hours(i64::from(max_borrow_hours));

    let end = match period {
        BorrowPeriod::Max => latest,
        BorrowPeriod::For { days: 0, hours: 0 } => latest,
        BorrowPeriod::For { days, hours } => {
            now + Duration::days(i64::from(*days)) + Duration::hours(i64::from(*hours))
        }
        BorrowPeriod::Until(text) if text.trim().is_empty() => latest,
        BorrowPeriod::Until(text) => NaiveDateTime::parse_from_str(text.trim(), BORROW_END_FORMAT)
            .map_err(|e| {
                LicenseError::config(format!("invalid borrow end '{}': {}", text, e))
            })?
            .and_utc(),
    };

    if end > latest {
        return Err(LicenseError::new(
            ErrorKind::BorrowExceedsMax,
            format!("borrow may last at most {} hours", max_borrow_hours),
        ));
    }
    if end <= now {
        return Err(LicenseError::new(
            ErrorKind::BorrowExceedsMax,
            "borrow end must be in the future",
        ));
    }
    Ok(end)
}

fn minutes(timeout_minutes: u32) -> StdDuration {
    StdDuration::from_secs(u64::from(timeout_minutes) * 60)
}

/// Default license watchdog interval: the floating timeout for floating
/// licenses, otherwise one hour.
pub fn license_watchdog_interval(record: &LicenseRecord) -> StdDuration {
    if record.is_floating && record.floating.timeout_minutes > 0 {
        minutes(record.floating.timeout_minutes)
    } else {
        DEFAULT_INTERVAL
    }
}

/// Default feature watchdog interval: the shortest timeout among watched
/// floating features, otherwise one hour.
pub fn feature_watchdog_interval(record: &LicenseRecord) -> StdDuration {
    record
        .features
        .iter()
        .filter(|f| f.watched && f.floats() && f.floating.timeout_minutes > 0)
        .map(|f| minutes(f.floating.timeout_minutes))
        .min()
        .unwrap_or(DEFAULT_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LicenseId;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_grant_sets_lease_window() {
        let mut lease = FloatingLease {
            timeout_minutes: 30,
            max_users: 2,
            ..FloatingLease::default()
        };
        let grant = FloatingGrant {
            in_use_count: 2,
            ..FloatingGrant::default()
        };
        apply_grant(&mut lease, &grant, LeaseState::Registered, now()).unwrap();
        assert_eq!(lease.in_use_count, 2);
        assert_eq!(lease.ends_at, Some(now() + Duration::minutes(30)));
        assert_eq!(lease.state, LeaseState::Registered);
    }

    #[test]
    fn test_grant_over_capacity_is_rejected() {
        let mut lease = FloatingLease {
            max_users: 1,
            ..FloatingLease::default()
        };
        let grant = FloatingGrant {
            in_use_count: 2,
            max_users: 1,
            ..FloatingGrant::default()
        };
        let err = apply_grant(&mut lease, &grant, LeaseState::Registered, now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MaxFloatingReached);
        assert_eq!(lease.state, LeaseState::Unregistered);
    }

    #[test]
    fn test_release_never_underflows() {
        let mut lease = FloatingLease {
            state: LeaseState::Registered,
            ..FloatingLease::default()
        };
        release_locally(&mut lease);
        assert_eq!(lease.in_use_count, 0);
        assert_eq!(lease.state, LeaseState::Released);
    }

    #[test]
    fn test_borrow_end_rules() {
        assert_eq!(
            borrow_end(&BorrowPeriod::Max, 48, now()).unwrap(),
            now() + Duration::hours(48)
        );
        assert_eq!(
            borrow_end(&BorrowPeriod::For { days: 1, hours: 2 }, 48, now()).unwrap(),
            now() + Duration::hours(26)
        );
        assert_eq!(
            borrow_end(&BorrowPeriod::Until("2025-07-02T12:00:00Z".into()), 48, now()).unwrap(),
            Utc.with_ymd_and_hms(2025, 7, 2, 12, 0, 0).unwrap()
        );
        assert_eq!(
            borrow_end(&BorrowPeriod::For { days: 3, hours: 0 }, 48, now())
                .unwrap_err()
                .kind,
            ErrorKind::BorrowExceedsMax
        );
        assert_eq!(
            borrow_end(&BorrowPeriod::Max, 0, now()).unwrap_err().kind,
            ErrorKind::BorrowingNotAllowed
        );
        assert_eq!(
            borrow_end(&BorrowPeriod::Until("yesterday".into()), 48, now())
                .unwrap_err()
                .kind,
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_watchdog_intervals() {
        let mut record = LicenseRecord::new(LicenseId::from_key("K"), "demo");
        assert_eq!(license_watchdog_interval(&record), DEFAULT_INTERVAL);
        record.is_floating = true;
        record.floating.timeout_minutes = 15;
        assert_eq!(
            license_watchdog_interval(&record),
            StdDuration::from_secs(15 * 60)
        );

        assert_eq!(feature_watchdog_interval(&record), DEFAULT_INTERVAL);
        for (code, timeout) in [("a", 20), ("b", 5)] {
            let mut feature = Feature::new(code, code);
            feature.is_floating = true;
            feature.watched = true;
            feature.floating.timeout_minutes = timeout;
            record.features.push(feature);
        }
        assert_eq!(
            feature_watchdog_interval(&record),
            StdDuration::from_secs(5 * 60)
        );
    }
}
