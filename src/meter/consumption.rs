//! Consumption accounting with overage rules and periodic reset.
//!
//! Local usage accumulates in [`Consumption::local`] until a sync folds it
//! into the backend-acknowledged total. Resets are driven by the clock so
//! they happen even when the device never syncs.

use crate::errors::{ErrorKind, LicenseError, Result};
use crate::model::{Consumption, ConsumptionPeriod};
use chrono::{DateTime, Duration, Months, Utc};

/// Record `delta` units of local consumption.
///
/// Positive deltas are rejected with `NotEnoughConsumption` when the new
/// effective total would pass the ceiling (`max`, plus `max_overages` when
/// overages are allowed). Negative deltas are never blocked by the ceiling,
/// and the effective total never drops below zero. On error the counters are
/// left untouched.
pub fn apply(consumption: &mut Consumption, delta: i64) -> Result<()> {
    let current = consumption.effective();
    let wanted = current.saturating_add(delta);

    if delta > 0 && !consumption.unlimited {
        let ceiling = if consumption.allow_overages {
            consumption.max.saturating_add(consumption.max_overages)
        } else {
            consumption.max
        };
        if wanted > ceiling {
            return Err(LicenseError::new(
                ErrorKind::NotEnoughConsumption,
                format!(
                    "consuming {} would reach {} of {} allowed",
                    delta, wanted, ceiling
                ),
            ));
        }
    }

    let clamped = wanted.max(0);
    consumption.local = consumption.local.saturating_add(clamped - current);
    Ok(())
}

/// When the current period ends, if the counter resets at all.
pub fn next_reset(consumption: &Consumption) -> Option<DateTime<Utc>> {
    let last = consumption.last_reset?;
    match consumption.period {
        ConsumptionPeriod::None => None,
        ConsumptionPeriod::Daily => Some(last + Duration::days(1)),
        ConsumptionPeriod::Weekly => Some(last + Duration::weeks(1)),
        ConsumptionPeriod::Monthly => last.checked_add_months(Months::new(1)),
        ConsumptionPeriod::Annually => last.checked_add_months(Months::new(12)),
    }
}

/// Reset the acknowledged total when the period has elapsed.
///
/// Unsynchronized local consumption is kept so it still reaches the backend;
/// a negative local balance has nothing left to offset and is dropped, so
/// the effective total stays at or above zero. The first call on a periodic
/// counter only starts the period. Returns whether a reset happened.
pub fn reset_if_due(consumption: &mut Consumption, now: DateTime<Utc>) -> bool {
    if consumption.period == ConsumptionPeriod::None {
        return false;
    }
    if consumption.last_reset.is_none() {
        consumption.last_reset = Some(now);
        return false;
    }
    match next_reset(consumption) {
        Some(due) if due <= now => {
            consumption.total = 0;
            consumption.local = consumption.local.max(0);
            consumption.last_reset = Some(now);
            true
        }
        _ => false,
    }
}

/// Fold a successful sync into the counters.
pub fn fold_synced(consumption: &mut Consumption, acknowledged_total: i64) {
    consumption.total = acknowledged_total;
    consumption.local = 0;
}

/// Apply an overage request: `None` leaves the policy unchanged, `Some(0)`
/// disables overages, `Some(n)` allows up to `n`.
pub fn apply_overage_request(consumption: &mut Consumption, request: Option<u32>) {
    match request {
        None => {}
        Some(0) => {
            consumption.allow_overages = false;
            consumption.max_overages = 0;
        }
        Some(n) => {
            consumption.allow_overages = true;
            consumption.max_overages = i64::from(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn counter(total: i64, max: i64) -> Consumption {
        Consumption {
            total,
            max,
            ..Consumption::default()
        }
    }

    #[test]
    fn test_ceiling_rejects_and_leaves_state() {
        let mut c = counter(9, 10);
        let err = apply(&mut c, 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotEnoughConsumption);
        assert_eq!(c.total, 9);
        assert_eq!(c.local, 0);
    }

    #[test]
    fn test_exact_ceiling_is_accepted() {
        let mut c = counter(9, 10);
        apply(&mut c, 1).unwrap();
        assert_eq!(c.effective(), 10);
        assert!(apply(&mut c, 1).is_err());
    }

    #[test]
    fn test_overages_extend_ceiling() {
        let mut c = counter(9, 10);
        c.allow_overages = true;
        c.max_overages = 3;
        apply(&mut c, 4).unwrap();
        assert_eq!(c.effective(), 13);
        assert!(apply(&mut c, 1).is_err());
    }

    #[test]
    fn test_unlimited_has_no_ceiling() {
        let mut c = counter(0, 1);
        c.unlimited = true;
        apply(&mut c, 1_000).unwrap();
        assert_eq!(c.local, 1_000);
        assert_eq!(c.remaining(), None);
    }

    #[test]
    fn test_negative_delta_ignores_ceiling() {
        let mut c = counter(15, 10);
        apply(&mut c, -2).unwrap();
        assert_eq!(c.effective(), 13);
        assert_eq!(c.local, -2);
    }

    #[test]
    fn test_floor_at_exactly_zero() {
        let mut c = counter(3, 10);
        apply(&mut c, -3).unwrap();
        assert_eq!(c.effective(), 0);
    }

    #[test]
    fn test_floor_clamps_beyond_zero() {
        let mut c = counter(3, 10);
        c.local = 1;
        apply(&mut c, -10).unwrap();
        assert_eq!(c.effective(), 0);
        assert_eq!(c.local, -3);
    }

    #[test]
    fn test_daily_reset_keeps_local() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        let mut c = counter(7, 10);
        c.local = 2;
        c.period = ConsumptionPeriod::Daily;

        assert!(!reset_if_due(&mut c, start));
        assert_eq!(c.last_reset, Some(start));

        assert!(!reset_if_due(&mut c, start + Duration::hours(23)));
        assert!(reset_if_due(&mut c, start + Duration::hours(24)));
        assert_eq!(c.total, 0);
        assert_eq!(c.local, 2);
    }

    #[test]
    fn test_reset_drops_negative_local() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        let mut c = counter(5, 10);
        c.period = ConsumptionPeriod::Daily;
        c.last_reset = Some(start);
        apply(&mut c, -2).unwrap();
        assert_eq!(c.local, -2);

        assert!(reset_if_due(&mut c, start + Duration::days(1)));
        assert_eq!(c.local, 0);
        assert_eq!(c.effective(), 0);

        // Every unit consumed after the reset is reported.
        apply(&mut c, 1).unwrap();
        assert_eq!(c.local, 1);
        assert_eq!(c.effective(), 1);
    }

    #[test]
    fn test_monthly_reset_uses_calendar_months() {
        let start = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let c = Consumption {
            period: ConsumptionPeriod::Monthly,
            last_reset: Some(start),
            ..Consumption::default()
        };
        assert_eq!(
            next_reset(&c),
            Some(Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_no_period_never_resets() {
        let mut c = counter(5, 10);
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(!reset_if_due(&mut c, now));
        assert_eq!(c.total, 5);
        assert_eq!(c.last_reset, None);
    }

    #[test]
    fn test_fold_and_overage_request() {
        let mut c = counter(3, 10);
        c.local = 4;
        fold_synced(&mut c, 7);
        assert_eq!((c.total, c.local), (7, 0));

        apply_overage_request(&mut c, Some(5));
        assert!(c.allow_overages);
        assert_eq!(c.max_overages, 5);
        apply_overage_request(&mut c, None);
        assert!(c.allow_overages);
        apply_overage_request(&mut c, Some(0));
        assert!(!c.allow_overages);
    }
}
