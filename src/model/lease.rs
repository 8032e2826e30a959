//! Floating lease state shared by licenses and features.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a floating lease is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    /// No slot is held.
    #[default]
    Unregistered,
    /// A slot is held and must be renewed before `ends_at`.
    Registered,
    /// A slot is held offline until `ends_at` without renewal.
    Borrowed,
    /// The slot was given back.
    Released,
}

/// Floating seat information and this device's lease on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloatingLease {
    /// Minutes a registration stays valid without renewal.
    pub timeout_minutes: u32,
    /// Seats in the pool.
    pub max_users: u32,
    /// Seats currently taken, as last reported by the backend.
    pub in_use_count: u32,
    /// When this device's lease started.
    pub started_at: Option<DateTime<Utc>>,
    /// When this device's lease lapses.
    pub ends_at: Option<DateTime<Utc>>,
    /// Lease lifecycle state.
    pub state: LeaseState,
}

impl FloatingLease {
    /// Whether this device currently holds a seat.
    pub fn is_held(&self) -> bool {
        matches!(self.state, LeaseState::Registered | LeaseState::Borrowed)
    }

    /// Whether the lease is borrowed.
    pub fn is_borrowed(&self) -> bool {
        self.state == LeaseState::Borrowed
    }

    /// Whether a held lease has lapsed.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.is_held() && self.ends_at.is_some_and(|end| end <= now)
    }

    /// Timeout as a chrono duration.
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.timeout_minutes))
    }

    /// Drop this device's lease.
    pub(crate) fn clear(&mut self) {
        self.started_at = None;
        self.ends_at = None;
        self.state = LeaseState::Released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lapsed_only_when_held() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut lease = FloatingLease {
            ends_at: Some(now - chrono::Duration::minutes(1)),
            ..FloatingLease::default()
        };
        assert!(!lease.is_lapsed(now));
        lease.state = LeaseState::Registered;
        assert!(lease.is_lapsed(now));
        lease.clear();
        assert!(!lease.is_lapsed(now));
        assert_eq!(lease.state, LeaseState::Released);
    }
}
