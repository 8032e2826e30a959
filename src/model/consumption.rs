//! Consumption counters shared by licenses and features.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How often the consumed total is reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionPeriod {
    /// Never reset.
    #[default]
    None,
    /// Every 24 hours.
    Daily,
    /// Every 7 days.
    Weekly,
    /// Every calendar month.
    Monthly,
    /// Every 12 months.
    Annually,
}

/// Consumption state of a license or feature.
///
/// `total` is what the backend has acknowledged, `local` what has been
/// consumed on this device since the last sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Consumption {
    /// Consumption acknowledged by the backend.
    pub total: i64,
    /// Ceiling for `total + local`.
    pub max: i64,
    /// Unsynchronized consumption recorded on this device.
    pub local: i64,
    /// Whether consumption may exceed `max`.
    pub allow_overages: bool,
    /// How far past `max` consumption may go when overages are allowed.
    pub max_overages: i64,
    /// No ceiling at all.
    pub unlimited: bool,
    /// Reset cadence.
    pub period: ConsumptionPeriod,
    /// When `total` was last reset.
    pub last_reset: Option<DateTime<Utc>>,
}

impl Consumption {
    /// Consumption including unsynchronized local usage.
    pub fn effective(&self) -> i64 {
        self.total.saturating_add(self.local)
    }

    /// Units left before the ceiling (overages excluded). `None` when unlimited.
    pub fn remaining(&self) -> Option<i64> {
        if self.unlimited {
            None
        } else {
            Some((self.max - self.effective()).max(0))
        }
    }
}
