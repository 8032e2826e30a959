//! Backend request and response types.

use crate::model::LicenseRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies the calling device and application on every backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    /// Product code.
    pub product_code: String,
    /// Device fingerprint.
    pub device_id: String,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Whether the device is a virtual machine.
    pub is_virtual_machine: bool,
    /// How long a transport may wait for the backend before failing the
    /// call with `NetworkTimeout`. Zero means no limit.
    pub network_timeout: Duration,
}

/// Restricts which installation files are considered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFileFilter {
    /// Release channel, e.g. "stable".
    pub channel: Option<String>,
    /// Target environment, e.g. "linux-x64".
    pub environment: Option<String>,
}

impl InstallFileFilter {
    /// Whether a file passes this filter.
    pub fn matches(&self, file: &InstallationFile) -> bool {
        self.channel.as_ref().map_or(true, |c| *c == file.channel)
            && self
                .environment
                .as_ref()
                .map_or(true, |e| *e == file.environment)
    }
}

/// Downloadable release of the product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationFile {
    /// Release version.
    pub version: String,
    /// Download URL.
    pub url: String,
    /// SHA-256 of the file, hex encoded.
    pub sha256: String,
    /// File size in bytes.
    pub size: u64,
    /// Release channel.
    pub channel: String,
    /// Target environment.
    pub environment: String,
    /// Oldest version that can upgrade to this one.
    pub required_version: String,
    /// Release date.
    pub release_date: Option<DateTime<Utc>>,
    /// Link to release notes.
    pub release_notes_link: String,
}

/// Static information about a product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductDetails {
    /// Product code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Whether licenses are activated with user credentials.
    pub user_based: bool,
    /// Whether trial licenses may be requested.
    pub trial_allowed: bool,
    /// Default floating timeout in minutes.
    pub floating_timeout_minutes: u32,
    /// Default maximum borrow period in hours.
    pub max_borrow_hours: u32,
    /// Free-form metadata.
    pub metadata: String,
}

/// Online check parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Return features that have already expired.
    pub include_expired_features: bool,
    /// Filter for the installation file returned with the check.
    pub filter: InstallFileFilter,
}

/// Backend answer to a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// Current server-side record.
    pub license: LicenseRecord,
    /// Latest installation file matching the filter, if any.
    pub installation_file: Option<InstallationFile>,
}

/// Consumption to push to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionSync {
    /// Unsynchronized consumption.
    pub delta: i64,
    /// Overage request: `None` unchanged, `Some(0)` disable, `Some(n)` allow up to `n`.
    pub request_overage: Option<u32>,
}

/// Consumption counters acknowledged by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionState {
    /// Acknowledged total.
    pub total: i64,
    /// Ceiling.
    pub max: i64,
    /// Whether overages are allowed.
    pub allow_overages: bool,
    /// Overage allowance.
    pub max_overages: i64,
    /// No ceiling at all.
    pub unlimited: bool,
}

/// A floating seat granted (or renewed) by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingGrant {
    /// Seats in use after the grant, including this one.
    pub in_use_count: u32,
    /// Seats in the pool.
    pub max_users: u32,
    /// Renewal timeout in minutes.
    pub timeout_minutes: u32,
    /// Lease start.
    pub started_at: Option<DateTime<Utc>>,
    /// Lease end.
    pub ends_at: Option<DateTime<Utc>>,
    /// Client id assigned to this slot.
    pub client_id: String,
}
