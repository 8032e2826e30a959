//! The license record: the entitlement snapshot owned by the engine.

use super::consumption::Consumption;
use super::feature::Feature;
use super::fields::{CustomField, DeviceVariable};
use super::id::LicenseId;
use super::lease::FloatingLease;
use crate::errors::{LicenseError, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Commercial model of a license.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LicenseType {
    /// Never expires.
    #[default]
    Perpetual,
    /// Renewed periodically; may carry a subscription grace period.
    Subscription,
    /// Valid until a fixed end date.
    TimeLimited,
    /// Metered by consumption.
    Consumption,
}

fn default_true() -> bool {
    true
}

/// Entitlement snapshot for one license on one device.
///
/// All timestamps are stored in UTC; `*_local` helpers convert for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseRecord {
    /// License key or user.
    pub id: LicenseId,
    /// Backend policy id.
    pub policy_id: u64,
    /// Product the license belongs to.
    pub product_code: String,
    /// Fingerprint of the device the license was activated on.
    pub device_id: String,
    /// Commercial model.
    pub license_type: LicenseType,
    /// Free-form metadata from the backend.
    pub metadata: String,

    /// Activated on this device.
    pub active: bool,
    /// Enabled by the vendor.
    pub enabled: bool,
    /// Trial license.
    pub trial: bool,
    /// Activated without any backend connectivity.
    pub air_gapped: bool,
    /// Activated from an offline license file.
    pub offline_activated: bool,
    /// May run inside a virtual machine.
    pub vm_allowed: bool,

    /// Start of validity.
    pub validity_start: Option<DateTime<Utc>>,
    /// End of validity; `None` for licenses that do not expire.
    pub validity_end: Option<DateTime<Utc>>,
    /// End of the maintenance period.
    pub maintenance_end: Option<DateTime<Utc>>,
    /// Last successful backend reconciliation.
    pub last_check: Option<DateTime<Utc>>,
    /// Set while running on the grace period.
    pub grace_period_end: Option<DateTime<Utc>>,
    /// Extra hours a subscription stays valid past `validity_end`.
    pub subscription_grace_hours: u32,

    /// Whether the license uses floating seats.
    pub is_floating: bool,
    /// Floating seat state.
    pub floating: FloatingLease,
    /// Longest allowed borrow, in hours. Zero forbids borrowing.
    pub max_borrow_hours: u32,
    /// Client id reported by the backend for this floating slot.
    pub floating_client_id: String,
    /// Release the floating lease when the engine shuts down.
    #[serde(default = "default_true")]
    pub auto_release: bool,

    /// License-level consumption.
    pub consumption: Consumption,

    /// Features, in backend order.
    pub features: Vec<Feature>,
    /// Custom fields from the backend.
    pub custom_fields: Vec<CustomField>,
    /// Device variables.
    pub device_variables: Vec<DeviceVariable>,
    /// User data kept only on this device.
    pub user_data: Vec<CustomField>,

    /// Activations performed so far.
    pub times_activated: u32,
    /// Activation ceiling.
    pub max_activations: u32,
    /// Device transfers performed so far.
    pub transfer_count: u32,
    /// Transfer ceiling: -1 unlimited, 0 forbidden.
    pub transfer_limit: i32,
}

impl Default for LicenseRecord {
    fn default() -> Self {
        Self {
            id: LicenseId::default(),
            policy_id: 0,
            product_code: String::new(),
            device_id: String::new(),
            license_type: LicenseType::default(),
            metadata: String::new(),
            active: false,
            enabled: true,
            trial: false,
            air_gapped: false,
            offline_activated: false,
            vm_allowed: false,
            validity_start: None,
            validity_end: None,
            maintenance_end: None,
            last_check: None,
            grace_period_end: None,
            subscription_grace_hours: 0,
            is_floating: false,
            floating: FloatingLease::default(),
            max_borrow_hours: 0,
            floating_client_id: String::new(),
            auto_release: true,
            consumption: Consumption::default(),
            features: Vec::new(),
            custom_fields: Vec::new(),
            device_variables: Vec::new(),
            user_data: Vec::new(),
            times_activated: 0,
            max_activations: 1,
            transfer_count: 0,
            transfer_limit: -1,
        }
    }
}

impl LicenseRecord {
    /// Empty record for a license of the given product.
    pub fn new(id: LicenseId, product_code: &str) -> Self {
        Self {
            id,
            product_code: product_code.to_string(),
            ..Self::default()
        }
    }

    /// Validity end extended by the subscription grace period.
    pub fn validity_with_grace_period(&self) -> Option<DateTime<Utc>> {
        self.validity_end
            .map(|end| end + chrono::Duration::hours(i64::from(self.subscription_grace_hours)))
    }

    /// Validity end in local time.
    pub fn validity_end_local(&self) -> Option<DateTime<Local>> {
        self.validity_end.map(|t| t.with_timezone(&Local))
    }

    /// Maintenance end in local time.
    pub fn maintenance_end_local(&self) -> Option<DateTime<Local>> {
        self.maintenance_end.map(|t| t.with_timezone(&Local))
    }

    /// Last successful check in local time.
    pub fn last_check_local(&self) -> Option<DateTime<Local>> {
        self.last_check.map(|t| t.with_timezone(&Local))
    }

    /// Validity (including subscription grace) has ended.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.validity_with_grace_period().is_some_and(|end| end <= now)
    }

    /// The floating lease held by this device has lapsed.
    pub fn is_floating_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_floating && self.floating.is_lapsed(now)
    }

    /// Maintenance period has ended.
    pub fn is_maintenance_expired(&self, now: DateTime<Utc>) -> bool {
        self.maintenance_end.is_some_and(|end| end <= now)
    }

    /// Whole days of maintenance left. `None` without a maintenance period.
    pub fn maintenance_days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.maintenance_end.map(|end| (end - now).num_days().max(0))
    }

    /// Active, enabled and within validity.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.active && self.enabled && !self.is_expired(now) && !self.is_floating_expired(now)
    }

    /// Whole days of validity left. `None` when the license does not expire.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.validity_with_grace_period()
            .map(|end| (end - now).num_days().max(0))
    }

    /// Whole days since the last successful check.
    pub fn days_passed_since_last_check(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_check.map(|t| (now - t).num_days())
    }

    /// Whether the license currently runs on its grace period.
    pub fn is_grace_period_started(&self) -> bool {
        self.grace_period_end.is_some()
    }

    /// Whole hours left on the grace period; zero when not in grace.
    pub fn grace_period_hours_remaining(&self, now: DateTime<Utc>) -> u32 {
        self.grace_period_end
            .map(|end| (end - now).num_hours().max(0))
            .and_then(|h| u32::try_from(h).ok())
            .unwrap_or(0)
    }

    /// Whether the license may be moved to another device.
    pub fn is_device_transfer_allowed(&self) -> bool {
        self.transfer_limit != 0
    }

    /// Whether device transfers are capped.
    pub fn is_device_transfer_limited(&self) -> bool {
        self.transfer_limit > 0
    }

    /// Whether the floating lease is borrowed.
    pub fn is_borrowed(&self) -> bool {
        self.floating.is_borrowed()
    }

    /// Feature by code.
    pub fn feature(&self, code: &str) -> Result<&Feature> {
        self.features
            .iter()
            .find(|f| f.code == code)
            .ok_or_else(|| LicenseError::unknown_feature(code))
    }

    /// Mutable feature by code.
    pub fn feature_mut(&mut self, code: &str) -> Result<&mut Feature> {
        self.features
            .iter_mut()
            .find(|f| f.code == code)
            .ok_or_else(|| LicenseError::unknown_feature(code))
    }

    /// Replace this record with the backend's view while keeping state that
    /// only this device knows: credentials, lease progress, unsynced
    /// consumption, device variables and user data.
    pub fn absorb_server_snapshot(&mut self, server: LicenseRecord) {
        let local = std::mem::replace(self, server);

        self.id = local.id;
        if self.device_id.is_empty() {
            self.device_id = local.device_id;
        }
        self.last_check = local.last_check;
        self.grace_period_end = local.grace_period_end;
        self.auto_release = local.auto_release;
        self.user_data = local.user_data;
        if self.device_variables.is_empty() {
            self.device_variables = local.device_variables;
        }

        keep_lease(&mut self.floating, &local.floating);
        self.consumption.local = local.consumption.local;
        if self.consumption.last_reset.is_none() {
            self.consumption.last_reset = local.consumption.last_reset;
        }

        for feature in &mut self.features {
            if let Some(old) = local.features.iter().find(|f| f.code == feature.code) {
                keep_lease(&mut feature.floating, &old.floating);
                feature.watched = old.watched;
                feature.consumption.local = old.consumption.local;
                if feature.consumption.last_reset.is_none() {
                    feature.consumption.last_reset = old.consumption.last_reset;
                }
            }
        }
    }
}

fn keep_lease(current: &mut FloatingLease, local: &FloatingLease) {
    current.state = local.state;
    current.started_at = local.started_at;
    current.ends_at = local.ends_at;
}
