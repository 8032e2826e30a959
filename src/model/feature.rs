//! License features.

use super::consumption::Consumption;
use super::lease::FloatingLease;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of entitlement a feature grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    /// Present or not.
    #[default]
    Activation,
    /// Metered, with its own consumption counters.
    Consumption,
}

/// Named entitlement unit on a license.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feature {
    /// Unique feature code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Feature kind.
    pub feature_type: FeatureType,
    /// When the feature stops being granted.
    pub expiry: Option<DateTime<Utc>>,
    /// Free-form metadata from the backend.
    pub metadata: String,
    /// Consumption counters; ignored unless the type is consumption.
    pub consumption: Consumption,
    /// Whether the feature uses floating seats.
    pub is_floating: bool,
    /// Whether the feature floats in offline mode.
    pub is_offline_floating: bool,
    /// Floating seat state; ignored unless floating.
    pub floating: FloatingLease,
    /// Whether the feature watchdog keeps this lease alive.
    pub watched: bool,
}

impl Feature {
    /// Create an activation feature.
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Whether consumption fields apply.
    pub fn is_consumption(&self) -> bool {
        self.feature_type == FeatureType::Consumption
    }

    /// Whether floating fields apply.
    pub fn floats(&self) -> bool {
        self.is_floating || self.is_offline_floating
    }

    /// Whether the feature has expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|end| end <= now)
    }
}
