//! Entitlement data model.

pub mod consumption;
pub mod feature;
pub mod fields;
pub mod id;
pub mod lease;
pub mod record;

pub use consumption::{Consumption, ConsumptionPeriod};
pub use feature::{Feature, FeatureType};
pub use fields::{CustomField, DeviceVariable};
pub use id::LicenseId;
pub use lease::{FloatingLease, LeaseState};
pub use record::{LicenseRecord, LicenseType};
