//! Licensing backend interface.
//!
//! The transport (HTTP, TLS, proxies) is supplied by the application through
//! the [`Backend`] trait. [`InMemoryBackend`] is a complete in-process
//! implementation for tests, demos and air-gapped tooling.

pub mod memory;
pub mod models;

use crate::errors::Result;
use crate::model::{DeviceVariable, LicenseId, LicenseRecord};
use chrono::{DateTime, Utc};
use models::{
    CheckRequest, CheckResponse, ConsumptionState, ConsumptionSync, DeviceContext, FloatingGrant,
    InstallFileFilter, InstallationFile, ProductDetails,
};

/// Remote licensing service.
///
/// Transport failures must be reported as `NoInternet`, `NetworkTimeout` or
/// `ServerError` so the grace period can absorb them. Every other kind is
/// treated as a definitive answer.
pub trait Backend: Send + Sync {
    /// Static product information.
    fn product_details(&self, product_code: &str) -> Result<ProductDetails>;

    /// Activate the license on this device.
    fn activate(&self, device: &DeviceContext, id: &LicenseId) -> Result<LicenseRecord>;

    /// Deactivate the license on this device.
    fn deactivate(&self, device: &DeviceContext, id: &LicenseId) -> Result<()>;

    /// Reconcile the license with the backend.
    fn check(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        request: &CheckRequest,
    ) -> Result<CheckResponse>;

    /// Push license-level consumption.
    fn sync_consumption(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        sync: &ConsumptionSync,
    ) -> Result<ConsumptionState>;

    /// Push feature-level consumption.
    fn sync_feature_consumption(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        feature_code: &str,
        sync: &ConsumptionSync,
    ) -> Result<ConsumptionState>;

    /// Take or renew a floating license seat.
    fn register_floating_license(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
    ) -> Result<FloatingGrant>;

    /// Give back the floating license seat.
    fn release_floating_license(&self, device: &DeviceContext, id: &LicenseId) -> Result<()>;

    /// Take or renew a floating feature seat.
    fn register_floating_feature(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        feature_code: &str,
    ) -> Result<FloatingGrant>;

    /// Give back a floating feature seat.
    fn release_floating_feature(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        feature_code: &str,
    ) -> Result<()>;

    /// Hold the floating seat offline until `until`.
    fn borrow(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        until: DateTime<Utc>,
    ) -> Result<FloatingGrant>;

    /// Versions available for download.
    fn version_list(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        filter: &InstallFileFilter,
    ) -> Result<Vec<String>>;

    /// Installation file for `version`, or the latest one.
    fn installation_file(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        filter: &InstallFileFilter,
        version: Option<&str>,
    ) -> Result<InstallationFile>;

    /// Upload device variables; returns the server's view.
    fn send_device_variables(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        variables: &[DeviceVariable],
    ) -> Result<Vec<DeviceVariable>>;

    /// Download device variables.
    fn device_variables(&self, device: &DeviceContext, id: &LicenseId)
        -> Result<Vec<DeviceVariable>>;
}

pub use memory::InMemoryBackend;
