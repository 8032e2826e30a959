//! License engine - the main public API for leasewarden.
//!
//! The [`LicenseEngine`] owns the single in-memory [`LicenseRecord`] and the
//! collaborators it needs (backend, storage, crypto, device identity and
//! clock). Callers work with the record through [`License`] handles.
//!
//! Every mutation runs on a copy of the record under one engine-wide lock;
//! the copy replaces the current record only after the operation and, when
//! requested, persistence succeed.

mod license;
mod watchdogs;

pub use license::License;

use crate::client::models::{DeviceContext, ProductDetails};
use crate::client::Backend;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::crypto::{CryptoProvider, DefaultCryptoProvider};
use crate::device::{DeviceIdAlgorithm, DeviceIdentity, HostDeviceIdentity, StaticDeviceIdentity};
use crate::errors::{ErrorKind, LicenseError, Result};
use crate::floating::release_locally;
use crate::meter::consumption;
use crate::model::{LicenseId, LicenseRecord};
use crate::offline::OfflineLicense;
use crate::policy::GracePolicy;
use crate::storage::{codec, LicenseStorage};
use crate::watchdog::Watchdog;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, info_span, warn};

/// Lifecycle state of the engine's license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No license is loaded.
    NoLicense,
    /// A license is activated on this device.
    Active,
    /// The license was deactivated online.
    Deactivated,
    /// An offline deactivation request was written and awaits the vendor.
    DeactivationPending,
}

/// External collaborators of the engine.
///
/// Only the backend and storage are required; the rest default to
/// [`DefaultCryptoProvider`], [`HostDeviceIdentity`] (or the configured
/// `hardware_id`) and [`SystemClock`].
#[derive(Clone)]
pub struct Collaborators {
    /// Licensing backend.
    pub backend: Arc<dyn Backend>,
    /// Local persistence.
    pub storage: Arc<dyn LicenseStorage>,
    /// Local license encryption.
    pub crypto: Option<Arc<dyn CryptoProvider>>,
    /// Device fingerprint source.
    pub device: Option<Arc<dyn DeviceIdentity>>,
    /// Time source.
    pub clock: Option<Arc<dyn Clock>>,
}

impl Collaborators {
    /// Required collaborators; everything else uses defaults.
    pub fn new(backend: Arc<dyn Backend>, storage: Arc<dyn LicenseStorage>) -> Self {
        Self {
            backend,
            storage,
            crypto: None,
            device: None,
            clock: None,
        }
    }

    /// Use a custom crypto provider.
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    /// Use a custom device identity.
    pub fn with_device(mut self, device: Arc<dyn DeviceIdentity>) -> Self {
        self.device = Some(device);
        self
    }

    /// Use a custom clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }
}

pub(crate) struct EngineState {
    pub(crate) record: Option<LicenseRecord>,
    pub(crate) status: EngineStatus,
    pub(crate) algorithm: DeviceIdAlgorithm,
    pub(crate) device_id: String,
}

#[derive(Default)]
pub(crate) struct WatchdogSlots {
    pub(crate) license: Option<Watchdog>,
    pub(crate) feature: Option<Watchdog>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) storage: Arc<dyn LicenseStorage>,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) device: Arc<dyn DeviceIdentity>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) grace: GracePolicy,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) watchdogs: Mutex<WatchdogSlots>,
}

/// Context handed to mutations.
pub(crate) struct Ctx {
    pub(crate) device: DeviceContext,
    pub(crate) now: DateTime<Utc>,
}

fn status_of(record: Option<&LicenseRecord>) -> EngineStatus {
    match record {
        None => EngineStatus::NoLicense,
        Some(r) if r.active => EngineStatus::Active,
        Some(_) => EngineStatus::Deactivated,
    }
}

impl EngineInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn device_context(&self, device_id: &str) -> DeviceContext {
        DeviceContext {
            product_code: self.config.product_code.to_string(),
            device_id: device_id.to_string(),
            app_name: self.config.app_name.to_string(),
            app_version: self.config.app_version.to_string(),
            is_virtual_machine: self.config.vm_detection && self.device.is_virtual_machine(),
            network_timeout: self.config.network_timeout,
        }
    }

    pub(crate) fn persist(&self, record: &LicenseRecord) -> Result<()> {
        let blob = codec::seal(record, self.crypto.as_ref(), self.clock.now_utc())?;
        self.storage.save(&blob)
    }

    fn load_stored(&self) -> Result<Option<LicenseRecord>> {
        let blob = self.storage.load()?;
        codec::open(&blob, self.crypto.as_ref())
    }

    /// Run `f` on a copy of the record and commit it when `f` succeeds.
    pub(crate) fn mutate<T>(
        &self,
        persist: bool,
        f: impl FnOnce(&mut LicenseRecord, &Ctx) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock_state();
        let current = state.record.as_ref().ok_or_else(LicenseError::no_local_license)?;
        let mut draft = current.clone();
        let ctx = Ctx {
            device: self.device_context(&state.device_id),
            now: self.clock.now_utc(),
        };

        let value = f(&mut draft, &ctx)?;
        if persist {
            self.persist(&draft)?;
        }
        state.status = match (state.status, draft.active) {
            (EngineStatus::DeactivationPending, false) => EngineStatus::DeactivationPending,
            _ => status_of(Some(&draft)),
        };
        state.record = Some(draft);
        Ok(value)
    }

    /// Read from the current record.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&LicenseRecord) -> T) -> Result<T> {
        let state = self.lock_state();
        state
            .record
            .as_ref()
            .map(f)
            .ok_or_else(LicenseError::no_local_license)
    }

    /// Best-effort release of auto-releasable leases on shutdown.
    fn release_on_shutdown(&self) {
        let state = self.lock_state();
        let Some(record) = state.record.as_ref() else {
            return;
        };
        if !record.auto_release || !record.active {
            return;
        }
        let device = self.device_context(&state.device_id);
        let mut released = record.clone();

        if released.is_floating && released.floating.state == crate::model::LeaseState::Registered
        {
            match self.backend.release_floating_license(&device, &released.id) {
                Ok(()) => release_locally(&mut released.floating),
                Err(e) => warn!(license = %released.id, error = %e, "failed to release floating license on shutdown"),
            }
        }
        let id = released.id.clone();
        for feature in released.features.iter_mut().filter(|f| {
            f.floats() && f.floating.state == crate::model::LeaseState::Registered
        }) {
            match self
                .backend
                .release_floating_feature(&device, &id, &feature.code)
            {
                Ok(()) => {
                    release_locally(&mut feature.floating);
                    feature.watched = false;
                }
                Err(e) => warn!(license = %id, feature = %feature.code, error = %e, "failed to release floating feature on shutdown"),
            }
        }

        if &released != record {
            if let Err(e) = self.persist(&released) {
                warn!(license = %id, error = %e, "failed to persist released leases");
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let slots = std::mem::take(self.watchdogs.get_mut().unwrap_or_else(|e| e.into_inner()));
        drop(slots);
        self.release_on_shutdown();
    }
}

/// Entry point: owns the license and its collaborators.
///
/// Create one engine per product and share [`License`] handles from it.
#[derive(Clone)]
pub struct LicenseEngine {
    inner: Arc<EngineInner>,
}

impl LicenseEngine {
    /// Create an engine and load any stored license.
    ///
    /// # Errors
    /// * `Configuration` - the configuration is invalid
    /// * `LocalLicenseCorrupted` - the stored license cannot be decrypted
    /// * `Storage` - the stored license cannot be read
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let crypto = collaborators.crypto.unwrap_or_else(|| {
            Arc::new(DefaultCryptoProvider::new(
                config.product_code,
                config.storage_namespace,
            ))
        });
        let device: Arc<dyn DeviceIdentity> = match (&collaborators.device, &config.hardware_id) {
            (Some(device), _) => Arc::clone(device),
            (None, Some(id)) => Arc::new(StaticDeviceIdentity::new(id)),
            (None, None) => Arc::new(HostDeviceIdentity),
        };
        let clock = collaborators
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock));
        let algorithm = config.device_id_algorithm;
        let device_id = device.device_id(algorithm)?;

        let inner = EngineInner {
            grace: GracePolicy::new(config.grace_period),
            config,
            backend: collaborators.backend,
            storage: collaborators.storage,
            crypto,
            device,
            clock,
            state: Mutex::new(EngineState {
                record: None,
                status: EngineStatus::NoLicense,
                algorithm,
                device_id,
            }),
            watchdogs: Mutex::new(WatchdogSlots::default()),
        };

        let record = inner.load_stored()?;
        {
            let mut state = inner.lock_state();
            state.status = status_of(record.as_ref());
            state.record = record;
        }

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current lifecycle status.
    pub fn status(&self) -> EngineStatus {
        self.inner.lock_state().status
    }

    /// Fingerprint of this device under the active algorithm.
    pub fn device_id(&self) -> String {
        self.inner.lock_state().device_id.clone()
    }

    /// Device-id algorithm the license is bound with.
    pub fn device_id_algorithm(&self) -> DeviceIdAlgorithm {
        self.inner.lock_state().algorithm
    }

    /// Handle to the current license, if one is loaded.
    pub fn license(&self) -> Option<License> {
        let state = self.inner.lock_state();
        state
            .record
            .as_ref()
            .map(|_| License::new(Arc::clone(&self.inner)))
    }

    /// Static product information from the backend.
    pub fn product_details(&self) -> Result<ProductDetails> {
        self.inner
            .backend
            .product_details(self.inner.config.product_code)
    }

    /// Activate a license online and persist it.
    ///
    /// # Errors
    /// * `InvalidLicenseId` - neither or both of key and user were given
    /// * any backend error (connectivity errors are never absorbed here)
    pub fn activate(&self, id: LicenseId) -> Result<License> {
        id.ensure_valid()?;
        let _span = info_span!("activating", license = %id).entered();

        let inner = &self.inner;
        let mut state = inner.lock_state();
        let now = inner.clock.now_utc();
        let device = inner.device_context(&state.device_id);

        let mut record = inner.backend.activate(&device, &id)?;
        if record.product_code != inner.config.product_code {
            return Err(LicenseError::new(
                ErrorKind::ProductMismatch,
                format!("license belongs to product '{}'", record.product_code),
            ));
        }
        record.id = id;
        record.device_id = device.device_id;
        record.active = true;
        record.last_check = Some(now);
        record.grace_period_end = None;
        consumption::reset_if_due(&mut record.consumption, now);
        for feature in &mut record.features {
            consumption::reset_if_due(&mut feature.consumption, now);
        }

        inner.persist(&record)?;
        info!(license = %record.id, activations = record.times_activated, "license activated");
        state.record = Some(record);
        state.status = EngineStatus::Active;
        drop(state);

        Ok(License::new(Arc::clone(&self.inner)))
    }

    /// Activate from a vendor-issued offline license file.
    ///
    /// # Errors
    /// * `SignatureMismatch` - the file is not signed by the configured key
    /// * `ProductMismatch` / `DeviceNotLicensed` - the file targets another product or device
    /// * `Configuration` - no public key is configured
    pub fn activate_offline(&self, path: &Path) -> Result<License> {
        let inner = &self.inner;
        let offline = OfflineLicense::read(path, inner.config.public_key_hex)?;

        let mut state = inner.lock_state();
        offline.ensure_matches(inner.config.product_code, &state.device_id)?;
        let now = inner.clock.now_utc();

        let mut record = offline.license;
        record.device_id = state.device_id.clone();
        record.active = true;
        record.offline_activated = true;
        record.last_check = Some(now);
        record.grace_period_end = None;
        if record.times_activated == 0 {
            record.times_activated = 1;
        }

        inner.persist(&record)?;
        info!(license = %record.id, "license activated offline");
        state.record = Some(record);
        state.status = EngineStatus::Active;
        drop(state);

        Ok(License::new(Arc::clone(&self.inner)))
    }

    /// Move the license to a different device-id algorithm by deactivating
    /// under the old fingerprint and reactivating under the new one.
    ///
    /// If reactivation fails the error is returned and the stored record is
    /// left as it was.
    pub fn relink(&self, algorithm: DeviceIdAlgorithm) -> Result<License> {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        let current = state
            .record
            .clone()
            .ok_or_else(LicenseError::no_local_license)?;
        let _span = info_span!("relinking", license = %current.id).entered();

        let new_device_id = inner.device.device_id(algorithm)?;
        let old_device = inner.device_context(&state.device_id);
        let new_device = inner.device_context(&new_device_id);

        inner.backend.deactivate(&old_device, &current.id)?;
        let mut record = inner.backend.activate(&new_device, &current.id)?;

        record.id = current.id.clone();
        record.device_id = new_device_id.clone();
        record.active = true;
        record.last_check = Some(inner.clock.now_utc());
        record.grace_period_end = None;
        record.user_data = current.user_data.clone();
        record.auto_release = current.auto_release;

        inner.persist(&record)?;
        info!(license = %record.id, ?algorithm, "license relinked");
        state.record = Some(record);
        state.status = EngineStatus::Active;
        state.algorithm = algorithm;
        state.device_id = new_device_id;
        drop(state);

        Ok(License::new(Arc::clone(&self.inner)))
    }

    /// Forget the license locally: stop watchdogs and clear storage.
    pub fn clear_local_storage(&self) -> Result<()> {
        self.inner.stop_all_watchdogs();
        let mut state = self.inner.lock_state();
        self.inner.storage.clear()?;
        state.record = None;
        state.status = EngineStatus::NoLicense;
        info!("local license storage cleared");
        Ok(())
    }

    /// Replace the in-memory record with the stored one.
    pub fn reload_license(&self) -> Result<Option<License>> {
        let record = self.inner.load_stored()?;
        let mut state = self.inner.lock_state();
        state.status = status_of(record.as_ref());
        state.record = record;
        Ok(state
            .record
            .as_ref()
            .map(|_| License::new(Arc::clone(&self.inner))))
    }
}

impl std::fmt::Debug for LicenseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseEngine")
            .field("product_code", &self.inner.config.product_code)
            .field("status", &self.status())
            .finish()
    }
}
