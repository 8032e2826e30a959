//! Per-license operations.
//!
//! A [`License`] is a cheap handle onto the engine's record. Reads return
//! snapshots; every write goes through the engine's copy-and-commit path.

use super::{Ctx, EngineInner, EngineStatus};
use crate::client::models::{
    CheckRequest, ConsumptionState, ConsumptionSync, InstallFileFilter, InstallationFile,
};
use crate::errors::{ErrorKind, LicenseError, Result};
use crate::floating::{
    apply_grant, borrow_end, ensure_feature_floating, ensure_floating, release_locally,
    BorrowPeriod, FloatingSession,
};
use crate::meter::consumption;
use crate::model::{
    fields::upsert_variable, Consumption, CustomField, DeviceVariable, Feature, LeaseState,
    LicenseId, LicenseRecord, LicenseType,
};
use crate::offline::{DeactivationRequest, OfflineLicense};
use crate::policy::{local_check, LocalEnvironment};
use crate::watchdog::WatchdogKind;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// Shared handle to the engine's license.
#[derive(Clone)]
pub struct License {
    pub(super) inner: Arc<EngineInner>,
}

fn not_consumption_license() -> LicenseError {
    LicenseError::new(
        ErrorKind::InvalidLicenseType,
        "license is not consumption based",
    )
}

fn not_consumption_feature(code: &str) -> LicenseError {
    LicenseError::new(
        ErrorKind::InvalidLicenseFeature,
        format!("feature '{}' is not consumption based", code),
    )
}

fn consumption_feature<'a>(record: &'a mut LicenseRecord, code: &str) -> Result<&'a mut Feature> {
    let feature = record.feature_mut(code)?;
    if feature.is_consumption() {
        Ok(feature)
    } else {
        Err(not_consumption_feature(code))
    }
}

fn reset_consumption(record: &mut LicenseRecord, now: DateTime<Utc>) {
    if consumption::reset_if_due(&mut record.consumption, now) {
        info!(license = %record.id, "license consumption period reset");
    }
    for feature in &mut record.features {
        if consumption::reset_if_due(&mut feature.consumption, now) {
            info!(license = %record.id, feature = %feature.code, "feature consumption period reset");
        }
    }
}

fn fold_state(c: &mut Consumption, state: &ConsumptionState) {
    consumption::fold_synced(c, state.total);
    c.max = state.max;
    c.allow_overages = state.allow_overages;
    c.max_overages = state.max_overages;
    c.unlimited = state.unlimited;
}

/// State checks that apply after a successful reconciliation.
fn ensure_usable(record: &LicenseRecord, now: DateTime<Utc>) -> Result<()> {
    if !record.enabled {
        return Err(LicenseError::new(
            ErrorKind::LicenseDisabled,
            "license was disabled by the vendor",
        ));
    }
    if !record.active {
        return Err(LicenseError::new(
            ErrorKind::LicenseInactive,
            "license is not active",
        ));
    }
    if record.is_expired(now) {
        return Err(LicenseError::new(
            ErrorKind::LicenseExpired,
            "license validity ended",
        ));
    }
    Ok(())
}

fn require_maintenance(record: &LicenseRecord, now: DateTime<Utc>) -> Result<()> {
    if record.is_maintenance_expired(now) {
        return Err(LicenseError::new(
            ErrorKind::MaintenanceExpired,
            "maintenance period ended; updates are no longer available",
        ));
    }
    Ok(())
}

impl License {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    fn view<T>(&self, f: impl FnOnce(&LicenseRecord) -> T) -> Result<T> {
        self.inner.read(f)
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now_utc()
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    /// Copy of the whole record.
    pub fn record(&self) -> Result<LicenseRecord> {
        self.view(Clone::clone)
    }

    /// License key or user.
    pub fn id(&self) -> Result<LicenseId> {
        self.view(|r| r.id.clone())
    }

    /// Commercial model.
    pub fn license_type(&self) -> Result<LicenseType> {
        self.view(|r| r.license_type)
    }

    /// Whether the license is activated.
    pub fn is_active(&self) -> Result<bool> {
        self.view(|r| r.active)
    }

    /// Active, enabled, unexpired and with a live floating lease.
    pub fn is_valid(&self) -> Result<bool> {
        let now = self.now();
        self.view(|r| r.is_valid(now))
    }

    /// Validity (including subscription grace) has ended.
    pub fn is_expired(&self) -> Result<bool> {
        let now = self.now();
        self.view(|r| r.is_expired(now))
    }

    /// Whole days of validity left.
    pub fn days_remaining(&self) -> Result<Option<i64>> {
        let now = self.now();
        self.view(|r| r.days_remaining(now))
    }

    /// Whether the maintenance period has ended. Downloads need an active
    /// maintenance period.
    pub fn is_maintenance_expired(&self) -> Result<bool> {
        let now = self.now();
        self.view(|r| r.is_maintenance_expired(now))
    }

    /// Whole days of maintenance left.
    pub fn maintenance_days_remaining(&self) -> Result<Option<i64>> {
        let now = self.now();
        self.view(|r| r.maintenance_days_remaining(now))
    }

    /// Whether the license currently runs on its grace period.
    pub fn is_grace_period_started(&self) -> Result<bool> {
        self.view(LicenseRecord::is_grace_period_started)
    }

    /// When the current grace period ends.
    pub fn grace_period_end(&self) -> Result<Option<DateTime<Utc>>> {
        self.view(|r| r.grace_period_end)
    }

    /// Whole hours left on the grace period.
    pub fn grace_period_hours_remaining(&self) -> Result<u32> {
        let now = self.now();
        self.view(|r| r.grace_period_hours_remaining(now))
    }

    /// Whether the license is floating.
    pub fn is_floating(&self) -> Result<bool> {
        self.view(|r| r.is_floating)
    }

    /// Whether the floating lease is borrowed.
    pub fn is_borrowed(&self) -> Result<bool> {
        self.view(LicenseRecord::is_borrowed)
    }

    /// Floating seats in use, as last reported.
    pub fn floating_in_use_count(&self) -> Result<u32> {
        self.view(|r| r.floating.in_use_count)
    }

    /// License-level consumption counters.
    pub fn consumption(&self) -> Result<Consumption> {
        self.view(|r| r.consumption.clone())
    }

    /// All features.
    pub fn features(&self) -> Result<Vec<Feature>> {
        self.view(|r| r.features.clone())
    }

    /// Feature by code.
    pub fn feature(&self, code: &str) -> Result<Feature> {
        self.view(|r| r.feature(code).cloned())?
    }

    /// Custom fields set by the vendor.
    pub fn custom_fields(&self) -> Result<Vec<CustomField>> {
        self.view(|r| r.custom_fields.clone())
    }

    /// Whether floating leases are released automatically.
    pub fn is_auto_release_set(&self) -> Result<bool> {
        self.view(|r| r.auto_release)
    }

    // ---------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------

    /// Validate the cached record without contacting the backend.
    ///
    /// # Errors
    /// * `ProductMismatch`, `LicenseDisabled`, `LicenseInactive`,
    ///   `LicenseExpired`, `FloatingTimeoutExpired`
    /// * `DeviceNotLicensed` - the record is bound to another device
    /// * `VmNotAllowed` - running in a VM the license does not permit
    /// * `ClockTampered` - the clock is behind the last check
    pub fn local_check(&self) -> Result<()> {
        let inner = &self.inner;
        let state = inner.lock_state();
        let record = state
            .record
            .as_ref()
            .ok_or_else(LicenseError::no_local_license)?;
        let env = LocalEnvironment {
            product_code: inner.config.product_code,
            device_id: &state.device_id,
            vm_detection: inner.config.vm_detection,
            is_virtual_machine: inner.config.vm_detection && inner.device.is_virtual_machine(),
            clock_tamper_tolerance: chrono::Duration::from_std(
                inner.config.clock_tamper_tolerance,
            )
            .unwrap_or_else(|_| chrono::Duration::zero()),
            now: inner.clock.now_utc(),
        };
        local_check(record, &env).map_err(|e| {
            debug!(license = %record.id, kind = %e.kind, "local check failed");
            e
        })
    }

    /// Reconcile with the backend.
    ///
    /// On success the record is refreshed, floating leases are renewed and
    /// the grace period is cleared. A connectivity failure inside the grace
    /// window returns `Ok(None)` and keeps the cached record usable.
    ///
    /// # Returns
    /// The newest installation file matching the request filter, if any.
    ///
    /// # Errors
    /// * connectivity errors once grace is exhausted
    /// * `LicenseDisabled` / `LicenseInactive` / `LicenseExpired` - the refreshed
    ///   record is no longer usable; the refreshed record is still stored
    /// * `MaxFloatingReached` - the floating pool is full
    pub fn check(&self, request: &CheckRequest) -> Result<Option<InstallationFile>> {
        let _span = info_span!("checking").entered();
        let inner = &self.inner;
        let mut fresh_seat = None;
        let checked = inner.mutate(true, |draft, ctx| {
            reset_consumption(draft, ctx.now);

            let outcome = inner
                .backend
                .check(&ctx.device, &draft.id, request)
                .and_then(|response| {
                    let mut next = draft.clone();
                    next.absorb_server_snapshot(response.license);
                    if next.is_floating && !next.is_borrowed() {
                        let held = next.floating.is_held() && !next.floating.is_lapsed(ctx.now);
                        let grant = inner
                            .backend
                            .register_floating_license(&ctx.device, &next.id)?;
                        if !held {
                            fresh_seat = Some(next.id.clone());
                        }
                        apply_grant(&mut next.floating, &grant, LeaseState::Registered, ctx.now)?;
                    }
                    Ok((next, response.installation_file))
                });

            match outcome {
                Ok((next, file)) => {
                    *draft = next;
                    draft.last_check = Some(ctx.now);
                    if draft.grace_period_end.take().is_some() {
                        info!(license = %draft.id, "backend reachable again, grace period cleared");
                    }
                    debug!(license = %draft.id, "license check succeeded");
                    Ok(ensure_usable(draft, ctx.now).map(|()| file))
                }
                Err(error) => {
                    let end = inner.grace.absorb(draft, error.clone(), ctx.now)?;
                    if draft.grace_period_end.is_none() {
                        warn!(
                            license = %draft.id,
                            kind = %error.kind,
                            grace_end = %end,
                            "backend unreachable, running on grace period"
                        );
                    }
                    draft.grace_period_end = Some(end);
                    Ok(Ok(None))
                }
            }
        });
        if checked.is_err() {
            if let Some(id) = fresh_seat {
                self.return_seat(&id, None);
            }
        }
        checked?
    }

    // ---------------------------------------------------------------------
    // Consumption
    // ---------------------------------------------------------------------

    /// Record license-level consumption locally.
    ///
    /// # Errors
    /// * `InvalidLicenseType` - the license is not consumption based
    /// * `NotEnoughConsumption` - the ceiling would be exceeded; counters unchanged
    pub fn update_consumption(&self, delta: i64, persist: bool) -> Result<()> {
        self.inner.mutate(persist, |draft, ctx| {
            if draft.license_type != LicenseType::Consumption {
                return Err(not_consumption_license());
            }
            consumption::reset_if_due(&mut draft.consumption, ctx.now);
            consumption::apply(&mut draft.consumption, delta)?;
            debug!(license = %draft.id, delta, local = draft.consumption.local, "consumption recorded");
            Ok(())
        })
    }

    /// Record feature-level consumption locally.
    ///
    /// # Errors
    /// * `InvalidFeatureCode` - no such feature
    /// * `InvalidLicenseFeature` - the feature is not consumption based
    /// * `NotEnoughConsumption` - the ceiling would be exceeded; counters unchanged
    pub fn update_feature_consumption(&self, code: &str, delta: i64, persist: bool) -> Result<()> {
        self.inner.mutate(persist, |draft, ctx| {
            let feature = consumption_feature(draft, code)?;
            consumption::reset_if_due(&mut feature.consumption, ctx.now);
            consumption::apply(&mut feature.consumption, delta)?;
            debug!(feature = %code, delta, local = feature.consumption.local, "feature consumption recorded");
            Ok(())
        })
    }

    /// Push unsynced license consumption to the backend.
    ///
    /// `request_overage`: `None` leaves the overage policy alone, `Some(0)`
    /// disables overages, `Some(n)` allows up to `n`.
    ///
    /// # Returns
    /// `false` when the backend was unreachable inside the grace window.
    pub fn sync_consumption(&self, request_overage: Option<u32>) -> Result<bool> {
        let _span = info_span!("consuming").entered();
        let inner = &self.inner;
        inner.mutate(true, |draft, ctx| {
            if draft.license_type != LicenseType::Consumption {
                return Err(not_consumption_license());
            }
            consumption::reset_if_due(&mut draft.consumption, ctx.now);
            let sync = ConsumptionSync {
                delta: draft.consumption.local,
                request_overage,
            };
            match inner.backend.sync_consumption(&ctx.device, &draft.id, &sync) {
                Ok(state) => {
                    fold_state(&mut draft.consumption, &state);
                    info!(license = %draft.id, total = state.total, "consumption synced");
                    Ok(true)
                }
                Err(error) => {
                    inner.grace.absorb(draft, error, ctx.now)?;
                    debug!(license = %draft.id, "consumption sync deferred");
                    Ok(false)
                }
            }
        })
    }

    /// Push unsynced feature consumption for one feature, or for every
    /// consumption feature when `code` is `None`.
    ///
    /// # Returns
    /// `false` when the backend was unreachable inside the grace window.
    pub fn sync_feature_consumption(&self, code: Option<&str>) -> Result<bool> {
        let _span = info_span!("consuming").entered();
        let inner = &self.inner;
        inner.mutate(true, |draft, ctx| {
            let codes: Vec<String> = match code {
                Some(code) => {
                    consumption_feature(draft, code)?;
                    vec![code.to_string()]
                }
                None => draft
                    .features
                    .iter()
                    .filter(|f| f.is_consumption())
                    .map(|f| f.code.clone())
                    .collect(),
            };
            let id = draft.id.clone();

            // Folds the backend acknowledged are committed even when a later
            // feature fails; the first fatal error is returned afterwards.
            let mut failure = None;
            for code in codes {
                let feature = draft.feature_mut(&code)?;
                consumption::reset_if_due(&mut feature.consumption, ctx.now);
                let sync = ConsumptionSync {
                    delta: feature.consumption.local,
                    request_overage: None,
                };
                match inner
                    .backend
                    .sync_feature_consumption(&ctx.device, &id, &code, &sync)
                {
                    Ok(state) => {
                        fold_state(&mut feature.consumption, &state);
                        info!(license = %id, feature = %code, total = state.total, "feature consumption synced");
                    }
                    Err(error) => match inner.grace.absorb(draft, error, ctx.now) {
                        Ok(_) => {
                            debug!(license = %id, feature = %code, "feature consumption sync deferred");
                            return Ok(failure.map_or(Ok(false), Err));
                        }
                        Err(error) => {
                            warn!(license = %id, feature = %code, error = %error, "feature consumption sync failed");
                            if failure.is_none() {
                                failure = Some(error);
                            }
                        }
                    },
                }
            }
            Ok(failure.map_or(Ok(true), Err))
        })?
    }

    // ---------------------------------------------------------------------
    // Floating leases
    // ---------------------------------------------------------------------

    /// Take or renew a floating seat. A borrowed lease is left alone.
    ///
    /// # Errors
    /// * `LicenseNotFloating`
    /// * `MaxFloatingReached` - every seat is taken
    pub fn register_floating_license(&self) -> Result<()> {
        let _span = info_span!("leasing").entered();
        let inner = &self.inner;
        let mut fresh_seat = None;
        let registered = inner.mutate(true, |draft, ctx| {
            ensure_floating(draft)?;
            if draft.is_borrowed() {
                return Ok(());
            }
            let held = draft.floating.is_held() && !draft.floating.is_lapsed(ctx.now);
            let grant = inner
                .backend
                .register_floating_license(&ctx.device, &draft.id)?;
            if !held {
                fresh_seat = Some(draft.id.clone());
            }
            apply_grant(&mut draft.floating, &grant, LeaseState::Registered, ctx.now)?;
            if !grant.client_id.is_empty() {
                draft.floating_client_id = grant.client_id;
            }
            info!(
                license = %draft.id,
                in_use = draft.floating.in_use_count,
                max = draft.floating.max_users,
                "floating license registered"
            );
            Ok(())
        });
        if registered.is_err() {
            if let Some(id) = fresh_seat {
                self.return_seat(&id, None);
            }
        }
        registered
    }

    /// Best-effort release of a seat the backend granted during an operation
    /// that failed afterwards, so the device never holds a seat it forgot.
    fn return_seat(&self, id: &LicenseId, feature: Option<&str>) {
        let inner = &self.inner;
        let device = inner.device_context(&inner.lock_state().device_id);
        let released = match feature {
            Some(code) => inner.backend.release_floating_feature(&device, id, code),
            None => inner.backend.release_floating_license(&device, id),
        };
        match released {
            Ok(()) => info!(license = %id, feature = feature.unwrap_or(""), "returned seat of failed operation"),
            Err(e) => warn!(license = %id, feature = feature.unwrap_or(""), error = %e, "failed to return seat of failed operation"),
        }
    }

    /// Give back the floating seat.
    ///
    /// Releasing a lease this device does not hold is a no-op, and a borrow
    /// that already lapsed is released without contacting the backend.
    /// Backend failures are logged and ignored unless `throw_on_error` is set.
    /// The license watchdog stops once the seat is released.
    pub fn release_floating_license(&self, throw_on_error: bool) -> Result<()> {
        let _span = info_span!("leasing").entered();
        let inner = &self.inner;
        let released = inner.mutate(true, |draft, ctx| {
            ensure_floating(draft)?;
            if !draft.floating.is_held() {
                return Ok(false);
            }
            if draft.is_borrowed() && draft.floating.is_lapsed(ctx.now) {
                release_locally(&mut draft.floating);
                info!(license = %draft.id, "lapsed borrow released locally");
                return Ok(true);
            }
            match inner.backend.release_floating_license(&ctx.device, &draft.id) {
                Ok(()) => {}
                Err(error) if throw_on_error => return Err(error),
                Err(error) => {
                    warn!(license = %draft.id, error = %error, "floating release failed, dropping lease locally");
                }
            }
            release_locally(&mut draft.floating);
            info!(license = %draft.id, "floating license released");
            Ok(true)
        })?;
        if released {
            inner.stop_watchdog(WatchdogKind::License);
        }
        Ok(())
    }

    /// Hold the floating seat offline for `period`.
    ///
    /// An unheld lease is registered first. Borrowing clears auto-release and
    /// stops the license watchdog.
    ///
    /// # Returns
    /// When the borrow ends.
    ///
    /// # Errors
    /// * `LicenseNotFloating`
    /// * `BorrowingNotAllowed` - the license allows no borrowing
    /// * `BorrowExceedsMax` - the period is too long or not in the future
    pub fn borrow(&self, period: &BorrowPeriod) -> Result<DateTime<Utc>> {
        let _span = info_span!("leasing").entered();
        let inner = &self.inner;
        let mut fresh_seat = None;
        let borrowed = inner.mutate(true, |draft, ctx| {
            ensure_floating(draft)?;
            let end = borrow_end(period, draft.max_borrow_hours, ctx.now)?;

            if !draft.floating.is_held() || draft.floating.is_lapsed(ctx.now) {
                let grant = inner
                    .backend
                    .register_floating_license(&ctx.device, &draft.id)?;
                fresh_seat = Some(draft.id.clone());
                apply_grant(&mut draft.floating, &grant, LeaseState::Registered, ctx.now)?;
            }
            let grant = inner.backend.borrow(&ctx.device, &draft.id, end)?;
            apply_grant(&mut draft.floating, &grant, LeaseState::Borrowed, ctx.now)?;
            draft.floating.ends_at = Some(end);
            draft.auto_release = false;
            info!(license = %draft.id, until = %end, "floating license borrowed");
            Ok(end)
        });
        let end = match borrowed {
            Ok(end) => end,
            Err(error) => {
                if let Some(id) = fresh_seat {
                    self.return_seat(&id, None);
                }
                return Err(error);
            }
        };
        inner.stop_watchdog(WatchdogKind::License);
        Ok(end)
    }

    /// Take or renew a floating feature seat.
    ///
    /// With `add_to_watchdog` the feature watchdog keeps the lease alive.
    ///
    /// # Errors
    /// * `InvalidFeatureCode` / `FeatureNotFloating`
    /// * `MaxFloatingReached` - every seat of the feature is taken
    pub fn register_floating_feature(&self, code: &str, add_to_watchdog: bool) -> Result<()> {
        let _span = info_span!("leasing").entered();
        let inner = &self.inner;
        let mut fresh_seat = None;
        let registered = inner.mutate(true, |draft, ctx| {
            let id = draft.id.clone();
            let feature = draft.feature_mut(code)?;
            ensure_feature_floating(feature)?;
            let held = feature.floating.is_held() && !feature.floating.is_lapsed(ctx.now);
            let grant = inner
                .backend
                .register_floating_feature(&ctx.device, &id, code)?;
            if !held {
                fresh_seat = Some(id.clone());
            }
            apply_grant(&mut feature.floating, &grant, LeaseState::Registered, ctx.now)?;
            feature.watched = add_to_watchdog;
            info!(license = %id, feature = %code, in_use = feature.floating.in_use_count, "floating feature registered");
            Ok(())
        });
        if registered.is_err() {
            if let Some(id) = fresh_seat {
                self.return_seat(&id, Some(code));
            }
        }
        registered
    }

    /// Give back a floating feature seat and stop watching it.
    ///
    /// # Errors
    /// * `InvalidFeatureCode` / `FeatureNotFloating`
    /// * `FloatingFeatureDeviceNotInUse` - this device holds no seat
    pub fn release_floating_feature(&self, code: &str) -> Result<()> {
        let _span = info_span!("leasing").entered();
        let inner = &self.inner;
        inner.mutate(true, |draft, ctx| {
            let id = draft.id.clone();
            let feature = draft.feature_mut(code)?;
            ensure_feature_floating(feature)?;
            if !feature.floating.is_held() {
                return Err(LicenseError::new(
                    ErrorKind::FloatingFeatureDeviceNotInUse,
                    format!("feature '{}' is not in use on this device", code),
                ));
            }
            inner
                .backend
                .release_floating_feature(&ctx.device, &id, code)?;
            release_locally(&mut feature.floating);
            feature.watched = false;
            info!(license = %id, feature = %code, "floating feature released");
            Ok(())
        })
    }

    /// Renew every watched floating feature. Renewals that succeed are kept
    /// even when another one fails; the first failure is returned.
    pub(crate) fn renew_watched_features(&self) -> Result<()> {
        let inner = &self.inner;
        let failure = inner.mutate(true, |draft, ctx| {
            let id = draft.id.clone();
            let mut failure = None;
            for feature in draft.features.iter_mut().filter(|f| f.watched && f.floats()) {
                let renewed = inner
                    .backend
                    .register_floating_feature(&ctx.device, &id, &feature.code)
                    .and_then(|grant| {
                        apply_grant(&mut feature.floating, &grant, LeaseState::Registered, ctx.now)
                    });
                if let Err(error) = renewed {
                    warn!(license = %id, feature = %feature.code, error = %error, "floating feature renewal failed");
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
            }
            Ok(failure)
        })?;
        failure.map_or(Ok(()), Err)
    }

    /// Whether dropping a session should give the seat back.
    pub(crate) fn holds_releasable_lease(&self) -> bool {
        self.view(|r| {
            r.is_floating && r.auto_release && r.floating.state == LeaseState::Registered
        })
        .unwrap_or(false)
    }

    /// Register the floating license and release it when the session drops.
    pub fn floating_session(&self) -> Result<FloatingSession> {
        FloatingSession::start(self.clone())
    }

    /// Enable or disable automatic release of floating leases.
    pub fn set_auto_release(&self, auto_release: bool) -> Result<()> {
        self.inner.mutate(true, |draft, _| {
            draft.auto_release = auto_release;
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Deactivation and offline files
    // ---------------------------------------------------------------------

    /// Deactivate online.
    ///
    /// Watchdogs stop first. With `remove_local_data` the stored license is
    /// deleted; otherwise it is kept marked inactive.
    pub fn deactivate(&self, remove_local_data: bool) -> Result<()> {
        let inner = &self.inner;
        inner.stop_all_watchdogs();

        let mut state = inner.lock_state();
        let mut record = state
            .record
            .clone()
            .ok_or_else(LicenseError::no_local_license)?;
        let device = inner.device_context(&state.device_id);
        inner.backend.deactivate(&device, &record.id)?;

        if remove_local_data {
            inner.storage.clear()?;
            state.record = None;
        } else {
            record.active = false;
            if record.floating.is_held() {
                release_locally(&mut record.floating);
            }
            inner.persist(&record)?;
            state.record = Some(record);
        }
        state.status = EngineStatus::Deactivated;
        info!(product = inner.config.product_code, remove_local_data, "license deactivated");
        Ok(())
    }

    /// Write an offline deactivation request to `path` and mark the license
    /// inactive until the vendor processes it.
    pub fn deactivate_offline(&self, path: &Path) -> Result<()> {
        let inner = &self.inner;
        inner.stop_all_watchdogs();
        inner.mutate(true, |draft, ctx| {
            let request = DeactivationRequest {
                product_code: inner.config.product_code.to_string(),
                device_id: ctx.device.device_id.clone(),
                license: draft.id.clone(),
                requested_at: ctx.now,
                local_consumption: draft.consumption.local,
            };
            request.write(path)?;
            draft.active = false;
            Ok(())
        })?;
        inner.lock_state().status = EngineStatus::DeactivationPending;
        info!(path = %path.display(), "offline deactivation request written");
        Ok(())
    }

    /// Refresh the record from a vendor-issued offline license file.
    ///
    /// With `reset_consumption` unsynced local consumption is discarded.
    pub fn update_offline(&self, path: &Path, reset_consumption: bool) -> Result<()> {
        let inner = &self.inner;
        let offline = OfflineLicense::read(path, inner.config.public_key_hex)?;
        inner.mutate(true, move |draft, ctx| {
            offline.ensure_matches(inner.config.product_code, &ctx.device.device_id)?;
            let issued = &offline.license.id;
            if issued.key != draft.id.key || issued.user != draft.id.user {
                return Err(LicenseError::new(
                    ErrorKind::LicenseNotFound,
                    format!("offline license is for {}", issued),
                ));
            }
            draft.absorb_server_snapshot(offline.license);
            if reset_consumption {
                draft.consumption.local = 0;
                for feature in &mut draft.features {
                    feature.consumption.local = 0;
                }
            }
            draft.device_id = ctx.device.device_id.clone();
            draft.active = true;
            draft.offline_activated = true;
            draft.last_check = Some(ctx.now);
            draft.grace_period_end = None;
            info!(license = %draft.id, "license updated from offline file");
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Installation files
    // ---------------------------------------------------------------------

    /// Versions available for download.
    ///
    /// # Errors
    ///
    /// `MaintenanceExpired` once the maintenance period has ended.
    pub fn version_list(&self, filter: &InstallFileFilter) -> Result<Vec<String>> {
        self.with_backend(|inner, ctx, record| {
            require_maintenance(record, ctx.now)?;
            inner.backend.version_list(&ctx.device, &record.id, filter)
        })
    }

    /// Installation file for `version`, or the newest one.
    ///
    /// # Errors
    ///
    /// `MaintenanceExpired` once the maintenance period has ended.
    pub fn installation_file(
        &self,
        filter: &InstallFileFilter,
        version: Option<&str>,
    ) -> Result<InstallationFile> {
        self.with_backend(|inner, ctx, record| {
            require_maintenance(record, ctx.now)?;
            inner
                .backend
                .installation_file(&ctx.device, &record.id, filter, version)
        })
    }

    fn with_backend<T>(
        &self,
        f: impl FnOnce(&EngineInner, &Ctx, &LicenseRecord) -> Result<T>,
    ) -> Result<T> {
        let inner = &self.inner;
        let state = inner.lock_state();
        let record = state
            .record
            .as_ref()
            .ok_or_else(LicenseError::no_local_license)?;
        let ctx = Ctx {
            device: inner.device_context(&state.device_id),
            now: inner.clock.now_utc(),
        };
        f(inner, &ctx, record)
    }

    // ---------------------------------------------------------------------
    // Device variables
    // ---------------------------------------------------------------------

    /// Set a device variable locally. Names are case-insensitive.
    pub fn add_device_variable(&self, name: &str, value: &str) -> Result<()> {
        self.add_device_variables(&[DeviceVariable::new(name, value)])
    }

    /// Set several device variables locally.
    ///
    /// # Errors
    /// * `Configuration` - a variable has an empty name or value
    pub fn add_device_variables(&self, variables: &[DeviceVariable]) -> Result<()> {
        if let Some(empty) = variables.iter().find(|v| v.is_empty()) {
            return Err(LicenseError::config(format!(
                "device variable '{}' needs a name and a value",
                empty.name
            )));
        }
        self.inner.mutate(true, |draft, _| {
            for variable in variables {
                let mut variable = variable.clone();
                variable.name = variable.name.to_lowercase();
                upsert_variable(&mut draft.device_variables, variable);
            }
            Ok(())
        })
    }

    /// Device variable by name.
    pub fn device_variable(&self, name: &str) -> Result<Option<DeviceVariable>> {
        let name = name.to_lowercase();
        self.view(|r| r.device_variables.iter().find(|v| v.name == name).cloned())
    }

    /// All local device variables.
    pub fn device_variables(&self) -> Result<Vec<DeviceVariable>> {
        self.view(|r| r.device_variables.clone())
    }

    /// Upload local device variables and adopt the backend's view.
    ///
    /// # Returns
    /// `false` when the backend was unreachable inside the grace window.
    pub fn send_device_variables(&self) -> Result<bool> {
        let inner = &self.inner;
        inner.mutate(true, |draft, ctx| {
            match inner
                .backend
                .send_device_variables(&ctx.device, &draft.id, &draft.device_variables)
            {
                Ok(stored) => {
                    debug!(license = %draft.id, count = stored.len(), "device variables sent");
                    draft.device_variables = stored;
                    Ok(true)
                }
                Err(error) => {
                    inner.grace.absorb(draft, error, ctx.now)?;
                    Ok(false)
                }
            }
        })
    }

    /// Replace local device variables with the backend's.
    pub fn fetch_device_variables(&self) -> Result<Vec<DeviceVariable>> {
        let inner = &self.inner;
        inner.mutate(true, |draft, ctx| {
            let stored = inner.backend.device_variables(&ctx.device, &draft.id)?;
            draft.device_variables = stored.clone();
            Ok(stored)
        })
    }

    // ---------------------------------------------------------------------
    // User data
    // ---------------------------------------------------------------------

    /// Store a local-only name/value pair, replacing an existing one.
    pub fn add_user_data(&self, name: &str, value: &str) -> Result<()> {
        self.inner.mutate(true, |draft, _| {
            match draft.user_data.iter_mut().find(|f| f.name == name) {
                Some(field) => field.value = value.to_string(),
                None => draft.user_data.push(CustomField::new(name, value)),
            }
            Ok(())
        })
    }

    /// Remove user data by name. Returns whether anything was removed.
    pub fn remove_user_data(&self, name: &str) -> Result<bool> {
        self.inner.mutate(true, |draft, _| {
            let before = draft.user_data.len();
            draft.user_data.retain(|f| f.name != name);
            Ok(draft.user_data.len() != before)
        })
    }

    /// All user data.
    pub fn user_data(&self) -> Result<Vec<CustomField>> {
        self.view(|r| r.user_data.clone())
    }
}

impl std::fmt::Debug for License {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.id().ok();
        f.debug_struct("License").field("id", &id).finish()
    }
}
