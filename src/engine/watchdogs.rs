//! License and feature watchdogs owned by the engine.
//!
//! Watchdog tasks hold a weak reference to the engine so a forgotten
//! watchdog never keeps it alive. Slots are always emptied before a
//! watchdog is stopped, so joining never happens under the slot lock.

use super::{EngineInner, License, WatchdogSlots};
use crate::client::models::CheckRequest;
use crate::errors::{ErrorKind, LicenseError, Result};
use crate::floating::{feature_watchdog_interval, license_watchdog_interval};
use crate::watchdog::{FailureSink, Watchdog, WatchdogKind, WatchdogState};
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;
use tracing::info;

fn slot(slots: &mut WatchdogSlots, kind: WatchdogKind) -> &mut Option<Watchdog> {
    match kind {
        WatchdogKind::License => &mut slots.license,
        WatchdogKind::Feature => &mut slots.feature,
    }
}

impl EngineInner {
    fn lock_watchdogs(&self) -> MutexGuard<'_, WatchdogSlots> {
        self.watchdogs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn stop_watchdog(&self, kind: WatchdogKind) {
        let taken = slot(&mut self.lock_watchdogs(), kind).take();
        if let Some(watchdog) = taken {
            watchdog.stop();
            info!(watchdog = %kind, "watchdog stopped");
        }
    }

    pub(crate) fn stop_all_watchdogs(&self) {
        self.stop_watchdog(WatchdogKind::License);
        self.stop_watchdog(WatchdogKind::Feature);
    }
}

fn run(weak: &Weak<EngineInner>, kind: WatchdogKind) -> Result<()> {
    // The engine is gone; the slot that owns this watchdog is being dropped.
    let Some(inner) = weak.upgrade() else {
        return Ok(());
    };
    let license = License::new(inner);
    match kind {
        WatchdogKind::License => license.check(&CheckRequest::default()).map(|_| ()),
        WatchdogKind::Feature => license.renew_watched_features(),
    }
}

impl License {
    fn setup_watchdog(
        &self,
        kind: WatchdogKind,
        sink: FailureSink,
        interval: Duration,
    ) -> Result<()> {
        let inner = &self.inner;
        let mut slots = inner.lock_watchdogs();
        if slot(&mut slots, kind).is_some() {
            return Err(LicenseError::new(
                ErrorKind::WatchdogError,
                format!("{} watchdog is already running", kind),
            ));
        }

        let default_interval = inner.read(|record| match kind {
            WatchdogKind::License if record.is_borrowed() => Err(LicenseError::new(
                ErrorKind::WatchdogError,
                "a borrowed license needs no watchdog",
            )),
            WatchdogKind::License => Ok(license_watchdog_interval(record)),
            WatchdogKind::Feature => Ok(feature_watchdog_interval(record)),
        })??;
        let interval = if interval.is_zero() {
            default_interval
        } else {
            interval
        };

        let weak = Arc::downgrade(inner);
        let watchdog = Watchdog::spawn(kind, interval, move || run(&weak, kind), sink)?;
        *slot(&mut slots, kind) = Some(watchdog);
        info!(watchdog = %kind, interval_secs = interval.as_secs(), "watchdog started");
        Ok(())
    }

    /// Start the license watchdog: a periodic [`License::check`] that also
    /// renews the floating lease. A zero `interval` uses the floating
    /// timeout for floating licenses and one hour otherwise.
    ///
    /// # Errors
    /// * `WatchdogError` - already running, or the license is borrowed
    pub fn setup_license_watchdog(&self, sink: FailureSink, interval: Duration) -> Result<()> {
        self.setup_watchdog(WatchdogKind::License, sink, interval)
    }

    /// Start the feature watchdog, which renews every watched floating
    /// feature. A zero `interval` uses the shortest watched feature timeout.
    ///
    /// # Errors
    /// * `WatchdogError` - already running
    pub fn setup_feature_watchdog(&self, sink: FailureSink, interval: Duration) -> Result<()> {
        self.setup_watchdog(WatchdogKind::Feature, sink, interval)
    }

    /// Stop the license watchdog, waiting for an in-flight run.
    pub fn stop_license_watchdog(&self) {
        self.inner.stop_watchdog(WatchdogKind::License);
    }

    /// Stop the feature watchdog, waiting for an in-flight run.
    pub fn stop_feature_watchdog(&self) {
        self.inner.stop_watchdog(WatchdogKind::Feature);
    }

    /// Re-arm a watchdog paused by a failure.
    pub fn resume_watchdog(&self, kind: WatchdogKind) {
        if let Some(watchdog) = slot(&mut self.inner.lock_watchdogs(), kind).as_ref() {
            watchdog.resume();
        }
    }

    /// State of a watchdog, or `None` when it is not running.
    pub fn watchdog_state(&self, kind: WatchdogKind) -> Option<WatchdogState> {
        slot(&mut self.inner.lock_watchdogs(), kind)
            .as_ref()
            .map(Watchdog::state)
    }
}
