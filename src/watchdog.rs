//! Background keep-alive scheduler.
//!
//! A [`Watchdog`] runs a task on its own thread every `interval`. When the
//! task fails the watchdog pauses and reports the failure exactly once to a
//! [`FailureSink`]; it runs again only after [`Watchdog::resume`]. Delivery
//! happens with no watchdog lock held, so a callback may resume or stop the
//! watchdog that invoked it.

use crate::errors::{ErrorKind, LicenseError, Result};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Interval used when nothing more specific applies.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// What a watchdog keeps alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchdogKind {
    /// Periodic license check and floating lease renewal.
    License,
    /// Renewal of watched floating features.
    Feature,
}

impl fmt::Display for WatchdogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogKind::License => f.write_str("license"),
            WatchdogKind::Feature => f.write_str("feature"),
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Waiting for the next run.
    Running,
    /// Stopped after a failure; waiting for `resume`.
    Paused,
    /// Finished for good.
    Stopped,
}

/// A failed watchdog run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogFailure {
    /// Which watchdog failed.
    pub kind: WatchdogKind,
    /// Why it failed.
    pub error: LicenseError,
}

type Callback = Arc<dyn Fn(&WatchdogFailure) + Send + Sync>;

/// Where watchdog failures are delivered.
#[derive(Clone)]
pub enum FailureSink {
    /// Invoked on the watchdog thread.
    Callback(Callback),
    /// Sent over an unbounded channel, for consumers on any executor.
    Channel(mpsc::UnboundedSender<WatchdogFailure>),
}

impl FailureSink {
    /// Sink that invokes `f`.
    pub fn callback(f: impl Fn(&WatchdogFailure) + Send + Sync + 'static) -> Self {
        FailureSink::Callback(Arc::new(f))
    }

    /// Sink backed by a new channel, with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WatchdogFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FailureSink::Channel(tx), rx)
    }

    fn deliver(&self, failure: WatchdogFailure) {
        match self {
            FailureSink::Callback(f) => f(&failure),
            FailureSink::Channel(tx) => {
                if tx.send(failure).is_err() {
                    debug!("watchdog failure receiver dropped");
                }
            }
        }
    }
}

impl fmt::Debug for FailureSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSink::Callback(_) => f.write_str("FailureSink::Callback"),
            FailureSink::Channel(_) => f.write_str("FailureSink::Channel"),
        }
    }
}

struct Control {
    state: WatchdogState,
    interval: Duration,
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until the next run is due. Returns `false` once stopped.
    fn wait_for_run(&self) -> bool {
        let mut control = self.lock();
        let mut deadline = Instant::now() + control.interval;
        loop {
            match control.state {
                WatchdogState::Stopped => return false,
                WatchdogState::Paused => {
                    control = self.wake.wait(control).unwrap_or_else(|e| e.into_inner());
                    // A resumed watchdog waits a full interval.
                    deadline = Instant::now() + control.interval;
                }
                WatchdogState::Running => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    control = match self.wake.wait_timeout(control, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(e) => e.into_inner().0,
                    };
                }
            }
        }
    }
}

/// Handle to a running watchdog thread. Dropping it stops the thread.
pub struct Watchdog {
    kind: WatchdogKind,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Watchdog {
    /// Start a watchdog that runs `task` every `interval`.
    pub fn spawn<F>(
        kind: WatchdogKind,
        interval: Duration,
        mut task: F,
        sink: FailureSink,
    ) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                state: WatchdogState::Running,
                interval,
            }),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("leasewarden-{}-watchdog", kind))
            .spawn(move || {
                while worker.wait_for_run() {
                    let Err(error) = task() else { continue };
                    warn!(watchdog = %kind, kind = %error.kind, error = %error.message, "watchdog run failed");
                    {
                        let mut control = worker.lock();
                        if control.state == WatchdogState::Running {
                            control.state = WatchdogState::Paused;
                        }
                    }
                    sink.deliver(WatchdogFailure { kind, error });
                }
                debug!(watchdog = %kind, "watchdog thread exiting");
            })
            .map_err(|e| {
                LicenseError::new(
                    ErrorKind::WatchdogError,
                    format!("Failed to start {} watchdog: {}", kind, e),
                )
            })?;

        debug!(watchdog = %kind, interval_ms = interval.as_millis() as u64, "watchdog started");
        Ok(Self {
            kind,
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Which watchdog this is.
    pub fn kind(&self) -> WatchdogKind {
        self.kind
    }

    /// Current scheduler state.
    pub fn state(&self) -> WatchdogState {
        self.shared.lock().state
    }

    /// Run interval.
    pub fn interval(&self) -> Duration {
        self.shared.lock().interval
    }

    /// Re-arm a paused watchdog. The next run happens one full interval
    /// from now. Has no effect on a running or stopped watchdog.
    pub fn resume(&self) {
        let mut control = self.shared.lock();
        if control.state == WatchdogState::Paused {
            control.state = WatchdogState::Running;
            self.shared.wake.notify_all();
            debug!(watchdog = %self.kind, "watchdog resumed");
        }
    }

    /// Stop the watchdog, waiting for an in-flight run to finish. No run
    /// starts after this returns. Called from the watchdog's own thread it
    /// only marks the watchdog stopped.
    pub fn stop(&self) {
        {
            let mut control = self.shared.lock();
            if control.state == WatchdogState::Stopped {
                return;
            }
            control.state = WatchdogState::Stopped;
            self.shared.wake.notify_all();
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if thread::current().id() != self.thread_id && handle.join().is_err() {
                warn!(watchdog = %self.kind, "watchdog thread panicked");
            }
        }
        debug!(watchdog = %self.kind, "watchdog stopped");
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}
