//! Scoped floating lease.

use crate::engine::License;
use crate::errors::Result;
use tracing::warn;

/// Holds the floating license seat for its lifetime.
///
/// The seat is registered when the session starts and released when it is
/// dropped, unless the lease was borrowed in between, auto-release was
/// turned off on the license, or [`FloatingSession::disable_auto_release`]
/// was called.
#[derive(Debug)]
pub struct FloatingSession {
    license: License,
    auto_release: bool,
}

impl FloatingSession {
    pub(crate) fn start(license: License) -> Result<Self> {
        license.register_floating_license()?;
        Ok(Self {
            license,
            auto_release: true,
        })
    }

    /// The license this session holds a seat on.
    pub fn license(&self) -> &License {
        &self.license
    }

    /// Keep the seat when the session drops.
    pub fn disable_auto_release(&mut self) {
        self.auto_release = false;
    }
}

impl Drop for FloatingSession {
    fn drop(&mut self) {
        if !self.auto_release || !self.license.holds_releasable_lease() {
            return;
        }
        if let Err(e) = self.license.release_floating_license(false) {
            warn!(error = %e, "failed to release floating session");
        }
    }
}
