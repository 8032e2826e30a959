//! # Leasewarden
//!
//! **Device-bound license lifecycle engine for Rust.**
//!
//! Leasewarden keeps a product license usable on one device: it activates
//! and deactivates against a licensing backend, stores the license encrypted
//! on disk, validates it offline, meters consumption, manages floating
//! seats, and rides out connectivity loss on a bounded grace period.
//!
//! ## Features
//!
//! - **Online and offline activation**, with signed offline license files
//! - **Encrypted local storage** behind an advisory file lock
//! - **Offline validation**: device binding, VM policy, clock tampering
//! - **Grace period**: connectivity failures degrade instead of failing
//! - **Consumption metering** with overages and periodic resets
//! - **Floating leases** at license and feature level, with borrowing
//! - **Watchdogs** that keep checks and floating leases alive in the background
//!
//! ## Quickstart
//!
//! ```no_run
//! use leasewarden::{
//!     Collaborators, EngineConfig, FileStorage, InMemoryBackend, LicenseEngine, LicenseId,
//!     SystemClock,
//! };
//! use leasewarden::client::models::CheckRequest;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), leasewarden::LicenseError> {
//!     let mut config = EngineConfig::new("myapp");
//!     config.app_name = "My App";
//!     config.app_version = "1.4.0";
//!
//!     // Applications supply their own transport by implementing `Backend`.
//!     let backend = Arc::new(InMemoryBackend::new(Arc::new(SystemClock)));
//!     let storage = Arc::new(FileStorage::from_config(&config)?);
//!     let engine = LicenseEngine::new(config, Collaborators::new(backend, storage))?;
//!
//!     let license = match engine.license() {
//!         Some(license) => license,
//!         None => engine.activate(LicenseId::from_key("LICENSE-KEY-HERE"))?,
//!     };
//!     license.local_check()?;
//!     license.check(&CheckRequest::default())?;
//!
//!     if license.is_grace_period_started()? {
//!         println!(
//!             "offline, {} hours of grace left",
//!             license.grace_period_hours_remaining()?
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Grace period
//!
//! Only connectivity errors (`NoInternet`, `NetworkTimeout`, `ServerError`)
//! are absorbed, and only while the last successful check is within the
//! configured grace period (48 hours by default). Floating leases cap the
//! window at the lease end. Every other error is returned as is.
//!
//! ## Threat Model
//!
//! The stored license is encrypted and authenticated, offline license files
//! are Ed25519-signed, and the clock is checked against the last successful
//! check. Leasewarden does **not** prevent binary patching or code
//! modification.

#![deny(warnings)]
#![deny(missing_docs)]
#![doc(html_root_url = "https://docs.rs/leasewarden/0.1.0")]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Data model
pub mod model;

// Crypto layer
pub mod crypto;

// Storage layer
pub mod storage;

// Policy layer
pub mod policy;

// Metering layer
pub mod meter;

// Client layer
pub mod client;

// Device layer
pub mod device;

// Leasing
pub mod floating;
pub mod watchdog;

// Offline files
pub mod offline;

// Engine (main public API)
pub mod engine;

// Re-exports for public API
pub use client::{Backend, InMemoryBackend};
pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use crypto::{CryptoProvider, DefaultCryptoProvider};
pub use device::{DeviceIdAlgorithm, DeviceIdentity, HostDeviceIdentity, StaticDeviceIdentity};
pub use engine::{Collaborators, EngineStatus, License, LicenseEngine};
pub use errors::{ErrorCategory, ErrorKind, LicenseError, Result};
pub use floating::{BorrowPeriod, FloatingSession};
pub use model::{LicenseId, LicenseRecord};
pub use storage::{FileStorage, LicenseStorage, MemoryStorage};
pub use watchdog::{FailureSink, WatchdogFailure, WatchdogKind, WatchdogState};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
