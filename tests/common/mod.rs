//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use leasewarden::model::{ConsumptionPeriod, Feature, FeatureType, LicenseType};
use leasewarden::{
    Collaborators, EngineConfig, InMemoryBackend, LicenseEngine, LicenseId, LicenseRecord,
    LicenseStorage, MemoryStorage, MockClock, StaticDeviceIdentity,
};
use std::sync::Arc;
use std::time::Instant;

pub const PRODUCT: &str = "demo";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// One backend and clock, any number of devices.
pub struct Fixture {
    pub clock: Arc<MockClock>,
    pub backend: Arc<InMemoryBackend>,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = Arc::new(MockClock::new(start()));
        let backend = Arc::new(InMemoryBackend::new(clock.clone()));
        Self { clock, backend }
    }

    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(PRODUCT);
        config.app_name = "Demo";
        config.app_version = "1.0.0";
        config
    }

    /// Engine for `device` with its own in-memory storage.
    pub fn engine(&self, device: &str) -> LicenseEngine {
        self.engine_on(device, Arc::new(MemoryStorage::new()))
    }

    /// Engine for `device` on the given storage.
    pub fn engine_on(&self, device: &str, storage: Arc<dyn LicenseStorage>) -> LicenseEngine {
        self.engine_with(self.config(), StaticDeviceIdentity::new(device), storage)
    }

    pub fn engine_with(
        &self,
        config: EngineConfig,
        device: StaticDeviceIdentity,
        storage: Arc<dyn LicenseStorage>,
    ) -> LicenseEngine {
        let collaborators = Collaborators::new(self.backend.clone(), storage)
            .with_device(Arc::new(device))
            .with_clock(self.clock.clone());
        LicenseEngine::new(config, collaborators).unwrap()
    }
}

pub fn key_license(key: &str) -> LicenseRecord {
    let mut record = LicenseRecord::new(LicenseId::from_key(key), PRODUCT);
    record.max_activations = 5;
    record
}

pub fn floating_license(key: &str, max_users: u32, timeout_minutes: u32) -> LicenseRecord {
    let mut record = key_license(key);
    record.is_floating = true;
    record.floating.max_users = max_users;
    record.floating.timeout_minutes = timeout_minutes;
    record.max_borrow_hours = 48;
    record
}

pub fn consumption_license(key: &str, max: i64, total: i64) -> LicenseRecord {
    let mut record = key_license(key);
    record.license_type = LicenseType::Consumption;
    record.consumption.max = max;
    record.consumption.total = total;
    record
}

pub fn daily_consumption_license(key: &str, max: i64, total: i64) -> LicenseRecord {
    let mut record = consumption_license(key, max, total);
    record.consumption.period = ConsumptionPeriod::Daily;
    record
}

pub fn floating_feature(code: &str, max_users: u32, timeout_minutes: u32) -> Feature {
    let mut feature = Feature::new(code, code);
    feature.is_floating = true;
    feature.floating.max_users = max_users;
    feature.floating.timeout_minutes = timeout_minutes;
    feature
}

pub fn consumption_feature(code: &str, max: i64) -> Feature {
    let mut feature = Feature::new(code, code);
    feature.feature_type = FeatureType::Consumption;
    feature.consumption.max = max;
    feature
}

/// Poll `cond` for up to five seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + std::time::Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    false
}
