//! In-process licensing backend.
//!
//! Implements the full [`Backend`] contract against in-memory state: seat
//! accounting per device, activation limits, consumption ceilings, borrow
//! limits and device variables. Outages can be simulated with
//! [`InMemoryBackend::set_outage`], single failing operations with
//! [`InMemoryBackend::fail_operation`] and slow responses with
//! [`InMemoryBackend::set_latency`].

use super::models::{
    CheckRequest, CheckResponse, ConsumptionState, ConsumptionSync, DeviceContext, FloatingGrant,
    InstallFileFilter, InstallationFile, ProductDetails,
};
use super::Backend;
use crate::clock::Clock;
use crate::errors::{ErrorKind, LicenseError, Result};
use crate::model::{
    fields::upsert_variable, Consumption, DeviceVariable, FloatingLease, LicenseId,
    LicenseRecord, LicenseType,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct ServerLicense {
    record: LicenseRecord,
    password: String,
    devices: BTreeSet<String>,
    seats: HashMap<String, DateTime<Utc>>,
    feature_seats: HashMap<String, HashMap<String, DateTime<Utc>>>,
    variables: HashMap<String, Vec<DeviceVariable>>,
    releases: Vec<InstallationFile>,
}

#[derive(Debug, Default)]
struct ServerState {
    products: HashMap<String, ProductDetails>,
    licenses: HashMap<String, ServerLicense>,
    blacklist: HashSet<String>,
    outage: Option<ErrorKind>,
    failures: HashMap<String, ErrorKind>,
    latency: std::time::Duration,
    calls: HashMap<&'static str, usize>,
    next_variable_id: u64,
}

/// In-memory licensing backend.
pub struct InMemoryBackend {
    clock: Arc<dyn Clock>,
    state: Mutex<ServerState>,
}

fn lookup_key(id: &LicenseId) -> &str {
    if id.is_key_based() {
        &id.key
    } else {
        &id.user
    }
}

fn prune(seats: &mut HashMap<String, DateTime<Utc>>, now: DateTime<Utc>) {
    seats.retain(|_, end| *end > now);
}

fn seat_count(seats: &HashMap<String, DateTime<Utc>>) -> u32 {
    u32::try_from(seats.len()).unwrap_or(u32::MAX)
}

fn consumption_state(c: &Consumption) -> ConsumptionState {
    ConsumptionState {
        total: c.total,
        max: c.max,
        allow_overages: c.allow_overages,
        max_overages: c.max_overages,
        unlimited: c.unlimited,
    }
}

/// Server-side counterpart of the local ceiling rule.
fn charge(c: &mut Consumption, sync: &ConsumptionSync) -> Result<ConsumptionState> {
    crate::meter::consumption::apply_overage_request(c, sync.request_overage);
    let wanted = c.total.saturating_add(sync.delta);
    let ceiling = if c.allow_overages {
        c.max.saturating_add(c.max_overages)
    } else {
        c.max
    };
    if sync.delta > 0 && !c.unlimited && wanted > ceiling {
        return Err(LicenseError::new(
            ErrorKind::NotEnoughConsumption,
            format!("consumption {} exceeds {}", wanted, ceiling),
        ));
    }
    c.total = wanted.max(0);
    Ok(consumption_state(c))
}

impl InMemoryBackend {
    /// Create an empty backend driven by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(ServerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a product.
    pub fn add_product(&self, product: ProductDetails) {
        self.lock().products.insert(product.code.clone(), product);
    }

    /// Register a key-based license. The record is the server-side template;
    /// `times_activated` and device binding are managed by the backend.
    pub fn add_license(&self, record: LicenseRecord) {
        let key = lookup_key(&record.id).to_string();
        self.lock().licenses.insert(
            key,
            ServerLicense {
                record,
                ..ServerLicense::default()
            },
        );
    }

    /// Register a user-based license with its password.
    pub fn add_user_license(&self, record: LicenseRecord, password: &str) {
        let key = lookup_key(&record.id).to_string();
        self.lock().licenses.insert(
            key,
            ServerLicense {
                record,
                password: password.to_string(),
                ..ServerLicense::default()
            },
        );
    }

    /// Publish an installation file for a license.
    pub fn add_release(&self, license: &str, file: InstallationFile) {
        if let Some(server) = self.lock().licenses.get_mut(license) {
            server.releases.push(file);
        }
    }

    /// Edit a license's server-side record.
    pub fn update_license(&self, license: &str, edit: impl FnOnce(&mut LicenseRecord)) {
        if let Some(server) = self.lock().licenses.get_mut(license) {
            edit(&mut server.record);
        }
    }

    /// Server-side record of a license.
    pub fn server_record(&self, license: &str) -> Option<LicenseRecord> {
        self.lock().licenses.get(license).map(|s| s.record.clone())
    }

    /// Live floating seats on a license.
    pub fn seats_in_use(&self, license: &str) -> u32 {
        let now = self.clock.now_utc();
        let mut state = self.lock();
        match state.licenses.get_mut(license) {
            Some(server) => {
                prune(&mut server.seats, now);
                seat_count(&server.seats)
            }
            None => 0,
        }
    }

    /// Devices the license is activated on.
    pub fn activated_devices(&self, license: &str) -> Vec<String> {
        self.lock()
            .licenses
            .get(license)
            .map(|s| s.devices.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Blacklist a device id.
    pub fn blacklist_device(&self, device_id: &str) {
        self.lock().blacklist.insert(device_id.to_string());
    }

    /// Fail every call with `kind` until cleared with `None`.
    pub fn set_outage(&self, kind: Option<ErrorKind>) {
        self.lock().outage = kind;
    }

    /// Fail one operation (by the names [`InMemoryBackend::call_count`]
    /// uses) with `kind` until cleared with `None`.
    pub fn fail_operation(&self, operation: &str, kind: Option<ErrorKind>) {
        let mut state = self.lock();
        match kind {
            Some(kind) => state.failures.insert(operation.to_string(), kind),
            None => state.failures.remove(operation),
        };
    }

    /// Simulated response time. Calls whose `network_timeout` is shorter
    /// fail with `NetworkTimeout`.
    pub fn set_latency(&self, latency: std::time::Duration) {
        self.lock().latency = latency;
    }

    /// How many times an operation was attempted.
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Run `f` against the license after the common gate checks.
    fn with_license<T>(
        &self,
        operation: &'static str,
        device: &DeviceContext,
        id: &LicenseId,
        f: impl FnOnce(&mut ServerLicense, &mut u64, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let now = self.clock.now_utc();
        let mut state = self.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        debug!(operation, license = %id, device = %device.device_id, "backend call");

        if let Some(kind) = state.outage {
            return Err(LicenseError::new(kind, "simulated backend outage"));
        }
        if let Some(kind) = state.failures.get(operation) {
            return Err(LicenseError::new(*kind, format!("simulated {} failure", operation)));
        }
        if !device.network_timeout.is_zero() && state.latency > device.network_timeout {
            return Err(LicenseError::new(
                ErrorKind::NetworkTimeout,
                format!(
                    "no response within {}ms",
                    device.network_timeout.as_millis()
                ),
            ));
        }
        if state.blacklist.contains(&device.device_id) {
            return Err(LicenseError::new(
                ErrorKind::DeviceBlacklisted,
                "device is blacklisted",
            ));
        }

        let ServerState {
            licenses,
            next_variable_id,
            ..
        } = &mut *state;
        let server = licenses.get_mut(lookup_key(id)).ok_or_else(|| {
            LicenseError::new(ErrorKind::LicenseNotFound, format!("unknown license {}", id))
        })?;

        if !id.is_key_based() && server.password != id.password() && operation == "activate" {
            return Err(LicenseError::new(
                ErrorKind::InvalidCredential,
                "wrong user or password",
            ));
        }
        if server.record.product_code != device.product_code {
            return Err(LicenseError::new(
                ErrorKind::ProductMismatch,
                "license belongs to another product",
            ));
        }

        f(server, next_variable_id, now)
    }

    fn require_device(server: &ServerLicense, device: &DeviceContext) -> Result<()> {
        if server.devices.contains(&device.device_id) {
            Ok(())
        } else {
            Err(LicenseError::new(
                ErrorKind::DeviceNotLicensed,
                "license is not activated on this device",
            ))
        }
    }

    fn snapshot(server: &mut ServerLicense, device: &DeviceContext, now: DateTime<Utc>) -> LicenseRecord {
        prune(&mut server.seats, now);
        let mut record = server.record.clone();
        record.active = true;
        record.device_id = device.device_id.clone();
        record.floating.in_use_count = seat_count(&server.seats);
        record.floating.state = Default::default();
        record.floating.started_at = None;
        record.floating.ends_at = None;
        for feature in &mut record.features {
            if let Some(seats) = server.feature_seats.get_mut(&feature.code) {
                prune(seats, now);
                feature.floating.in_use_count = seat_count(seats);
            }
        }
        record.device_variables = server
            .variables
            .get(&device.device_id)
            .cloned()
            .unwrap_or_default();
        record
    }

    fn grant(
        lease: &FloatingLease,
        seats: &HashMap<String, DateTime<Utc>>,
        device: &DeviceContext,
        started_at: DateTime<Utc>,
    ) -> FloatingGrant {
        FloatingGrant {
            in_use_count: seat_count(seats),
            max_users: lease.max_users,
            timeout_minutes: lease.timeout_minutes,
            started_at: Some(started_at),
            ends_at: seats.get(&device.device_id).copied(),
            client_id: device.device_id.clone(),
        }
    }
}

impl Backend for InMemoryBackend {
    fn product_details(&self, product_code: &str) -> Result<ProductDetails> {
        let mut state = self.lock();
        *state.calls.entry("product_details").or_insert(0) += 1;
        if let Some(kind) = state.outage {
            return Err(LicenseError::new(kind, "simulated backend outage"));
        }
        if let Some(kind) = state.failures.get("product_details") {
            return Err(LicenseError::new(*kind, "simulated product_details failure"));
        }
        state.products.get(product_code).cloned().ok_or_else(|| {
            LicenseError::new(
                ErrorKind::ProductMismatch,
                format!("unknown product {}", product_code),
            )
        })
    }

    fn activate(&self, device: &DeviceContext, id: &LicenseId) -> Result<LicenseRecord> {
        self.with_license("activate", device, id, |server, _, now| {
            if !server.record.enabled {
                return Err(LicenseError::new(
                    ErrorKind::LicenseDisabled,
                    "license is disabled",
                ));
            }
            if device.is_virtual_machine && !server.record.vm_allowed {
                return Err(LicenseError::new(
                    ErrorKind::VmNotAllowed,
                    "license does not allow virtual machines",
                ));
            }
            if !server.devices.contains(&device.device_id) {
                let used = u32::try_from(server.devices.len()).unwrap_or(u32::MAX);
                if used >= server.record.max_activations {
                    return Err(LicenseError::new(
                        ErrorKind::NoAvailableActivations,
                        "all activations are in use",
                    ));
                }
                server.devices.insert(device.device_id.clone());
                server.record.times_activated += 1;
            }
            Ok(Self::snapshot(server, device, now))
        })
    }

    fn deactivate(&self, device: &DeviceContext, id: &LicenseId) -> Result<()> {
        self.with_license("deactivate", device, id, |server, _, _| {
            Self::require_device(server, device)?;
            server.devices.remove(&device.device_id);
            server.seats.remove(&device.device_id);
            for seats in server.feature_seats.values_mut() {
                seats.remove(&device.device_id);
            }
            Ok(())
        })
    }

    fn check(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        request: &CheckRequest,
    ) -> Result<CheckResponse> {
        self.with_license("check", device, id, |server, _, now| {
            Self::require_device(server, device)?;
            let mut license = Self::snapshot(server, device, now);
            if !request.include_expired_features {
                license.features.retain(|f| !f.is_expired(now));
            }
            let installation_file = server
                .releases
                .iter()
                .filter(|f| request.filter.matches(f))
                .last()
                .cloned();
            Ok(CheckResponse {
                license,
                installation_file,
            })
        })
    }

    fn sync_consumption(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        sync: &ConsumptionSync,
    ) -> Result<ConsumptionState> {
        self.with_license("sync_consumption", device, id, |server, _, _| {
            Self::require_device(server, device)?;
            if server.record.license_type != LicenseType::Consumption {
                return Err(LicenseError::new(
                    ErrorKind::InvalidLicenseType,
                    "license is not consumption based",
                ));
            }
            charge(&mut server.record.consumption, sync)
        })
    }

    fn sync_feature_consumption(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        feature_code: &str,
        sync: &ConsumptionSync,
    ) -> Result<ConsumptionState> {
        self.with_license("sync_feature_consumption", device, id, |server, _, _| {
            Self::require_device(server, device)?;
            let feature = server.record.feature_mut(feature_code)?;
            if !feature.is_consumption() {
                return Err(LicenseError::new(
                    ErrorKind::InvalidLicenseFeature,
                    format!("feature '{}' is not consumption based", feature_code),
                ));
            }
            charge(&mut feature.consumption, sync)
        })
    }

    fn register_floating_license(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
    ) -> Result<FloatingGrant> {
        self.with_license("register_floating_license", device, id, |server, _, now| {
            Self::require_device(server, device)?;
            if !server.record.is_floating {
                return Err(LicenseError::new(
                    ErrorKind::LicenseNotFloating,
                    "license is not floating",
                ));
            }
            prune(&mut server.seats, now);
            let lease = &server.record.floating;
            if !server.seats.contains_key(&device.device_id)
                && seat_count(&server.seats) >= lease.max_users
            {
                return Err(LicenseError::new(
                    ErrorKind::MaxFloatingReached,
                    format!("all {} floating seats are in use", lease.max_users),
                ));
            }
            server
                .seats
                .insert(device.device_id.clone(), now + lease.timeout());
            Ok(Self::grant(lease, &server.seats, device, now))
        })
    }

    fn release_floating_license(&self, device: &DeviceContext, id: &LicenseId) -> Result<()> {
        self.with_license("release_floating_license", device, id, |server, _, _| {
            server.seats.remove(&device.device_id);
            Ok(())
        })
    }

    fn register_floating_feature(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        feature_code: &str,
    ) -> Result<FloatingGrant> {
        self.with_license("register_floating_feature", device, id, |server, _, now| {
            Self::require_device(server, device)?;
            let lease = {
                let feature = server.record.feature(feature_code)?;
                if !feature.floats() {
                    return Err(LicenseError::new(
                        ErrorKind::FeatureNotFloating,
                        format!("feature '{}' is not floating", feature_code),
                    ));
                }
                feature.floating.clone()
            };
            let seats = server
                .feature_seats
                .entry(feature_code.to_string())
                .or_default();
            prune(seats, now);
            if !seats.contains_key(&device.device_id) && seat_count(seats) >= lease.max_users {
                return Err(LicenseError::new(
                    ErrorKind::MaxFloatingReached,
                    format!("all seats of feature '{}' are in use", feature_code),
                ));
            }
            seats.insert(device.device_id.clone(), now + lease.timeout());
            Ok(Self::grant(&lease, seats, device, now))
        })
    }

    fn release_floating_feature(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        feature_code: &str,
    ) -> Result<()> {
        self.with_license("release_floating_feature", device, id, |server, _, now| {
            if !server.record.feature(feature_code)?.floats() {
                return Err(LicenseError::new(
                    ErrorKind::FeatureNotFloating,
                    format!("feature '{}' is not floating", feature_code),
                ));
            }
            let seats = server
                .feature_seats
                .entry(feature_code.to_string())
                .or_default();
            prune(seats, now);
            match seats.remove(&device.device_id) {
                Some(_) => Ok(()),
                None => Err(LicenseError::new(
                    ErrorKind::FloatingFeatureDeviceNotInUse,
                    format!("feature '{}' is not in use on this device", feature_code),
                )),
            }
        })
    }

    fn borrow(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        until: DateTime<Utc>,
    ) -> Result<FloatingGrant> {
        self.with_license("borrow", device, id, |server, _, now| {
            Self::require_device(server, device)?;
            let record = &server.record;
            if !record.is_floating {
                return Err(LicenseError::new(
                    ErrorKind::LicenseNotFloating,
                    "license is not floating",
                ));
            }
            if record.max_borrow_hours == 0 {
                return Err(LicenseError::new(
                    ErrorKind::BorrowingNotAllowed,
                    "license does not allow borrowing",
                ));
            }
            if until > now + Duration::hours(i64::from(record.max_borrow_hours)) {
                return Err(LicenseError::new(
                    ErrorKind::BorrowExceedsMax,
                    format!("borrow exceeds {} hours", record.max_borrow_hours),
                ));
            }
            prune(&mut server.seats, now);
            if !server.seats.contains_key(&device.device_id)
                && seat_count(&server.seats) >= record.floating.max_users
            {
                return Err(LicenseError::new(
                    ErrorKind::MaxFloatingReached,
                    "all floating seats are in use",
                ));
            }
            server.seats.insert(device.device_id.clone(), until);
            Ok(Self::grant(&record.floating, &server.seats, device, now))
        })
    }

    fn version_list(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        filter: &InstallFileFilter,
    ) -> Result<Vec<String>> {
        self.with_license("version_list", device, id, |server, _, _| {
            Self::require_device(server, device)?;
            Ok(server
                .releases
                .iter()
                .filter(|f| filter.matches(f))
                .map(|f| f.version.clone())
                .collect())
        })
    }

    fn installation_file(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        filter: &InstallFileFilter,
        version: Option<&str>,
    ) -> Result<InstallationFile> {
        self.with_license("installation_file", device, id, |server, _, _| {
            Self::require_device(server, device)?;
            server
                .releases
                .iter()
                .filter(|f| filter.matches(f))
                .filter(|f| version.map_or(true, |v| f.version == v))
                .last()
                .cloned()
                .ok_or_else(|| {
                    LicenseError::new(
                        ErrorKind::LicenseNotFound,
                        "no installation file matches the request",
                    )
                })
        })
    }

    fn send_device_variables(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
        variables: &[DeviceVariable],
    ) -> Result<Vec<DeviceVariable>> {
        self.with_license("send_device_variables", device, id, |server, next_id, now| {
            Self::require_device(server, device)?;
            let stored = server
                .variables
                .entry(device.device_id.clone())
                .or_default();
            for var in variables.iter().filter(|v| !v.is_empty()) {
                upsert_variable(stored, var.clone());
            }
            for var in stored.iter_mut() {
                if var.id == 0 {
                    *next_id += 1;
                    var.id = *next_id;
                }
                if variables.iter().any(|v| v.name == var.name) {
                    var.updated_at = Some(now);
                }
            }
            Ok(stored.clone())
        })
    }

    fn device_variables(
        &self,
        device: &DeviceContext,
        id: &LicenseId,
    ) -> Result<Vec<DeviceVariable>> {
        self.with_license("device_variables", device, id, |server, _, _| {
            Self::require_device(server, device)?;
            Ok(server
                .variables
                .get(&device.device_id)
                .cloned()
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::model::{Feature, FeatureType};

    fn setup() -> (Arc<MockClock>, InMemoryBackend) {
        let clock = Arc::new(MockClock::from_rfc3339("2025-04-01T10:00:00Z"));
        let backend = InMemoryBackend::new(clock.clone());
        let mut record = LicenseRecord::new(LicenseId::from_key("KEY-1"), "demo");
        record.enabled = true;
        record.max_activations = 2;
        record.is_floating = true;
        record.floating.max_users = 1;
        record.floating.timeout_minutes = 30;
        record.max_borrow_hours = 24;
        let mut feature = Feature::new("render", "Render");
        feature.feature_type = FeatureType::Consumption;
        feature.consumption.max = 5;
        record.features.push(feature);
        backend.add_license(record);
        (clock, backend)
    }

    fn device(id: &str) -> DeviceContext {
        DeviceContext {
            product_code: "demo".to_string(),
            device_id: id.to_string(),
            ..DeviceContext::default()
        }
    }

    fn key() -> LicenseId {
        LicenseId::from_key("KEY-1")
    }

    #[test]
    fn test_activation_limit() {
        let (_, backend) = setup();
        backend.activate(&device("a"), &key()).unwrap();
        backend.activate(&device("a"), &key()).unwrap();
        backend.activate(&device("b"), &key()).unwrap();
        let err = backend.activate(&device("c"), &key()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoAvailableActivations);
        assert_eq!(backend.server_record("KEY-1").unwrap().times_activated, 2);
    }

    #[test]
    fn test_seat_expires_after_timeout() {
        let (clock, backend) = setup();
        backend.activate(&device("a"), &key()).unwrap();
        backend.activate(&device("b"), &key()).unwrap();

        backend.register_floating_license(&device("a"), &key()).unwrap();
        let err = backend
            .register_floating_license(&device("b"), &key())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MaxFloatingReached);

        clock.advance(Duration::minutes(31));
        assert_eq!(backend.seats_in_use("KEY-1"), 0);
        backend.register_floating_license(&device("b"), &key()).unwrap();
    }

    #[test]
    fn test_outage_and_call_count() {
        let (_, backend) = setup();
        backend.set_outage(Some(ErrorKind::NoInternet));
        let err = backend.activate(&device("a"), &key()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoInternet);
        assert_eq!(backend.call_count("activate"), 1);
    }

    #[test]
    fn test_single_operation_failure() {
        let (clock, backend) = setup();
        backend.activate(&device("a"), &key()).unwrap();
        backend.fail_operation("borrow", Some(ErrorKind::ServerError));

        let err = backend
            .borrow(&device("a"), &key(), clock.now_utc() + Duration::hours(1))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        backend.register_floating_license(&device("a"), &key()).unwrap();

        backend.fail_operation("borrow", None);
        assert_eq!(backend.call_count("borrow"), 1);
    }

    #[test]
    fn test_latency_beyond_network_timeout() {
        let (_, backend) = setup();
        let mut ctx = device("a");
        ctx.network_timeout = std::time::Duration::from_secs(2);

        backend.set_latency(std::time::Duration::from_secs(3));
        let err = backend.activate(&ctx, &key()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkTimeout);
        // Zero means no limit.
        backend.activate(&device("a"), &key()).unwrap();

        backend.set_latency(std::time::Duration::from_secs(1));
        backend.activate(&ctx, &key()).unwrap();
    }

    #[test]
    fn test_feature_consumption_ceiling() {
        let (_, backend) = setup();
        backend.activate(&device("a"), &key()).unwrap();
        let sync = ConsumptionSync {
            delta: 6,
            request_overage: None,
        };
        let err = backend
            .sync_feature_consumption(&device("a"), &key(), "render", &sync)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotEnoughConsumption);
    }

    #[test]
    fn test_user_license_requires_password() {
        let clock = Arc::new(MockClock::from_rfc3339("2025-04-01T10:00:00Z"));
        let backend = InMemoryBackend::new(clock);
        backend.add_user_license(
            LicenseRecord::new(LicenseId::from_user("ana@example.com", ""), "demo"),
            "hunter2",
        );
        let err = backend
            .activate(&device("a"), &LicenseId::from_user("ana@example.com", "nope"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCredential);
        backend
            .activate(&device("a"), &LicenseId::from_user("ana@example.com", "hunter2"))
            .unwrap();
    }

    #[test]
    fn test_device_variables_get_ids() {
        let (_, backend) = setup();
        backend.activate(&device("a"), &key()).unwrap();
        let stored = backend
            .send_device_variables(&device("a"), &key(), &[DeviceVariable::new("seat", "A1")])
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].id > 0);
        assert!(stored[0].updated_at.is_some());
        assert_eq!(backend.device_variables(&device("a"), &key()).unwrap(), stored);
    }
}
