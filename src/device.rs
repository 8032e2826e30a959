//! Device fingerprinting and virtual machine detection.

use crate::crypto::digest::sha256_hex;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

/// Algorithm used to derive the device fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceIdAlgorithm {
    /// OS, architecture, hostname and machine id.
    #[default]
    Default,
    /// Machine id and architecture only; survives hostname changes.
    Gen2,
    /// Platform UUID exposed by cloud hypervisors, falling back to `Gen2`.
    CloudPlatformsId,
}

/// Source of the device fingerprint.
pub trait DeviceIdentity: Send + Sync {
    /// Fingerprint of this device under `algorithm`.
    fn device_id(&self, algorithm: DeviceIdAlgorithm) -> Result<String>;

    /// Whether this device is a virtual machine.
    fn is_virtual_machine(&self) -> bool;
}

/// Fingerprint derived from the host's stable identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDeviceIdentity;

impl DeviceIdentity for HostDeviceIdentity {
    fn device_id(&self, algorithm: DeviceIdAlgorithm) -> Result<String> {
        let components = match algorithm {
            DeviceIdAlgorithm::Default => {
                let mut ids = vec![env::consts::OS.to_string(), env::consts::ARCH.to_string()];
                ids.push(hostname_string());
                ids.extend(machine_id());
                ids
            }
            DeviceIdAlgorithm::Gen2 => gen2_components(),
            DeviceIdAlgorithm::CloudPlatformsId => match platform_uuid() {
                Some(uuid) => vec!["cloud".to_string(), uuid],
                None => gen2_components(),
            },
        };
        Ok(sha256_hex(components.join("|").as_bytes()))
    }

    fn is_virtual_machine(&self) -> bool {
        detect_virtual_machine()
    }
}

fn gen2_components() -> Vec<String> {
    let mut ids = vec!["gen2".to_string(), env::consts::ARCH.to_string()];
    match machine_id() {
        Some(id) => ids.push(id),
        None => ids.push(hostname_string()),
    }
    ids
}

fn hostname_string() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn read_trimmed(path: &str) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn machine_id() -> Option<String> {
    if cfg!(target_os = "linux") {
        read_trimmed("/etc/machine-id").or_else(|| read_trimmed("/var/lib/dbus/machine-id"))
    } else {
        None
    }
}

fn platform_uuid() -> Option<String> {
    if cfg!(target_os = "linux") {
        read_trimmed("/sys/class/dmi/id/product_uuid")
    } else {
        None
    }
}

const HYPERVISOR_VENDORS: &[&str] = &[
    "vmware",
    "virtualbox",
    "kvm",
    "qemu",
    "xen",
    "microsoft corporation",
    "parallels",
    "bochs",
];

fn detect_virtual_machine() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    let dmi_hit = ["/sys/class/dmi/id/sys_vendor", "/sys/class/dmi/id/product_name"]
        .iter()
        .filter_map(|p| read_trimmed(p))
        .map(|s| s.to_lowercase())
        .any(|s| HYPERVISOR_VENDORS.iter().any(|v| s.contains(v)));
    dmi_hit
        || read_trimmed("/proc/cpuinfo").is_some_and(|cpu| {
            cpu.lines()
                .any(|l| l.starts_with("flags") && l.split_whitespace().any(|f| f == "hypervisor"))
        })
}

/// Fixed fingerprint, used for the `hardware_id` override and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceIdentity {
    id: String,
    per_algorithm: HashMap<DeviceIdAlgorithm, String>,
    virtual_machine: bool,
}

impl StaticDeviceIdentity {
    /// Report `id` for every algorithm.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    /// Report a different id for one algorithm.
    pub fn with_algorithm(mut self, algorithm: DeviceIdAlgorithm, id: &str) -> Self {
        self.per_algorithm.insert(algorithm, id.to_string());
        self
    }

    /// Claim to be (or not be) a virtual machine.
    pub fn virtual_machine(mut self, vm: bool) -> Self {
        self.virtual_machine = vm;
        self
    }
}

impl DeviceIdentity for StaticDeviceIdentity {
    fn device_id(&self, algorithm: DeviceIdAlgorithm) -> Result<String> {
        Ok(self
            .per_algorithm
            .get(&algorithm)
            .unwrap_or(&self.id)
            .clone())
    }

    fn is_virtual_machine(&self) -> bool {
        self.virtual_machine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_id_is_stable() {
        let host = HostDeviceIdentity;
        let a = host.device_id(DeviceIdAlgorithm::Default).unwrap();
        let b = host.device_id(DeviceIdAlgorithm::Default).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_algorithms_differ() {
        let host = HostDeviceIdentity;
        assert_ne!(
            host.device_id(DeviceIdAlgorithm::Default).unwrap(),
            host.device_id(DeviceIdAlgorithm::Gen2).unwrap()
        );
    }

    #[test]
    fn test_static_identity() {
        let identity = StaticDeviceIdentity::new("dev-a")
            .with_algorithm(DeviceIdAlgorithm::Gen2, "dev-a2")
            .virtual_machine(true);
        assert_eq!(identity.device_id(DeviceIdAlgorithm::Default).unwrap(), "dev-a");
        assert_eq!(identity.device_id(DeviceIdAlgorithm::Gen2).unwrap(), "dev-a2");
        assert!(identity.is_virtual_machine());
    }
}
