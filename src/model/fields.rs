//! Custom fields and device variables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name/value pair attached to a license, either by the backend or as
/// local user data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: String,
}

impl CustomField {
    /// Create a field.
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Key/value pair set on the device and synchronized to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceVariable {
    /// Server-assigned id, zero until synchronized.
    pub id: u64,
    /// Lowercase variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
    /// Last time the backend recorded a change.
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceVariable {
    /// Create an unsynchronized variable. The name is lowercased.
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.trim().to_lowercase(),
            value: value.to_string(),
            ..Self::default()
        }
    }

    /// A variable without a name or value is never sent.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() || self.value.is_empty()
    }
}

/// Insert or replace a variable by name.
pub(crate) fn upsert_variable(vars: &mut Vec<DeviceVariable>, var: DeviceVariable) {
    match vars.iter_mut().find(|v| v.name == var.name) {
        Some(existing) => existing.value = var.value,
        None => vars.push(var),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name_is_lowercased() {
        let var = DeviceVariable::new(" Seat ", "A1");
        assert_eq!(var.name, "seat");
        assert!(!var.is_empty());
        assert!(DeviceVariable::new("seat", "").is_empty());
    }

    #[test]
    fn test_upsert_replaces_existing_value() {
        let mut vars = vec![DeviceVariable::new("seat", "A1")];
        upsert_variable(&mut vars, DeviceVariable::new("SEAT", "B2"));
        upsert_variable(&mut vars, DeviceVariable::new("room", "4"));
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].value, "B2");
    }
}
