//! In-memory storage.

use super::LicenseStorage;
use crate::errors::Result;
use std::sync::RwLock;

/// Keeps the blob in memory. Useful for tests and for applications that
/// persist the license themselves.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blob: RwLock<Vec<u8>>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LicenseStorage for MemoryStorage {
    fn save(&self, blob: &[u8]) -> Result<()> {
        *self.blob.write().unwrap_or_else(|e| e.into_inner()) = blob.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Vec<u8>> {
        Ok(self.blob.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn clear(&self) -> Result<()> {
        self.blob.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_roundtrip_and_clear() {
        let storage = MemoryStorage::new();
        assert!(storage.load().unwrap().is_empty());
        storage.save(b"blob").unwrap();
        assert_eq!(storage.load().unwrap(), b"blob");
        storage.clear().unwrap();
        assert!(storage.load().unwrap().is_empty());
    }
}
