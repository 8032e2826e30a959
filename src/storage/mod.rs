//! Local persistence of the encrypted license blob.
//!
//! Storage deals only in opaque bytes; encoding and encryption live in
//! [`codec`]. Implementations must be callable from watchdog threads.

pub mod codec;
pub mod file;
pub mod memory;

use crate::errors::Result;

/// Persists one encrypted license blob.
pub trait LicenseStorage: Send + Sync {
    /// Replace the stored blob.
    fn save(&self, blob: &[u8]) -> Result<()>;

    /// Read the stored blob; empty when nothing is stored.
    fn load(&self) -> Result<Vec<u8>>;

    /// Remove the stored blob.
    fn clear(&self) -> Result<()>;
}

pub use file::FileStorage;
pub use memory::MemoryStorage;
