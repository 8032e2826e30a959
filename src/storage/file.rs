//! File-based storage with advisory locking and atomic writes.
//!
//! The blob lives at `dirs::data_dir()/<namespace>/License.key` unless a
//! directory is given explicitly. Every operation holds an `fd-lock` on a
//! sibling `.lock` file, so engines in different processes never observe a
//! partial write. Writes go to a temp file that is renamed into place.

use super::LicenseStorage;
use crate::config::{EngineConfig, DEFAULT_LOCK_TIMEOUT, MIN_LOCK_TIMEOUT};
use crate::errors::{LicenseError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Default license file name.
pub const DEFAULT_FILE_NAME: &str = "License.key";

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// File-based storage backend.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    file_name: String,
    lock_timeout: Duration,
}

impl FileStorage {
    /// Storage under `dirs::data_dir()/<namespace>/`.
    pub fn new(namespace: &str) -> Result<Self> {
        let base_dir = dirs::data_dir()
            .ok_or_else(|| LicenseError::storage("Could not find data directory"))?;
        Self::with_path(base_dir.join(namespace))
    }

    /// Storage under the configured namespace, waiting
    /// `config.lock_timeout` for the lock.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(config.storage_namespace)?.configured(config))
    }

    /// Apply the engine configuration's lock timeout.
    pub fn configured(self, config: &EngineConfig) -> Self {
        self.lock_timeout(config.lock_timeout)
    }

    /// Storage in an explicit directory.
    pub fn with_path(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| LicenseError::storage(format!("Failed to create storage dir: {}", e)))?;
        Ok(Self {
            dir,
            file_name: DEFAULT_FILE_NAME.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Use a different file name inside the storage directory.
    pub fn file_name(mut self, name: &str) -> Self {
        self.file_name = name.to_string();
        self
    }

    /// How long to wait for the lock. Values below 50 ms are raised to 50 ms.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout.max(MIN_LOCK_TIMEOUT);
        self
    }

    /// Full path of the license file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.file_name))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}.tmp", self.file_name, std::process::id()))
    }

    /// Run `f` while holding the lock file in the given mode.
    fn with_lock<T>(&self, mode: LockMode, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| LicenseError::storage(format!("Failed to open lock file: {}", e)))?;
        let mut lock = fd_lock::RwLock::new(file);
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            let contended = match mode {
                LockMode::Exclusive => match lock.try_write() {
                    Ok(_guard) => return f(),
                    Err(e) => e,
                },
                LockMode::Shared => match lock.try_read() {
                    Ok(_guard) => return f(),
                    Err(e) => e,
                },
            };

            if contended.kind() != io::ErrorKind::WouldBlock {
                return Err(LicenseError::storage(format!(
                    "Failed to lock license file: {}",
                    contended
                )));
            }
            if Instant::now() >= deadline {
                return Err(LicenseError::storage(format!(
                    "Timed out after {}ms waiting for license file lock",
                    self.lock_timeout.as_millis()
                )));
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }
}

fn write_synced(path: &Path, blob: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(blob)?;
    file.sync_all()
}

impl LicenseStorage for FileStorage {
    fn save(&self, blob: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| LicenseError::storage(format!("Failed to create storage dir: {}", e)))?;

        self.with_lock(LockMode::Exclusive, || {
            let temp_path = self.temp_path();
            write_synced(&temp_path, blob)
                .map_err(|e| LicenseError::storage(format!("Failed to write temp file: {}", e)))?;
            fs::rename(&temp_path, self.path()).map_err(|e| {
                LicenseError::storage(format!("Failed to rename license file: {}", e))
            })
        })
    }

    fn load(&self) -> Result<Vec<u8>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        self.with_lock(LockMode::Shared, || match fs::read(self.path()) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(LicenseError::storage(format!(
                "Failed to read license file: {}",
                e
            ))),
        })
    }

    fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        self.with_lock(LockMode::Exclusive, || match fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::storage(format!(
                "Failed to delete license file: {}",
                e
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_file_storage_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_path(temp_dir.path()).unwrap();

        storage.save(b"encrypted-license").unwrap();
        assert_eq!(storage.load().unwrap(), b"encrypted-license");
        assert!(storage.path().ends_with(DEFAULT_FILE_NAME));
    }

    #[test]
    fn test_file_storage_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_path(temp_dir.path()).unwrap();
        assert!(storage.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_storage_clear() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_path(temp_dir.path()).unwrap();

        storage.save(b"blob").unwrap();
        storage.clear().unwrap();
        assert!(storage.load().unwrap().is_empty());
        assert!(!storage.path().exists());
        // Clearing twice is fine.
        storage.clear().unwrap();
    }

    #[test]
    fn test_file_storage_overwrite_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_path(temp_dir.path()).unwrap();

        storage.save(b"first").unwrap();
        storage.save(b"second").unwrap();
        assert_eq!(storage.load().unwrap(), b"second");

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_lock_timeout_is_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::with_path(temp_dir.path())
            .unwrap()
            .lock_timeout(Duration::from_millis(1));
        assert_eq!(storage.lock_timeout, MIN_LOCK_TIMEOUT);
    }

    #[test]
    fn test_configured_lock_timeout_applies() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = EngineConfig::new("demo");
        config.lock_timeout = Duration::from_millis(200);
        let storage = FileStorage::with_path(temp_dir.path())
            .unwrap()
            .configured(&config);
        assert_eq!(storage.lock_timeout, Duration::from_millis(200));

        // Another handle holds the lock for the whole attempt.
        let held = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(storage.lock_path())
            .unwrap();
        let mut other = fd_lock::RwLock::new(held);
        let _guard = other.try_write().unwrap();

        let started = Instant::now();
        let err = storage.save(b"blob").unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(err.kind, crate::errors::ErrorKind::Storage);
        assert!(err.message.contains("200ms"), "{}", err.message);
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(
            FileStorage::with_path(temp_dir.path())
                .unwrap()
                .lock_timeout(Duration::from_secs(10)),
        );

        let handles: Vec<_> = (0..4u8)
            .map(|n| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for _ in 0..10 {
                        storage.save(&[n; 256]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let blob = storage.load().unwrap();
        assert_eq!(blob.len(), 256);
        assert!(blob.iter().all(|b| *b == blob[0]));
    }
}
