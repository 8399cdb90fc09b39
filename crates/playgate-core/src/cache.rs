//! Durable per-identity session cache
//!
//! Holds startup credentials and startPlayback renewal data across process
//! restarts. There is no client-side expiry: entries are treated as valid
//! until the entitlement service explicitly rejects them, at which point the
//! orchestrator invalidates both entries together.

use crate::{Error, Identity, RenewalData, Result, StartupData};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Cache-key prefix for startup credentials
pub const STARTUP_PREFIX: &str = "startup";

/// Cache-key prefix for startPlayback renewal data
pub const RENEWAL_PREFIX: &str = "startplayback";

/// Key-value store for per-identity session credentials
pub trait SessionStore: Send + Sync {
    fn startup(&self, identity: &Identity) -> Result<Option<StartupData>>;
    fn put_startup(&self, identity: &Identity, data: &StartupData) -> Result<()>;
    fn renewal(&self, identity: &Identity) -> Result<Option<RenewalData>>;
    fn put_renewal(&self, identity: &Identity, data: &RenewalData) -> Result<()>;
    /// Clears both the startup and renewal entries for this identity
    fn invalidate(&self, identity: &Identity) -> Result<()>;
}

/// File-backed store, one JSON file per cache key.
///
/// Survives process restarts; the Rust counterpart of the browser's
/// localStorage entries.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = match fs::read_to_string(self.path(key)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Session data restored from previous session");
                Ok(Some(value))
            }
            Err(err) => {
                // A corrupt entry is a cache miss, not a fatal error
                warn!(key, error = %err, "Discarding unreadable cache entry");
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        fs::write(self.path(key), raw)?;
        debug!(key, "Session data cached");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl SessionStore for FileStore {
    fn startup(&self, identity: &Identity) -> Result<Option<StartupData>> {
        self.read(&identity.cache_key(STARTUP_PREFIX))
    }

    fn put_startup(&self, identity: &Identity, data: &StartupData) -> Result<()> {
        self.write(&identity.cache_key(STARTUP_PREFIX), data)
    }

    fn renewal(&self, identity: &Identity) -> Result<Option<RenewalData>> {
        self.read(&identity.cache_key(RENEWAL_PREFIX))
    }

    fn put_renewal(&self, identity: &Identity, data: &RenewalData) -> Result<()> {
        self.write(&identity.cache_key(RENEWAL_PREFIX), data)
    }

    fn invalidate(&self, identity: &Identity) -> Result<()> {
        self.remove(&identity.cache_key(STARTUP_PREFIX))?;
        self.remove(&identity.cache_key(RENEWAL_PREFIX))
    }
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Cache("memory store lock poisoned".into()))?;
        entries
            .get(key)
            .map(|raw| serde_json::from_str(raw).map_err(Error::from))
            .transpose()
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Cache("memory store lock poisoned".into()))?;
        entries.insert(key.to_string(), raw);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Cache("memory store lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn startup(&self, identity: &Identity) -> Result<Option<StartupData>> {
        self.read(&identity.cache_key(STARTUP_PREFIX))
    }

    fn put_startup(&self, identity: &Identity, data: &StartupData) -> Result<()> {
        self.write(&identity.cache_key(STARTUP_PREFIX), data)
    }

    fn renewal(&self, identity: &Identity) -> Result<Option<RenewalData>> {
        self.read(&identity.cache_key(RENEWAL_PREFIX))
    }

    fn put_renewal(&self, identity: &Identity, data: &RenewalData) -> Result<()> {
        self.write(&identity.cache_key(RENEWAL_PREFIX), data)
    }

    fn invalidate(&self, identity: &Identity) -> Result<()> {
        self.remove(&identity.cache_key(STARTUP_PREFIX))?;
        self.remove(&identity.cache_key(RENEWAL_PREFIX))
    }
}
