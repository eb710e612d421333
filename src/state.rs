//! Persistent registry of services and their last observed runtime state.
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Write},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use tracing::{debug, warn};

use crate::{
    constants::{STATE_LOCK_SUFFIX, STATE_TMP_SUFFIX, UNIT_SUFFIX},
    error::StateError,
    unit::canonical_name,
};

/// Persisted lifecycle state of a service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Inactive,
}

/// Runtime fact sheet for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    /// PID of the most recent spawn.
    pub pid: u32,
    /// Last known status. `Active` must be revalidated before it is trusted.
    pub status: ServiceStatus,
    /// `ExecStart` command last used or last seen by `daemon-reload`.
    #[serde(rename = "cmd")]
    pub command: String,
    /// Seconds since the Unix epoch of the last successful spawn.
    #[serde(default)]
    pub start_time: f64,
    /// Set by `daemon-reload` when the unit's command changed while active.
    #[serde(default, skip_serializing_if = "is_false")]
    pub config_changed: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ServiceRecord {
    /// Record for a process spawned just now.
    pub fn started(pid: u32, command: impl Into<String>) -> Self {
        Self {
            pid,
            status: ServiceStatus::Active,
            command: command.into(),
            start_time: now_epoch_secs(),
            config_changed: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }

    /// Whole seconds elapsed since `start_time`, clamped at zero.
    pub fn uptime_secs(&self) -> u64 {
        let elapsed = now_epoch_secs() - self.start_time;
        if elapsed.is_finite() && elapsed > 0.0 {
            elapsed as u64
        } else {
            0
        }
    }
}

/// Current wall-clock time as fractional seconds since the epoch.
pub fn now_epoch_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Mapping of canonical unit name to its record; serialised as a plain YAML map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Registry {
    services: BTreeMap<String, ServiceRecord>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&ServiceRecord> {
        self.services.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ServiceRecord> {
        self.services.get_mut(name)
    }

    /// Inserts or replaces the record for `name`.
    pub fn insert(&mut self, name: impl Into<String>, record: ServiceRecord) {
        self.services.insert(name.into(), record);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Records sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServiceRecord)> {
        self.services.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ServiceRecord)> {
        self.services.iter_mut()
    }

    /// Moves records keyed by a bare service name (`web`) to their canonical unit
    /// name (`web.service`). A bare key whose canonical key is already taken is left
    /// in place.
    fn adopt_bare_names(&mut self) {
        let bare: Vec<String> = self
            .services
            .keys()
            .filter(|name| !name.ends_with(UNIT_SUFFIX))
            .cloned()
            .collect();

        for name in bare {
            let Ok(canonical) = canonical_name(&name) else {
                warn!("Registry key '{name}' is not a valid unit name; leaving it untouched");
                continue;
            };
            if self.contains(&canonical) {
                warn!("Registry holds both '{name}' and '{canonical}'; keeping '{canonical}'");
                continue;
            }
            if let Some(record) = self.services.remove(&name) {
                debug!("Renaming registry key '{name}' to '{canonical}'");
                self.services.insert(canonical, record);
            }
        }
    }
}

/// Loads and saves the registry at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the YAML state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the advisory lock file guarding the state file.
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, STATE_LOCK_SUFFIX)
    }

    /// Reads the registry. Missing, unreadable or malformed files yield an empty
    /// registry; the latter two are logged.
    pub fn load(&self) -> Registry {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No state file at {}; starting empty", self.path.display());
                return Registry::default();
            }
            Err(err) => {
                warn!(
                    "Failed to read state file {}: {err}; treating registry as empty",
                    self.path.display()
                );
                return Registry::default();
            }
        };

        if contents.trim().is_empty() {
            return Registry::default();
        }

        match serde_yaml::from_str::<Registry>(&contents) {
            Ok(mut registry) => {
                registry.adopt_bare_names();
                registry
            }
            Err(err) => {
                warn!(
                    "State file {} is corrupt ({err}); treating registry as empty",
                    self.path.display()
                );
                Registry::default()
            }
        }
    }

    /// Atomically replaces the state file with `registry`, creating parent
    /// directories as needed.
    pub fn save(&self, registry: &Registry) -> Result<(), StateError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| StateError::Io { path, source }
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let serialized = serde_yaml::to_string(registry)?;
        let tmp_path = sibling(&self.path, STATE_TMP_SUFFIX);
        {
            let mut tmp = File::create(&tmp_path).map_err(io_err(&tmp_path))?;
            tmp.write_all(serialized.as_bytes())
                .map_err(io_err(&tmp_path))?;
            tmp.sync_all().map_err(io_err(&tmp_path))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;

        debug!(
            "Saved {} service record(s) to {}",
            registry.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Blocks until the exclusive advisory lock on the state file is held.
    pub fn lock(&self) -> Result<StateLock, StateError> {
        let path = self.lock_path();
        let lock_err = |source: io::Error| StateError::Lock {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        FileExt::lock_exclusive(&file).map_err(lock_err)?;

        debug!("Acquired state lock {}", path.display());
        Ok(StateLock { file, path })
    }

    /// Locks the state file and loads the registry under that lock.
    pub fn acquire(&self) -> Result<LockedRegistry<'_>, StateError> {
        let lock = self.lock()?;
        let registry = self.load();
        Ok(LockedRegistry {
            store: self,
            registry,
            _lock: lock,
        })
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Held advisory lock on the state file; released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("Failed to release state lock {}: {err}", self.path.display());
        }
    }
}

/// Registry loaded while the state lock is held.
#[derive(Debug)]
pub struct LockedRegistry<'a> {
    store: &'a StateStore,
    registry: Registry,
    _lock: StateLock,
}

impl LockedRegistry<'_> {
    /// Persists the registry without releasing the lock.
    pub fn commit(&self) -> Result<(), StateError> {
        self.store.save(&self.registry)
    }
}

impl Deref for LockedRegistry<'_> {
    type Target = Registry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

impl DerefMut for LockedRegistry<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.registry
    }
}
