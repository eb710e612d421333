//! Configuration for a supervisor instance.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    constants::{DEFAULT_SERVICE_DIR, DEFAULT_STATE_FILE, GRACE_PERIOD},
    error::UnitError,
    unit::canonical_name,
};

/// Where unit files and the registry live, plus the termination grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Directory holding `<name>.service` files.
    pub service_dir: PathBuf,
    /// YAML registry file shared by every invocation.
    pub state_file: PathBuf,
    /// Time allowed between `SIGTERM` and `SIGKILL` on stop.
    pub grace_period: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            service_dir: PathBuf::from(DEFAULT_SERVICE_DIR),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            grace_period: GRACE_PERIOD,
        }
    }
}

impl SupervisorConfig {
    /// Builds a config from optional overrides, falling back to the defaults.
    pub fn new(service_dir: Option<PathBuf>, state_file: Option<PathBuf>) -> Self {
        let defaults = Self::default();
        Self {
            service_dir: service_dir.unwrap_or(defaults.service_dir),
            state_file: state_file.unwrap_or(defaults.state_file),
            grace_period: defaults.grace_period,
        }
    }

    /// Replaces the grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Path of the unit file for an already-canonical unit name.
    pub fn unit_path_for(&self, unit_name: &str) -> PathBuf {
        self.service_dir.join(unit_name)
    }

    /// Canonicalises `name` and returns it together with its unit file path.
    pub fn resolve_unit(&self, name: &str) -> Result<(String, PathBuf), UnitError> {
        let unit_name = canonical_name(name)?;
        let path = self.unit_path_for(&unit_name);
        Ok((unit_name, path))
    }

    pub fn service_dir(&self) -> &Path {
        &self.service_dir
    }
}
