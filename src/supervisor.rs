//! Lifecycle operations over the registry of unit-file services.
//!
//! Every public operation takes the state lock, loads the registry, does its work
//! and persists before returning, so concurrent invocations against the same state
//! file serialise instead of losing each other's updates.
use std::{
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::SupervisorConfig,
    constants::{PID_PLACEHOLDER, STATUS_COLUMN_WIDTH, UNIT_COLUMN_WIDTH, UNIT_SUFFIX},
    error::{ProcessError, SupervisorError},
    identity::Identity,
    process::ProcessController,
    state::{LockedRegistry, Registry, ServiceRecord, ServiceStatus, StateStore},
    unit::{ServiceType, UnitDefinition},
};

/// Result of `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new process was spawned and recorded.
    Started { unit: String, pid: u32 },
    /// The recorded process is still alive; nothing was spawned.
    AlreadyActive { unit: String, pid: u32 },
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            StartOutcome::Started { pid, .. } | StartOutcome::AlreadyActive { pid, .. } => {
                *pid
            }
        }
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { unit, pid } => write!(f, "Started {unit} (PID: {pid})"),
            StartOutcome::AlreadyActive { unit, pid } => {
                write!(f, "{unit} is already active (PID: {pid})")
            }
        }
    }
}

/// Result of `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// The record was marked inactive (after terminating its process if needed).
    Stopped { unit: String },
    /// The service has never been started.
    NotRunning { unit: String },
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Stopped { unit } => write!(f, "Stopped {unit}"),
            StopOutcome::NotRunning { unit } => write!(f, "Service {unit} is not running"),
        }
    }
}

/// Result of `restart`: the stop half followed by the start half.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartOutcome {
    pub stop: StopOutcome,
    pub start: StartOutcome,
}

impl fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.stop)?;
        write!(f, "{}", self.start)
    }
}

/// Reconciled view of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub unit: String,
    pub status: ServiceStatus,
    /// `None` while inactive.
    pub pid: Option<u32>,
    pub command: String,
    pub uptime_secs: u64,
    pub config_changed: bool,
}

/// Result of `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatusReport {
    /// The service is not in the registry.
    NotFound { unit: String },
    /// The registry knows the service.
    Known(UnitStatus),
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            StatusReport::NotFound { unit } => return write!(f, "● {unit} - not found"),
            StatusReport::Known(status) => status,
        };

        let active = status.status == ServiceStatus::Active;
        let symbol = if active { "●" } else { "○" };
        writeln!(f, "{symbol} {}", status.unit)?;
        writeln!(
            f,
            "   Active: {} (PID: {})",
            status.status.as_ref(),
            display_pid(status.pid)
        )?;
        writeln!(f, "   Command: {}", status.command)?;
        write!(f, "   Uptime: {} seconds", status.uptime_secs)?;
        if status.config_changed && active {
            write!(
                f,
                "\n   Warning: unit file changed on disk; restart to apply"
            )?;
        }
        Ok(())
    }
}

/// One row of `list-units`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitRow {
    pub unit: String,
    pub status: ServiceStatus,
    pub pid: Option<u32>,
}

/// Result of `list-units`, sorted by unit name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitListing {
    pub units: Vec<UnitRow>,
}

impl fmt::Display for UnitListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<uw$} {:<sw$} PID",
            "UNIT",
            "STATUS",
            uw = UNIT_COLUMN_WIDTH + 1,
            sw = STATUS_COLUMN_WIDTH
        )?;
        write!(f, "{}", "-".repeat(44))?;
        for row in &self.units {
            write!(
                f,
                "\n{:<uw$} {:<sw$} {}",
                row.unit,
                row.status.as_ref(),
                display_pid(row.pid),
                uw = UNIT_COLUMN_WIDTH,
                sw = STATUS_COLUMN_WIDTH
            )?;
        }
        Ok(())
    }
}

/// Result of `daemon-reload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    /// Unit files found in the service directory.
    pub scanned: usize,
    /// Registry records whose command was refreshed.
    pub updated: usize,
    /// Active units whose unit file command differs from the running one.
    pub pending_restart: Vec<String>,
}

impl fmt::Display for ReloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scanned {} unit file(s); reloaded configuration for {} service(s)",
            self.scanned, self.updated
        )?;
        if !self.pending_restart.is_empty() {
            write!(f, "\n\nThe following units may need to be restarted:")?;
            for unit in &self.pending_restart {
                write!(f, "\n  {unit}")?;
            }
            write!(
                f,
                "\n\nYou can use 'unitctl restart <unit>' to restart units"
            )?;
        }
        Ok(())
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map(|pid| pid.to_string())
        .unwrap_or_else(|| PID_PLACEHOLDER.to_string())
}

/// Implements `start`, `stop`, `restart`, `status`, `list-units` and
/// `daemon-reload` against one service directory and state file.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: SupervisorConfig,
    store: StateStore,
    controller: ProcessController,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_controller(config, ProcessController::default())
    }

    pub fn with_controller(config: SupervisorConfig, controller: ProcessController) -> Self {
        let store = StateStore::new(config.state_file.clone());
        Self {
            config,
            store,
            controller,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Spawns the service described by `<service-dir>/<name>.service`.
    ///
    /// A service whose recorded process is still alive is left alone.
    pub fn start(&self, name: &str) -> Result<StartOutcome, SupervisorError> {
        let (unit_name, path) = self.config.resolve_unit(name)?;
        let mut registry = self.store.acquire()?;
        self.start_locked(&mut registry, &unit_name, &path)
    }

    /// Terminates the service's process and marks it inactive.
    pub fn stop(&self, name: &str) -> Result<StopOutcome, SupervisorError> {
        let (unit_name, _) = self.config.resolve_unit(name)?;
        let mut registry = self.store.acquire()?;
        self.stop_locked(&mut registry, &unit_name)
    }

    /// Stops then starts the service under a single lock.
    pub fn restart(&self, name: &str) -> Result<RestartOutcome, SupervisorError> {
        let (unit_name, path) = self.config.resolve_unit(name)?;
        let mut registry = self.store.acquire()?;
        let stop = self.stop_locked(&mut registry, &unit_name)?;
        let start = self.start_locked(&mut registry, &unit_name, &path)?;
        Ok(RestartOutcome { stop, start })
    }

    /// Reports the reconciled status of one service.
    pub fn status(&self, name: &str) -> Result<StatusReport, SupervisorError> {
        let (unit_name, _) = self.config.resolve_unit(name)?;
        let mut registry = self.store.acquire()?;

        let Some(record) = registry.get_mut(&unit_name) else {
            return Ok(StatusReport::NotFound { unit: unit_name });
        };

        let downgraded = self.reconcile(&unit_name, record);
        let report = StatusReport::Known(UnitStatus {
            unit: unit_name.clone(),
            status: record.status,
            pid: record.is_active().then_some(record.pid),
            command: record.command.clone(),
            uptime_secs: record.uptime_secs(),
            config_changed: record.config_changed,
        });

        if downgraded {
            registry.commit()?;
        }
        Ok(report)
    }

    /// Reconciles every record and lists them.
    pub fn list_units(&self) -> Result<UnitListing, SupervisorError> {
        let mut registry = self.store.acquire()?;
        self.reconcile_all(&mut registry);

        let units = registry
            .iter()
            .map(|(unit, record)| UnitRow {
                unit: unit.clone(),
                status: record.status,
                pid: record.is_active().then_some(record.pid),
            })
            .collect();

        registry.commit()?;
        Ok(UnitListing { units })
    }

    /// Re-reads every unit file, refreshing recorded commands and flagging
    /// active services whose command changed.
    pub fn daemon_reload(&self) -> Result<ReloadSummary, SupervisorError> {
        let mut registry = self.store.acquire()?;
        self.reconcile_all(&mut registry);

        let unit_files = self.unit_files();
        info!(
            "Reloading {} unit file(s) from {}",
            unit_files.len(),
            self.config.service_dir().display()
        );

        let mut updated = 0;
        for (unit_name, path) in &unit_files {
            let unit = match UnitDefinition::parse(path) {
                Ok(unit) => unit,
                Err(err) => {
                    warn!("Failed to parse unit file {}: {err}", path.display());
                    continue;
                }
            };
            let Some(command) = unit.exec_command else {
                warn!("Skipping {unit_name}: no ExecStart defined");
                continue;
            };
            let Some(record) = registry.get_mut(unit_name) else {
                debug!("{unit_name} has never been started; nothing to refresh");
                continue;
            };

            if record.is_active() && record.command != command {
                info!("{unit_name} command changed on disk; restart required to apply");
                record.config_changed = true;
            }
            record.command = command;
            updated += 1;
        }

        registry.commit()?;

        let pending_restart = registry
            .iter()
            .filter(|(_, record)| record.is_active() && record.config_changed)
            .map(|(unit, _)| unit.clone())
            .collect();

        Ok(ReloadSummary {
            scanned: unit_files.len(),
            updated,
            pending_restart,
        })
    }

    fn start_locked(
        &self,
        registry: &mut LockedRegistry<'_>,
        unit_name: &str,
        path: &Path,
    ) -> Result<StartOutcome, SupervisorError> {
        let unit = UnitDefinition::parse(path)?;
        let command = unit.require_exec(path)?.to_string();
        if unit.service_type != ServiceType::Simple {
            warn!(
                "{unit_name} declares Type={}; tracking it as a simple service",
                unit.service_type.as_ref()
            );
        }

        if let Some(record) = registry.get_mut(unit_name)
            && record.is_active()
        {
            if self.controller.is_alive(record.pid) {
                info!("{unit_name} already running with PID {}", record.pid);
                return Ok(StartOutcome::AlreadyActive {
                    unit: unit_name.to_string(),
                    pid: record.pid,
                });
            }
            self.reconcile(unit_name, record);
            registry.commit()?;
        }

        let identity = Identity::resolve(unit.user.as_deref(), unit.group.as_deref())
            .map_err(ProcessError::from)?;
        let pid = self.controller.spawn(&unit, &identity)?;

        registry.insert(unit_name, ServiceRecord::started(pid, command));
        registry.commit()?;

        Ok(StartOutcome::Started {
            unit: unit_name.to_string(),
            pid,
        })
    }

    fn stop_locked(
        &self,
        registry: &mut LockedRegistry<'_>,
        unit_name: &str,
    ) -> Result<StopOutcome, SupervisorError> {
        let Some(record) = registry.get_mut(unit_name) else {
            return Ok(StopOutcome::NotRunning {
                unit: unit_name.to_string(),
            });
        };

        if record.is_active() {
            info!("Stopping {unit_name} (PID {})", record.pid);
            self.controller
                .terminate(record.pid, self.config.grace_period)?;
        } else {
            // The PID may since have been reused by an unrelated process.
            debug!("{unit_name} already inactive; not signalling PID {}", record.pid);
        }

        record.status = ServiceStatus::Inactive;
        registry.commit()?;

        Ok(StopOutcome::Stopped {
            unit: unit_name.to_string(),
        })
    }

    /// Downgrades `record` to inactive when its process is gone. Returns whether the
    /// record changed.
    fn reconcile(&self, unit_name: &str, record: &mut ServiceRecord) -> bool {
        if record.is_active() && !self.controller.is_alive(record.pid) {
            info!(
                "{unit_name} (PID {}) is no longer running; marking inactive",
                record.pid
            );
            record.status = ServiceStatus::Inactive;
            true
        } else {
            false
        }
    }

    fn reconcile_all(&self, registry: &mut Registry) {
        let mut downgraded = 0;
        for (unit_name, record) in registry.iter_mut() {
            if self.reconcile(unit_name, record) {
                downgraded += 1;
            }
        }
        if downgraded > 0 {
            debug!("Reconciled {downgraded} stale record(s)");
        }
    }

    /// `*.service` files in the service directory, sorted by name.
    fn unit_files(&self) -> Vec<(String, PathBuf)> {
        let dir = self.config.service_dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("Service directory {} not found", dir.display());
                return Vec::new();
            }
            Err(err) => {
                warn!("Failed to read service directory {}: {err}", dir.display());
                return Vec::new();
            }
        };

        let mut files: Vec<_> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let path = entry.path();
                (name.ends_with(UNIT_SUFFIX) && path.is_file()).then_some((name, path))
            })
            .collect();
        files.sort();
        files
    }
}
