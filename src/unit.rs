//! Unit file parsing.
//!
//! Unit files are INI-like: `[Section]` headers followed by `Key=Value` lines. Only
//! the `[Service]` section is interpreted; everything else is skipped so that files
//! written for systemd (with `[Unit]` and `[Install]` sections) load unchanged.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use strum_macros::{AsRefStr, EnumString};
use tracing::{debug, warn};

use crate::{constants::UNIT_SUFFIX, error::UnitError};

static UNIT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9:_.@-]*$").expect("unit name pattern is valid")
});

/// Normalises a user-supplied service name to its canonical unit name, appending
/// `.service` when missing (`web` -> `web.service`).
pub fn canonical_name(name: &str) -> Result<String, UnitError> {
    let trimmed = name.trim();
    if !UNIT_NAME.is_match(trimmed) {
        return Err(UnitError::InvalidName(name.to_string()));
    }

    if trimmed.ends_with(UNIT_SUFFIX) {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}{UNIT_SUFFIX}"))
    }
}

/// Process start-up type from `Type=`. Every variant is tracked as `simple`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceType {
    #[default]
    Simple,
    Exec,
    Forking,
    Oneshot,
    Notify,
    Idle,
}

/// Restart policy from `Restart=`. Recorded only; restarts are manual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    OnFailure,
    Always,
}

/// Parsed contents of the `[Service]` section of a unit file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitDefinition {
    /// Command line from `ExecStart=`, run through `sh -c`.
    pub exec_command: Option<String>,
    /// Working directory from `WorkingDirectory=`.
    pub working_directory: Option<PathBuf>,
    /// Environment assignments in file order; later keys win when applied.
    pub environment: Vec<(String, String)>,
    /// Account to run as, from `User=`.
    pub user: Option<String>,
    /// Group to run as, from `Group=`.
    pub group: Option<String>,
    /// Start-up type from `Type=`.
    pub service_type: ServiceType,
    /// Restart policy from `Restart=`.
    pub restart_policy: RestartPolicy,
}

impl UnitDefinition {
    /// Reads and parses the unit file at `path`.
    pub fn parse(path: &Path) -> Result<Self, UnitError> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                UnitError::NotFound(path.to_path_buf())
            } else {
                UnitError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        debug!("Parsing unit file {}", path.display());
        Ok(Self::parse_str(&content))
    }

    /// Parses unit file contents already held in memory.
    pub fn parse_str(content: &str) -> Self {
        let mut unit = UnitDefinition::default();
        let mut section: Option<&str> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = Some(name.trim());
                continue;
            }

            if section != Some("Service") {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            unit.apply(key.trim(), value.trim());
        }

        unit
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "ExecStart" => {
                self.exec_command = (!value.is_empty()).then(|| value.to_string());
            }
            "WorkingDirectory" => {
                self.working_directory = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "Environment" => self.environment.extend(parse_environment(value)),
            "User" => self.user = (!value.is_empty()).then(|| value.to_string()),
            "Group" => self.group = (!value.is_empty()).then(|| value.to_string()),
            "Type" => match value.parse() {
                Ok(service_type) => self.service_type = service_type,
                Err(_) => warn!("Ignoring unsupported Type={value}"),
            },
            "Restart" => match value.parse() {
                Ok(policy) => self.restart_policy = policy,
                Err(_) => warn!("Ignoring unsupported Restart={value}"),
            },
            _ => debug!("Ignoring unrecognised key {key}"),
        }
    }

    /// Returns the `ExecStart` command or a config error naming `path`.
    pub fn require_exec(&self, path: &Path) -> Result<&str, UnitError> {
        self.exec_command
            .as_deref()
            .ok_or_else(|| UnitError::MissingExecStart(path.to_path_buf()))
    }
}

/// Splits an `Environment=` value into assignments.
///
/// Unquoted values are a single assignment, so `A=hello world` keeps the space.
/// Quoted values may carry several assignments: `"A=1" "B=2 3"`.
fn parse_environment(value: &str) -> Vec<(String, String)> {
    let words = if value.contains('"') {
        split_quoted(value)
    } else {
        vec![value.to_string()]
    };

    words
        .into_iter()
        .filter_map(|word| match word.split_once('=') {
            Some((key, val)) if !key.trim().is_empty() => {
                Some((key.trim().to_string(), val.to_string()))
            }
            _ => {
                warn!("Ignoring malformed Environment assignment '{word}'");
                None
            }
        })
        .collect()
}

fn split_quoted(value: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for ch in value.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    words.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }

    if pending {
        words.push(current);
    }
    words
}
