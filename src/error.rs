//! Error handling for unitctl.
use std::{io, path::PathBuf};

use strum_macros::AsRefStr;
use thiserror::Error;

/// Broad failure categories, each mapped to a stable process exit code so that
/// automation driving `unitctl` can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Unit file missing, unreadable, or lacking `ExecStart`; invalid unit name.
    Config,
    /// The service process could not be launched.
    Spawn,
    /// The registry could not be locked or persisted.
    State,
    /// A running service could not be signalled.
    Signal,
}

impl ErrorKind {
    /// Exit code reported by the binary for this kind of failure.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 3,
            ErrorKind::Spawn => 4,
            ErrorKind::State => 5,
            ErrorKind::Signal => 6,
        }
    }
}

/// Top-level error returned by every supervisor operation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Unit file or unit name problem.
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// Registry persistence problem.
    #[error(transparent)]
    State(#[from] StateError),

    /// Spawning or signalling problem.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl SupervisorError {
    /// Classifies the error for exit-code reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::Unit(_) => ErrorKind::Config,
            SupervisorError::State(_) => ErrorKind::State,
            SupervisorError::Process(ProcessError::Signal { .. }) => ErrorKind::Signal,
            SupervisorError::Process(_) => ErrorKind::Spawn,
        }
    }

    /// Exit code reported by the binary.
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}

/// Errors raised while locating or parsing unit files.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit file does not exist.
    #[error("Unit file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The unit file exists but could not be read.
    #[error("Failed to read unit file {}: {source}", path.display())]
    Read {
        /// Path of the unit file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The unit file has no usable `ExecStart=` line.
    #[error("No ExecStart defined in {}", .0.display())]
    MissingExecStart(PathBuf),

    /// The service name cannot be mapped to a unit file.
    #[error("Invalid unit name '{0}'")]
    InvalidName(String),
}

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading, writing or renaming the state file failed.
    #[error("State file I/O failed for {}: {source}", path.display())]
    Io {
        /// Path that was being accessed.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The registry could not be serialised.
    #[error("Failed to serialise registry: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// The advisory lock guarding the state file could not be taken.
    #[error("Failed to lock state file {}: {source}", path.display())]
    Lock {
        /// Path of the lock file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },
}

/// Errors raised by the process controller.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The command could not be launched.
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command line that failed to launch.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: io::Error,
    },

    /// The `User=`/`Group=` identity could not be applied.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The process exists but refused a signal.
    #[error("Failed to signal PID {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// The errno returned by `kill`.
        #[source]
        source: nix::errno::Errno,
    },
}

/// Errors raised while resolving a unit's run-as identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No passwd entry for the requested user.
    #[error("User '{0}' not found")]
    UserNotFound(String),

    /// No group entry for the requested group.
    #[error("Group '{0}' not found")]
    GroupNotFound(String),

    /// The passwd/group database lookup itself failed.
    #[error("Identity lookup failed: {0}")]
    Lookup(#[from] nix::errno::Errno),

    /// Switching identity requires root.
    #[error("Running as {target} requires unitctl to run as root")]
    NotPermitted {
        /// Human-readable description of the requested identity.
        target: String,
    },
}
