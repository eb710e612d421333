//! unitctl is a minimal service supervisor. It reads systemd-style unit files,
//! launches the processes they describe, and tracks them in a small YAML registry
//! so that independent invocations can start, stop, restart and inspect the same
//! services. It stands in for `systemctl` in containers and CI images that run
//! without an init system.

/// CLI interface.
pub mod cli;

/// Supervisor configuration.
pub mod config;

/// Default paths and timings.
pub mod constants;

/// Error handling.
pub mod error;

/// Run-as user and group resolution.
pub mod identity;

/// Process spawning, liveness probing and termination.
pub mod process;

/// Persistent service registry.
pub mod state;

/// Lifecycle operations.
pub mod supervisor;

/// Unit file parsing.
pub mod unit;
