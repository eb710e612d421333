//! Constants and default values for unitctl.
//!
//! Paths, timings and file naming conventions shared by the supervisor, the state
//! store and the process controller live here.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Directory scanned for unit files when `--service-dir` is not given.
pub const DEFAULT_SERVICE_DIR: &str = "/etc/systemd/system";

/// Registry location when `--state-file` is not given.
pub const DEFAULT_STATE_FILE: &str = "/var/run/unitctl.yaml";

/// Suffix every unit file name (and registry key) carries.
pub const UNIT_SUFFIX: &str = ".service";

/// Suffix appended to the state file path to form its advisory lock file.
pub const STATE_LOCK_SUFFIX: &str = ".lock";

/// Suffix appended to the state file path for the temporary file used by atomic saves.
pub const STATE_TMP_SUFFIX: &str = ".tmp";

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Shell used to run `ExecStart` command lines.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Time a service gets to exit after `SIGTERM` before it is sent `SIGKILL`.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Interval between liveness probes while waiting out the grace period.
pub const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// Output Constants
// ============================================================================

/// Printed in place of a PID for services that are not running.
pub const PID_PLACEHOLDER: &str = "-";

/// Width of the UNIT column in `list-units` output.
pub const UNIT_COLUMN_WIDTH: usize = 25;

/// Width of the STATUS column in `list-units` output.
pub const STATUS_COLUMN_WIDTH: usize = 8;
