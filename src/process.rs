//! Spawning, probing and terminating service processes.
use std::{
    cmp,
    os::unix::process::CommandExt,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{WaitPidFlag, waitpid},
    },
    unistd::{Pid, getpgid, getpgrp},
};
use tracing::{debug, info, warn};

use crate::{
    constants::{DEFAULT_SHELL, SHELL_COMMAND_FLAG, TERMINATE_POLL_INTERVAL},
    error::ProcessError,
    identity::Identity,
    unit::UnitDefinition,
};

/// Number of short probes made after `SIGKILL` while waiting for the kernel to
/// tear the process down.
const KILL_SETTLE_CHECKS: usize = 20;
const KILL_SETTLE_INTERVAL: Duration = Duration::from_millis(25);

/// Launches service processes and manages their termination.
#[derive(Debug, Clone)]
pub struct ProcessController {
    poll_interval: Duration,
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new(TERMINATE_POLL_INTERVAL)
    }
}

impl ProcessController {
    /// Creates a controller that polls liveness every `poll_interval` while
    /// waiting for a terminated process to exit.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Launches the unit's `ExecStart` through `sh -c` and returns its PID.
    ///
    /// The child gets its own session so it outlives this invocation, inherits the
    /// supervisor's environment overlaid with the identity overrides and then the
    /// unit's `Environment=` pairs, and has its standard streams on `/dev/null`.
    /// The child is never waited on.
    pub fn spawn(
        &self,
        unit: &UnitDefinition,
        identity: &Identity,
    ) -> Result<u32, ProcessError> {
        let command = unit.exec_command.as_deref().ok_or_else(|| ProcessError::Spawn {
            command: String::new(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "unit has no ExecStart",
            ),
        })?;

        debug!("Launching `{command}`");

        let mut cmd = Command::new(DEFAULT_SHELL);
        cmd.arg(SHELL_COMMAND_FLAG).arg(command);
        if let Some(dir) = &unit.working_directory {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        for (key, value) in identity.env_overrides() {
            cmd.env(key, value);
        }
        if !unit.environment.is_empty() {
            let keys: Vec<_> = unit.environment.iter().map(|(key, _)| key).collect();
            debug!("Setting environment variables: {:?}", keys);
            for (key, value) in &unit.environment {
                cmd.env(key, value);
            }
        }

        let prepared = identity.prepare()?;
        unsafe {
            cmd.pre_exec(move || {
                // New session: the service is detached from the invoking terminal
                // and leads its own process group.
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                prepared.apply()
            });
        }

        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id();
                info!("Spawned `{command}` with PID {pid}");
                Ok(pid)
            }
            Err(source) => {
                warn!("Failed to spawn `{command}`: {source}");
                Err(ProcessError::Spawn {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }

    /// Probes `pid` with signal 0.
    ///
    /// "No such process" means dead, "permission denied" means the process exists
    /// under another identity. Zombies count as dead, and exited children of this
    /// process are reaped first.
    pub fn is_alive(&self, pid: u32) -> bool {
        let Some(target) = as_pid(pid) else {
            return false;
        };

        reap(target);

        match signal::kill(target, None) {
            Ok(()) => !is_zombie(pid),
            Err(Errno::EPERM) => true,
            Err(Errno::ESRCH) => false,
            Err(err) => {
                warn!("Unexpected error probing PID {pid}: {err}");
                false
            }
        }
    }

    /// Sends `SIGTERM`, waits up to `timeout` for the process to exit, then
    /// escalates to `SIGKILL`.
    ///
    /// A process that is already gone is not an error.
    pub fn terminate(&self, pid: u32, timeout: Duration) -> Result<(), ProcessError> {
        let Some(target) = as_pid(pid) else {
            return Ok(());
        };

        if !self.is_alive(pid) {
            debug!("PID {pid} already exited; nothing to terminate");
            return Ok(());
        }

        debug!("Sending SIGTERM to PID {pid}");
        send_signal(target, Signal::SIGTERM)?;

        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive(pid) {
                debug!("PID {pid} exited after SIGTERM");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(cmp::min(self.poll_interval, deadline - now));
        }

        warn!(
            "PID {pid} did not exit within {:.1}s of SIGTERM; sending SIGKILL",
            timeout.as_secs_f64()
        );
        send_signal(target, Signal::SIGKILL)?;

        for _ in 0..KILL_SETTLE_CHECKS {
            if !self.is_alive(pid) {
                return Ok(());
            }
            thread::sleep(KILL_SETTLE_INTERVAL);
        }

        warn!("PID {pid} still present after SIGKILL");
        Ok(())
    }
}

/// Converts a recorded PID into a signal target, rejecting values that would
/// address a process group or every process (`0`, negatives after conversion).
fn as_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

fn reap(target: Pid) {
    // ECHILD for processes that are not our children; that is expected.
    let _ = waitpid(target, Some(WaitPidFlag::WNOHANG));
}

/// Signals the process group led by `target` (if it leads one separate from ours)
/// and then `target` itself.
fn send_signal(target: Pid, sig: Signal) -> Result<(), ProcessError> {
    if let Ok(pgid) = getpgid(Some(target))
        && pgid == target
        && pgid != getpgrp()
    {
        match signal::killpg(pgid, sig) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(Errno::EPERM) => warn!(
                "Insufficient permissions to signal process group {pgid}; falling back to direct signal"
            ),
            Err(err) => warn!("Failed to signal process group {pgid}: {err}"),
        }
    }

    match signal::kill(target, sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(ProcessError::Signal {
            pid: target.as_raw() as u32,
            source,
        }),
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };

    // The state field follows the parenthesised command name, which may itself
    // contain spaces or parentheses.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
        .is_some_and(|state| state == 'Z' || state == 'X')
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
