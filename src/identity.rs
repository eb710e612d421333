//! Run-as identity for services declaring `User=` or `Group=`.
use std::{collections::HashMap, io, path::PathBuf};

#[cfg(target_os = "linux")]
use nix::unistd::getgrouplist;
use nix::unistd::{Gid, Group, Uid, User, getegid, geteuid};
#[cfg(target_os = "linux")]
use std::ffi::CString;
use tracing::debug;

use crate::error::IdentityError;

/// Target user and group a service should assume before `exec`.
///
/// The default value means "inherit the supervisor's identity".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    uid: Option<Uid>,
    gid: Option<Gid>,
    username: Option<String>,
    home: Option<PathBuf>,
    shell: Option<PathBuf>,
}

impl Identity {
    /// Resolves `User=`/`Group=` names against the passwd and group databases.
    ///
    /// Names that resolve to the supervisor's own uid/gid need no switch. Any other
    /// target requires the supervisor to run as root.
    pub fn resolve(user: Option<&str>, group: Option<&str>) -> Result<Self, IdentityError> {
        let mut identity = Identity::default();

        if let Some(name) = user {
            let entry = User::from_name(name)?
                .ok_or_else(|| IdentityError::UserNotFound(name.to_string()))?;
            identity.uid = Some(entry.uid);
            identity.gid = Some(entry.gid);
            identity.username = Some(entry.name);
            identity.home = Some(entry.dir);
            identity.shell = Some(entry.shell);
        }

        if let Some(name) = group {
            let entry = Group::from_name(name)?
                .ok_or_else(|| IdentityError::GroupNotFound(name.to_string()))?;
            identity.gid = Some(entry.gid);
        }

        if identity.requires_switch() && !geteuid().is_root() {
            return Err(IdentityError::NotPermitted {
                target: identity.describe(user, group),
            });
        }

        Ok(identity)
    }

    /// True when the child must change uid or gid before `exec`.
    pub fn requires_switch(&self) -> bool {
        self.uid.is_some_and(|uid| uid != geteuid())
            || self.gid.is_some_and(|gid| gid != getegid())
    }

    /// Environment variables aligned with the target account (`HOME`, `USER`,
    /// `LOGNAME`, `SHELL`). Empty unless a user switch is requested.
    pub fn env_overrides(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if !self.requires_switch() {
            return env;
        }
        if let Some(home) = &self.home {
            env.insert("HOME".to_string(), home.display().to_string());
        }
        if let Some(username) = &self.username {
            env.insert("USER".to_string(), username.clone());
            env.insert("LOGNAME".to_string(), username.clone());
        }
        if let Some(shell) = &self.shell {
            env.insert("SHELL".to_string(), shell.display().to_string());
        }
        env
    }

    /// Prepared form of this identity for use between `fork` and `exec`, where
    /// allocation and database lookups must not happen.
    pub fn prepare(&self) -> Result<PreparedIdentity, IdentityError> {
        if !self.requires_switch() {
            return Ok(PreparedIdentity::default());
        }

        let gid = self.gid.unwrap_or_else(getegid);
        let groups = match &self.username {
            Some(name) if self.uid.is_some() => supplementary_groups(name, gid)?,
            _ => vec![gid.as_raw()],
        };

        debug!(
            "Service will run as uid={:?} gid={} groups={:?}",
            self.uid.map(Uid::as_raw),
            gid.as_raw(),
            groups
        );

        Ok(PreparedIdentity {
            uid: self.uid,
            gid: self.gid,
            groups,
        })
    }

    fn describe(&self, user: Option<&str>, group: Option<&str>) -> String {
        match (user, group) {
            (Some(user), Some(group)) => format!("{user}:{group}"),
            (Some(user), None) => user.to_string(),
            (None, Some(group)) => format!(":{group}"),
            (None, None) => String::from("current user"),
        }
    }
}

#[cfg(target_os = "linux")]
fn supplementary_groups(name: &str, gid: Gid) -> Result<Vec<libc::gid_t>, IdentityError> {
    let name = CString::new(name).map_err(|_| IdentityError::UserNotFound(name.to_string()))?;
    let groups = getgrouplist(&name, gid)?;
    Ok(groups.into_iter().map(Gid::as_raw).collect())
}

#[cfg(not(target_os = "linux"))]
fn supplementary_groups(_name: &str, gid: Gid) -> Result<Vec<libc::gid_t>, IdentityError> {
    Ok(vec![gid.as_raw()])
}

/// Identity switch with everything pre-allocated for the `pre_exec` hook.
#[derive(Debug, Default)]
pub struct PreparedIdentity {
    uid: Option<Uid>,
    gid: Option<Gid>,
    groups: Vec<libc::gid_t>,
}

impl PreparedIdentity {
    /// Applies supplementary groups, gid and uid in that order.
    ///
    /// # Safety
    /// Call only in the child between `fork` and `exec`. Running it in the
    /// supervisor would change the supervisor's own credentials.
    pub unsafe fn apply(&self) -> io::Result<()> {
        if self.uid.is_none() && self.gid.is_none() {
            return Ok(());
        }

        if !self.groups.is_empty() {
            #[cfg(target_os = "linux")]
            let len = self.groups.len() as libc::size_t;
            #[cfg(not(target_os = "linux"))]
            let len = self.groups.len() as libc::c_int;
            if unsafe { libc::setgroups(len, self.groups.as_ptr()) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }

        if let Some(gid) = self.gid
            && unsafe { libc::setgid(gid.as_raw()) } != 0
        {
            return Err(io::Error::last_os_error());
        }

        if let Some(uid) = self.uid
            && unsafe { libc::setuid(uid.as_raw()) } != 0
        {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}
