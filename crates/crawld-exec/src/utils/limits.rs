//! POSIX rlimits for job processes.
//!
//! On Unix the limits are applied in a `pre_exec` hook, i.e. in the child
//! after `fork()` and before `execve()`, so a spider never runs unrestricted.
//! Elsewhere a non-empty configuration only produces a warning.
use serde::{Deserialize, Serialize};
use tokio::process::Command;
#[cfg(not(unix))]
use tracing::warn;

/// Resource limits for one job process. `None` leaves the inherited limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,

    /// `RLIMIT_FSIZE`, in bytes. Growing a file past it delivers `SIGXFSZ`,
    /// which shows up as exit code `128 + SIGXFSZ` in the finished job.
    pub max_file_size_bytes: Option<u64>,

    /// `RLIMIT_CORE = 0` when set.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none()
            && !self.disable_core_dumps
            && self.max_file_size_bytes.is_none()
    }
}

/// Install `config` on `cmd`. No-op for an empty config.
pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    #[cfg(unix)]
    {
        unix_impl::attach_rlimits(cmd, config);
    }

    #[cfg(not(unix))]
    {
        let _ = cmd;
        warn!(
            target: "crawld.exec.limits",
            ?config,
            "rlimits requested on a non-Unix OS; ignoring them"
        );
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::RlimitConfig;

    use std::io;

    use tokio::process::Command;

    pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
        let max_file_size_bytes = config.max_file_size_bytes;
        let max_open_files = config.max_open_files;
        let disable_core_dumps = config.disable_core_dumps;

        // SAFETY: the hook only calls async-signal-safe `setrlimit`.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(nofile) = max_open_files {
                    apply_rlimit(libc::RLIMIT_NOFILE, nofile)?;
                }
                if let Some(fsize) = max_file_size_bytes {
                    apply_rlimit(libc::RLIMIT_FSIZE, fsize)?;
                }
                if disable_core_dumps {
                    apply_rlimit(libc::RLIMIT_CORE, 0)?;
                }
                Ok(())
            });
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    fn apply_rlimit(resource: Resource, value: u64) -> io::Result<()> {
        let rlim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };

        let rc = unsafe { libc::setrlimit(resource, &rlim) };
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
