//! Spawning job processes.
//!
//! A job process runs in its own process group (so a cancel can reach every
//! descendant), with stdin closed and stdout/stderr appended to the job log.
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use crawld_model::JobEnv;
use tokio::process::Child;
use tracing::{debug, trace};

use crate::{
    error::{ExecError, ExecResult},
    util::cmd_program,
    utils::limits::{RlimitConfig, attach_rlimits},
};

/// Everything needed to start one job process.
#[derive(Clone, Debug, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: JobEnv,
    /// Working directory; `None` inherits the daemon's.
    pub cwd: Option<PathBuf>,
    /// File receiving both stdout and stderr. Parent directories are created.
    pub log_path: PathBuf,
    pub rlimits: RlimitConfig,
}

/// A started child and its pid (which is also its process group id).
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: u32,
    pub child: Child,
}

/// Start the process described by `spec`. Does not wait for it.
pub fn spawn(spec: &ProcessSpec) -> ExecResult<SpawnedProcess> {
    if spec.program.trim().is_empty() {
        return Err(ExecError::MissingProgram);
    }

    let stdout = open_log(&spec.log_path)?;
    let stderr = stdout.try_clone()?;

    let mut cmd = cmd_program(&spec.program, &spec.args);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for kv in spec.env.iter() {
        cmd.env(kv.key(), kv.value());
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(stdout));
    cmd.stderr(Stdio::from(stderr));
    #[cfg(unix)]
    cmd.process_group(0);
    attach_rlimits(&mut cmd, &spec.rlimits);

    trace!(target: "crawld.exec.proc", program = %spec.program, args = ?spec.args, "spawn");
    let child = cmd
        .spawn()
        .map_err(|e| ExecError::Spawn(format!("{}: {e}", spec.program)))?;
    let pid = child
        .id()
        .ok_or_else(|| ExecError::Spawn("child was reaped before its pid was read".into()))?;

    debug!(target: "crawld.exec.proc", pid, log = %spec.log_path.display(), "process started");
    Ok(SpawnedProcess { pid, child })
}

/// Wait for `child` and translate its status into an exit code.
///
/// A child killed by a signal reports `128 + signal`, as a shell would.
pub async fn exit_code(child: &mut Child) -> ExecResult<i32> {
    let status = child.wait().await?;
    Ok(status_code(status))
}

fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    255
}

fn open_log(path: &Path) -> ExecResult<File> {
    let log_err = |e: std::io::Error| ExecError::LogFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(log_err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_err)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::util::signal_group;

    fn sh(script: &str, log_path: PathBuf) -> ProcessSpec {
        ProcessSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            log_path,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("shop").join("products").join("job.log");

        let mut spawned = spawn(&sh("echo hello; echo oops >&2; exit 3", log.clone())).unwrap();
        assert!(spawned.pid > 0);
        assert_eq!(exit_code(&mut spawned.child).await.unwrap(), 3);

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("oops"));
    }

    #[tokio::test]
    async fn passes_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("env.log");
        let mut spec = sh("printf '%s %s' \"$CRAWLD_JOB\" \"$(pwd)\"", log.clone());
        spec.env.push("CRAWLD_JOB", "job-7");
        spec.cwd = Some(dir.path().to_path_buf());

        let mut spawned = spawn(&spec).unwrap();
        assert_eq!(exit_code(&mut spawned.child).await.unwrap(), 0);

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.starts_with("job-7 "));
    }

    #[tokio::test]
    async fn signalled_group_reports_128_plus_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut spawned = spawn(&sh("sleep 30", dir.path().join("sleep.log"))).unwrap();

        signal_group(spawned.pid, libc::SIGTERM).unwrap();
        let code = exit_code(&mut spawned.child).await.unwrap();
        assert_eq!(code, 128 + libc::SIGTERM);
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ProcessSpec {
            program: "/definitely/not/a/real/binary".to_string(),
            log_path: dir.path().join("missing.log"),
            ..Default::default()
        };

        let err = spawn(&spec).unwrap_err();
        assert!(matches!(err, ExecError::Spawn(_)));
    }

    #[test]
    fn empty_program_is_rejected() {
        let spec = ProcessSpec::default();
        assert!(matches!(spawn(&spec), Err(ExecError::MissingProgram)));
    }
}
