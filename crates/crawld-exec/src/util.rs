use tokio::process::Command;

use crate::error::{ExecError, ExecResult};

pub fn cmd_program(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.iter().map(|s| s.as_str()));
    cmd
}

/// Send `signal` to every process in the group led by `pid`.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: i32) -> ExecResult<()> {
    let pgid = libc::pid_t::try_from(pid).map_err(|_| ExecError::Signal(format!("pid {pid} out of range")))?;
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc != 0 {
        return Err(ExecError::Signal(std::io::Error::last_os_error().to_string()));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn signal_group(_pid: u32, _signal: i32) -> ExecResult<()> {
    Err(ExecError::Signal(
        "process groups are not supported on this platform".into(),
    ))
}

/// Parse `TERM`, `SIGTERM` or `15` style signal names.
#[cfg(unix)]
pub fn parse_signal(name: &str) -> ExecResult<i32> {
    let norm = name.trim().to_ascii_uppercase();
    if let Ok(n) = norm.parse::<i32>() {
        return Ok(n);
    }
    let short = norm.strip_prefix("SIG").unwrap_or(&norm);
    match short {
        "TERM" => Ok(libc::SIGTERM),
        "INT" => Ok(libc::SIGINT),
        "KILL" => Ok(libc::SIGKILL),
        "HUP" => Ok(libc::SIGHUP),
        "QUIT" => Ok(libc::SIGQUIT),
        "USR1" => Ok(libc::SIGUSR1),
        "USR2" => Ok(libc::SIGUSR2),
        _ => Err(ExecError::UnknownSignal(name.to_string())),
    }
}

#[cfg(not(unix))]
pub fn parse_signal(name: &str) -> ExecResult<i32> {
    Err(ExecError::UnknownSignal(name.to_string()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!(parse_signal("TERM").unwrap(), libc::SIGTERM);
        assert_eq!(parse_signal("sigint").unwrap(), libc::SIGINT);
        assert_eq!(parse_signal(" SIGKILL ").unwrap(), libc::SIGKILL);
        assert_eq!(parse_signal("15").unwrap(), 15);
        assert!(matches!(parse_signal("BOGUS"), Err(ExecError::UnknownSignal(_))));
    }

    #[test]
    fn signalling_a_missing_group_fails() {
        // pid_t max is never a live process group in a test environment.
        assert!(signal_group(i32::MAX as u32, libc::SIGTERM).is_err());
    }
}
