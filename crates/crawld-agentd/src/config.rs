use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use crawld_core::{LauncherConfig, PackageConfig, PollerConfig, RunnerConfig};
use crawld_observe::LoggerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration file. Every section and field is optional.
///
/// ```yaml
/// http:
///   bind: 0.0.0.0:6800
///   username: ops
///   password: change-me
/// queue:
///   dbs_dir: /var/lib/crawld/dbs
///   poll_interval_secs: 5
/// launcher:
///   max_proc: 0
///   max_proc_per_cpu: 4
///   max_proc_per_project: 2
///   finished_to_keep: 100
///   cancel_signal: TERM
/// runner:
///   program: scrapy
///   logs_dir: /var/log/crawld
///   rlimits:
///     max_open_files: 4096
/// packages:
///   eggs_dir: /var/lib/crawld/eggs
/// logger:
///   format: json
///   level: info
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub http: HttpConfig,
    pub queue: QueueConfig,
    pub launcher: LauncherConfig,
    pub runner: RunnerConfig,
    pub packages: PackageConfig,
    pub logger: LoggerConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    /// Basic auth is on only when both `username` and `password` are set.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:6800".to_string(),
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConfig")
            .field("bind", &self.bind)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// One `<project>.db` per project lives here.
    pub dbs_dir: PathBuf,
    pub poll_interval_secs: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dbs_dir: PathBuf::from("dbs"),
            poll_interval_secs: PollerConfig::default().poll_interval_secs,
        }
    }
}

impl QueueConfig {
    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            poll_interval_secs: self.poll_interval_secs,
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http
            .bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("http.bind {:?}: {e}", self.http.bind)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.http.username.as_deref().is_some_and(|u| u.contains(':')) {
            return Err(ConfigError::Invalid(
                "http.username cannot contain ':'".into(),
            ));
        }
        if !(self.queue.poll_interval_secs.is_finite() && self.queue.poll_interval_secs > 0.0) {
            return Err(ConfigError::Invalid(
                "queue.poll_interval_secs must be a positive number".into(),
            ));
        }
        if self.launcher.max_proc == 0 && self.launcher.max_proc_per_cpu == 0 {
            return Err(ConfigError::Invalid(
                "launcher.max_proc and launcher.max_proc_per_cpu cannot both be 0".into(),
            ));
        }
        if self.launcher.max_proc_per_project == Some(0) {
            return Err(ConfigError::Invalid(
                "launcher.max_proc_per_project must be positive".into(),
            ));
        }
        if self.runner.program.trim().is_empty() {
            return Err(ConfigError::Invalid("runner.program cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        let cfg = DaemonConfig::from_yaml("").unwrap();
        assert_eq!(cfg.http.bind, "127.0.0.1:6800");
        assert_eq!(cfg.queue.poll_interval_secs, 5.0);
        assert_eq!(cfg.launcher.finished_to_keep, 100);
        assert_eq!(cfg.launcher.max_proc_per_cpu, 4);
        assert_eq!(cfg.runner.program, "scrapy");
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = DaemonConfig::from_yaml(
            "launcher:\n  max_proc: 3\n  max_proc_per_project: 1\nrunner:\n  rlimits:\n    max_open_files: 1024\n",
        )
        .unwrap();
        assert_eq!(cfg.launcher.max_proc, 3);
        assert_eq!(cfg.launcher.max_proc_per_project, Some(1));
        assert_eq!(cfg.launcher.cancel_signal, "TERM");
        assert_eq!(cfg.runner.rlimits.max_open_files, Some(1024));
        assert_eq!(cfg.queue.dbs_dir, PathBuf::from("dbs"));
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawld.yaml");

        assert!(matches!(DaemonConfig::load(&path), Err(ConfigError::Read { .. })));

        fs::write(&path, "launcher: [not, a, map]\n").unwrap();
        let err = DaemonConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("crawld.yaml"));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = DaemonConfig::default();
        cfg.http.bind = "not-an-address".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = DaemonConfig::default();
        cfg.queue.poll_interval_secs = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = DaemonConfig::default();
        cfg.launcher.max_proc_per_cpu = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = DaemonConfig::default();
        cfg.http.username = Some("ops:team".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn auth_needs_both_username_and_password() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.http.credentials(), None);

        let cfg = DaemonConfig::from_yaml("http:\n  username: ops\n").unwrap();
        assert_eq!(cfg.http.credentials(), None);

        let cfg = DaemonConfig::from_yaml("http:\n  username: ops\n  password: pw\n").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.http.credentials(), Some(("ops", "pw")));
        assert!(!format!("{:?}", cfg.http).contains("pw\""));
    }
}
