use std::path::PathBuf;

use clap::Parser;
use crawld_observe::LoggerFormat;

use crate::config::{ConfigError, DaemonConfig};

#[derive(Parser, Debug)]
#[command(name = "crawld")]
#[command(about = "Queue spider jobs per project and run them as supervised processes")]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP bind address, overrides `http.bind`
    #[arg(long)]
    pub bind: Option<String>,

    /// Log filter, overrides `logger.level`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (text, json, journald), overrides `logger.format`
    #[arg(long)]
    pub log_format: Option<String>,
}

impl Cli {
    /// Load the configuration file (if any) and apply command-line overrides.
    pub fn resolve(&self) -> Result<DaemonConfig, ConfigError> {
        let mut cfg = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig::default(),
        };
        if let Some(bind) = &self.bind {
            cfg.http.bind = bind.clone();
        }
        if let Some(level) = &self.log_level {
            cfg.logger.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            cfg.logger.format = format
                .parse::<LoggerFormat>()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawld.yaml");
        std::fs::write(&path, "http:\n  bind: 127.0.0.1:7000\nlogger:\n  level: warn\n").unwrap();

        let cli = Cli::parse_from([
            "crawld",
            "--config",
            path.to_str().unwrap(),
            "--bind",
            "0.0.0.0:9000",
            "--log-format",
            "json",
        ]);
        let cfg = cli.resolve().unwrap();
        assert_eq!(cfg.http.bind, "0.0.0.0:9000");
        assert_eq!(cfg.logger.level, "warn");
        assert_eq!(cfg.logger.format, LoggerFormat::Json);
    }

    #[test]
    fn bad_format_is_a_config_error() {
        let cli = Cli::parse_from(["crawld", "--log-format", "xml"]);
        assert!(matches!(cli.resolve(), Err(ConfigError::Invalid(_))));
    }
}
