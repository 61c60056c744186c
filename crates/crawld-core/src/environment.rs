use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crawld_exec::{ProcessSpec, RlimitConfig};
use crawld_model::{JobEnv, JobId, JobRequest};
use serde::{Deserialize, Serialize};

use crate::{error::CoreResult, naming::check_name, packages::PackageHandle};

pub const ENV_PROJECT: &str = "CRAWLD_PROJECT";
pub const ENV_SPIDER: &str = "CRAWLD_SPIDER";
pub const ENV_JOB: &str = "CRAWLD_JOB";
pub const ENV_VERSION: &str = "CRAWLD_VERSION";
pub const ENV_PACKAGE: &str = "CRAWLD_PACKAGE";
pub const ENV_LOG_FILE: &str = "CRAWLD_LOG_FILE";

/// Turns a job (and its resolved package) into a process to run.
pub trait Environment: Send + Sync {
    fn prepare(
        &self,
        job_id: &JobId,
        job: &JobRequest,
        package: Option<&PackageHandle>,
    ) -> CoreResult<ProcessSpec>;
}

/// How job processes are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Runner executable; the spider command line is appended to `args`.
    pub program: String,
    pub args: Vec<String>,
    /// Root for job logs: `<logs_dir>/<project>/<spider>/<job_id>.log`.
    pub logs_dir: PathBuf,
    /// Working directory of job processes; `None` inherits the daemon's.
    pub work_dir: Option<PathBuf>,
    /// Extra variables given to every job.
    pub env: BTreeMap<String, String>,
    pub rlimits: RlimitConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "scrapy".to_string(),
            args: Vec::new(),
            logs_dir: PathBuf::from("logs"),
            work_dir: None,
            env: BTreeMap::new(),
            rlimits: RlimitConfig::default(),
        }
    }
}

/// Runs `<program> <args..> crawl <spider> -a k=v.. -s k=v..`.
#[derive(Debug, Clone)]
pub struct RunnerEnvironment {
    cfg: RunnerConfig,
}

impl RunnerEnvironment {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.cfg
    }

    pub fn log_path(&self, job_id: &JobId, job: &JobRequest) -> PathBuf {
        log_path(&self.cfg.logs_dir, job_id, job)
    }
}

impl Environment for RunnerEnvironment {
    fn prepare(
        &self,
        job_id: &JobId,
        job: &JobRequest,
        package: Option<&PackageHandle>,
    ) -> CoreResult<ProcessSpec> {
        check_name(&job.project)?;
        check_name(&job.spider)?;

        let mut args = self.cfg.args.clone();
        args.push("crawl".to_string());
        args.push(job.spider.clone());
        for (k, v) in &job.args {
            args.push("-a".to_string());
            args.push(format!("{k}={v}"));
        }
        for (k, v) in &job.settings {
            args.push("-s".to_string());
            args.push(format!("{k}={v}"));
        }

        let log_path = self.log_path(job_id, job);

        let mut env: JobEnv = self.cfg.env.iter().collect();
        env.push(ENV_PROJECT, job.project.as_str());
        env.push(ENV_SPIDER, job.spider.as_str());
        env.push(ENV_JOB, job_id.as_str());
        if let Some(pkg) = package {
            env.push(ENV_VERSION, pkg.version.as_str());
            env.push(ENV_PACKAGE, pkg.path.display().to_string());
        } else if let Some(version) = &job.version {
            env.push(ENV_VERSION, version.as_str());
        }
        env.push(ENV_LOG_FILE, log_path.display().to_string());

        Ok(ProcessSpec {
            program: self.cfg.program.clone(),
            args,
            env,
            cwd: self.cfg.work_dir.clone(),
            log_path,
            rlimits: self.cfg.rlimits.clone(),
        })
    }
}

fn log_path(root: &Path, job_id: &JobId, job: &JobRequest) -> PathBuf {
    root.join(&job.project)
        .join(&job.spider)
        .join(format!("{job_id}.log"))
}
