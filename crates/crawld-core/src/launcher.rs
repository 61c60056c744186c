//! Bounded pool of running job processes.
//!
//! The launcher owns the running table and the finished history. It never
//! blocks: every started process gets a waiter task that reports back through
//! a [`JobCompletion`] on the completion channel, and the owner of the
//! launcher feeds those back in through [`Launcher::on_exit`].
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};

use crawld_exec::{SpawnedProcess, parse_signal, signal_group};
use crawld_model::{FinishedJob, JobId, JobRequest, JobState, RunningJob, SPAWN_FAILED_EXIT_CODE};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::{
    environment::Environment,
    error::{CoreError, CoreResult},
    events::{EventBus, JobCompletion, JobEvent},
    naming::check_job_id,
    packages::PackageStorage,
    system::cpu_count,
};

/// Exit code reported when waiting on a child fails and its status is lost.
pub const WAIT_FAILED_EXIT_CODE: i32 = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Global limit of concurrently running jobs; `0` derives it from the CPU count.
    pub max_proc: usize,
    pub max_proc_per_cpu: usize,
    /// Optional limit per project.
    pub max_proc_per_project: Option<usize>,
    /// Size of the finished-jobs history; the oldest entries are evicted.
    pub finished_to_keep: usize,
    /// Signal sent to a job's process group on cancel and on shutdown.
    pub cancel_signal: String,
    /// How long shutdown waits for running jobs to exit after signalling them.
    pub shutdown_timeout_secs: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            max_proc: 0,
            max_proc_per_cpu: 4,
            max_proc_per_project: None,
            finished_to_keep: 100,
            cancel_signal: "TERM".to_string(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl LauncherConfig {
    /// The global limit actually enforced (at least 1).
    pub fn effective_max_proc(&self) -> usize {
        if self.max_proc > 0 {
            self.max_proc
        } else {
            cpu_count().saturating_mul(self.max_proc_per_cpu).max(1)
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

pub struct Launcher {
    max_proc: usize,
    max_per_project: Option<usize>,
    finished_to_keep: usize,
    cancel_signal: i32,

    packages: Arc<dyn PackageStorage>,
    environment: Arc<dyn Environment>,
    events: EventBus,
    completions: mpsc::UnboundedSender<JobCompletion>,

    running: HashMap<JobId, RunningJob>,
    finished: VecDeque<FinishedJob>,
}

impl Launcher {
    /// Build a launcher and the receiving end of its completion channel.
    pub fn new(
        cfg: &LauncherConfig,
        packages: Arc<dyn PackageStorage>,
        environment: Arc<dyn Environment>,
        events: EventBus,
    ) -> CoreResult<(Self, mpsc::UnboundedReceiver<JobCompletion>)> {
        let cancel_signal = parse_signal(&cfg.cancel_signal)
            .map_err(|e| CoreError::Config(format!("cancel_signal: {e}")))?;
        if cfg.max_proc_per_project == Some(0) {
            return Err(CoreError::Config("max_proc_per_project must be positive".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            max_proc: cfg.effective_max_proc(),
            max_per_project: cfg.max_proc_per_project,
            finished_to_keep: cfg.finished_to_keep,
            cancel_signal,
            packages,
            environment,
            events,
            completions: tx,
            running: HashMap::new(),
            finished: VecDeque::new(),
        };
        info!(
            target: "crawld.launcher",
            max_proc = launcher.max_proc,
            max_per_project = ?launcher.max_per_project,
            "launcher ready"
        );
        Ok((launcher, rx))
    }

    #[inline]
    pub fn max_proc(&self) -> usize {
        self.max_proc
    }

    #[inline]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn running_for(&self, project: &str) -> usize {
        self.running.values().filter(|r| r.project == project).count()
    }

    /// A free global slot exists.
    #[inline]
    pub fn has_capacity(&self) -> bool {
        self.running.len() < self.max_proc
    }

    /// A job of `project` could start right now.
    pub fn accepts(&self, project: &str) -> bool {
        self.has_capacity()
            && self
                .max_per_project
                .is_none_or(|limit| self.running_for(project) < limit)
    }

    /// Start `job` and return its id without waiting for the process.
    ///
    /// Capacity errors leave no trace. Any other failure (bad or duplicate
    /// job id, missing package, spawn error) records the job as finished with
    /// [`SPAWN_FAILED_EXIT_CODE`] before the error is returned.
    pub fn start(&mut self, mut job: JobRequest) -> CoreResult<JobId> {
        if !self.has_capacity() {
            return Err(CoreError::Capacity {
                project: None,
                limit: self.max_proc,
            });
        }
        if let Some(limit) = self.max_per_project
            && self.running_for(&job.project) >= limit
        {
            return Err(CoreError::Capacity {
                project: Some(job.project),
                limit,
            });
        }

        let job_id = job.job_id.get_or_insert_with(JobId::generate).clone();
        let start_time = SystemTime::now();
        if let Err(e) = self.admit(&job_id) {
            self.record_failure(job_id, job, start_time, &e);
            return Err(e);
        }

        let (spawned, log_path, version) = match self.launch(&job_id, &job) {
            Ok(launched) => launched,
            Err(e) => {
                self.record_failure(job_id, job, start_time, &e);
                return Err(e);
            }
        };
        let SpawnedProcess { pid, mut child } = spawned;

        let tx = self.completions.clone();
        let waiter_id = job_id.clone();
        tokio::spawn(async move {
            let exit_code = match crawld_exec::exit_code(&mut child).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(target: "crawld.launcher", job_id = %waiter_id, error = %e, "waiting on job process failed");
                    WAIT_FAILED_EXIT_CODE
                }
            };
            let done = JobCompletion {
                job_id: waiter_id,
                exit_code,
                end_time: SystemTime::now(),
            };
            if tx.send(done).is_err() {
                debug!(target: "crawld.launcher", "completion dropped: launcher is gone");
            }
        });

        info!(
            target: "crawld.launcher",
            job_id = %job_id,
            project = %job.project,
            spider = %job.spider,
            pid,
            "job started"
        );
        self.events.publish(JobEvent::Started {
            job_id: job_id.clone(),
            project: job.project.clone(),
            spider: job.spider.clone(),
            pid,
        });
        self.running.insert(
            job_id.clone(),
            RunningJob {
                job_id: job_id.clone(),
                project: job.project,
                spider: job.spider,
                version,
                args: job.args,
                pid,
                start_time,
                log_path,
            },
        );
        Ok(job_id)
    }

    fn admit(&self, job_id: &JobId) -> CoreResult<()> {
        check_job_id(job_id)?;
        if self.running.contains_key(job_id) {
            return Err(CoreError::InvalidRequest(format!(
                "job {job_id} is already running"
            )));
        }
        Ok(())
    }

    fn launch(
        &self,
        job_id: &JobId,
        job: &JobRequest,
    ) -> CoreResult<(SpawnedProcess, PathBuf, Option<String>)> {
        let package = self
            .packages
            .resolve(&job.project, job.version.as_deref())?;
        let spec = self
            .environment
            .prepare(job_id, job, package.as_ref())?;
        let spawned = crawld_exec::spawn(&spec).map_err(|e| CoreError::Spawn {
            job_id: job_id.clone(),
            reason: e.to_string(),
        })?;
        let version = package.map(|p| p.version).or_else(|| job.version.clone());
        Ok((spawned, spec.log_path, version))
    }

    fn record_failure(&mut self, job_id: JobId, job: JobRequest, at: SystemTime, err: &CoreError) {
        warn!(
            target: "crawld.launcher",
            job_id = %job_id,
            project = %job.project,
            spider = %job.spider,
            error = %err,
            "job could not be started"
        );
        self.events.publish(JobEvent::SpawnFailed {
            job_id: job_id.clone(),
            project: job.project.clone(),
            spider: job.spider.clone(),
            reason: err.to_string(),
        });
        self.push_finished(FinishedJob {
            job_id,
            project: job.project,
            spider: job.spider,
            version: job.version,
            start_time: at,
            end_time: at,
            exit_code: SPAWN_FAILED_EXIT_CODE,
            log_path: None,
        });
    }

    /// Move a job from the running table into the finished history.
    ///
    /// Completions for unknown ids are ignored.
    pub fn on_exit(&mut self, done: JobCompletion) -> Option<FinishedJob> {
        let Some(running) = self.running.remove(&done.job_id) else {
            trace!(target: "crawld.launcher", job_id = %done.job_id, "completion for unknown job ignored");
            return None;
        };
        let finished = running.finish(done.exit_code, done.end_time);

        info!(
            target: "crawld.launcher",
            job_id = %finished.job_id,
            project = %finished.project,
            exit_code = finished.exit_code,
            "job finished"
        );
        self.events.publish(JobEvent::Finished {
            job_id: finished.job_id.clone(),
            project: finished.project.clone(),
            spider: finished.spider.clone(),
            exit_code: finished.exit_code,
        });
        self.push_finished(finished.clone());
        Some(finished)
    }

    fn push_finished(&mut self, job: FinishedJob) {
        self.finished.push_back(job);
        while self.finished.len() > self.finished_to_keep {
            self.finished.pop_front();
        }
    }

    /// Signal the process group of a running job.
    ///
    /// Returns `false` if the job is not running. Death is confirmed only by
    /// the job later showing up as finished.
    pub fn cancel(&mut self, job_id: &JobId) -> bool {
        let Some(running) = self.running.get(job_id) else {
            return false;
        };
        if let Err(e) = signal_group(running.pid, self.cancel_signal) {
            warn!(target: "crawld.launcher", job_id = %job_id, pid = running.pid, error = %e, "cancel signal failed");
        } else {
            debug!(target: "crawld.launcher", job_id = %job_id, pid = running.pid, "cancel signal sent");
        }
        self.events.publish(JobEvent::CancelRequested {
            job_id: job_id.clone(),
            project: running.project.clone(),
        });
        true
    }

    /// Signal every running job. Their completions still arrive as usual.
    pub fn shutdown(&mut self) {
        if self.running.is_empty() {
            return;
        }
        info!(target: "crawld.launcher", running = self.running.len(), "signalling running jobs");
        for running in self.running.values() {
            if let Err(e) = signal_group(running.pid, self.cancel_signal) {
                warn!(target: "crawld.launcher", job_id = %running.job_id, error = %e, "shutdown signal failed");
            }
        }
    }

    /// Running jobs, oldest first.
    pub fn running(&self) -> Vec<RunningJob> {
        let mut out: Vec<_> = self.running.values().cloned().collect();
        out.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        out
    }

    /// Finished history, oldest first.
    pub fn finished(&self) -> Vec<FinishedJob> {
        self.finished.iter().cloned().collect()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    /// Where the launcher knows `job_id` to be.
    pub fn state_of(&self, job_id: &JobId) -> Option<JobState> {
        if self.running.contains_key(job_id) {
            Some(JobState::Running)
        } else if self.finished.iter().any(|f| &f.job_id == job_id) {
            Some(JobState::Finished)
        } else {
            None
        }
    }

    /// Project of a running job.
    pub fn running_project(&self, job_id: &JobId) -> Option<&str> {
        self.running.get(job_id).map(|r| r.project.as_str())
    }
}
