//! The daemon loop.
//!
//! One task owns the project queues, the poller and the launcher and serves
//! everything from a single `select!`: shutdown, job completions, the poll
//! timer and API commands, in that priority. Handlers run to completion one at a time, so
//! none of the owned state needs a lock.
use std::{collections::BTreeSet, sync::Arc, time::Duration};

use crawld_model::{
    DaemonStatus, JobId, JobListing, JobRequest, JobState, Priority, Project,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    environment::Environment,
    error::{CoreError, CoreResult},
    events::{EventBus, JobCompletion, JobEvent, Subscribe},
    launcher::{Launcher, LauncherConfig},
    naming::{check_job_id, check_name},
    packages::PackageStorage,
    poller::{Poller, PollerConfig, TickOutcome},
    queues::ProjectQueues,
    system,
};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<CoreResult<T>>;

enum Command {
    Schedule {
        job: JobRequest,
        priority: Priority,
        reply: Reply<JobId>,
    },
    Cancel {
        project: Project,
        job_id: JobId,
        reply: Reply<Option<JobState>>,
    },
    ListJobs {
        project: Option<Project>,
        reply: Reply<JobListing>,
    },
    ListProjects {
        reply: Reply<Vec<Project>>,
    },
    DeleteProject {
        project: Project,
        reply: Reply<()>,
    },
    Status {
        reply: Reply<DaemonStatus>,
    },
}

/// Cloneable client of a running [`Daemon`].
///
/// Every call fails with [`CoreError::Closed`] once the daemon loop is gone.
#[derive(Clone, Debug)]
pub struct DaemonHandle {
    tx: mpsc::Sender<Command>,
}

impl DaemonHandle {
    /// Queue a job. Assigns a job id when the request has none.
    pub async fn schedule(&self, job: JobRequest, priority: Priority) -> CoreResult<JobId> {
        self.request(|reply| Command::Schedule {
            job,
            priority,
            reply,
        })
        .await
    }

    /// Cancel a pending or running job; returns the state it was in, if any.
    pub async fn cancel(&self, project: Project, job_id: JobId) -> CoreResult<Option<JobState>> {
        self.request(|reply| Command::Cancel {
            project,
            job_id,
            reply,
        })
        .await
    }

    pub async fn list_jobs(&self, project: Option<Project>) -> CoreResult<JobListing> {
        self.request(|reply| Command::ListJobs { project, reply })
            .await
    }

    /// Projects with a queue or an uploaded package, sorted.
    pub async fn list_projects(&self) -> CoreResult<Vec<Project>> {
        self.request(|reply| Command::ListProjects { reply }).await
    }

    /// Drop a project's pending jobs and packages. Running jobs are left alone.
    pub async fn delete_project(&self, project: Project) -> CoreResult<()> {
        self.request(|reply| Command::DeleteProject { project, reply })
            .await
    }

    pub async fn status(&self) -> CoreResult<DaemonStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> CoreResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }
}

pub struct Daemon {
    queues: ProjectQueues,
    launcher: Launcher,
    poller: Poller,
    packages: Arc<dyn PackageStorage>,
    events: EventBus,

    poll_interval: Duration,
    shutdown_timeout: Duration,

    completions: mpsc::UnboundedReceiver<JobCompletion>,
    commands: mpsc::Receiver<Command>,
}

impl Daemon {
    pub fn new(
        queues: ProjectQueues,
        launcher_cfg: &LauncherConfig,
        poller_cfg: &PollerConfig,
        packages: Arc<dyn PackageStorage>,
        environment: Arc<dyn Environment>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> CoreResult<(Self, DaemonHandle)> {
        let events = EventBus::new(subscribers);
        let (launcher, completions) =
            Launcher::new(launcher_cfg, packages.clone(), environment, events.clone())?;
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);

        let daemon = Self {
            queues,
            launcher,
            poller: Poller::new(),
            packages,
            events,
            poll_interval: poller_cfg.interval(),
            shutdown_timeout: launcher_cfg.shutdown_timeout(),
            completions,
            commands,
        };
        Ok((daemon, DaemonHandle { tx }))
    }

    /// Serve until `shutdown` fires, then signal running jobs and wait for them
    /// up to the configured timeout.
    pub async fn run(mut self, shutdown: CancellationToken) {
        system::init_uptime();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        info!(
            target: "crawld.daemon",
            node = system::node_name(),
            poll_interval = ?self.poll_interval,
            max_proc = self.launcher.max_proc(),
            projects = self.queues.list_projects().len(),
            "daemon started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(done) = self.completions.recv() => {
                    self.launcher.on_exit(done);
                }

                // Ticks outrank commands: steady API traffic must not starve dispatch.
                _ = ticker.tick() => self.poll(),

                cmd = self.commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => {
                        debug!(target: "crawld.daemon", "all handles dropped");
                        commands_open = false;
                    }
                },
            }
        }

        self.drain().await;
        info!(target: "crawld.daemon", "daemon stopped");
    }

    fn poll(&mut self) {
        match self.poller.tick(&mut self.queues, &mut self.launcher) {
            TickOutcome::Requeued { project, priority } => {
                self.events.publish(JobEvent::Requeued { project, priority });
            }
            TickOutcome::Failed { project, reason } => {
                warn!(target: "crawld.daemon", project = %project, reason = %reason, "dispatch failed");
            }
            TickOutcome::NoCapacity | TickOutcome::Idle | TickOutcome::Dispatched(_) => {}
        }
    }

    async fn drain(&mut self) {
        self.launcher.shutdown();
        let deadline = Instant::now() + self.shutdown_timeout;
        while self.launcher.running_count() > 0 {
            match tokio::time::timeout_at(deadline, self.completions.recv()).await {
                Ok(Some(done)) => {
                    self.launcher.on_exit(done);
                }
                Ok(None) | Err(_) => break,
            }
        }
        let left = self.launcher.running_count();
        if left > 0 {
            warn!(target: "crawld.daemon", running = left, "jobs still running at exit");
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Schedule {
                job,
                priority,
                reply,
            } => {
                let _ = reply.send(self.schedule(job, priority));
            }
            Command::Cancel {
                project,
                job_id,
                reply,
            } => {
                let _ = reply.send(self.cancel(&project, &job_id));
            }
            Command::ListJobs { project, reply } => {
                let _ = reply.send(self.list_jobs(project.as_deref()));
            }
            Command::ListProjects { reply } => {
                let _ = reply.send(self.list_projects());
            }
            Command::DeleteProject { project, reply } => {
                let _ = reply.send(self.delete_project(&project));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn schedule(&mut self, mut job: JobRequest, priority: Priority) -> CoreResult<JobId> {
        check_name(&job.project)?;
        if job.spider.trim().is_empty() {
            return Err(CoreError::InvalidRequest("spider must not be empty".into()));
        }
        if let Some(version) = &job.version {
            check_name(version)?;
        }
        let job_id = job.job_id.get_or_insert_with(JobId::generate).clone();
        check_job_id(&job_id)?;
        if self.launcher.running_project(&job_id).is_some() || self.queues.has_pending(&job_id)? {
            return Err(CoreError::InvalidRequest(format!(
                "job {job_id} is already pending or running"
            )));
        }

        self.queues.insert(&job, priority)?;
        debug!(target: "crawld.daemon", job_id = %job_id, project = %job.project, priority, "job queued");
        self.events.publish(JobEvent::Queued {
            job_id: job_id.clone(),
            project: job.project,
            spider: job.spider,
            priority,
        });
        Ok(job_id)
    }

    fn cancel(&mut self, project: &str, job_id: &JobId) -> CoreResult<Option<JobState>> {
        if self.queues.cancel_pending(project, job_id)? > 0 {
            self.events.publish(JobEvent::PendingRemoved {
                job_id: job_id.clone(),
                project: project.to_string(),
            });
            return Ok(Some(JobState::Pending));
        }
        if self.launcher.running_project(job_id) == Some(project) && self.launcher.cancel(job_id) {
            return Ok(Some(JobState::Running));
        }
        Ok(None)
    }

    fn list_jobs(&self, project: Option<&str>) -> CoreResult<JobListing> {
        let keep = |p: &str| project.is_none_or(|want| want == p);
        Ok(JobListing {
            pending: self.queues.pending(project)?,
            running: self
                .launcher
                .running()
                .into_iter()
                .filter(|j| keep(&j.project))
                .collect(),
            finished: self
                .launcher
                .finished()
                .into_iter()
                .filter(|j| keep(&j.project))
                .collect(),
        })
    }

    fn list_projects(&self) -> CoreResult<Vec<Project>> {
        let mut all: BTreeSet<Project> = self.queues.list_projects().into_iter().collect();
        all.extend(self.packages.projects()?);
        Ok(all.into_iter().collect())
    }

    fn delete_project(&mut self, project: &str) -> CoreResult<()> {
        check_name(project)?;
        let pending = self.queues.remove_project(project)?;
        let had_packages = self.packages.delete_project(project)?;
        if pending.is_none() && !had_packages {
            return Err(CoreError::NotFound(format!("project {project}")));
        }
        self.events.publish(JobEvent::ProjectRemoved {
            project: project.to_string(),
            pending: pending.unwrap_or(0),
        });
        Ok(())
    }

    fn status(&self) -> CoreResult<DaemonStatus> {
        Ok(DaemonStatus {
            node_name: system::node_name().to_string(),
            uptime_secs: system::uptime_seconds(),
            max_proc: self.launcher.max_proc(),
            pending: self.queues.pending_count()?,
            running: self.launcher.running_count(),
            finished: self.launcher.finished_count(),
        })
    }
}
