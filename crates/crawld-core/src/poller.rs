use std::time::Duration;

use crawld_model::{JobId, Priority, Project};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{launcher::Launcher, queues::ProjectQueues};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Seconds between two dispatch attempts.
    pub poll_interval_secs: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs_f64(),
        }
    }
}

impl PollerConfig {
    /// Poll period; non-positive or non-finite values fall back to 5s.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Dispatching,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The launcher was full; no queue was looked at.
    NoCapacity,
    /// Nothing eligible was pending.
    Idle,
    Dispatched(JobId),
    /// The launcher refused the popped job for capacity; it was queued again.
    Requeued { project: Project, priority: Priority },
    /// The popped job failed to start (or could not be decoded) and is gone.
    Failed { project: Project, reason: String },
}

/// Moves at most one job per tick from the project queues to the launcher.
#[derive(Debug)]
pub struct Poller {
    state: PollerState,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self {
            state: PollerState::Idle,
        }
    }

    #[inline]
    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn tick(&mut self, queues: &mut ProjectQueues, launcher: &mut Launcher) -> TickOutcome {
        if !launcher.has_capacity() {
            trace!(target: "crawld.poller", running = launcher.running_count(), "no capacity");
            return TickOutcome::NoCapacity;
        }

        let Some(project) = select(queues, launcher) else {
            return TickOutcome::Idle;
        };

        self.state = PollerState::Dispatching;
        let outcome = dispatch(queues, launcher, project);
        self.state = PollerState::Idle;
        outcome
    }
}

/// Pick the project whose head job goes next: highest priority, then the
/// project with fewest running jobs, then the earliest-seen project.
fn select(queues: &ProjectQueues, launcher: &Launcher) -> Option<Project> {
    let mut best: Option<(&str, Priority, usize)> = None;
    for (project, _) in queues.iter() {
        if !launcher.accepts(project) {
            continue;
        }
        let priority = match queues.peek_priority(project) {
            Ok(Some(priority)) => priority,
            Ok(None) => continue,
            Err(e) => {
                warn!(target: "crawld.poller", project, error = %e, "peek failed; skipping project");
                continue;
            }
        };
        let running = launcher.running_for(project);
        let better = match best {
            None => true,
            Some((_, p, r)) => priority > p || (priority == p && running < r),
        };
        if better {
            best = Some((project, priority, running));
        }
    }
    best.map(|(project, _, _)| project.to_string())
}

fn dispatch(queues: &mut ProjectQueues, launcher: &mut Launcher, project: Project) -> TickOutcome {
    let (job, priority) = match queues.pop(&project) {
        Ok(Some(popped)) => popped,
        Ok(None) => return TickOutcome::Idle,
        Err(e) => {
            warn!(target: "crawld.poller", project = %project, error = %e, "pop failed");
            return TickOutcome::Failed {
                project,
                reason: e.to_string(),
            };
        }
    };

    match launcher.start(job.clone()) {
        Ok(job_id) => {
            debug!(target: "crawld.poller", project = %project, job_id = %job_id, priority, "dispatched");
            TickOutcome::Dispatched(job_id)
        }
        Err(e) if e.is_capacity() => match queues.insert(&job, priority) {
            Ok(_) => {
                debug!(target: "crawld.poller", project = %project, priority, "launcher full; job requeued");
                TickOutcome::Requeued { project, priority }
            }
            Err(insert_err) => {
                warn!(target: "crawld.poller", project = %project, error = %insert_err, "requeue failed; job lost");
                TickOutcome::Failed {
                    project,
                    reason: insert_err.to_string(),
                }
            }
        },
        Err(e) => TickOutcome::Failed {
            project,
            reason: e.to_string(),
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use crawld_model::JobRequest;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        environment::testing::ScriptEnvironment,
        events::{EventBus, JobCompletion},
        launcher::LauncherConfig,
        packages::FsPackageStorage,
    };

    fn launcher(dir: &TempDir, cfg: LauncherConfig) -> (Launcher, mpsc::UnboundedReceiver<JobCompletion>) {
        Launcher::new(
            &cfg,
            Arc::new(FsPackageStorage::new(dir.path().join("eggs"))),
            Arc::new(ScriptEnvironment {
                logs: dir.path().join("logs"),
            }),
            EventBus::default(),
        )
        .unwrap()
    }

    fn max(n: usize) -> LauncherConfig {
        LauncherConfig {
            max_proc: n,
            ..Default::default()
        }
    }

    fn job(project: &str, spider: &str, script: &str) -> JobRequest {
        JobRequest::new(project, spider).with_arg("script", script)
    }

    #[test]
    fn interval_falls_back_on_bad_values() {
        assert_eq!(PollerConfig::default().interval(), Duration::from_secs(5));
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = PollerConfig {
                poll_interval_secs: bad,
            };
            assert_eq!(cfg.interval(), Duration::from_secs(5));
        }
        let fast = PollerConfig {
            poll_interval_secs: 0.25,
        };
        assert_eq!(fast.interval(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn empty_queues_are_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut launcher, _done) = launcher(&dir, max(1));
        let mut queues = ProjectQueues::in_memory();

        assert_eq!(Poller::new().tick(&mut queues, &mut launcher), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn without_capacity_nothing_is_popped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut launcher, mut done) = launcher(&dir, max(1));
        let mut queues = ProjectQueues::in_memory();
        let mut poller = Poller::new();

        queues.insert(&job("shop", "a", "sleep 30"), 0.0).unwrap();
        queues.insert(&job("shop", "b", "exit 0"), 0.0).unwrap();

        assert!(matches!(poller.tick(&mut queues, &mut launcher), TickOutcome::Dispatched(_)));
        assert_eq!(poller.tick(&mut queues, &mut launcher), TickOutcome::NoCapacity);
        assert_eq!(queues.pending_count().unwrap(), 1);
        assert_eq!(poller.state(), PollerState::Idle);

        launcher.shutdown();
        let completion = done.recv().await.unwrap();
        launcher.on_exit(completion);
    }

    #[tokio::test]
    async fn highest_priority_across_projects_goes_first() {
        let dir = tempfile::tempdir().unwrap();
        let (mut launcher, mut done) = launcher(&dir, max(4));
        let mut queues = ProjectQueues::in_memory();
        let mut poller = Poller::new();

        queues.insert(&job("news", "low", "exit 0"), 1.0).unwrap();
        queues.insert(&job("shop", "high", "exit 0"), 9.0).unwrap();

        let TickOutcome::Dispatched(first) = poller.tick(&mut queues, &mut launcher) else {
            panic!("expected a dispatch");
        };
        let running = launcher.running();
        assert_eq!(running[0].job_id, first);
        assert_eq!(running[0].spider, "high");

        let completion = done.recv().await.unwrap();
        launcher.on_exit(completion);
        assert_eq!(queues.pending(None).unwrap()[0].spider, "low");
    }

    #[tokio::test]
    async fn equal_priority_prefers_project_with_fewer_running() {
        let dir = tempfile::tempdir().unwrap();
        let (mut launcher, mut done) = launcher(&dir, max(4));
        let mut queues = ProjectQueues::in_memory();
        let mut poller = Poller::new();

        queues.insert(&job("shop", "a", "sleep 30"), 0.0).unwrap();
        queues.insert(&job("shop", "b", "sleep 30"), 0.0).unwrap();
        queues.insert(&job("news", "c", "sleep 30"), 0.0).unwrap();

        // First tick: tie, no one running, so first-seen "shop" wins.
        poller.tick(&mut queues, &mut launcher);
        assert_eq!(launcher.running_for("shop"), 1);
        // Second tick: tie again, but "news" has nothing running.
        poller.tick(&mut queues, &mut launcher);
        assert_eq!(launcher.running_for("news"), 1);

        launcher.shutdown();
        for _ in 0..2 {
            let completion = done.recv().await.unwrap();
            launcher.on_exit(completion);
        }
    }

    #[tokio::test]
    async fn project_at_its_limit_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut launcher, mut done) = launcher(
            &dir,
            LauncherConfig {
                max_proc: 4,
                max_proc_per_project: Some(1),
                ..Default::default()
            },
        );
        let mut queues = ProjectQueues::in_memory();
        let mut poller = Poller::new();

        queues.insert(&job("shop", "a", "sleep 30"), 5.0).unwrap();
        queues.insert(&job("shop", "b", "sleep 30"), 5.0).unwrap();
        queues.insert(&job("news", "c", "sleep 30"), 1.0).unwrap();

        poller.tick(&mut queues, &mut launcher);
        poller.tick(&mut queues, &mut launcher);
        assert_eq!(launcher.running_for("shop"), 1);
        assert_eq!(launcher.running_for("news"), 1);
        assert_eq!(poller.tick(&mut queues, &mut launcher), TickOutcome::Idle);
        assert_eq!(queues.pending_count().unwrap(), 1);

        launcher.shutdown();
        for _ in 0..2 {
            let completion = done.recv().await.unwrap();
            launcher.on_exit(completion);
        }
    }

    #[tokio::test]
    async fn capacity_refusal_puts_job_back_with_its_priority() {
        let dir = tempfile::tempdir().unwrap();
        let (mut launcher, mut done) = launcher(&dir, max(1));
        let mut queues = ProjectQueues::in_memory();

        // The slot fills between selection and dispatch.
        launcher.start(job("news", "busy", "sleep 30")).unwrap();
        let queued = job("shop", "a", "exit 0").with_job_id(JobId::from("late"));
        queues.insert(&queued, 3.5).unwrap();

        let outcome = dispatch(&mut queues, &mut launcher, "shop".to_string());
        assert_eq!(
            outcome,
            TickOutcome::Requeued {
                project: "shop".into(),
                priority: 3.5
            }
        );

        let pending = queues.pending(Some("shop")).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, Some(JobId::from("late")));
        assert_eq!(pending[0].priority, 3.5);
        assert_eq!(launcher.running_count(), 1);
        assert!(launcher.finished().is_empty());

        launcher.shutdown();
        let completion = done.recv().await.unwrap();
        launcher.on_exit(completion);
    }

    #[tokio::test]
    async fn failed_start_is_not_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let (mut launcher, _done) = launcher(&dir, max(1));
        let mut queues = ProjectQueues::in_memory();

        queues
            .insert(&job("shop", "a", "exit 0").with_version("missing"), 0.0)
            .unwrap();

        let outcome = Poller::new().tick(&mut queues, &mut launcher);
        assert!(matches!(outcome, TickOutcome::Failed { ref project, .. } if project == "shop"));
        assert_eq!(queues.pending_count().unwrap(), 0);
        assert_eq!(launcher.finished().len(), 1);
    }
}
