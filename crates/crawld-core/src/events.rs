use std::{sync::Arc, time::SystemTime};

use crawld_model::{JobId, Priority, Project};

/// Published by a job's waiter task when its process exits.
///
/// Exactly one completion is sent for every job the launcher started; the
/// daemon loop drains them and feeds them to [`Launcher::on_exit`](crate::Launcher::on_exit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    pub job_id: JobId,
    pub exit_code: i32,
    pub end_time: SystemTime,
}

/// Lifecycle notifications handed to [`Subscribe`] implementations.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Queued {
        job_id: JobId,
        project: Project,
        spider: String,
        priority: Priority,
    },
    Started {
        job_id: JobId,
        project: Project,
        spider: String,
        pid: u32,
    },
    Finished {
        job_id: JobId,
        project: Project,
        spider: String,
        exit_code: i32,
    },
    SpawnFailed {
        job_id: JobId,
        project: Project,
        spider: String,
        reason: String,
    },
    /// A dispatch lost a capacity race and went back to its queue.
    Requeued { project: Project, priority: Priority },
    CancelRequested { job_id: JobId, project: Project },
    PendingRemoved {
        job_id: JobId,
        project: Project,
    },
    ProjectRemoved { project: Project, pending: usize },
}

impl JobEvent {
    /// Short symbolic name, for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Queued { .. } => "queued",
            JobEvent::Started { .. } => "started",
            JobEvent::Finished { .. } => "finished",
            JobEvent::SpawnFailed { .. } => "spawn_failed",
            JobEvent::Requeued { .. } => "requeued",
            JobEvent::CancelRequested { .. } => "cancel_requested",
            JobEvent::PendingRemoved { .. } => "pending_removed",
            JobEvent::ProjectRemoved { .. } => "project_removed",
        }
    }
}

/// Receives job events.
///
/// Called inline from the daemon loop, so implementations must return quickly
/// and never block.
pub trait Subscribe: Send + Sync {
    fn on_event(&self, event: &JobEvent);

    fn name(&self) -> &'static str;
}

/// Fan-out of events to every registered subscriber.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<[Arc<dyn Subscribe>]>,
}

impl EventBus {
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            subscribers: subscribers.into(),
        }
    }

    pub fn publish(&self, event: JobEvent) {
        for sub in self.subscribers.iter() {
            sub.on_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
