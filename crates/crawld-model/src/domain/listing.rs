use serde::{Deserialize, Serialize};

use crate::{FinishedJob, JobId, Priority, Project, RunningJob};

/// A queued job as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingJob {
    pub job_id: Option<JobId>,
    pub project: Project,
    pub spider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub priority: Priority,
}

/// Snapshot of every job the daemon knows about, optionally for one project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobListing {
    pub pending: Vec<PendingJob>,
    pub running: Vec<RunningJob>,
    pub finished: Vec<FinishedJob>,
}

/// Daemon-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub node_name: String,
    pub uptime_secs: u64,
    /// Global concurrency limit of the launcher.
    pub max_proc: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
}
