use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{JobId, Project};

/// A unit of requested work, as it sits in a project queue.
///
/// `job_id` is normally assigned when the job is scheduled so that callers can
/// cancel it while it is still pending; the launcher fills it in otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub project: Project,
    pub spider: String,
    /// Package version to run. `None` means the latest uploaded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Spider settings overrides, passed as `-s key=value`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
    /// Spider arguments, passed as `-a key=value`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl JobRequest {
    pub fn new(project: impl Into<Project>, spider: impl Into<String>) -> Self {
        Self {
            job_id: None,
            project: project.into(),
            spider: spider.into(),
            version: None,
            settings: BTreeMap::new(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_job_id(mut self, id: JobId) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// `true` if this request carries the given job id.
    pub fn is_job(&self, id: &JobId) -> bool {
        self.job_id.as_ref() == Some(id)
    }
}
