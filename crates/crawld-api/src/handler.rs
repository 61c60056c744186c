use async_trait::async_trait;
use crawld_model::{DaemonStatus, JobId, JobListing, JobRequest, JobState, Priority, Project};

use crate::error::ApiError;

/// Backend of the public API.
///
/// [`DaemonApiAdapter`](crate::DaemonApiAdapter) is the stock implementation;
/// wrap it to add authentication or rate limiting.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    /// Queue a job; returns the id it will run under.
    async fn schedule(&self, job: JobRequest, priority: Priority) -> Result<JobId, ApiError>;

    /// Cancel a pending or running job. Returns the state it was in, or
    /// `None` if the job was neither pending nor running.
    async fn cancel(&self, project: Project, job_id: JobId) -> Result<Option<JobState>, ApiError>;

    async fn list_jobs(&self, project: Option<Project>) -> Result<JobListing, ApiError>;

    async fn list_projects(&self) -> Result<Vec<Project>, ApiError>;

    async fn delete_project(&self, project: Project) -> Result<(), ApiError>;

    /// Uploaded versions of `project`, oldest first.
    async fn list_versions(&self, project: Project) -> Result<Vec<String>, ApiError>;

    async fn add_version(&self, project: Project, version: String, data: Vec<u8>) -> Result<(), ApiError>;

    async fn delete_version(&self, project: Project, version: String) -> Result<(), ApiError>;

    async fn status(&self) -> Result<DaemonStatus, ApiError>;
}
