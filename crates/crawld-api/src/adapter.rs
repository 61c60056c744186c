use std::sync::Arc;

use async_trait::async_trait;
use crawld_core::{DaemonHandle, PackageStorage};
use crawld_model::{DaemonStatus, JobId, JobListing, JobRequest, JobState, Priority, Project};
use tracing::debug;

use crate::{error::ApiError, handler::ApiHandler};

/// [`ApiHandler`] backed by the daemon loop and the package store.
///
/// Job operations go through the [`DaemonHandle`]. Package calls never change
/// queue or launcher state and hit the store directly, on the blocking pool.
pub struct DaemonApiAdapter {
    daemon: DaemonHandle,
    packages: Arc<dyn PackageStorage>,
}

impl DaemonApiAdapter {
    pub fn new(daemon: DaemonHandle, packages: Arc<dyn PackageStorage>) -> Self {
        Self { daemon, packages }
    }

    async fn with_packages<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PackageStorage) -> Result<T, ApiError> + Send + 'static,
    {
        let packages = Arc::clone(&self.packages);
        tokio::task::spawn_blocking(move || f(packages.as_ref()))
            .await
            .map_err(|e| ApiError::Internal(format!("package task failed: {e}")))?
    }
}

#[async_trait]
impl ApiHandler for DaemonApiAdapter {
    async fn schedule(&self, job: JobRequest, priority: Priority) -> Result<JobId, ApiError> {
        Ok(self.daemon.schedule(job, priority).await?)
    }

    async fn cancel(&self, project: Project, job_id: JobId) -> Result<Option<JobState>, ApiError> {
        Ok(self.daemon.cancel(project, job_id).await?)
    }

    async fn list_jobs(&self, project: Option<Project>) -> Result<JobListing, ApiError> {
        Ok(self.daemon.list_jobs(project).await?)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, ApiError> {
        Ok(self.daemon.list_projects().await?)
    }

    async fn delete_project(&self, project: Project) -> Result<(), ApiError> {
        Ok(self.daemon.delete_project(project).await?)
    }

    async fn list_versions(&self, project: Project) -> Result<Vec<String>, ApiError> {
        self.with_packages(move |packages| Ok(packages.versions(&project)?))
            .await
    }

    async fn add_version(&self, project: Project, version: String, data: Vec<u8>) -> Result<(), ApiError> {
        if data.is_empty() {
            return Err(ApiError::InvalidRequest("package body is empty".into()));
        }
        let handle = self
            .with_packages(move |packages| Ok(packages.put(&project, &version, &data)?))
            .await?;
        debug!(target: "crawld.api", project = %handle.project, version = %handle.version, "version added");
        Ok(())
    }

    async fn delete_version(&self, project: Project, version: String) -> Result<(), ApiError> {
        self.with_packages(move |packages| Ok(packages.delete_version(&project, &version)?))
            .await
    }

    async fn status(&self) -> Result<DaemonStatus, ApiError> {
        Ok(self.daemon.status().await?)
    }
}
