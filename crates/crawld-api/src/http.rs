use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use crawld_model::{DEFAULT_PRIORITY, JobId, JobRequest, JobState, Priority, Project};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    auth::{BasicAuth, require_basic_auth},
    error::ApiError,
    handler::ApiHandler,
};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
    auth: Option<BasicAuth>,
}

impl<H> HttpApi<H>
where
    H: ApiHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            auth: None,
        }
    }

    /// Require these credentials on every route.
    pub fn with_basic_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Build the axum router.
    ///
    /// Routes:
    /// - POST   /api/v1/jobs                                   schedule a job
    /// - GET    /api/v1/jobs?project=                          pending, running and finished jobs
    /// - POST   /api/v1/jobs/{id}/cancel                       cancel a job
    /// - GET    /api/v1/projects                               known projects
    /// - DELETE /api/v1/projects/{project}                     drop queue and packages
    /// - GET    /api/v1/projects/{project}/versions            uploaded versions
    /// - PUT    /api/v1/projects/{project}/versions/{version}  upload a package (raw body)
    /// - DELETE /api/v1/projects/{project}/versions/{version}  delete a package
    /// - GET    /api/v1/status                                 daemon counters
    ///
    /// With basic auth configured, every route answers 401 to requests
    /// without matching credentials.
    pub fn router(self) -> Router {
        let router = Router::new()
            .route("/api/v1/jobs", post(schedule_job::<H>).get(list_jobs::<H>))
            .route("/api/v1/jobs/{id}/cancel", post(cancel_job::<H>))
            .route("/api/v1/projects", get(list_projects::<H>))
            .route(
                "/api/v1/projects/{project}",
                axum::routing::delete(delete_project::<H>),
            )
            .route("/api/v1/projects/{project}/versions", get(list_versions::<H>))
            .route(
                "/api/v1/projects/{project}/versions/{version}",
                put(add_version::<H>).delete(delete_version::<H>),
            )
            .route("/api/v1/status", get(status::<H>))
            .with_state(self.handler);

        match self.auth {
            Some(auth) => router.layer(middleware::from_fn_with_state(
                Arc::new(auth),
                require_basic_auth,
            )),
            None => router,
        }
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleJobRequest {
    project: Project,
    spider: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    priority: Option<Priority>,
    /// Caller-chosen id; one is generated when absent.
    #[serde(default)]
    job_id: Option<JobId>,
    #[serde(default)]
    settings: BTreeMap<String, String>,
    #[serde(default)]
    args: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleJobResponse {
    job_id: JobId,
}

#[derive(Debug, Deserialize)]
struct ListJobsParams {
    project: Option<Project>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CancelJobRequest {
    project: Project,
}

#[derive(Debug, Serialize, Deserialize)]
struct CancelJobResponse {
    prev_state: Option<JobState>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectsResponse {
    projects: Vec<Project>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionsResponse {
    project: Project,
    versions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionAddedResponse {
    project: Project,
    version: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/jobs
async fn schedule_job<H>(
    State(handler): State<Arc<H>>,
    Json(req): Json<ScheduleJobRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    if req.project.trim().is_empty() {
        return Err(ApiError::InvalidRequest("project cannot be empty".into()));
    }
    if req.spider.trim().is_empty() {
        return Err(ApiError::InvalidRequest("spider cannot be empty".into()));
    }
    let priority = req.priority.unwrap_or(DEFAULT_PRIORITY);
    if !priority.is_finite() {
        return Err(ApiError::InvalidRequest("priority must be a finite number".into()));
    }

    debug!(target: "crawld.api", project = %req.project, spider = %req.spider, priority, "scheduling job");
    let job = JobRequest {
        job_id: req.job_id,
        project: req.project,
        spider: req.spider,
        version: req.version,
        settings: req.settings,
        args: req.args,
    };
    let job_id = handler.schedule(job, priority).await?;

    Ok((StatusCode::CREATED, Json(ScheduleJobResponse { job_id })))
}

/// GET /api/v1/jobs
async fn list_jobs<H>(
    State(handler): State<Arc<H>>,
    Query(params): Query<ListJobsParams>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let project = params.project.filter(|p| !p.trim().is_empty());
    let listing = handler.list_jobs(project).await?;
    Ok(Json(listing))
}

/// POST /api/v1/jobs/{id}/cancel
async fn cancel_job<H>(
    State(handler): State<Arc<H>>,
    Path(id): Path<String>,
    Json(req): Json<CancelJobRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    if id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("job id cannot be empty".into()));
    }
    let job_id = JobId::from(id);
    let prev_state = handler.cancel(req.project, job_id.clone()).await?;
    debug!(target: "crawld.api", %job_id, ?prev_state, "cancel handled");

    Ok(Json(CancelJobResponse { prev_state }))
}

/// GET /api/v1/projects
async fn list_projects<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let projects = handler.list_projects().await?;
    Ok(Json(ProjectsResponse { projects }))
}

/// DELETE /api/v1/projects/{project}
async fn delete_project<H>(
    State(handler): State<Arc<H>>,
    Path(project): Path<Project>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    handler.delete_project(project).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/projects/{project}/versions
async fn list_versions<H>(
    State(handler): State<Arc<H>>,
    Path(project): Path<Project>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    let versions = handler.list_versions(project.clone()).await?;
    Ok(Json(VersionsResponse { project, versions }))
}

/// PUT /api/v1/projects/{project}/versions/{version}
async fn add_version<H>(
    State(handler): State<Arc<H>>,
    Path((project, version)): Path<(Project, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    debug!(target: "crawld.api", %project, %version, bytes = body.len(), "uploading version");
    handler
        .add_version(project.clone(), version.clone(), body.to_vec())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(VersionAddedResponse { project, version }),
    ))
}

/// DELETE /api/v1/projects/{project}/versions/{version}
async fn delete_version<H>(
    State(handler): State<Arc<H>>,
    Path((project, version)): Path<(Project, String)>,
) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    handler.delete_version(project, version).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/status
async fn status<H>(State(handler): State<Arc<H>>) -> Result<impl IntoResponse, ApiError>
where
    H: ApiHandler,
{
    Ok(Json(handler.status().await?))
}
