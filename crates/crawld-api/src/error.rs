use crawld_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::InvalidRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Unauthorized => 401,
            ApiError::Internal(_) => 500,
            ApiError::Core(e) => match e {
                CoreError::InvalidName(_) | CoreError::InvalidRequest(_) => 400,
                CoreError::Storage(err) if is_bad_priority(err) => 400,
                CoreError::NotFound(_) => 404,
                CoreError::Capacity { .. } | CoreError::Closed => 503,
                _ => 500,
            },
        }
    }
}

fn is_bad_priority(err: &crawld_core::StorageError) -> bool {
    matches!(err, crawld_core::StorageError::InvalidPriority(_))
}

#[cfg(feature = "http")]
impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(target: "crawld.api", error = %self, "request failed");
        } else {
            tracing::debug!(target: "crawld.api", error = %self, "request rejected");
        }
        let body = serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
