use crawld_model::{JobId, Project};
use crawld_store::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("launcher at capacity ({limit} running{})", scope_suffix(.project))]
    Capacity {
        project: Option<Project>,
        limit: usize,
    },

    #[error("spawn failed for job {job_id}: {reason}")]
    Spawn { job_id: JobId, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon is not running")]
    Closed,
}

fn scope_suffix(project: &Option<Project>) -> String {
    match project {
        Some(p) => format!(" in project {p}"),
        None => String::new(),
    }
}

impl CoreError {
    #[inline]
    pub fn is_capacity(&self) -> bool {
        matches!(self, CoreError::Capacity { .. })
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_project_scope() {
        let global = CoreError::Capacity {
            project: None,
            limit: 4,
        };
        assert_eq!(global.to_string(), "launcher at capacity (4 running)");

        let scoped = CoreError::Capacity {
            project: Some("shop".into()),
            limit: 1,
        };
        assert_eq!(
            scoped.to_string(),
            "launcher at capacity (1 running in project shop)"
        );
        assert!(scoped.is_capacity());
    }
}
