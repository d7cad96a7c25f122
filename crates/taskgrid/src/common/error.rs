use thiserror::Error;

use crate::{HostId, TaskId};

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Invalid category specification: {0}")]
    InvalidSpec(String),
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),
    #[error("Task {task_id} failed on host {host} with return code {return_code}")]
    TaskExecutionFailure {
        task_id: TaskId,
        host: HostId,
        return_code: i32,
    },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error: {0}")]
    GenericError(String),
}

impl GridError {
    /// Errors after which the same operation may succeed later without
    /// any change made by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::WorkerUnavailable(_) | GridError::TaskExecutionFailure { .. }
        )
    }
}

impl From<String> for GridError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for GridError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}

pub fn invalid_spec<T>(message: String) -> crate::Result<T> {
    Err(GridError::InvalidSpec(message))
}
