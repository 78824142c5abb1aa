//! Queue errors.

use herald_common::AppError;
use thiserror::Error;

/// Errors raised by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// A stored job could not be encoded or decoded.
    #[error("Job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Job state does not allow the operation.
    #[error("Job {0} is not active")]
    NotActive(String),
}

/// Result type for queue backend operations.
pub type QueueResult<T> = Result<T, QueueError>;

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_queue_app_error() {
        let err: AppError = QueueError::NotActive("job_1".to_string()).into();
        assert_eq!(err.error_code(), "QUEUE_ERROR");
        assert_eq!(err.to_string(), "Queue error: Job job_1 is not active");
    }
}
