use thiserror::Error;

/// Error types for the lm-calibrate library.
#[derive(Error, Debug)]
pub enum SolverError {
    /// The objective function could not produce values for a parameter vector.
    #[error("Objective evaluation failed: {0}")]
    ObjectiveEvaluation(String),

    /// Error indicating a mismatch in vector or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Invalid solver configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool for the parallel Jacobian could not be created.
    #[error("Worker pool error: {0}")]
    ThreadPool(String),

    /// The objective does not provide the requested functionality.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for lm-calibrate operations.
pub type Result<T> = std::result::Result<T, SolverError>;

/// Objective bodies report failures as messages.
impl From<String> for SolverError {
    fn from(s: String) -> Self {
        SolverError::ObjectiveEvaluation(s)
    }
}

impl From<&str> for SolverError {
    fn from(s: &str) -> Self {
        SolverError::ObjectiveEvaluation(s.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for SolverError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        SolverError::ThreadPool(err.to_string())
    }
}
