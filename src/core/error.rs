use thiserror::Error;

use super::types::JobStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("unsupported matrix size {0}x{0}: closed forms exist only up to 3x3")]
    UnsupportedSize(usize),

    #[error("singular matrix (|det| = {determinant:e})")]
    SingularMatrix { determinant: f64 },

    #[error("invalid covariance matrix: {0}")]
    InvalidCovariance(String),
}

impl LinalgError {
    pub(crate) fn shape(expected: (usize, usize), actual: (usize, usize)) -> Self {
        LinalgError::DimensionMismatch {
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        }
    }

    pub(crate) fn length(expected: usize, actual: usize) -> Self {
        LinalgError::DimensionMismatch {
            expected: format!("length {expected}"),
            actual: format!("length {actual}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizeError {
    #[error(transparent)]
    Linalg(#[from] LinalgError),

    #[error("invalid constraints: {0}")]
    InvalidConstraints(String),

    #[error("empty asset universe")]
    EmptyUniverse,

    #[error(
        "target return {target:.6} is not achievable (feasible range {min_achievable:.6}..={max_achievable:.6})"
    )]
    InfeasibleTarget {
        target: f64,
        min_achievable: f64,
        max_achievable: f64,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("invalid simulation parameters: {0}")]
    InvalidParameters(String),
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("simulation job '{0}' not found")]
    NotFound(String),

    #[error("simulation job '{0}' is already queued or running")]
    DuplicateJob(String),

    #[error("simulation job '{job_id}' has no result yet (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error("simulation job '{job_id}' failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("simulation jobs must be submitted from within a Tokio runtime")]
    NoRuntime,

    #[error("gave up polling simulation job '{job_id}' after {attempts} attempts")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("job store payload could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}
