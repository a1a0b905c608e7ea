//! Error taxonomy for the dispatch engine.

use thiserror::Error;

/// Failures obtaining a distance/time matrix.
///
/// `CapacityExceeded` is a local precondition failure raised before any
/// remote call. The rest describe the single remote attempt; retry and
/// backoff are the caller's responsibility.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("point count {points} exceeds routing service ceiling {max}")]
    CapacityExceeded { points: usize, max: usize },
    #[error("routing service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("routing service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("routing service response malformed: {0}")]
    Malformed(String),
}

/// Failures inside the constrained solver. These never escape
/// `RouteOptimizer::optimize`; they trigger the greedy fallback instead.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("matrix covers {got} nodes but instance needs {expected}")]
    MatrixShape { expected: usize, got: usize },
    #[error("solver instance has no vehicles")]
    NoVehicles,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown tenant {0}")]
    UnknownTenant(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error returned by the engine's public operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Operational failures worth retrying, as opposed to caller errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Matrix(
                MatrixError::Request(_) | MatrixError::Status { .. } | MatrixError::Malformed(_)
            ) | DispatchError::Store(StoreError::Unavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_exceeded_is_not_retryable() {
        let err = DispatchError::Matrix(MatrixError::CapacityExceeded { points: 200, max: 100 });
        assert!(!err.is_retryable());
    }

    #[test]
    fn upstream_status_is_retryable() {
        let err = DispatchError::Matrix(MatrixError::Status {
            status: 502,
            body: "bad gateway".into(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_request_is_caller_error() {
        assert!(!DispatchError::InvalidRequest("no vehicles".into()).is_retryable());
    }
}
