//! Core error taxonomy (kinds, not types) per the error-handling design.

use thiserror::Error;

/// The full set of error kinds core operations can return.
///
/// Variants intentionally mirror gRPC-style status kinds rather than
/// exposing HTTP concerns directly; [`SnapDogError::http_status_hint`]
/// is the only place that mapping is materialised, for an out-of-scope
/// HTTP controller to consult.
#[derive(Debug, Error, Clone)]
pub enum SnapDogError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SnapDogError {
    pub fn kind(&self) -> &'static str {
        match self {
            SnapDogError::InvalidArgument(_) => "InvalidArgument",
            SnapDogError::NotFound(_) => "NotFound",
            SnapDogError::FailedPrecondition(_) => "FailedPrecondition",
            SnapDogError::Unavailable(_) => "Unavailable",
            SnapDogError::DeadlineExceeded(_) => "DeadlineExceeded",
            SnapDogError::Cancelled(_) => "Cancelled",
            SnapDogError::Internal(_) => "Internal",
        }
    }

    /// The HTTP status an out-of-scope controller layer would map this to.
    pub fn http_status_hint(&self) -> u16 {
        match self {
            SnapDogError::InvalidArgument(_) => 400,
            SnapDogError::NotFound(_) => 404,
            SnapDogError::FailedPrecondition(_) => 409,
            SnapDogError::Unavailable(_) => 503,
            SnapDogError::DeadlineExceeded(_) => 504,
            SnapDogError::Cancelled(_) => 499,
            SnapDogError::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, SnapDogError>;
