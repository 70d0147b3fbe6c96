use sea_orm::DbErr;
use thiserror::Error;

/// Failure taxonomy for the engine's lifecycle and verification operations.
///
/// Expected business outcomes of a check-in (out of range, duplicate, invalid
/// code) are not errors; they travel as `CheckInResult` and callers branch on
/// the status. Only input problems, missing rows, illegal transitions and
/// infrastructure failures surface here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Db(#[from] DbErr),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, AppError::InvalidState(_))
    }
}
