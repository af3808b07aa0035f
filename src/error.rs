//! Service-level error type shared by the dosing, medication and background
//! layers. Repository and notification errors convert into it with `?`.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::notify::NotifyError;

#[derive(Error, Debug)]
pub enum CareError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Transient I/O failure: {0}")]
    TransientIo(String),
}

impl CareError {
    /// Errors worth retrying on the next cycle without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_) | Self::Conflict(_))
    }
}

impl From<DatabaseError> for CareError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => Self::NotFound { entity_type, id },
            DatabaseError::ConstraintViolation(msg) => Self::Validation(msg),
            other => Self::TransientIo(other.to_string()),
        }
    }
}

impl From<NotifyError> for CareError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::ChannelDisabled(_) => Self::Configuration(err.to_string()),
            other => Self::TransientIo(other.to_string()),
        }
    }
}
