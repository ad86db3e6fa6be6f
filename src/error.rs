use thiserror::Error;

use crate::model::SessionStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Requested routine, day or session does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// First failing rule of a set-log payload
    #[error("invalid set log: {0}")]
    Validation(String),

    /// Routine template that cannot be tracked as given
    #[error("invalid routine: {0}")]
    InvalidRoutine(String),

    #[error("cannot move session from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("save failed: {0}")]
    Save(String),
}
