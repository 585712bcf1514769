use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Root directory is not initialized")]
    RootNotInitialized,
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Workspace state error: {0}")]
    State(String),
    #[error("{0}")]
    Resource(String),
    #[error("Permission denied: {0}")]
    Permission(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Failure category reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    State,
    Resource,
    Permission,
    Conflict,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) | AppError::RootNotInitialized => ErrorKind::NotFound,
            AppError::State(_) | AppError::Db(_) | AppError::Serde(_) => ErrorKind::State,
            AppError::Resource(_) | AppError::Io(_) => ErrorKind::Resource,
            AppError::Permission(_) => ErrorKind::Permission,
            AppError::Conflict(_) => ErrorKind::Conflict,
        }
    }
}

/// Serializable error returned by every command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<AppError> for CommandError {
    fn from(err: AppError) -> Self {
        CommandError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
