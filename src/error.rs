//! Error taxonomy shared by the rollover, version store and request handlers.

use thiserror::Error;

/// Errors surfaced to clients. Every variant maps to one stable wire code.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or invalid input. Raised before storage is touched.
    #[error("{0}")]
    Validation(String),

    /// A referenced id does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Connection or query failure. Any open transaction has been rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A lifecycle routine refused to run (no open semester, corrupt snapshot).
    #[error("{0}")]
    Procedure(String),

    /// No workspace database has been selected yet.
    #[error("select a workspace first")]
    NoWorkspace,

    /// Backup bundle export or import failed.
    #[error("{0:#}")]
    Backup(anyhow::Error),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn procedure(message: impl Into<String>) -> Self {
        Self::Procedure(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "db_error",
            Self::Procedure(_) => "procedure_failed",
            Self::NoWorkspace => "no_workspace",
            Self::Backup(_) => "backup_failed",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
