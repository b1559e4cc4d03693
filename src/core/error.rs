use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrateError {
    #[error("Document '{0}' not found")]
    NotFound(String),

    #[error("Revision conflict on '{id}': expected {expected}, actual {actual}")]
    Conflict {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Stale version on '{id}': expected {expected}, found {found}")]
    StaleVersion {
        id: String,
        expected: u32,
        found: String,
    },

    #[error("Malformed document '{id}': {reason}")]
    MalformedDocument { id: String, reason: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Index '{0}' not found")]
    UnknownIndex(String),

    #[error("Invalid index definition: {0}")]
    InvalidIndex(String),

    #[error("Invalid migration plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDocument {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Only revision conflicts are worth retrying against a fresh read.
    pub fn is_retryable(&self) -> bool {
        classify_conflict(self) == Some(ConflictKind::RevisionMismatch)
    }

    /// Errors that mean the store itself cannot be reached. These abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Concurrency conflicts a document write can run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Another writer changed the document after it was read.
    RevisionMismatch,
    /// The document was deleted after it was read.
    Vanished,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RevisionMismatch => write!(f, "revision_mismatch"),
            Self::Vanished => write!(f, "vanished"),
        }
    }
}

/// Classifies a store error as a known concurrency conflict, if it is one.
pub fn classify_conflict(err: &MigrateError) -> Option<ConflictKind> {
    match err {
        MigrateError::Conflict { .. } => Some(ConflictKind::RevisionMismatch),
        MigrateError::NotFound(_) => Some(ConflictKind::Vanished),
        _ => None,
    }
}

impl From<serde_json::Error> for MigrateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
