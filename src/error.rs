// src/error.rs

use thiserror::Error;

/// Core error types for Strata
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors. Fatal once the execution loop has started.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Database was written by a newer release
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    /// The solver could not satisfy the request
    #[error("Unsatisfied dependency: {0}")]
    UnsatisfiedDependency(String),

    /// Pre-flight simulation found file collisions or space deficits
    #[error("Transaction check failed: {0}")]
    TransactionCheckFailed(String),

    /// Artifact could not be fetched
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Artifact content does not match the expected hash
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Scriptlet could not be run or exited unsuccessfully
    #[error("Scriptlet error: {0}")]
    ScriptletError(String),

    /// Scriptlet exceeded its wall-clock timeout and was killed
    #[error("Scriptlet {label} timed out after {seconds} seconds")]
    ScriptTimeout { label: String, seconds: u64 },

    /// A single action failed during execution
    #[error("Action {action} failed: {reason}")]
    ActionError { action: String, reason: String },

    /// Root lock could not be acquired
    #[error("Lock error: {0}")]
    LockError(String),

    /// Parse errors (versions, relations, embedded scripts)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Package archive could not be read
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// Invalid path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path attempts to escape its root
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),
}

impl Error {
    /// Errors after which database integrity can no longer be assumed
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Database(_) | Error::SchemaTooNew { .. })
    }

    /// Errors raised by stages that run before anything on the target is touched
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self,
            Error::UnsatisfiedDependency(_)
                | Error::TransactionCheckFailed(_)
                | Error::DownloadError(_)
                | Error::ChecksumMismatch { .. }
                | Error::LockError(_)
                | Error::Config(_)
                | Error::SchemaTooNew { .. }
                | Error::DatabaseNotFound(_)
        )
    }
}

/// Result type alias using Strata's Error type
pub type Result<T> = std::result::Result<T, Error>;
