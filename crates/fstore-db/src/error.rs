use std::path::PathBuf;

use fstore_fs::FsError;
use fstore_schema::SchemaError;

/// Document store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("store not found: {path}")]
    NotFound { path: PathBuf },

    #[error(
        "wrong store format: application_id {application_id:#010x}, user_version {user_version}"
    )]
    WrongFormat {
        application_id: u32,
        user_version: u32,
    },

    #[error("element validation failed: {}", flaws.join("; "))]
    ValidationFailed { flaws: Vec<String> },

    #[error("invalid element: {reason}")]
    InvalidElement { reason: String },

    #[error("no element with id {id}")]
    ElementNotFound { id: String },

    #[error("corrupt element {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("unsupported query: {reason}")]
    UnsupportedQuery { reason: String },

    #[error("invalid match pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
