/// Evidence filesystem errors.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {name}")]
    NotFound { name: String },

    #[error("entry already exists: {name}")]
    AlreadyExists { name: String },

    #[error("is a directory: {name}")]
    IsADirectory { name: String },

    #[error("not a directory: {name}")]
    NotADirectory { name: String },

    #[error("{operation} is not supported by the evidence filesystem")]
    NotImplemented { operation: &'static str },

    #[error("write handle for {name} is already closed")]
    HandleClosed { name: String },
}

impl FsError {
    /// True when the error merely reports that an entry does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
