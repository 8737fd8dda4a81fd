use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("failed to load {document}: {reason}")]
    Load { document: String, reason: String },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] Box<Error>),

    #[error("corrupt index entry '{id}': {reason}")]
    CorruptEntry { id: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Wrap a failure that happened while answering a query.
    pub fn retrieval(cause: Error) -> Self {
        match cause {
            Error::Retrieval(_) => cause,
            other => Error::Retrieval(Box::new(other)),
        }
    }

    /// Whether this error came from the persistence layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::CorruptEntry { .. })
    }
}

// Every redb error kind funnels into `Error::Storage`.
macro_rules! storage_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Storage(e.into())
                }
            }
        )*
    };
}

storage_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
