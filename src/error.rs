use thiserror::Error;

/// All fallible operations in this crate return `Result<T, StoreError>`. Variants
/// are ordered roughly by specificity, mirroring how callers are expected to
/// match on them (a missing file is a different situation than a corrupt one).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database already exists at {0}")]
    DbAlreadyExists(String),

    #[error("no database at {0}")]
    DbNoExists(String),

    #[error("database at {0} is not a valid store (magic mismatch)")]
    DbInvalid(String),

    #[error("record {0} does not match the stored salt")]
    InvalidRecord(String),

    #[error("record {0} has already been deleted")]
    AlreadyDeleted(String),

    #[error("database is closing, no further operations are accepted")]
    DatabaseClosing,

    #[error("database is locked by another transaction")]
    DatabaseLocked,

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("engine does not support this operation")]
    UnsupportedEngine,

    #[error("payload size must be at least {min} bytes, got {got}")]
    PayloadTooSmall { min: u32, got: u32 },

    #[error("page {0} is not the head of an internal chain")]
    Corruption(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
