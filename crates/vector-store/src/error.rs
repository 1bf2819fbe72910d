use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Batch mismatch: {vectors} vectors for {entries} metadata entries")]
    BatchMismatch { vectors: usize, entries: usize },

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}
