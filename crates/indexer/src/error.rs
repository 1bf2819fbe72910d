use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] logsift_vector_store::VectorStoreError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Embedding dimension mismatch: config expects {expected}, {source_name} produces {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        source_name: &'static str,
    },

    #[error("Log source error: {0}")]
    Source(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("work queue closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}
