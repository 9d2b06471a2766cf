use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Cluster(#[from] gatehouse_cluster::ClusterError),

    #[error(transparent)]
    Core(#[from] gatehouse_core::CoreError),

    #[error("Source read error: {0}")]
    Source(#[from] std::io::Error),

    #[error("Corrupt read of {oid}: asked for {want} bytes, backend reported {got}")]
    Corrupt { oid: String, want: u64, got: u64 },

    #[error("Backend object {oid} ended early at offset {offset}")]
    UnexpectedEof { oid: String, offset: u64 },

    #[error("SSE error: {0}")]
    Sse(String),

    #[error("Internal storage error: {0}")]
    Internal(String),
}
