use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("No such bucket: {0}")]
    NoSuchBucket(String),

    #[error("No such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("No such upload: {bucket}/{key} {upload_id}")]
    NoSuchUpload {
        bucket: String,
        key: String,
        upload_id: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Metadata invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Core(#[from] gatehouse_core::CoreError),
}

impl From<sqlx::migrate::MigrateError> for MetadataError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MetadataError::Migration(e.to_string())
    }
}
