use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid stripe geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid store info: {0}")]
    InvalidStoreInfo(String),

    #[error("Invalid version id")]
    InvalidVersionId,

    #[error("Invalid continuation token")]
    InvalidContinuationToken,

    #[error("Invalid lifecycle configuration: {0}")]
    InvalidLifecycleConfiguration(String),
}
