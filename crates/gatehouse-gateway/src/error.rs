//! Gateway error taxonomy.
//!
//! Errors bubble by value from every layer; the HTTP boundary is the one
//! place that renders them, using [`GatewayError::status_code`] and
//! [`GatewayError::s3_code`] for the standard S3 error XML.

use thiserror::Error;

use gatehouse_cluster::ClusterError;
use gatehouse_core::CoreError;
use gatehouse_metadata::MetadataError;
use gatehouse_storage::StorageError;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("No such bucket: {0}")]
    NoSuchBucket(String),

    #[error("No such key: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },

    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    #[error("Bucket {0} has no lifecycle configuration")]
    NoSuchBucketLifecycle(String),

    #[error("Bucket {0} has no CORS configuration")]
    NoSuchBucketCors(String),

    #[error("Bucket {0} has no policy")]
    NoSuchBucketPolicy(String),

    #[error("Bucket {0} has no website configuration")]
    NoSuchBucketWebsite(String),

    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),

    #[error("Bucket already owned by you: {0}")]
    BucketAlreadyOwnedByYou(String),

    #[error("Bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid bucket name {name:?}: {reason}")]
    InvalidBucketName { name: String, reason: String },

    #[error("Invalid version id")]
    InvalidVersionId,

    #[error("Invalid continuation token")]
    InvalidContinuationToken,

    #[error("Invalid part {0}")]
    InvalidPart(u32),

    #[error("Parts must be listed in ascending order")]
    InvalidPartOrder,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Requested range is not satisfiable")]
    InvalidRange,

    #[error("Append position {got} does not match object length {expected}")]
    InvalidPosition { expected: u64, got: u64 },

    #[error("Metadata error: {0}")]
    Metadata(MetadataError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status the boundary layer maps this error to.
    pub fn status_code(&self) -> u16 {
        use GatewayError::*;
        match self {
            NoSuchBucket(_) | NoSuchKey { .. } | NoSuchUpload(_) | NoSuchBucketLifecycle(_)
            | NoSuchBucketCors(_) | NoSuchBucketPolicy(_) | NoSuchBucketWebsite(_) => 404,
            AccessDenied => 403,
            BucketAlreadyExists(_) | BucketAlreadyOwnedByYou(_) | BucketNotEmpty(_) => 409,
            InvalidBucketName { .. } | InvalidVersionId | InvalidContinuationToken
            | InvalidPart(_) | InvalidPartOrder | InvalidArgument(_) | InvalidPosition { .. } => {
                400
            }
            InvalidRange => 416,
            Metadata(_) | Storage(_) | Cluster(_) | Internal(_) => 500,
        }
    }

    /// The `Code` element of the S3 error body.
    pub fn s3_code(&self) -> &'static str {
        use GatewayError::*;
        match self {
            NoSuchBucket(_) => "NoSuchBucket",
            NoSuchKey { .. } => "NoSuchKey",
            NoSuchUpload(_) => "NoSuchUpload",
            NoSuchBucketLifecycle(_) => "NoSuchLifecycleConfiguration",
            NoSuchBucketCors(_) => "NoSuchCORSConfiguration",
            NoSuchBucketPolicy(_) => "NoSuchBucketPolicy",
            NoSuchBucketWebsite(_) => "NoSuchWebsiteConfiguration",
            BucketAlreadyExists(_) => "BucketAlreadyExists",
            BucketAlreadyOwnedByYou(_) => "BucketAlreadyOwnedByYou",
            BucketNotEmpty(_) => "BucketNotEmpty",
            AccessDenied => "AccessDenied",
            InvalidBucketName { .. } => "InvalidBucketName",
            InvalidVersionId => "InvalidArgument",
            InvalidContinuationToken => "InvalidContinuationToken",
            InvalidPart(_) => "InvalidPart",
            InvalidPartOrder => "InvalidPartOrder",
            InvalidArgument(_) => "InvalidArgument",
            InvalidRange => "InvalidRange",
            InvalidPosition { .. } => "PositionNotEqualToLength",
            Metadata(_) | Storage(_) | Cluster(_) | Internal(_) => "InternalError",
        }
    }
}

impl From<MetadataError> for GatewayError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NoSuchBucket(name) => GatewayError::NoSuchBucket(name),
            MetadataError::NoSuchKey { bucket, key } => GatewayError::NoSuchKey { bucket, key },
            MetadataError::NoSuchUpload { upload_id, .. } => GatewayError::NoSuchUpload(upload_id),
            other => GatewayError::Metadata(other),
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        GatewayError::from(MetadataError::from(e))
    }
}

impl From<CoreError> for GatewayError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidVersionId => GatewayError::InvalidVersionId,
            CoreError::InvalidContinuationToken => GatewayError::InvalidContinuationToken,
            CoreError::InvalidLifecycleConfiguration(reason) => GatewayError::InvalidArgument(reason),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}
