//! Multipart uploads.
//!
//! Parts are ordinary striped objects under their own backend oids. The
//! upload exists only in the multipart tables until completion, which
//! lays the parts out at their final offsets, inserts the assembled
//! object version and drops the upload rows in one transaction. Abort
//! drops the rows and reaps the part payloads.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use gatehouse_core::{InternalVersion, StoreInfo};
use gatehouse_metadata::{
    ListUploadsPage, ListUploadsQuery, MultipartUpload, ObjectKind, ObjectMeta, Part,
};

use crate::error::{GatewayError, Result};
use crate::objects::{PutObjectInput, PutObjectOutput};
use crate::util::{multipart_etag, unix_nanos, Md5Reader};
use crate::{Credential, Gateway};

pub const MAX_PART_NUMBER: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct ListPartsPage {
    pub parts: Vec<Part>,
    pub truncated: bool,
    pub next_part_number_marker: u32,
}

impl Gateway {
    pub async fn create_multipart_upload(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        input: PutObjectInput,
    ) -> Result<String> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;

        let upload_id = hex::encode(rand::random::<[u8; 16]>());
        let upload = MultipartUpload {
            bucket: bucket.name.clone(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            initiator_id: credential.user_id.clone(),
            owner_id: credential.user_id.clone(),
            initiated: Utc::now(),
            content_type: input.content_type,
            acl: input.acl,
            sse_type: input.sse_type,
            encryption_key: input.encryption_key,
            pool: self.write_pool().await?,
            storage_class: input.storage_class,
            attrs: input.custom_attributes,
        };
        self.store.create_multipart(&upload).await?;
        info!(bucket = bucket_name, key, upload_id = %upload_id, "multipart upload created");
        Ok(upload_id)
    }

    pub async fn upload_part<R>(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        reader: &mut R,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(GatewayError::InvalidArgument(format!(
                "part number must be between 1 and {MAX_PART_NUMBER}"
            )));
        }
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        let upload = self.store.get_multipart(bucket_name, key, upload_id).await?;

        let object_id = self.cluster.unique_object_name();
        let store_info = StoreInfo::Striped(self.config.geometry);
        let mut md5_reader = Md5Reader::new(reader);
        let written = self
            .driver
            .write(&upload.pool, &object_id, &store_info, 0, &mut md5_reader)
            .await?;
        let etag = md5_reader.hex_digest();

        let part = Part {
            part_number,
            size: written,
            object_id,
            offset: 0,
            etag: etag.clone(),
            last_modified: Utc::now(),
            iv: Vec::new(),
            store_info,
        };
        let replaced = self
            .store
            .put_multipart_part(bucket_name, key, upload_id, &part)
            .await?;

        // A re-uploaded part number orphans the previous payload.
        if let Some(old) = replaced {
            if let Err(e) = self
                .driver
                .delete(&upload.pool, &old.object_id, &old.store_info, old.size)
                .await
            {
                warn!(
                    bucket = bucket_name,
                    key,
                    part = old.part_number,
                    "failed to reap replaced part: {e}"
                );
            }
        }
        Ok(etag)
    }

    /// Assemble the uploaded parts into an object version. `parts` is the
    /// client's manifest: `(part_number, etag)` in ascending part order.
    pub async fn complete_multipart_upload(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<(u32, String)>,
    ) -> Result<PutObjectOutput> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        let upload = self.store.get_multipart(bucket_name, key, upload_id).await?;
        let uploaded = self.store.multipart_parts(bucket_name, key, upload_id).await?;

        if parts.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "completion manifest is empty".into(),
            ));
        }

        let mut assembled: BTreeMap<u32, Part> = BTreeMap::new();
        let mut offset = 0u64;
        let mut etags = Vec::with_capacity(parts.len());
        let mut previous = 0u32;
        for (part_number, etag) in &parts {
            if *part_number <= previous {
                return Err(GatewayError::InvalidPartOrder);
            }
            previous = *part_number;
            let mut part = uploaded
                .get(part_number)
                .cloned()
                .ok_or(GatewayError::InvalidPart(*part_number))?;
            if &part.etag != etag {
                return Err(GatewayError::InvalidPart(*part_number));
            }
            part.offset = offset;
            offset += part.size;
            etags.push(part.etag.clone());
            assembled.insert(*part_number, part);
        }
        let total_size = offset;
        let etag = multipart_etag(&etags)?;

        let now = Utc::now();
        let mut object = ObjectMeta {
            bucket: bucket.name.clone(),
            key: key.to_string(),
            version: InternalVersion::from_modified_nanos(unix_nanos(&now)),
            location: self.cluster.id().to_string(),
            pool: upload.pool.clone(),
            owner_id: upload.owner_id.clone(),
            size: total_size,
            object_id: String::new(),
            last_modified: now,
            etag: etag.clone(),
            content_type: if upload.content_type.is_empty() {
                "binary/octet-stream".to_string()
            } else {
                upload.content_type.clone()
            },
            custom_attributes: upload.attrs.clone(),
            acl: upload.acl.clone(),
            null_version: false,
            delete_marker: false,
            sse_type: upload.sse_type.clone(),
            encryption_key: upload.encryption_key.clone(),
            iv: Vec::new(),
            kind: ObjectKind::Multipart,
            storage_class: upload.storage_class,
            is_latest: true,
            store_info: StoreInfo::LegacyMonolithic,
            parts: assembled,
        };

        let version_id = self
            .commit_version_with_cleanup(&bucket, &mut object, Some(upload_id))
            .await?;

        self.cache.invalidate_object(bucket_name, key).await;
        self.cache.invalidate_bucket(bucket_name).await;
        info!(
            bucket = bucket_name,
            key,
            upload_id,
            size = total_size,
            "multipart upload completed"
        );
        Ok(PutObjectOutput {
            etag,
            version_id,
            size: total_size,
        })
    }

    pub async fn abort_multipart_upload(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        let upload = self.store.get_multipart(bucket_name, key, upload_id).await?;
        let parts = self.store.multipart_parts(bucket_name, key, upload_id).await?;

        let mut tx = self.store.begin().await?;
        self.store
            .delete_multipart(bucket_name, key, upload_id, &mut tx)
            .await?;
        tx.commit().await?;

        for part in parts.values() {
            if let Err(e) = self
                .driver
                .delete(&upload.pool, &part.object_id, &part.store_info, part.size)
                .await
            {
                warn!(
                    bucket = bucket_name,
                    key,
                    part = part.part_number,
                    "failed to reap aborted part: {e}"
                );
            }
        }
        info!(bucket = bucket_name, key, upload_id, "multipart upload aborted");
        Ok(())
    }

    pub async fn list_parts(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
    ) -> Result<ListPartsPage> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        self.store.get_multipart(bucket_name, key, upload_id).await?;
        let all = self.store.multipart_parts(bucket_name, key, upload_id).await?;

        let mut parts: Vec<Part> = all
            .into_values()
            .filter(|p| p.part_number > part_number_marker)
            .collect();
        let truncated = parts.len() > max_parts;
        parts.truncate(max_parts);
        let next_part_number_marker = parts.last().map(|p| p.part_number).unwrap_or(0);
        Ok(ListPartsPage {
            parts,
            truncated,
            next_part_number_marker,
        })
    }

    pub async fn list_multipart_uploads(
        &self,
        credential: &Credential,
        bucket_name: &str,
        query: &ListUploadsQuery,
    ) -> Result<ListUploadsPage> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_read_access(&bucket, credential)?;
        Ok(self.store.list_multipart_uploads(bucket_name, query).await?)
    }
}
