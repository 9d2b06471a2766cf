//! Object operations: PUT, GET, HEAD, DELETE, copy, append and listing.
//!
//! The PUT path writes payload bytes first and inserts metadata only after
//! the driver reports success, so a failed or cancelled upload never
//! becomes visible; its backend garbage is unreferenced and reaped later.
//! All metadata effects of one operation (insert, latest flip, usage
//! delta) commit in a single transaction.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tokio::io::{duplex, AsyncRead, AsyncWriteExt};
use tracing::{info, warn};

use gatehouse_core::{InternalVersion, StoreInfo, NULL_VERSION_ID};
use gatehouse_metadata::{
    Acl, Bucket, ListObjectsPage, ListObjectsQuery, MetadataError, ObjectKind, ObjectMeta,
    StorageClass, VersionQuery, VersioningState,
};
use gatehouse_storage::{MultipartReader, ObjectReader, SSE_KEY_LEN};

use crate::error::{GatewayError, Result};
use crate::util::{unix_nanos, Md5Reader};
use crate::{Credential, Gateway};

#[derive(Debug, Clone, Default)]
pub struct PutObjectInput {
    pub content_type: String,
    pub acl: Acl,
    pub custom_attributes: HashMap<String, String>,
    pub storage_class: StorageClass,
    /// Envelope-wrapped key material from the SSE boundary; stored, never
    /// interpreted here.
    pub sse_type: String,
    pub encryption_key: Vec<u8>,
    pub iv: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PutObjectOutput {
    pub etag: String,
    /// `None` on unversioned buckets, the null sentinel on suspended
    /// buckets, the encoded version id on enabled buckets.
    pub version_id: Option<String>,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GetObjectRequest {
    pub version_id: Option<String>,
    /// `(offset, length)` of the ranged read; the whole object otherwise.
    pub range: Option<(u64, u64)>,
    /// Unwrapped SSE key from the KMS boundary, when the object is
    /// encrypted.
    pub sse_key: Option<[u8; SSE_KEY_LEN]>,
}

pub struct GetObjectOutput {
    pub meta: ObjectMeta,
    pub version_id: String,
    pub reader: Box<dyn ObjectReader>,
}

impl std::fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("meta", &self.meta)
            .field("version_id", &self.version_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct DeleteObjectOutput {
    pub delete_marker: bool,
    pub version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub key: String,
    pub version_id: Option<String>,
    pub delete_marker: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppendObjectOutput {
    pub etag: String,
    pub next_position: u64,
}

impl Gateway {
    pub async fn put_object<R>(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        input: PutObjectInput,
        reader: &mut R,
    ) -> Result<PutObjectOutput>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;

        let pool = self.write_pool().await?;
        let object_id = self.cluster.unique_object_name();
        let store_info = StoreInfo::Striped(self.config.geometry);

        let mut md5_reader = Md5Reader::new(reader);
        let written = self
            .driver
            .write(&pool, &object_id, &store_info, 0, &mut md5_reader)
            .await?;
        let etag = md5_reader.hex_digest();

        let now = Utc::now();
        let mut object = ObjectMeta {
            bucket: bucket.name.clone(),
            key: key.to_string(),
            version: InternalVersion::from_modified_nanos(unix_nanos(&now)),
            location: self.cluster.id().to_string(),
            pool,
            owner_id: credential.user_id.clone(),
            size: written,
            object_id,
            last_modified: now,
            etag: etag.clone(),
            content_type: content_type_or_default(input.content_type),
            custom_attributes: input.custom_attributes,
            acl: input.acl,
            null_version: false,
            delete_marker: false,
            sse_type: input.sse_type,
            encryption_key: input.encryption_key,
            iv: input.iv,
            kind: ObjectKind::Normal,
            storage_class: input.storage_class,
            is_latest: true,
            store_info,
            parts: BTreeMap::new(),
        };

        let version_id = self.commit_new_version(&bucket, &mut object).await?;
        self.cache.invalidate_object(bucket_name, key).await;
        self.cache.invalidate_bucket(bucket_name).await;
        info!(bucket = bucket_name, key, size = written, "put object");
        Ok(PutObjectOutput {
            etag,
            version_id,
            size: written,
        })
    }

    pub async fn get_object(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        request: GetObjectRequest,
    ) -> Result<GetObjectOutput> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_read_access(&bucket, credential)?;

        let meta = self
            .get_object_meta(bucket_name, key, request.version_id.as_deref())
            .await?;
        if meta.delete_marker {
            return Err(GatewayError::NoSuchKey {
                bucket: bucket_name.to_string(),
                key: key.to_string(),
            });
        }

        let (offset, length) = match request.range {
            None => (0, meta.size),
            Some((offset, _)) if offset >= meta.size && meta.size > 0 => {
                return Err(GatewayError::InvalidRange)
            }
            Some((offset, length)) => (offset, length.min(meta.size - offset.min(meta.size))),
        };

        let reader: Box<dyn ObjectReader> = if meta.is_multipart() {
            Box::new(MultipartReader::new(
                self.driver.clone(),
                meta.clone(),
                offset,
                length,
                request.sse_key,
            ))
        } else if let Some(sse_key) = request.sse_key.filter(|_| !meta.sse_type.is_empty()) {
            let aligned = gatehouse_storage::sse::aligned_offset(offset);
            let inner = self
                .driver
                .read(
                    &meta.pool,
                    &meta.object_id,
                    &meta.store_info,
                    aligned,
                    length + (offset - aligned),
                )
                .await?;
            Box::new(gatehouse_storage::AlignedDecryptReader::new(
                inner, &sse_key, &meta.iv, offset,
            )?)
        } else {
            self.driver
                .read(&meta.pool, &meta.object_id, &meta.store_info, offset, length)
                .await?
        };

        Ok(GetObjectOutput {
            version_id: self.version_id_string(&meta),
            meta,
            reader,
        })
    }

    /// HEAD: the latest (or addressed) version's metadata, with delete
    /// markers translated to NoSuchKey.
    pub async fn head_object(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(ObjectMeta, String)> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_read_access(&bucket, credential)?;
        let meta = match version_id {
            None => self.cache.latest_object(&self.store, bucket_name, key).await?,
            Some(_) => self.get_object_meta(bucket_name, key, version_id).await?,
        };
        if meta.delete_marker {
            return Err(GatewayError::NoSuchKey {
                bucket: bucket_name.to_string(),
                key: key.to_string(),
            });
        }
        let version_id = self.version_id_string(&meta);
        Ok((meta, version_id))
    }

    /// Fetch one version row. With no version id this is the newest row
    /// regardless of its delete-marker flag; GET/HEAD callers filter.
    pub async fn get_object_meta(
        &self,
        bucket_name: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectMeta> {
        let query = self.resolve_version_query(version_id)?;
        Ok(self.store.get_object(bucket_name, key, query).await?)
    }

    pub async fn delete_object(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<DeleteObjectOutput> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;

        let out = match version_id {
            Some(vid) => self.delete_exact_version(&bucket, key, vid).await?,
            None => match bucket.versioning {
                VersioningState::Disabled => self.delete_unversioned(&bucket, key).await?,
                VersioningState::Enabled | VersioningState::Suspended => {
                    self.insert_delete_marker(&bucket, key).await?
                }
            },
        };
        self.cache.invalidate_object(bucket_name, key).await;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(out)
    }

    pub async fn delete_objects(
        &self,
        credential: &Credential,
        bucket_name: &str,
        objects: Vec<(String, Option<String>)>,
    ) -> Result<Vec<DeleteResult>> {
        let mut results = Vec::with_capacity(objects.len());
        for (key, version_id) in objects {
            match self
                .delete_object(credential, bucket_name, &key, version_id.as_deref())
                .await
            {
                Ok(out) => results.push(DeleteResult {
                    key,
                    version_id: out.version_id,
                    delete_marker: out.delete_marker,
                    error: None,
                }),
                Err(e) => results.push(DeleteResult {
                    key,
                    version_id,
                    delete_marker: false,
                    error: Some(e.s3_code().to_string()),
                }),
            }
        }
        Ok(results)
    }

    pub async fn copy_object(
        &self,
        credential: &Credential,
        source_bucket: &str,
        source_key: &str,
        source_version_id: Option<&str>,
        target_bucket: &str,
        target_key: &str,
        input: PutObjectInput,
    ) -> Result<PutObjectOutput> {
        let source = self
            .get_object(
                credential,
                source_bucket,
                source_key,
                GetObjectRequest {
                    version_id: source_version_id.map(str::to_string),
                    ..Default::default()
                },
            )
            .await?;
        let expected = source.meta.size;
        let mut reader = source.reader;

        let (mut sink, mut body) = duplex(64 << 10);
        let pump = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 << 10];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                sink.write_all(&buf[..n])
                    .await
                    .map_err(gatehouse_storage::StorageError::Source)?;
            }
            Ok::<(), gatehouse_storage::StorageError>(())
        });

        let out = self
            .put_object(credential, target_bucket, target_key, input, &mut body)
            .await?;
        match pump.await {
            Ok(Ok(())) if out.size == expected => Ok(out),
            pump_result => {
                // The copy came up short; retract the version we just wrote.
                warn!(
                    source = %format!("{source_bucket}/{source_key}"),
                    written = out.size,
                    expected,
                    "copy did not transfer the full source, retracting"
                );
                let _ = self
                    .delete_object(
                        credential,
                        target_bucket,
                        target_key,
                        out.version_id.as_deref(),
                    )
                    .await;
                match pump_result {
                    Ok(Err(e)) => Err(e.into()),
                    Err(join) => Err(GatewayError::Internal(join.to_string())),
                    Ok(Ok(())) => Err(GatewayError::Internal(
                        "copy transferred fewer bytes than the source holds".into(),
                    )),
                }
            }
        }
    }

    /// Append to (or create) an appendable object. Appendable objects live
    /// on the legacy monolithic path and keep their version across
    /// appends.
    pub async fn append_object<R>(
        &self,
        credential: &Credential,
        bucket_name: &str,
        key: &str,
        position: u64,
        input: PutObjectInput,
        reader: &mut R,
    ) -> Result<AppendObjectOutput>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        if bucket.is_versioned() {
            return Err(GatewayError::InvalidArgument(
                "append is only supported on unversioned buckets".into(),
            ));
        }

        let existing = match self
            .store
            .get_object(bucket_name, key, VersionQuery::Latest)
            .await
        {
            Ok(o) => Some(o),
            Err(MetadataError::NoSuchKey { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            None => {
                if position != 0 {
                    return Err(GatewayError::InvalidPosition {
                        expected: 0,
                        got: position,
                    });
                }
                let pool = self.write_pool().await?;
                let object_id = self.cluster.unique_object_name();
                let store_info = StoreInfo::LegacyMonolithic;
                let mut md5_reader = Md5Reader::new(reader);
                let written = self
                    .driver
                    .write(&pool, &object_id, &store_info, 0, &mut md5_reader)
                    .await?;
                let etag = md5_reader.hex_digest();
                let now = Utc::now();
                let mut object = ObjectMeta {
                    bucket: bucket.name.clone(),
                    key: key.to_string(),
                    version: InternalVersion::from_modified_nanos(unix_nanos(&now)),
                    location: self.cluster.id().to_string(),
                    pool,
                    owner_id: credential.user_id.clone(),
                    size: written,
                    object_id,
                    last_modified: now,
                    etag: etag.clone(),
                    content_type: content_type_or_default(input.content_type),
                    custom_attributes: input.custom_attributes,
                    acl: input.acl,
                    null_version: false,
                    delete_marker: false,
                    sse_type: String::new(),
                    encryption_key: Vec::new(),
                    iv: Vec::new(),
                    kind: ObjectKind::Appendable,
                    storage_class: input.storage_class,
                    is_latest: true,
                    store_info,
                    parts: BTreeMap::new(),
                };
                self.commit_new_version(&bucket, &mut object).await?;
                self.cache.invalidate_object(bucket_name, key).await;
                self.cache.invalidate_bucket(bucket_name).await;
                Ok(AppendObjectOutput {
                    etag,
                    next_position: written,
                })
            }
            Some(object) => {
                if object.kind != ObjectKind::Appendable {
                    return Err(GatewayError::InvalidArgument(
                        "object is not appendable".into(),
                    ));
                }
                if position != object.size {
                    return Err(GatewayError::InvalidPosition {
                        expected: object.size,
                        got: position,
                    });
                }
                let mut md5_reader = Md5Reader::new(reader);
                let written = self
                    .driver
                    .write(
                        &object.pool,
                        &object.object_id,
                        &object.store_info,
                        position,
                        &mut md5_reader,
                    )
                    .await?;
                let etag = md5_reader.hex_digest();
                let now = Utc::now();
                self.store
                    .update_append(
                        bucket_name,
                        key,
                        object.version,
                        object.size + written,
                        &etag,
                        unix_nanos(&now),
                    )
                    .await?;
                let mut tx = self.store.begin().await?;
                self.store
                    .update_usage(bucket_name, written as i64, &mut tx)
                    .await?;
                tx.commit().await?;
                self.cache.invalidate_object(bucket_name, key).await;
                self.cache.invalidate_bucket(bucket_name).await;
                Ok(AppendObjectOutput {
                    etag,
                    next_position: object.size + written,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    pub async fn list_objects(
        &self,
        credential: &Credential,
        bucket_name: &str,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<ListObjectsPage> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_read_access(&bucket, credential)?;
        let q = ListObjectsQuery {
            prefix: prefix.to_string(),
            delimiter: delimiter.to_string(),
            marker: marker.to_string(),
            version_id_marker: None,
            max_keys,
            versioned: false,
            with_delete_markers: false,
        };
        Ok(self
            .store
            .list_objects(bucket_name, bucket.is_versioned(), &q)
            .await?)
    }

    /// ListObjectsV2: the marker travels as an opaque encrypted token.
    /// Returns the page and, when truncated, the next token.
    pub async fn list_objects_v2(
        &self,
        credential: &Credential,
        bucket_name: &str,
        prefix: &str,
        delimiter: &str,
        continuation_token: Option<&str>,
        start_after: &str,
        max_keys: usize,
    ) -> Result<(ListObjectsPage, Option<String>)> {
        let marker = match continuation_token {
            Some(token) => self.tokens.decode(token)?,
            None => start_after.to_string(),
        };
        let page = self
            .list_objects(credential, bucket_name, prefix, delimiter, &marker, max_keys)
            .await?;
        let next_token = page
            .truncated
            .then(|| self.tokens.encode(&page.next_marker));
        Ok((page, next_token))
    }

    pub async fn list_object_versions(
        &self,
        credential: &Credential,
        bucket_name: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        version_id_marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ListObjectsPage> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_read_access(&bucket, credential)?;

        let version_cursor = match version_id_marker {
            None | Some("") => None,
            Some(NULL_VERSION_ID) => {
                // Resolve the null sentinel through the null-version row.
                let null_row = self
                    .store
                    .get_object(bucket_name, key_marker, VersionQuery::Null)
                    .await?;
                Some(null_row.version)
            }
            Some(vid) => Some(self.versions.decode(vid)?),
        };

        let q = ListObjectsQuery {
            prefix: prefix.to_string(),
            delimiter: delimiter.to_string(),
            marker: key_marker.to_string(),
            version_id_marker: version_cursor,
            max_keys,
            versioned: true,
            with_delete_markers: true,
        };
        Ok(self
            .store
            .list_objects(bucket_name, bucket.is_versioned(), &q)
            .await?)
    }

    /// The lifecycle engine's listing: the latest view with keys whose
    /// latest row is a delete marker included, no credential involved.
    pub async fn list_objects_internal(
        &self,
        bucket: &Bucket,
        prefix: &str,
        marker: &str,
        max_keys: usize,
        with_delete_markers: bool,
    ) -> Result<ListObjectsPage> {
        let q = ListObjectsQuery {
            prefix: prefix.to_string(),
            delimiter: String::new(),
            marker: marker.to_string(),
            version_id_marker: None,
            max_keys,
            versioned: false,
            with_delete_markers,
        };
        Ok(self
            .store
            .list_objects(&bucket.name, bucket.is_versioned(), &q)
            .await?)
    }

    // ------------------------------------------------------------------
    // Version plumbing
    // ------------------------------------------------------------------

    fn resolve_version_query(&self, version_id: Option<&str>) -> Result<VersionQuery> {
        match version_id {
            None | Some("") => Ok(VersionQuery::Latest),
            Some(NULL_VERSION_ID) => Ok(VersionQuery::Null),
            Some(vid) => Ok(VersionQuery::Exact(self.versions.decode(vid)?)),
        }
    }

    /// Insert a freshly written object as the new latest version, with the
    /// per-versioning-state semantics of a PUT. Returns the version id to
    /// surface to the client.
    pub(crate) async fn commit_new_version(
        &self,
        bucket: &Bucket,
        object: &mut ObjectMeta,
    ) -> Result<Option<String>> {
        self.commit_version_with_cleanup(bucket, object, None).await
    }

    /// The PUT commit, optionally folding the deletion of a completed
    /// multipart upload's rows into the same transaction.
    pub(crate) async fn commit_version_with_cleanup(
        &self,
        bucket: &Bucket,
        object: &mut ObjectMeta,
        completed_upload: Option<&str>,
    ) -> Result<Option<String>> {
        // Rows this insert displaces; their payloads are reaped only after
        // the transaction commits.
        let mut displaced: Vec<ObjectMeta> = Vec::new();
        let mut delta = object.size as i64;

        match bucket.versioning {
            VersioningState::Disabled => {
                object.null_version = true;
                match self
                    .store
                    .get_object(&bucket.name, &object.key, VersionQuery::Latest)
                    .await
                {
                    Ok(existing) => {
                        delta -= existing.size as i64;
                        displaced.push(existing);
                    }
                    Err(MetadataError::NoSuchKey { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            VersioningState::Enabled => {
                object.null_version = false;
            }
            VersioningState::Suspended => {
                // The new row takes the null slot; the previous null
                // version (if any) is retired in the same transaction.
                object.null_version = true;
                match self
                    .store
                    .get_object(&bucket.name, &object.key, VersionQuery::Null)
                    .await
                {
                    Ok(existing) => {
                        if !existing.delete_marker {
                            delta -= existing.size as i64;
                        }
                        displaced.push(existing);
                    }
                    Err(MetadataError::NoSuchKey { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        object.is_latest = true;

        let mut tx = self.store.begin().await?;
        for old in &displaced {
            self.store
                .delete_object(&old.bucket, &old.key, old.version, &mut tx)
                .await?;
        }
        self.store
            .set_latest_false(&bucket.name, &object.key, &mut tx)
            .await?;
        self.store.put_object(object, &mut tx).await?;
        if let Some(upload_id) = completed_upload {
            self.store
                .delete_multipart(&object.bucket, &object.key, upload_id, &mut tx)
                .await?;
        }
        self.store.update_usage(&bucket.name, delta, &mut tx).await?;
        tx.commit().await?;

        for old in &displaced {
            if !old.delete_marker {
                self.reap_backend(old).await;
            }
        }

        Ok(match bucket.versioning {
            VersioningState::Disabled => None,
            VersioningState::Suspended => Some(NULL_VERSION_ID.to_string()),
            VersioningState::Enabled => Some(self.versions.encode(object.version)),
        })
    }

    async fn delete_unversioned(&self, bucket: &Bucket, key: &str) -> Result<DeleteObjectOutput> {
        let existing = match self
            .store
            .get_object(&bucket.name, key, VersionQuery::Latest)
            .await
        {
            Ok(o) => o,
            // Deleting an absent key succeeds, as in S3.
            Err(MetadataError::NoSuchKey { .. }) => {
                return Ok(DeleteObjectOutput {
                    delete_marker: false,
                    version_id: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut tx = self.store.begin().await?;
        self.store
            .delete_object(&bucket.name, key, existing.version, &mut tx)
            .await?;
        self.store
            .update_usage(&bucket.name, -(existing.size as i64), &mut tx)
            .await?;
        tx.commit().await?;
        self.reap_backend(&existing).await;
        Ok(DeleteObjectOutput {
            delete_marker: false,
            version_id: None,
        })
    }

    async fn insert_delete_marker(&self, bucket: &Bucket, key: &str) -> Result<DeleteObjectOutput> {
        // On a suspended bucket the marker becomes the null version,
        // retiring whatever held the null slot.
        let displaced = if bucket.versioning == VersioningState::Suspended {
            match self.store.get_object(&bucket.name, key, VersionQuery::Null).await {
                Ok(o) => Some(o),
                Err(MetadataError::NoSuchKey { .. }) => None,
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        let now = Utc::now();
        let marker = ObjectMeta {
            bucket: bucket.name.clone(),
            key: key.to_string(),
            version: InternalVersion::from_modified_nanos(unix_nanos(&now)),
            location: self.cluster.id().to_string(),
            pool: String::new(),
            owner_id: bucket.owner_id.clone(),
            size: 0,
            object_id: String::new(),
            last_modified: now,
            etag: String::new(),
            content_type: String::new(),
            custom_attributes: HashMap::new(),
            acl: Acl::default(),
            null_version: bucket.versioning == VersioningState::Suspended,
            delete_marker: true,
            sse_type: String::new(),
            encryption_key: Vec::new(),
            iv: Vec::new(),
            kind: ObjectKind::Normal,
            storage_class: StorageClass::Standard,
            is_latest: true,
            store_info: StoreInfo::LegacyMonolithic,
            parts: BTreeMap::new(),
        };

        let mut tx = self.store.begin().await?;
        if let Some(old) = &displaced {
            self.store
                .delete_object(&bucket.name, key, old.version, &mut tx)
                .await?;
            if !old.delete_marker {
                self.store
                    .update_usage(&bucket.name, -(old.size as i64), &mut tx)
                    .await?;
            }
        }
        self.store.set_latest_false(&bucket.name, key, &mut tx).await?;
        self.store.put_object(&marker, &mut tx).await?;
        tx.commit().await?;

        if let Some(old) = &displaced {
            if !old.delete_marker {
                self.reap_backend(old).await;
            }
        }
        Ok(DeleteObjectOutput {
            delete_marker: true,
            version_id: Some(self.version_id_string(&marker)),
        })
    }

    async fn delete_exact_version(
        &self,
        bucket: &Bucket,
        key: &str,
        version_id: &str,
    ) -> Result<DeleteObjectOutput> {
        let query = self.resolve_version_query(Some(version_id))?;
        let existing = match self.store.get_object(&bucket.name, key, query).await {
            Ok(o) => o,
            Err(MetadataError::NoSuchKey { .. }) => {
                return Ok(DeleteObjectOutput {
                    delete_marker: false,
                    version_id: Some(version_id.to_string()),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut tx = self.store.begin().await?;
        self.store
            .delete_object(&bucket.name, key, existing.version, &mut tx)
            .await?;
        if existing.is_latest {
            // Promote the next-newest remaining row.
            self.store.set_latest_true(&bucket.name, key, &mut tx).await?;
        }
        if !existing.delete_marker {
            self.store
                .update_usage(&bucket.name, -(existing.size as i64), &mut tx)
                .await?;
        }
        tx.commit().await?;

        if !existing.delete_marker {
            self.reap_backend(&existing).await;
        }
        Ok(DeleteObjectOutput {
            delete_marker: existing.delete_marker,
            version_id: Some(self.version_id_string(&existing)),
        })
    }

    /// Best-effort removal of a retired version's payload. Failures leave
    /// unreferenced backend objects for the garbage collector and are only
    /// logged.
    pub(crate) async fn reap_backend(&self, object: &ObjectMeta) {
        if object.delete_marker {
            return;
        }
        if object.is_multipart() {
            for part in object.parts.values() {
                if let Err(e) = self
                    .driver
                    .delete(&object.pool, &part.object_id, &part.store_info, part.size)
                    .await
                {
                    warn!(
                        bucket = %object.bucket,
                        key = %object.key,
                        part = part.part_number,
                        "failed to reap part payload: {e}"
                    );
                }
            }
        } else if !object.object_id.is_empty() {
            if let Err(e) = self
                .driver
                .delete(&object.pool, &object.object_id, &object.store_info, object.size)
                .await
            {
                warn!(
                    bucket = %object.bucket,
                    key = %object.key,
                    oid = %object.object_id,
                    "failed to reap payload: {e}"
                );
            }
        }
    }
}

fn content_type_or_default(content_type: String) -> String {
    if content_type.is_empty() {
        "binary/octet-stream".to_string()
    } else {
        content_type
    }
}
