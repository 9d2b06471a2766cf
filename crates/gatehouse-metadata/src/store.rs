//! SQLite-backed metadata store.
//!
//! One `MetaStore` wraps a `sqlx` connection pool and owns every relational
//! access of the gateway: buckets, object versions and their parts,
//! in-flight multipart uploads, the lifecycle table, per-bucket usage and
//! the cluster/instance configuration tables. Object-row operations live in
//! [`crate::objects`], the list paginator in [`crate::listing`].
//!
//! Multi-row mutations run inside [`MetaTx`] transactions created by the
//! caller that owns the composite operation (a PUT is insert + latest flip +
//! usage update in one transaction) and committed or rolled back exactly
//! once.
//!
//! The lifecycle *claim* is deliberately not transactional: the
//! compare-and-set on `lastscannedtime` is the only cross-process mutual
//! exclusion the engine needs, and the affected-row count is the decision
//! (0 = lost the race, 1 = claimed, anything else = broken invariant).

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use gatehouse_core::LifecycleConfiguration;

use crate::error::{MetadataError, Result};
use crate::types::*;

/// Transaction handle passed down by the layer composing a mutation.
pub type MetaTx = sqlx::Transaction<'static, sqlx::Sqlite>;

pub struct MetaStore {
    pub(crate) pool: SqlitePool,
}

impl MetaStore {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))
                .map_err(MetadataError::Database)?
                .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path = %path.as_ref().display(), "metadata store ready");
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<MetaTx> {
        Ok(self.pool.begin().await?)
    }

    // ------------------------------------------------------------------
    // Buckets
    // ------------------------------------------------------------------

    pub async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        let row = sqlx::query("SELECT * FROM buckets WHERE bucketname = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NoSuchBucket(name.to_string()))?;
        bucket_from_row(&row)
    }

    pub async fn get_buckets(&self) -> Result<Vec<Bucket>> {
        let rows = sqlx::query("SELECT * FROM buckets ORDER BY bucketname")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bucket_from_row).collect()
    }

    /// Buckets owned by one user, the backing query of the user's
    /// bucket-list index.
    pub async fn buckets_of_user(&self, uid: &str) -> Result<Vec<Bucket>> {
        let rows = sqlx::query("SELECT * FROM buckets WHERE uid = ? ORDER BY bucketname")
            .bind(uid)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bucket_from_row).collect()
    }

    /// Insert the bucket iff no bucket of that name exists. Returns whether
    /// the row was inserted; `false` means the name is taken.
    pub async fn check_and_put_bucket(&self, bucket: &Bucket) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO buckets \
             (bucketname, acl, cors, logging, lc, uid, policy, website, createtime, usages, filenum, versioning) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (bucketname) DO NOTHING",
        )
        .bind(&bucket.name)
        .bind(to_json(&bucket.acl)?)
        .bind(to_json(&bucket.cors)?)
        .bind(to_json(&bucket.logging)?)
        .bind(to_json(&bucket.lifecycle)?)
        .bind(&bucket.owner_id)
        .bind(to_json(&bucket.policy)?)
        .bind(to_json(&bucket.website)?)
        .bind(bucket.create_time.timestamp_millis())
        .bind(bucket.usage)
        .bind(bucket.file_count)
        .bind(bucket.versioning.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    /// Update every mutable bucket attribute.
    pub async fn put_bucket(&self, bucket: &Bucket) -> Result<()> {
        sqlx::query(
            "UPDATE buckets SET acl = ?, cors = ?, logging = ?, lc = ?, policy = ?, \
             website = ?, uid = ?, versioning = ?, update_time = ? WHERE bucketname = ?",
        )
        .bind(to_json(&bucket.acl)?)
        .bind(to_json(&bucket.cors)?)
        .bind(to_json(&bucket.logging)?)
        .bind(to_json(&bucket.lifecycle)?)
        .bind(to_json(&bucket.policy)?)
        .bind(to_json(&bucket.website)?)
        .bind(&bucket.owner_id)
        .bind(bucket.versioning.as_str())
        .bind(Utc::now().timestamp_millis())
        .bind(&bucket.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_bucket(&self, name: &str, tx: &mut MetaTx) -> Result<()> {
        sqlx::query("DELETE FROM buckets WHERE bucketname = ?")
            .bind(name)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// A bucket is empty when neither the object table nor the multipart
    /// table reference it.
    pub async fn is_empty_bucket(&self, name: &str) -> Result<bool> {
        let object = sqlx::query("SELECT 1 FROM objects WHERE bucketname = ? LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if object.is_some() {
            return Ok(false);
        }
        let upload = sqlx::query("SELECT 1 FROM multiparts WHERE bucketname = ? LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(upload.is_none())
    }

    // ------------------------------------------------------------------
    // Usage
    // ------------------------------------------------------------------

    pub async fn update_usage(&self, bucket: &str, delta_bytes: i64, tx: &mut MetaTx) -> Result<()> {
        sqlx::query("UPDATE buckets SET usages = usages + ? WHERE bucketname = ?")
            .bind(delta_bytes)
            .bind(bucket)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Aggregate actual usage from the object table, the source of truth
    /// for repairing drifted counters.
    pub async fn get_all_bucket_usage(&self) -> Result<HashMap<String, BucketUsage>> {
        let rows = sqlx::query(
            "SELECT bucketname, COUNT(objectid) AS filenum, COALESCE(SUM(size), 0) AS usages \
             FROM objects GROUP BY bucketname",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut usage = HashMap::new();
        for row in rows {
            usage.insert(
                row.try_get::<String, _>("bucketname")?,
                BucketUsage {
                    file_count: row.try_get("filenum")?,
                    usage_bytes: row.try_get("usages")?,
                },
            );
        }
        Ok(usage)
    }

    pub async fn refresh_usage_and_count(
        &self,
        usage: &HashMap<String, BucketUsage>,
        tx: &mut MetaTx,
    ) -> Result<()> {
        for (bucket, info) in usage {
            sqlx::query("UPDATE buckets SET usages = ?, filenum = ? WHERE bucketname = ?")
                .bind(info.usage_bytes)
                .bind(info.file_count)
                .bind(bucket)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle enrolment
    // ------------------------------------------------------------------

    /// Persist the bucket's lifecycle configuration and admit the bucket to
    /// the scan table. Idempotent: an existing enrolment keeps its
    /// `lastscannedtime`.
    pub async fn enrol_lifecycle(&self, bucket: &Bucket, tx: &mut MetaTx) -> Result<()> {
        self.write_bucket_lifecycle(bucket, tx).await?;
        let inserted = sqlx::query(
            "INSERT INTO lifecycle (bucketname, status, lastscannedtime) VALUES (?, ?, ?) \
             ON CONFLICT (bucketname) DO NOTHING",
        )
        .bind(&bucket.name)
        .bind(LifecycleStatus::Pending.as_str())
        .bind(Utc::now().timestamp())
        .execute(&mut **tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            debug!(bucket = %bucket.name, "bucket already enrolled in lifecycle");
        }
        Ok(())
    }

    pub async fn remove_lifecycle(&self, bucket: &Bucket, tx: &mut MetaTx) -> Result<()> {
        self.write_bucket_lifecycle(bucket, tx).await?;
        self.delete_lifecycle_entry(&bucket.name, tx).await
    }

    pub async fn delete_lifecycle_entry(&self, bucket: &str, tx: &mut MetaTx) -> Result<()> {
        sqlx::query("DELETE FROM lifecycle WHERE bucketname = ?")
            .bind(bucket)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn write_bucket_lifecycle(&self, bucket: &Bucket, tx: &mut MetaTx) -> Result<()> {
        sqlx::query("UPDATE buckets SET lc = ?, update_time = ? WHERE bucketname = ?")
            .bind(to_json(&bucket.lifecycle)?)
            .bind(Utc::now().timestamp_millis())
            .bind(&bucket.name)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn lifecycle_entry(&self, bucket: &str) -> Result<Option<LifecycleEntry>> {
        let row = sqlx::query(
            "SELECT bucketname, status, lastscannedtime FROM lifecycle WHERE bucketname = ?",
        )
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| lifecycle_from_row(&r)).transpose()
    }

    /// Insert or overwrite an enrolment row directly. Repair/import path;
    /// normal enrolment goes through [`Self::enrol_lifecycle`].
    pub async fn put_lifecycle_entry(&self, entry: &LifecycleEntry) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO lifecycle (bucketname, status, lastscannedtime) VALUES (?, ?, ?)")
            .bind(&entry.bucket)
            .bind(entry.status.as_str())
            .bind(entry.last_scanned)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Scan the lifecycle table from `marker`, claiming up to `limit`
    /// buckets whose last scan is at least `min_idle_secs` old. Claiming is
    /// a compare-and-set on `lastscannedtime`; a row claimed by a
    /// concurrent scanner is skipped. Distinct gateway instances coordinate
    /// through nothing but this table.
    pub async fn scan_lifecycle(
        &self,
        limit: usize,
        marker: &str,
        min_idle_secs: i64,
    ) -> Result<LifecycleScan> {
        let threshold = Utc::now().timestamp() - min_idle_secs;
        let rows = sqlx::query(
            "SELECT bucketname, status, lastscannedtime FROM lifecycle \
             WHERE bucketname > ? AND lastscannedtime < ? ORDER BY bucketname LIMIT ?",
        )
        .bind(marker)
        .bind(threshold)
        .bind((limit * 3) as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut scan = LifecycleScan::default();
        let mut looped = 0usize;
        let mut last_bucket = String::new();
        for row in rows {
            if scan.entries.len() >= limit {
                break;
            }
            looped += 1;
            let bucket: String = row.try_get("bucketname")?;
            let status: String = row.try_get("status")?;
            let seen: i64 = row.try_get("lastscannedtime")?;
            scan.next_marker = bucket.clone();
            if bucket == last_bucket {
                continue;
            }
            last_bucket = bucket.clone();

            let now = Utc::now().timestamp();
            let claimed = sqlx::query(
                "UPDATE lifecycle SET lastscannedtime = ? \
                 WHERE bucketname = ? AND lastscannedtime = ?",
            )
            .bind(now)
            .bind(&bucket)
            .bind(seen)
            .execute(&self.pool)
            .await?
            .rows_affected();
            match claimed {
                0 => {
                    debug!(bucket = %bucket, "lifecycle row already claimed by another scanner");
                    continue;
                }
                1 => {}
                n => {
                    return Err(MetadataError::Invariant(format!(
                        "lifecycle claim for {bucket} updated {n} rows"
                    )))
                }
            }
            scan.entries.push(LifecycleEntry {
                bucket,
                status: LifecycleStatus::parse(&status),
                last_scanned: now,
            });
        }
        scan.truncated = looped >= limit;
        Ok(scan)
    }

    // ------------------------------------------------------------------
    // Multipart uploads
    // ------------------------------------------------------------------

    pub async fn create_multipart(&self, upload: &MultipartUpload) -> Result<()> {
        sqlx::query(
            "INSERT INTO multiparts \
             (bucketname, objectname, uploadid, initiatorid, ownerid, initiated, contenttype, \
              acl, ssetype, encryptionkey, pool, storageclass, attrs) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&upload.bucket)
        .bind(&upload.key)
        .bind(&upload.upload_id)
        .bind(&upload.initiator_id)
        .bind(&upload.owner_id)
        .bind(upload.initiated.timestamp_millis())
        .bind(&upload.content_type)
        .bind(to_json(&upload.acl)?)
        .bind(&upload.sse_type)
        .bind(&upload.encryption_key)
        .bind(&upload.pool)
        .bind(upload.storage_class.as_i64())
        .bind(to_json(&upload.attrs)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<MultipartUpload> {
        let row = sqlx::query(
            "SELECT * FROM multiparts WHERE bucketname = ? AND objectname = ? AND uploadid = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| MetadataError::NoSuchUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        })?;
        multipart_from_row(&row)
    }

    /// Record (or overwrite) one uploaded part, returning the replaced row
    /// so the caller can reap its backend data.
    pub async fn put_multipart_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part: &Part,
    ) -> Result<Option<Part>> {
        let previous = sqlx::query(
            "SELECT partnumber, size, objectid, etag, lastmodified, initializationvector, meta \
             FROM multipartpart \
             WHERE bucketname = ? AND objectname = ? AND uploadid = ? AND partnumber = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .bind(part.part_number as i64)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| upload_part_from_row(&r))
        .transpose()?;

        sqlx::query(
            "INSERT OR REPLACE INTO multipartpart \
             (bucketname, objectname, uploadid, partnumber, size, objectid, etag, lastmodified, \
              initializationvector, meta) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .bind(part.part_number as i64)
        .bind(part.size as i64)
        .bind(&part.object_id)
        .bind(&part.etag)
        .bind(part.last_modified.timestamp_millis())
        .bind(&part.iv)
        .bind(part.store_info.encode()?)
        .execute(&self.pool)
        .await?;
        Ok(previous)
    }

    pub async fn multipart_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<std::collections::BTreeMap<u32, Part>> {
        let rows = sqlx::query(
            "SELECT partnumber, size, objectid, etag, lastmodified, initializationvector, meta \
             FROM multipartpart WHERE bucketname = ? AND objectname = ? AND uploadid = ? \
             ORDER BY partnumber",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;
        let mut parts = std::collections::BTreeMap::new();
        for row in &rows {
            let part = upload_part_from_row(row)?;
            parts.insert(part.part_number, part);
        }
        Ok(parts)
    }

    /// Remove the upload row and all its part rows.
    pub async fn delete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        tx: &mut MetaTx,
    ) -> Result<()> {
        sqlx::query("DELETE FROM multiparts WHERE bucketname = ? AND objectname = ? AND uploadid = ?")
            .bind(bucket)
            .bind(key)
            .bind(upload_id)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "DELETE FROM multipartpart WHERE bucketname = ? AND objectname = ? AND uploadid = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(upload_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cluster placement / instance configuration
    // ------------------------------------------------------------------

    pub async fn put_cluster_pool(&self, fsid: &str, pool: &str, weight: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO cluster (fsid, pool, weight) VALUES (?, ?, ?)",
        )
        .bind(fsid)
        .bind(pool)
        .bind(weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve the write pool for a cluster, heaviest weight first.
    pub async fn pick_pool(&self, fsid: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT pool FROM cluster WHERE fsid = ? ORDER BY weight DESC, pool LIMIT 1",
        )
        .bind(fsid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn save_instance_config(
        &self,
        instance_id: &str,
        config: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO configure (instanceid, config) VALUES (?, ?)")
            .bind(instance_id)
            .bind(to_json(config)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load_instance_config(&self, instance_id: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT config FROM configure WHERE instanceid = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| from_json(&r.get::<String, _>(0)))
            .transpose()
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

pub(crate) fn bucket_from_row(row: &SqliteRow) -> Result<Bucket> {
    let versioning: String = row.try_get("versioning")?;
    let lifecycle: LifecycleConfiguration = from_json(&row.try_get::<String, _>("lc")?)?;
    Ok(Bucket {
        name: row.try_get("bucketname")?,
        owner_id: row.try_get("uid")?,
        create_time: from_unix_millis(row.try_get("createtime")?),
        update_time: row
            .try_get::<Option<i64>, _>("update_time")?
            .map(from_unix_millis),
        versioning: VersioningState::parse(&versioning).unwrap_or(VersioningState::Disabled),
        acl: from_json(&row.try_get::<String, _>("acl")?)?,
        cors: from_json(&row.try_get::<String, _>("cors")?)?,
        lifecycle,
        policy: from_json(&row.try_get::<String, _>("policy")?)?,
        website: from_json(&row.try_get::<String, _>("website")?)?,
        logging: from_json(&row.try_get::<String, _>("logging")?)?,
        usage: row.try_get("usages")?,
        file_count: row.try_get("filenum")?,
    })
}

fn lifecycle_from_row(row: &SqliteRow) -> Result<LifecycleEntry> {
    let status: String = row.try_get("status")?;
    Ok(LifecycleEntry {
        bucket: row.try_get("bucketname")?,
        status: LifecycleStatus::parse(&status),
        last_scanned: row.try_get("lastscannedtime")?,
    })
}

pub(crate) fn multipart_from_row(row: &SqliteRow) -> Result<MultipartUpload> {
    Ok(MultipartUpload {
        bucket: row.try_get("bucketname")?,
        key: row.try_get("objectname")?,
        upload_id: row.try_get("uploadid")?,
        initiator_id: row.try_get("initiatorid")?,
        owner_id: row.try_get("ownerid")?,
        initiated: from_unix_millis(row.try_get("initiated")?),
        content_type: row.try_get("contenttype")?,
        acl: from_json(&row.try_get::<String, _>("acl")?)?,
        sse_type: row.try_get("ssetype")?,
        encryption_key: row.try_get("encryptionkey")?,
        pool: row.try_get("pool")?,
        storage_class: StorageClass::from_i64(row.try_get("storageclass")?),
        attrs: from_json(&row.try_get::<String, _>("attrs")?)?,
    })
}

fn upload_part_from_row(row: &SqliteRow) -> Result<Part> {
    Ok(Part {
        part_number: row.try_get::<i64, _>("partnumber")? as u32,
        size: row.try_get::<i64, _>("size")? as u64,
        object_id: row.try_get("objectid")?,
        offset: 0,
        etag: row.try_get("etag")?,
        last_modified: from_unix_millis(row.try_get("lastmodified")?),
        iv: row.try_get("initializationvector")?,
        store_info: gatehouse_core::StoreInfo::decode(
            &row.try_get::<String, _>("meta")?,
        )?,
    })
}
