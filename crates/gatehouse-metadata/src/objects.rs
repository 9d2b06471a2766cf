//! Object-version rows.
//!
//! The version column is the fixed-width decimal form of the internal
//! version (`u64::MAX - last_modified_nanos`), so `ORDER BY version`
//! returns the newest row first and the latest-flip helpers can address
//! "the current latest" and "the newest remaining" with a one-row
//! subquery.

use std::collections::BTreeMap;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use gatehouse_core::{InternalVersion, StoreInfo};

use crate::error::{MetadataError, Result};
use crate::store::{from_json, to_json, MetaStore, MetaTx};
use crate::types::*;

/// How a caller addresses one version of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionQuery {
    /// No version given: the row that sorts first, i.e. the newest.
    /// Note this can be a delete marker; callers wanting GET/HEAD
    /// semantics filter markers themselves.
    Latest,
    /// The row whose null-version flag is set.
    Null,
    Exact(InternalVersion),
}

impl MetaStore {
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version: VersionQuery,
    ) -> Result<ObjectMeta> {
        const BASE: &str = "SELECT * FROM objects WHERE bucketname = ? AND name = ?";
        let sql = match version {
            VersionQuery::Latest => format!("{BASE} ORDER BY bucketname, name, version LIMIT 1"),
            VersionQuery::Null => format!("{BASE} AND nullversion = 1 LIMIT 1"),
            VersionQuery::Exact(_) => format!("{BASE} AND version = ? LIMIT 1"),
        };
        let mut query = sqlx::query(&sql).bind(bucket).bind(key);
        if let VersionQuery::Exact(v) = version {
            query = query.bind(v.db_key());
        }
        let row = query
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        let mut object = object_from_row(&row)?;
        object.parts = self.object_parts(bucket, key, object.version).await?;
        Ok(object)
    }

    /// All versions of one key. Newest first by default; `oldest_first`
    /// reverses the walk (the order the lifecycle engine wants). `cursor`
    /// restarts after a previously seen version.
    pub async fn get_all_versions(
        &self,
        bucket: &str,
        key: &str,
        cursor: Option<InternalVersion>,
        max: usize,
        oldest_first: bool,
    ) -> Result<Vec<ObjectMeta>> {
        let mut sql = String::from("SELECT * FROM objects WHERE bucketname = ? AND name = ?");
        if cursor.is_some() {
            sql.push_str(if oldest_first {
                " AND version < ?"
            } else {
                " AND version > ?"
            });
        }
        sql.push_str(" ORDER BY version");
        if oldest_first {
            sql.push_str(" DESC");
        }
        sql.push_str(" LIMIT ?");

        let mut query = sqlx::query(&sql).bind(bucket).bind(key);
        if let Some(cursor) = cursor {
            query = query.bind(cursor.db_key());
        }
        let rows = query.bind(max as i64).fetch_all(&self.pool).await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut object = object_from_row(row)?;
            object.parts = self.object_parts(bucket, key, object.version).await?;
            objects.push(object);
        }
        Ok(objects)
    }

    /// Insert the object row and its part rows inside the caller's
    /// transaction.
    pub async fn put_object(&self, object: &ObjectMeta, tx: &mut MetaTx) -> Result<()> {
        sqlx::query(
            "INSERT INTO objects \
             (bucketname, name, version, location, pool, ownerid, size, objectid, \
              lastmodifiedtime, etag, contenttype, customattributes, acl, nullversion, \
              deletemarker, ssetype, encryptionkey, initializationvector, type, storageclass, \
              islatest, meta) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&object.bucket)
        .bind(&object.key)
        .bind(object.version.db_key())
        .bind(&object.location)
        .bind(&object.pool)
        .bind(&object.owner_id)
        .bind(object.size as i64)
        .bind(&object.object_id)
        .bind(unix_nanos(&object.last_modified) as i64)
        .bind(&object.etag)
        .bind(&object.content_type)
        .bind(to_json(&object.custom_attributes)?)
        .bind(to_json(&object.acl)?)
        .bind(object.null_version)
        .bind(object.delete_marker)
        .bind(&object.sse_type)
        .bind(&object.encryption_key)
        .bind(&object.iv)
        .bind(object.kind.as_i64())
        .bind(object.storage_class.as_i64())
        .bind(object.is_latest)
        .bind(object.store_info.encode()?)
        .execute(&mut **tx)
        .await?;

        for part in object.parts.values() {
            sqlx::query(
                "INSERT INTO objectpart \
                 (bucketname, objectname, version, partnumber, size, objectid, \"offset\", \
                  etag, lastmodified, initializationvector, meta) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&object.bucket)
            .bind(&object.key)
            .bind(object.version.db_key())
            .bind(part.part_number as i64)
            .bind(part.size as i64)
            .bind(&part.object_id)
            .bind(part.offset as i64)
            .bind(&part.etag)
            .bind(part.last_modified.timestamp_millis())
            .bind(&part.iv)
            .bind(part.store_info.encode()?)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Delete one version row and its part rows.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version: InternalVersion,
        tx: &mut MetaTx,
    ) -> Result<()> {
        sqlx::query("DELETE FROM objects WHERE bucketname = ? AND name = ? AND version = ?")
            .bind(bucket)
            .bind(key)
            .bind(version.db_key())
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            "DELETE FROM objectpart WHERE bucketname = ? AND objectname = ? AND version = ?",
        )
        .bind(bucket)
        .bind(key)
        .bind(version.db_key())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Flip the current latest row (if any) to not-latest.
    pub async fn set_latest_false(&self, bucket: &str, key: &str, tx: &mut MetaTx) -> Result<()> {
        sqlx::query(
            "UPDATE objects SET islatest = 0 WHERE bucketname = ? AND name = ? AND version IN \
             (SELECT version FROM objects WHERE bucketname = ? AND name = ? AND islatest = 1 \
              ORDER BY bucketname, name, version LIMIT 1)",
        )
        .bind(bucket)
        .bind(key)
        .bind(bucket)
        .bind(key)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Promote the newest remaining row (if any) to latest. Used when the
    /// row that was latest has just been deleted in the same transaction.
    pub async fn set_latest_true(&self, bucket: &str, key: &str, tx: &mut MetaTx) -> Result<()> {
        sqlx::query(
            "UPDATE objects SET islatest = 1 WHERE bucketname = ? AND name = ? AND version IN \
             (SELECT version FROM objects WHERE bucketname = ? AND name = ? \
              ORDER BY bucketname, name, version LIMIT 1)",
        )
        .bind(bucket)
        .bind(key)
        .bind(bucket)
        .bind(key)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Update the mutable attributes (ACL, custom metadata) of one row.
    pub async fn update_object_attrs(&self, object: &ObjectMeta) -> Result<()> {
        sqlx::query(
            "UPDATE objects SET acl = ?, customattributes = ? \
             WHERE bucketname = ? AND name = ? AND version = ?",
        )
        .bind(to_json(&object.acl)?)
        .bind(to_json(&object.custom_attributes)?)
        .bind(&object.bucket)
        .bind(&object.key)
        .bind(object.version.db_key())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Grow an appendable object in place: same version, new size, new
    /// modification time and etag.
    pub async fn update_append(
        &self,
        bucket: &str,
        key: &str,
        version: InternalVersion,
        new_size: u64,
        etag: &str,
        modified_nanos: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE objects SET size = ?, etag = ?, lastmodifiedtime = ? \
             WHERE bucketname = ? AND name = ? AND version = ?",
        )
        .bind(new_size as i64)
        .bind(etag)
        .bind(modified_nanos as i64)
        .bind(bucket)
        .bind(key)
        .bind(version.db_key())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_delete_marker_present(&self, bucket: &str, key: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM objects WHERE bucketname = ? AND name = ? AND deletemarker = 1 LIMIT 1",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub(crate) async fn object_parts(
        &self,
        bucket: &str,
        key: &str,
        version: InternalVersion,
    ) -> Result<BTreeMap<u32, Part>> {
        let rows = sqlx::query(
            "SELECT partnumber, size, objectid, \"offset\", etag, lastmodified, \
             initializationvector, meta \
             FROM objectpart WHERE bucketname = ? AND objectname = ? AND version = ? \
             ORDER BY partnumber",
        )
        .bind(bucket)
        .bind(key)
        .bind(version.db_key())
        .fetch_all(&self.pool)
        .await?;
        let mut parts = BTreeMap::new();
        for row in &rows {
            let part = Part {
                part_number: row.try_get::<i64, _>("partnumber")? as u32,
                size: row.try_get::<i64, _>("size")? as u64,
                object_id: row.try_get("objectid")?,
                offset: row.try_get::<i64, _>("offset")? as u64,
                etag: row.try_get("etag")?,
                last_modified: from_unix_millis(row.try_get("lastmodified")?),
                iv: row.try_get("initializationvector")?,
                store_info: StoreInfo::decode(&row.try_get::<String, _>("meta")?)?,
            };
            parts.insert(part.part_number, part);
        }
        Ok(parts)
    }
}

pub(crate) fn object_from_row(row: &SqliteRow) -> Result<ObjectMeta> {
    let version = InternalVersion::from_db_key(&row.try_get::<String, _>("version")?)?;
    Ok(ObjectMeta {
        bucket: row.try_get("bucketname")?,
        key: row.try_get("name")?,
        version,
        location: row.try_get("location")?,
        pool: row.try_get("pool")?,
        owner_id: row.try_get("ownerid")?,
        size: row.try_get::<i64, _>("size")? as u64,
        object_id: row.try_get("objectid")?,
        last_modified: from_unix_nanos(row.try_get::<i64, _>("lastmodifiedtime")? as u64),
        etag: row.try_get("etag")?,
        content_type: row.try_get("contenttype")?,
        custom_attributes: from_json(&row.try_get::<String, _>("customattributes")?)?,
        acl: from_json(&row.try_get::<String, _>("acl")?)?,
        null_version: row.try_get("nullversion")?,
        delete_marker: row.try_get("deletemarker")?,
        sse_type: row.try_get("ssetype")?,
        encryption_key: row.try_get("encryptionkey")?,
        iv: row.try_get("initializationvector")?,
        kind: ObjectKind::from_i64(row.try_get("type")?),
        storage_class: StorageClass::from_i64(row.try_get("storageclass")?),
        is_latest: row.try_get("islatest")?,
        store_info: StoreInfo::decode(&row.try_get::<String, _>("meta")?)?,
        parts: BTreeMap::new(),
    })
}
