//! List-objects and list-object-versions pagination.
//!
//! Three code paths, chosen from the bucket's versioning state and the
//! request shape:
//!
//! 1. **Plain** — versioning-disabled bucket: one row per key, so
//!    ListObjects and ListObjectVersions coincide.
//! 2. **Versioned bucket** — ListObjects (latest view) and
//!    ListObjectVersions without a delimiter: a single ordered walk over
//!    `(name, version)` with a per-key version cursor for restarts.
//! 3. **Versioned with delimiter** — the database can collapse to at most
//!    one row per key, so this path first walks latest rows and common
//!    prefixes, then expands each leaf key through `get_all_versions`.
//!
//! Delimiter grouping happens here, not in SQL: when a row's key continues
//! past the delimiter, the segment up to and including the delimiter
//! becomes a common prefix and the walk *jumps* — the page marker is set
//! to the prefix with its last byte incremented, so the next query skips
//! the entire subtree instead of streaming it.
//!
//! Pagination contract: concatenating pages equals the unpaginated listing
//! (absent concurrent mutation). A page is truncated once emitting another
//! entry would exceed `max_keys`; the page then carries the key marker
//! (and, for versioned listings, the version marker) to resume from.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::info;

use gatehouse_core::InternalVersion;

use crate::error::Result;
use crate::objects::VersionQuery;
use crate::store::{multipart_from_row, MetaStore};
use crate::types::{MultipartUpload, ObjectMeta};

/// Page size for walking a versioning-disabled bucket.
const MAX_OBJECT_LIST: usize = 1000;

/// Extra rows fetched beyond `max_keys` so markers can be skipped without
/// mistaking an exactly-full page for a truncated one.
const MARKER_HEADROOM: usize = 10;

const SLOW_QUERY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct ListObjectsQuery {
    pub prefix: String,
    pub delimiter: String,
    /// Key of the last entry of the previous page (exclusive).
    pub marker: String,
    /// For versioned listings: resume inside `marker`'s version chain,
    /// after this version.
    pub version_id_marker: Option<InternalVersion>,
    pub max_keys: usize,
    /// True for ListObjectVersions, false for ListObjects.
    pub versioned: bool,
    /// In the latest view, also return keys whose latest row is a delete
    /// marker (the lifecycle engine's internal listing).
    pub with_delete_markers: bool,
}

#[derive(Debug, Default)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectMeta>,
    pub common_prefixes: Vec<String>,
    pub truncated: bool,
    pub next_marker: String,
    pub next_version_marker: Option<InternalVersion>,
}

impl MetaStore {
    pub async fn list_objects(
        &self,
        bucket: &str,
        bucket_versioned: bool,
        q: &ListObjectsQuery,
    ) -> Result<ListObjectsPage> {
        if !bucket_versioned {
            self.list_plain(bucket, q).await
        } else if q.versioned && !q.delimiter.is_empty() {
            self.list_versions_with_delimiter(bucket, q).await
        } else {
            self.list_versioned_bucket(bucket, q).await
        }
    }

    async fn fetch_page(&self, qb: &mut QueryBuilder<'_, Sqlite>) -> Result<Vec<SqliteRow>> {
        let started = Instant::now();
        let rows = qb.build().fetch_all(&self.pool).await?;
        let elapsed = started.elapsed();
        if elapsed > SLOW_QUERY {
            info!(sql = qb.sql(), ?elapsed, "slow list-objects query");
        }
        Ok(rows)
    }

    async fn list_plain(&self, bucket: &str, q: &ListObjectsQuery) -> Result<ListObjectsPage> {
        let mut page = ListObjectsPage::default();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let origin_marker = q.marker.clone();
        let mut marker = q.marker.clone();
        let mut exclusive = true;
        let mut count = 0usize;

        'pages: loop {
            let mut qb = QueryBuilder::new("SELECT name FROM objects WHERE bucketname = ");
            qb.push_bind(bucket);
            push_prefix(&mut qb, &q.prefix);
            if !marker.is_empty() {
                qb.push(if exclusive { " AND name > " } else { " AND name >= " });
                qb.push_bind(marker.clone());
            }
            qb.push(" ORDER BY bucketname, name LIMIT ");
            qb.push_bind(MAX_OBJECT_LIST as i64);

            let rows = self.fetch_page(&mut qb).await?;
            let fetched = rows.len();
            let mut jumped = false;
            for row in &rows {
                let name: String = row.try_get("name")?;
                marker = name.clone();
                exclusive = true;

                if !q.delimiter.is_empty() {
                    if let Some(group) = common_prefix(&name, &q.prefix, &q.delimiter) {
                        marker = skip_marker(&group);
                        exclusive = false;
                        if group != origin_marker && !prefixes.contains(&group) {
                            if count == q.max_keys {
                                page.truncated = true;
                                break 'pages;
                            }
                            page.next_marker = group.clone();
                            prefixes.insert(group);
                            count += 1;
                        }
                        jumped = true;
                        break;
                    }
                }

                let object = self.get_object(bucket, &name, VersionQuery::Latest).await?;
                count += 1;
                if count == q.max_keys {
                    page.next_marker = name.clone();
                }
                if count > q.max_keys {
                    page.truncated = true;
                    break 'pages;
                }
                page.objects.push(object);
            }
            if !jumped && fetched < MAX_OBJECT_LIST {
                break;
            }
        }
        page.common_prefixes = prefixes.into_iter().collect();
        Ok(page)
    }

    async fn list_versioned_bucket(
        &self,
        bucket: &str,
        q: &ListObjectsQuery,
    ) -> Result<ListObjectsPage> {
        let select_limit = q.max_keys + MARKER_HEADROOM;
        let mut page = ListObjectsPage::default();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let origin_marker = q.marker.clone();
        let mut marker = q.marker.clone();
        let mut exclusive = true;
        let mut cursor = if q.versioned { q.version_id_marker } else { None };
        let mut last_version: Option<InternalVersion> = None;

        'pages: loop {
            let mut qb = QueryBuilder::new(if q.versioned {
                "SELECT name, version FROM objects WHERE bucketname = "
            } else {
                "SELECT name FROM objects WHERE bucketname = "
            });
            qb.push_bind(bucket);
            push_prefix(&mut qb, &q.prefix);
            if let Some(cursor) = cursor {
                // Resume inside the marker key, at versions older than the
                // cursor (larger internal version = older).
                qb.push(" AND name = ");
                qb.push_bind(marker.clone());
                qb.push(" AND version > ");
                qb.push_bind(cursor.db_key());
            } else if !marker.is_empty() {
                qb.push(if exclusive { " AND name > " } else { " AND name >= " });
                qb.push_bind(marker.clone());
            }
            if !q.versioned {
                qb.push(" AND islatest = 1");
                if !q.with_delete_markers {
                    qb.push(" AND deletemarker = 0");
                }
            }
            qb.push(" ORDER BY bucketname, name, version LIMIT ");
            qb.push_bind(select_limit as i64);

            let rows = self.fetch_page(&mut qb).await?;
            let fetched = rows.len();
            if rows.is_empty() {
                if cursor.take().is_some() {
                    // The marker key's versions are exhausted; continue at
                    // the next key.
                    exclusive = true;
                    continue;
                }
                break;
            }

            let mut jumped = false;
            for row in &rows {
                let name: String = row.try_get("name")?;
                let row_version = if q.versioned {
                    Some(InternalVersion::from_db_key(
                        &row.try_get::<String, _>("version")?,
                    )?)
                } else {
                    None
                };
                marker = name.clone();
                exclusive = true;

                if !q.versioned && !q.delimiter.is_empty() {
                    if let Some(group) = common_prefix(&name, &q.prefix, &q.delimiter) {
                        marker = skip_marker(&group);
                        exclusive = false;
                        if group != origin_marker && !prefixes.contains(&group) {
                            if count_of(&page, &prefixes) == q.max_keys {
                                page.truncated = true;
                                break 'pages;
                            }
                            page.next_marker = group.clone();
                            prefixes.insert(group);
                        }
                        jumped = true;
                        break;
                    }
                }

                let object = match row_version {
                    Some(v) => self.get_object(bucket, &name, VersionQuery::Exact(v)).await?,
                    None => self.get_object(bucket, &name, VersionQuery::Latest).await?,
                };
                let count = count_of(&page, &prefixes) + 1;
                if count == q.max_keys {
                    page.next_marker = name.clone();
                    last_version = row_version;
                }
                if count > q.max_keys {
                    page.truncated = true;
                    break 'pages;
                }
                page.objects.push(object);
            }
            if jumped {
                continue;
            }
            if cursor.take().is_some() {
                exclusive = true;
                continue;
            }
            if fetched < select_limit {
                break;
            }
        }
        page.common_prefixes = prefixes.into_iter().collect();
        page.next_version_marker = last_version;
        Ok(page)
    }

    /// ListObjectVersions with a delimiter: walk latest rows and common
    /// prefixes first, expand each leaf key into its version chain second.
    async fn list_versions_with_delimiter(
        &self,
        bucket: &str,
        q: &ListObjectsQuery,
    ) -> Result<ListObjectsPage> {
        let select_limit = q.max_keys + MARKER_HEADROOM;
        let mut page = ListObjectsPage::default();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let origin_marker = q.marker.clone();
        let mut marker = q.marker.clone();
        let mut exclusive = true;
        let mut cursor = q.version_id_marker;
        let mut last_version: Option<InternalVersion> = None;

        'pages: loop {
            let was_cursor_page = cursor.is_some();
            let mut qb = QueryBuilder::new("SELECT name FROM objects WHERE bucketname = ");
            qb.push_bind(bucket);
            push_prefix(&mut qb, &q.prefix);
            if was_cursor_page {
                // Still expanding the marker key's version chain.
                qb.push(" AND name = ");
                qb.push_bind(marker.clone());
            } else if !marker.is_empty() {
                qb.push(if exclusive { " AND name > " } else { " AND name >= " });
                qb.push_bind(marker.clone());
            }
            qb.push(" AND islatest = 1 ORDER BY bucketname, name LIMIT ");
            qb.push_bind(select_limit as i64);

            let rows = self.fetch_page(&mut qb).await?;
            let fetched = rows.len();
            if rows.is_empty() {
                if was_cursor_page {
                    cursor = None;
                    exclusive = true;
                    continue;
                }
                break;
            }

            let mut jumped = false;
            for row in &rows {
                let name: String = row.try_get("name")?;
                marker = name.clone();
                exclusive = true;

                if let Some(group) = common_prefix(&name, &q.prefix, &q.delimiter) {
                    marker = skip_marker(&group);
                    exclusive = false;
                    if group != origin_marker && !prefixes.contains(&group) {
                        if count_of(&page, &prefixes) == q.max_keys {
                            page.truncated = true;
                            break 'pages;
                        }
                        page.next_marker = group.clone();
                        prefixes.insert(group);
                        last_version = None;
                    }
                    jumped = true;
                    break;
                }

                let budget = select_limit - count_of(&page, &prefixes);
                let versions = self
                    .get_all_versions(bucket, &name, cursor.take(), budget, false)
                    .await?;
                for object in versions {
                    let count = count_of(&page, &prefixes) + 1;
                    if count == q.max_keys {
                        page.next_marker = name.clone();
                        last_version = Some(object.version);
                    }
                    if count > q.max_keys {
                        page.truncated = true;
                        break 'pages;
                    }
                    page.objects.push(object);
                }
            }
            if jumped {
                continue;
            }
            if was_cursor_page {
                // The marker key is done; continue at the next key.
                cursor = None;
                exclusive = true;
                continue;
            }
            if fetched < select_limit {
                break;
            }
        }
        page.common_prefixes = prefixes.into_iter().collect();
        page.next_version_marker = last_version;
        Ok(page)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListUploadsQuery {
    pub prefix: String,
    pub delimiter: String,
    pub key_marker: String,
    pub upload_id_marker: String,
    pub max_uploads: usize,
}

#[derive(Debug, Default)]
pub struct ListUploadsPage {
    pub uploads: Vec<MultipartUpload>,
    pub common_prefixes: Vec<String>,
    pub truncated: bool,
    pub next_key_marker: String,
    pub next_upload_id_marker: String,
}

impl MetaStore {
    /// Incomplete multipart uploads, ordered by `(key, upload_id)`, with
    /// the same delimiter grouping and subtree skipping as object listing.
    pub async fn list_multipart_uploads(
        &self,
        bucket: &str,
        q: &ListUploadsQuery,
    ) -> Result<ListUploadsPage> {
        let select_limit = q.max_uploads + MARKER_HEADROOM;
        let mut page = ListUploadsPage::default();
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        let mut key_marker = q.key_marker.clone();
        let mut upload_marker = q.upload_id_marker.clone();
        let mut inclusive = false;
        let mut count = 0usize;

        'pages: loop {
            let mut qb = QueryBuilder::new("SELECT * FROM multiparts WHERE bucketname = ");
            qb.push_bind(bucket);
            if !q.prefix.is_empty() {
                qb.push(" AND objectname LIKE ");
                qb.push_bind(like_pattern(&q.prefix));
                qb.push(" ESCAPE '\\'");
            }
            if !key_marker.is_empty() {
                if inclusive {
                    qb.push(" AND objectname >= ");
                    qb.push_bind(key_marker.clone());
                } else if upload_marker.is_empty() {
                    qb.push(" AND objectname > ");
                    qb.push_bind(key_marker.clone());
                } else {
                    qb.push(" AND (objectname > ");
                    qb.push_bind(key_marker.clone());
                    qb.push(" OR (objectname = ");
                    qb.push_bind(key_marker.clone());
                    qb.push(" AND uploadid > ");
                    qb.push_bind(upload_marker.clone());
                    qb.push("))");
                }
            }
            qb.push(" ORDER BY bucketname, objectname, uploadid LIMIT ");
            qb.push_bind(select_limit as i64);

            let rows = self.fetch_page(&mut qb).await?;
            let fetched = rows.len();
            let mut jumped = false;
            for row in &rows {
                let upload = multipart_from_row(row)?;
                key_marker = upload.key.clone();
                upload_marker = upload.upload_id.clone();
                inclusive = false;

                if !q.delimiter.is_empty() {
                    if let Some(group) = common_prefix(&upload.key, &q.prefix, &q.delimiter) {
                        key_marker = skip_marker(&group);
                        upload_marker.clear();
                        inclusive = true;
                        if group != q.key_marker && !prefixes.contains(&group) {
                            if count == q.max_uploads {
                                page.truncated = true;
                                break 'pages;
                            }
                            page.next_key_marker = group.clone();
                            page.next_upload_id_marker.clear();
                            prefixes.insert(group);
                            count += 1;
                        }
                        jumped = true;
                        break;
                    }
                }

                count += 1;
                if count == q.max_uploads {
                    page.next_key_marker = upload.key.clone();
                    page.next_upload_id_marker = upload.upload_id.clone();
                }
                if count > q.max_uploads {
                    page.truncated = true;
                    break 'pages;
                }
                page.uploads.push(upload);
            }
            if !jumped && fetched < select_limit {
                break;
            }
        }
        page.common_prefixes = prefixes.into_iter().collect();
        Ok(page)
    }
}

fn count_of(page: &ListObjectsPage, prefixes: &BTreeSet<String>) -> usize {
    page.objects.len() + prefixes.len()
}

fn push_prefix(qb: &mut QueryBuilder<'_, Sqlite>, prefix: &str) {
    if !prefix.is_empty() {
        qb.push(" AND name LIKE ");
        qb.push_bind(like_pattern(prefix));
        qb.push(" ESCAPE '\\'");
    }
}

/// Turn a key prefix into a LIKE pattern, escaping LIKE metacharacters
/// (`_` is common in object keys and must not match arbitrary bytes).
fn like_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// If `name` continues past the next delimiter after `prefix`, return the
/// common prefix (including the delimiter) that groups it.
fn common_prefix(name: &str, prefix: &str, delimiter: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    let idx = rest.find(delimiter)?;
    Some(format!("{prefix}{}", &rest[..idx + delimiter.len()]))
}

/// A marker lexicographically past every key under `group`: the group with
/// the last byte of its delimiter incremented.
fn skip_marker(group: &str) -> String {
    let mut bytes = group.as_bytes().to_vec();
    match bytes.last_mut() {
        Some(last) if *last < 0xff => *last += 1,
        _ => return format!("{group}\u{10FFFF}"),
    }
    String::from_utf8(bytes).unwrap_or_else(|_| format!("{group}\u{10FFFF}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("a_b"), "a\\_b%");
        assert_eq!(like_pattern("50%"), "50\\%%");
        assert_eq!(like_pattern("plain/"), "plain/%");
    }

    #[test]
    fn common_prefix_detection() {
        assert_eq!(
            common_prefix("photos/2024/cat.jpg", "photos/", "/"),
            Some("photos/2024/".to_string())
        );
        assert_eq!(common_prefix("photos/cat.jpg", "photos/", "/"), None);
        assert_eq!(common_prefix("other/cat.jpg", "photos/", "/"), None);
        assert_eq!(common_prefix("dir0/a", "", "/"), Some("dir0/".to_string()));
    }

    #[test]
    fn skip_marker_clears_the_subtree() {
        let marker = skip_marker("dir0/");
        assert_eq!(marker, "dir00");
        assert!(marker.as_str() > "dir0/");
        assert!(marker.as_str() > "dir0/zzzzz");
        assert!(marker.as_str() < "dir1/");
    }
}
