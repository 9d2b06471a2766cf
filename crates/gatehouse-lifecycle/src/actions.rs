//! Per-bucket rule evaluation.
//!
//! Rules run in two phases: prefix-scoped rules first, then any default
//! (empty-prefix) rule, so a prefix rule always wins the age check for
//! its own keys. Three actions are implemented: expiration by age,
//! non-current version expiration (with expired-delete-marker cleanup),
//! and aborting stale multipart uploads. Every listing loop polls the
//! stop flag.

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use gatehouse_core::{InternalVersion, Rule};
use gatehouse_gateway::{Credential, Result};
use gatehouse_metadata::{Bucket, LifecycleEntry, ListUploadsQuery, ObjectMeta, VersioningState};

use crate::engine::LifecycleEngine;

impl LifecycleEngine {
    pub(crate) async fn process_bucket(&self, entry: &LifecycleEntry) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let bucket = self.gateway.store().get_bucket(&entry.bucket).await?;

        let mut default_rule: Option<&Rule> = None;
        for rule in &bucket.lifecycle.rules {
            if !rule.is_enabled() {
                continue;
            }
            if rule.is_default() {
                default_rule = Some(rule);
                continue;
            }
            self.apply_rule(&bucket, rule).await;
        }
        if let Some(rule) = default_rule {
            self.apply_rule(&bucket, rule).await;
        }
        Ok(())
    }

    async fn apply_rule(&self, bucket: &Bucket, rule: &Rule) {
        if bucket.versioning != VersioningState::Disabled {
            if let Some(nve) = &rule.noncurrent_version_expiration {
                self.expire_noncurrent_versions(
                    bucket,
                    rule.prefix(),
                    nve.noncurrent_days,
                    &rule.id,
                    rule.expired_object_delete_marker(),
                )
                .await;
            }
        }
        if let Some(expiration) = &rule.expiration {
            if let Some(days) = expiration.days {
                self.expire_objects(bucket, rule.prefix(), days, &rule.id).await;
            }
        }
        if let Some(abort) = &rule.abort_incomplete_multipart_upload {
            self.abort_stale_uploads(bucket, rule.prefix(), abort.days_after_initiation, &rule.id)
                .await;
        }
    }

    fn expired(&self, at: &DateTime<Utc>, days: u32) -> bool {
        (Utc::now() - *at).num_seconds() >= days as i64 * self.config().seconds_per_day()
    }

    /// `Expiration.Days`: delete every current object under the prefix
    /// whose age passed the threshold. The delete goes through the normal
    /// versionless path, so versioned buckets get a delete marker and
    /// unversioned buckets lose the row.
    async fn expire_objects(&self, bucket: &Bucket, prefix: &str, days: u32, rule_id: &str) {
        let credential = Credential::new(bucket.owner_id.clone());
        let max_keys = self.config().request_max_keys;
        let mut marker = String::new();
        loop {
            if self.is_stopped() {
                return;
            }
            let page = match self
                .gateway
                .list_objects_internal(bucket, prefix, &marker, max_keys, false)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(bucket = %bucket.name, rule_id, "expiration listing failed: {e}");
                    return;
                }
            };
            for object in &page.objects {
                if self.is_stopped() {
                    return;
                }
                if !self.expired(&object.last_modified, days) {
                    continue;
                }
                match self
                    .gateway
                    .delete_object(&credential, &bucket.name, &object.key, None)
                    .await
                {
                    Ok(_) => warn!(
                        bucket = %bucket.name,
                        key = %object.key,
                        rule_id,
                        days,
                        "expired object deleted"
                    ),
                    Err(e) => error!(
                        bucket = %bucket.name,
                        key = %object.key,
                        rule_id,
                        "failed to delete expired object: {e}"
                    ),
                }
            }
            if !page.truncated {
                return;
            }
            marker = page.next_marker;
        }
    }

    /// `NoncurrentVersionExpiration`: walk each key's versions oldest to
    /// newest; whenever the current row has passed the age threshold, the
    /// previous row (strictly older, never latest) is deleted. Stops at
    /// the first row younger than the threshold. Afterwards, an expired
    /// trailing delete marker is removed iff it is the key's only
    /// remaining row and the rule asks for it.
    async fn expire_noncurrent_versions(
        &self,
        bucket: &Bucket,
        prefix: &str,
        days: u32,
        rule_id: &str,
        expired_delete_marker: bool,
    ) {
        let max_keys = self.config().request_max_keys;
        let mut marker = String::new();
        loop {
            if self.is_stopped() {
                return;
            }
            // Latest view including delete markers, so keys whose only
            // live row is a marker still get their versions walked.
            let page = match self
                .gateway
                .list_objects_internal(bucket, prefix, &marker, max_keys, true)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(bucket = %bucket.name, rule_id, "version listing failed: {e}");
                    return;
                }
            };
            for object in &page.objects {
                if self.is_stopped() {
                    return;
                }
                self.expire_noncurrent_versions_of_key(
                    bucket,
                    &object.key,
                    days,
                    rule_id,
                    expired_delete_marker,
                )
                .await;
            }
            if !page.truncated {
                return;
            }
            marker = page.next_marker;
        }
    }

    async fn expire_noncurrent_versions_of_key(
        &self,
        bucket: &Bucket,
        key: &str,
        days: u32,
        rule_id: &str,
        expired_delete_marker: bool,
    ) {
        let credential = Credential::new(bucket.owner_id.clone());
        let max_keys = self.config().request_max_keys;
        let mut cursor: Option<InternalVersion> = None;
        let mut previous: Option<ObjectMeta> = None;

        'walk: loop {
            if self.is_stopped() {
                return;
            }
            let versions = match self
                .gateway
                .store()
                .get_all_versions(&bucket.name, key, cursor, max_keys, true)
                .await
            {
                Ok(versions) => versions,
                Err(e) => {
                    error!(bucket = %bucket.name, key, rule_id, "version walk failed: {e}");
                    return;
                }
            };
            if versions.is_empty() {
                break;
            }
            for object in versions {
                if self.is_stopped() {
                    return;
                }
                cursor = Some(object.version);
                if !self.expired(&object.last_modified, days) {
                    // Younger rows only follow from here.
                    break 'walk;
                }
                if let Some(stale) = previous.take() {
                    if !stale.is_latest {
                        self.delete_version(&credential, bucket, &stale, rule_id, "noncurrent")
                            .await;
                    }
                }
                previous = Some(object);
            }
        }

        // The newest row the walk reached: if it is an expired delete
        // marker and the key has nothing else left, retire it too.
        if let Some(last) = previous {
            if last.is_latest && last.delete_marker && expired_delete_marker {
                match self
                    .gateway
                    .store()
                    .get_all_versions(&bucket.name, key, None, 3, true)
                    .await
                {
                    Ok(remaining) if remaining.len() == 1 => {
                        self.delete_version(&credential, bucket, &last, rule_id, "delete marker")
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(bucket = %bucket.name, key, rule_id, "marker recount failed: {e}")
                    }
                }
            }
        }
    }

    async fn delete_version(
        &self,
        credential: &Credential,
        bucket: &Bucket,
        object: &ObjectMeta,
        rule_id: &str,
        what: &str,
    ) {
        let version_id = self.gateway.version_id_string(object);
        match self
            .gateway
            .delete_object(credential, &bucket.name, &object.key, Some(&version_id))
            .await
        {
            Ok(_) => warn!(
                bucket = %bucket.name,
                key = %object.key,
                version_id = %version_id,
                rule_id,
                "expired {what} deleted"
            ),
            Err(e) => error!(
                bucket = %bucket.name,
                key = %object.key,
                version_id = %version_id,
                rule_id,
                "failed to delete expired {what}: {e}"
            ),
        }
    }

    /// `AbortIncompleteMultipartUpload`: abort every upload under the
    /// prefix initiated longer ago than the threshold.
    async fn abort_stale_uploads(&self, bucket: &Bucket, prefix: &str, days: u32, rule_id: &str) {
        let credential = Credential::new(bucket.owner_id.clone());
        let mut query = ListUploadsQuery {
            prefix: prefix.to_string(),
            max_uploads: self.config().request_max_keys,
            ..Default::default()
        };
        loop {
            if self.is_stopped() {
                return;
            }
            let page = match self
                .gateway
                .list_multipart_uploads(&credential, &bucket.name, &query)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(bucket = %bucket.name, rule_id, "upload listing failed: {e}");
                    return;
                }
            };
            for upload in &page.uploads {
                if self.is_stopped() {
                    return;
                }
                if !self.expired(&upload.initiated, days) {
                    continue;
                }
                match self
                    .gateway
                    .abort_multipart_upload(&credential, &bucket.name, &upload.key, &upload.upload_id)
                    .await
                {
                    Ok(()) => warn!(
                        bucket = %bucket.name,
                        key = %upload.key,
                        upload_id = %upload.upload_id,
                        rule_id,
                        "stale multipart upload aborted"
                    ),
                    Err(e) => error!(
                        bucket = %bucket.name,
                        key = %upload.key,
                        upload_id = %upload.upload_id,
                        rule_id,
                        "failed to abort stale upload: {e}"
                    ),
                }
            }
            if !page.truncated {
                return;
            }
            query.key_marker = page.next_key_marker;
            query.upload_id_marker = page.next_upload_id_marker;
        }
    }
}
