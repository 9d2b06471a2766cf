//! Bucket operations.
//!
//! Every setter loads the bucket through the cache, verifies ownership,
//! writes the row and invalidates the cached entry after the commit.
//! Setting a non-empty lifecycle also enrols the bucket in the scan
//! table; clearing it removes the enrolment in the same transaction.

use tracing::{info, warn};

use gatehouse_core::LifecycleConfiguration;
use gatehouse_metadata::{
    Acl, Bucket, BucketLoggingStatus, CorsConfiguration, VersioningState, WebsiteConfiguration,
};

use crate::error::{GatewayError, Result};
use crate::util::check_valid_bucket_name;
use crate::{Credential, Gateway};

impl Gateway {
    pub async fn make_bucket(
        &self,
        credential: &Credential,
        bucket_name: &str,
        acl: Acl,
    ) -> Result<()> {
        check_valid_bucket_name(bucket_name)?;

        let mut bucket = Bucket::new(bucket_name, credential.user_id.clone());
        bucket.acl = acl;
        let created = self.store.check_and_put_bucket(&bucket).await?;
        if !created {
            // Name taken; report precisely whose it is.
            let existing = self.store.get_bucket(bucket_name).await?;
            return Err(if existing.owner_id == credential.user_id {
                GatewayError::BucketAlreadyOwnedByYou(bucket_name.to_string())
            } else {
                GatewayError::BucketAlreadyExists(bucket_name.to_string())
            });
        }
        self.cache.invalidate_user(&credential.user_id).await;
        info!(bucket = bucket_name, owner = %credential.user_id, "bucket created");
        Ok(())
    }

    pub async fn head_bucket(&self, credential: &Credential, bucket_name: &str) -> Result<Bucket> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_read_access(&bucket, credential)?;
        Ok(bucket)
    }

    pub async fn list_buckets(&self, credential: &Credential) -> Result<Vec<Bucket>> {
        let names = self
            .cache
            .user_buckets(&self.store, &credential.user_id)
            .await?;
        let mut buckets = Vec::with_capacity(names.len());
        for name in names {
            buckets.push(self.load_bucket(&name).await?);
        }
        Ok(buckets)
    }

    /// Delete an empty bucket, along with its lifecycle enrolment.
    pub async fn delete_bucket(&self, credential: &Credential, bucket_name: &str) -> Result<()> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        if !self.store.is_empty_bucket(bucket_name).await? {
            return Err(GatewayError::BucketNotEmpty(bucket_name.to_string()));
        }

        let mut tx = self.store.begin().await?;
        self.store.delete_bucket(bucket_name, &mut tx).await?;
        self.store.delete_lifecycle_entry(bucket_name, &mut tx).await?;
        tx.commit().await?;

        self.cache.invalidate_bucket(bucket_name).await;
        self.cache.invalidate_user(&credential.user_id).await;
        info!(bucket = bucket_name, "bucket deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Versioning
    // ------------------------------------------------------------------

    pub async fn set_bucket_versioning(
        &self,
        credential: &Credential,
        bucket_name: &str,
        state: VersioningState,
    ) -> Result<()> {
        if state == VersioningState::Disabled {
            return Err(GatewayError::InvalidArgument(
                "versioning cannot be disabled once configured".into(),
            ));
        }
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        bucket.versioning = state;
        self.store.put_bucket(&bucket).await?;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(())
    }

    pub async fn get_bucket_versioning(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<VersioningState> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        Ok(bucket.versioning)
    }

    // ------------------------------------------------------------------
    // Lifecycle configuration
    // ------------------------------------------------------------------

    pub async fn set_bucket_lifecycle(
        &self,
        credential: &Credential,
        bucket_name: &str,
        lifecycle: LifecycleConfiguration,
    ) -> Result<()> {
        lifecycle.validate()?;
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        bucket.lifecycle = lifecycle;

        let mut tx = self.store.begin().await?;
        self.store.enrol_lifecycle(&bucket, &mut tx).await?;
        tx.commit().await?;
        self.cache.invalidate_bucket(bucket_name).await;
        info!(bucket = bucket_name, "lifecycle configured");
        Ok(())
    }

    pub async fn get_bucket_lifecycle(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<LifecycleConfiguration> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        if bucket.lifecycle.is_empty() {
            return Err(GatewayError::NoSuchBucketLifecycle(bucket_name.to_string()));
        }
        Ok(bucket.lifecycle)
    }

    pub async fn delete_bucket_lifecycle(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<()> {
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        bucket.lifecycle = LifecycleConfiguration::default();

        let mut tx = self.store.begin().await?;
        self.store.remove_lifecycle(&bucket, &mut tx).await?;
        tx.commit().await?;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // ACL / CORS / policy / website / logging
    // ------------------------------------------------------------------

    pub async fn set_bucket_acl(
        &self,
        credential: &Credential,
        bucket_name: &str,
        acl: Acl,
    ) -> Result<()> {
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        bucket.acl = acl;
        self.store.put_bucket(&bucket).await?;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(())
    }

    pub async fn get_bucket_acl(&self, credential: &Credential, bucket_name: &str) -> Result<Acl> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        Ok(bucket.acl)
    }

    pub async fn set_bucket_cors(
        &self,
        credential: &Credential,
        bucket_name: &str,
        cors: CorsConfiguration,
    ) -> Result<()> {
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        bucket.cors = cors;
        self.store.put_bucket(&bucket).await?;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(())
    }

    pub async fn get_bucket_cors(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<CorsConfiguration> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        if bucket.cors.is_empty() {
            return Err(GatewayError::NoSuchBucketCors(bucket_name.to_string()));
        }
        Ok(bucket.cors)
    }

    pub async fn delete_bucket_cors(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<()> {
        self.set_bucket_cors(credential, bucket_name, CorsConfiguration::default())
            .await
    }

    pub async fn set_bucket_policy(
        &self,
        credential: &Credential,
        bucket_name: &str,
        policy: serde_json::Value,
    ) -> Result<()> {
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        bucket.policy = policy;
        self.store.put_bucket(&bucket).await?;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(())
    }

    pub async fn get_bucket_policy(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<serde_json::Value> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        if bucket.policy.is_null() {
            return Err(GatewayError::NoSuchBucketPolicy(bucket_name.to_string()));
        }
        Ok(bucket.policy)
    }

    pub async fn delete_bucket_policy(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<()> {
        self.set_bucket_policy(credential, bucket_name, serde_json::Value::Null)
            .await
    }

    pub async fn set_bucket_website(
        &self,
        credential: &Credential,
        bucket_name: &str,
        website: WebsiteConfiguration,
    ) -> Result<()> {
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        bucket.website = website;
        self.store.put_bucket(&bucket).await?;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(())
    }

    pub async fn get_bucket_website(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<WebsiteConfiguration> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        if bucket.website.is_empty() {
            return Err(GatewayError::NoSuchBucketWebsite(bucket_name.to_string()));
        }
        Ok(bucket.website)
    }

    pub async fn delete_bucket_website(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<()> {
        self.set_bucket_website(credential, bucket_name, WebsiteConfiguration::default())
            .await
    }

    pub async fn set_bucket_logging(
        &self,
        credential: &Credential,
        bucket_name: &str,
        logging: BucketLoggingStatus,
    ) -> Result<()> {
        let mut bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        if logging.enabled {
            // The target must exist and belong to the same owner.
            let target = self.load_bucket(&logging.target_bucket).await?;
            if target.owner_id != credential.user_id {
                warn!(
                    bucket = bucket_name,
                    target = %logging.target_bucket,
                    "logging target owned by another user"
                );
                return Err(GatewayError::AccessDenied);
            }
        }
        bucket.logging = logging;
        self.store.put_bucket(&bucket).await?;
        self.cache.invalidate_bucket(bucket_name).await;
        Ok(())
    }

    pub async fn get_bucket_logging(
        &self,
        credential: &Credential,
        bucket_name: &str,
    ) -> Result<BucketLoggingStatus> {
        let bucket = self.load_bucket(bucket_name).await?;
        self.check_owner(&bucket, credential)?;
        Ok(bucket.logging)
    }

    /// Recompute per-bucket usage and file counts from the object table
    /// and write them back. Counter-drift repair, run by tooling.
    pub async fn refresh_bucket_usage(&self) -> Result<()> {
        let usage = self.store.get_all_bucket_usage().await?;
        let mut tx = self.store.begin().await?;
        self.store.refresh_usage_and_count(&usage, &mut tx).await?;
        tx.commit().await?;
        for bucket in usage.keys() {
            self.cache.invalidate_bucket(bucket).await;
        }
        Ok(())
    }
}
