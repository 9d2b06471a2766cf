use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{Duration, Utc};
use gatehouse_cluster::MemoryCluster;
use gatehouse_core::{InternalVersion, LifecycleConfiguration, StoreInfo, StripeGeometry};
use gatehouse_gateway::{Credential, Gateway, GatewayConfig};
use gatehouse_lifecycle::{EngineConfig, LifecycleEngine};
use gatehouse_metadata::{
    Acl, LifecycleEntry, LifecycleStatus, MetaStore, MetadataError, MultipartUpload, ObjectKind,
    ObjectMeta, Part, StorageClass, VersionQuery, VersioningState,
};

async fn fixture() -> (Arc<Gateway>, Arc<LifecycleEngine>) {
    let store = Arc::new(MetaStore::new_in_memory().await.unwrap());
    let cluster = Arc::new(MemoryCluster::new());
    let config = GatewayConfig {
        geometry: StripeGeometry {
            object_size: 8 << 10,
            unit: 2 << 10,
            stripe_count: 2,
        },
        ..Default::default()
    };
    let gateway = Arc::new(Gateway::new(store, cluster, config).unwrap());
    gateway.bootstrap().await.unwrap();
    let engine = LifecycleEngine::new(
        Arc::clone(&gateway),
        EngineConfig {
            workers: 2,
            debug: true,
            ..Default::default()
        },
    );
    (gateway, engine)
}

fn alice() -> Credential {
    Credential::new("alice")
}

/// Insert an object row whose modification time lies `age_secs` in the
/// past, the way aged fixtures look to the engine's debug clock (one rule
/// day per second).
async fn seed_aged_version(
    store: &MetaStore,
    bucket: &str,
    key: &str,
    age_secs: i64,
    delete_marker: bool,
) -> ObjectMeta {
    let at = Utc::now() - Duration::seconds(age_secs);
    let nanos = at.timestamp_nanos_opt().unwrap() as u64;
    let object = ObjectMeta {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version: InternalVersion::from_modified_nanos(nanos),
        location: "memory".to_string(),
        pool: "tiger".to_string(),
        owner_id: "alice".to_string(),
        size: if delete_marker { 0 } else { 3 },
        object_id: if delete_marker {
            String::new()
        } else {
            format!("1:seed:{key}:{age_secs}")
        },
        last_modified: at,
        etag: String::new(),
        content_type: String::new(),
        custom_attributes: HashMap::new(),
        acl: Acl::default(),
        null_version: false,
        delete_marker,
        sse_type: String::new(),
        encryption_key: Vec::new(),
        iv: Vec::new(),
        kind: ObjectKind::Normal,
        storage_class: StorageClass::Standard,
        is_latest: true,
        store_info: StoreInfo::LegacyMonolithic,
        parts: BTreeMap::new(),
    };
    let mut tx = store.begin().await.unwrap();
    store.set_latest_false(bucket, key, &mut tx).await.unwrap();
    store.put_object(&object, &mut tx).await.unwrap();
    tx.commit().await.unwrap();
    object
}

async fn make_eligible(store: &MetaStore, bucket: &str) {
    store
        .put_lifecycle_entry(&LifecycleEntry {
            bucket: bucket.to_string(),
            status: LifecycleStatus::Pending,
            last_scanned: 0,
        })
        .await
        .unwrap();
}

fn rules(json: &str) -> LifecycleConfiguration {
    serde_json::from_str(json).unwrap()
}

fn key_exists(result: Result<ObjectMeta, MetadataError>) -> bool {
    match result {
        Ok(_) => true,
        Err(MetadataError::NoSuchKey { .. }) => false,
        Err(e) => panic!("unexpected error: {e}"),
    }
}

/// Expiration with a prefix: only keys under the prefix age out.
#[tokio::test]
async fn expiration_rule_honours_prefix() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(r#"{"Rules":[{"ID":"r1","Status":"Enabled","Filter":{"Prefix":"1"},"Expiration":{"Days":10}}]}"#),
        )
        .await
        .unwrap();

    seed_aged_version(gateway.store(), "b1", "1a", 100, false).await;
    seed_aged_version(gateway.store(), "b1", "2a", 100, false).await;
    make_eligible(gateway.store(), "b1").await;

    engine.run_once().await.unwrap();

    assert!(!key_exists(
        gateway.store().get_object("b1", "1a", VersionQuery::Latest).await
    ));
    assert!(key_exists(
        gateway.store().get_object("b1", "2a", VersionQuery::Latest).await
    ));
}

#[tokio::test]
async fn young_objects_survive_expiration() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(r#"{"Rules":[{"ID":"r1","Status":"Enabled","Filter":{},"Expiration":{"Days":10}}]}"#),
        )
        .await
        .unwrap();

    seed_aged_version(gateway.store(), "b1", "old", 100, false).await;
    seed_aged_version(gateway.store(), "b1", "young", 2, false).await;
    make_eligible(gateway.store(), "b1").await;

    engine.run_once().await.unwrap();

    assert!(!key_exists(
        gateway.store().get_object("b1", "old", VersionQuery::Latest).await
    ));
    assert!(key_exists(
        gateway.store().get_object("b1", "young", VersionQuery::Latest).await
    ));
}

#[tokio::test]
async fn disabled_rules_do_nothing() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(r#"{"Rules":[{"ID":"r1","Status":"Disabled","Filter":{},"Expiration":{"Days":10}}]}"#),
        )
        .await
        .unwrap();
    seed_aged_version(gateway.store(), "b1", "k", 100, false).await;
    make_eligible(gateway.store(), "b1").await;

    engine.run_once().await.unwrap();
    assert!(key_exists(
        gateway.store().get_object("b1", "k", VersionQuery::Latest).await
    ));
}

/// Non-current version expiration plus expired-delete-marker cleanup:
/// three aged versions and an aged trailing marker all disappear, the
/// marker last because it ends up as the key's only row.
#[tokio::test]
async fn noncurrent_expiration_clears_old_versions_and_marker() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_versioning(&alice(), "b1", VersioningState::Enabled)
        .await
        .unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(
                r#"{"Rules":[{"ID":"r1","Status":"Enabled","Filter":{},
                    "NoncurrentVersionExpiration":{"NoncurrentDays":10},
                    "Expiration":{"ExpiredObjectDeleteMarker":true}}]}"#,
            ),
        )
        .await
        .unwrap();

    seed_aged_version(gateway.store(), "b1", "k", 600, false).await;
    seed_aged_version(gateway.store(), "b1", "k", 500, false).await;
    seed_aged_version(gateway.store(), "b1", "k", 400, false).await;
    seed_aged_version(gateway.store(), "b1", "k", 300, true).await;
    make_eligible(gateway.store(), "b1").await;

    engine.run_once().await.unwrap();

    let remaining = gateway
        .store()
        .get_all_versions("b1", "k", None, 10, false)
        .await
        .unwrap();
    assert!(remaining.is_empty(), "left: {remaining:?}");
}

/// A young latest version shields itself; only versions made non-current
/// by an expired successor go.
#[tokio::test]
async fn noncurrent_expiration_keeps_the_live_version() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_versioning(&alice(), "b1", VersioningState::Enabled)
        .await
        .unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(
                r#"{"Rules":[{"ID":"r1","Status":"Enabled","Filter":{},
                    "NoncurrentVersionExpiration":{"NoncurrentDays":10}}]}"#,
            ),
        )
        .await
        .unwrap();

    seed_aged_version(gateway.store(), "b1", "k", 600, false).await;
    seed_aged_version(gateway.store(), "b1", "k", 500, false).await;
    let live = seed_aged_version(gateway.store(), "b1", "k", 1, false).await;
    make_eligible(gateway.store(), "b1").await;

    engine.run_once().await.unwrap();

    let remaining = gateway
        .store()
        .get_all_versions("b1", "k", None, 10, false)
        .await
        .unwrap();
    // The 600s version went (its successor is expired); the 500s version
    // stays because the walk stopped at the young live row.
    let times: Vec<u64> = remaining.iter().map(|o| o.version.modified_nanos()).collect();
    assert_eq!(remaining.len(), 2);
    assert_eq!(times[0], live.version.modified_nanos());
    assert!(remaining[0].is_latest);
}

#[tokio::test]
async fn stale_multipart_uploads_are_aborted() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(
                r#"{"Rules":[{"ID":"r1","Status":"Enabled","Filter":{},
                    "AbortIncompleteMultipartUpload":{"DaysAfterInitiation":10}}]}"#,
            ),
        )
        .await
        .unwrap();

    for (id, age) in [("stale", 100i64), ("fresh", 2)] {
        gateway
            .store()
            .create_multipart(&MultipartUpload {
                bucket: "b1".to_string(),
                key: format!("{id}-key"),
                upload_id: id.to_string(),
                initiator_id: "alice".to_string(),
                owner_id: "alice".to_string(),
                initiated: Utc::now() - Duration::seconds(age),
                content_type: String::new(),
                acl: Acl::default(),
                sse_type: String::new(),
                encryption_key: Vec::new(),
                pool: "tiger".to_string(),
                storage_class: StorageClass::Standard,
                attrs: HashMap::new(),
            })
            .await
            .unwrap();
        gateway
            .store()
            .put_multipart_part(
                "b1",
                &format!("{id}-key"),
                id,
                &Part {
                    part_number: 1,
                    size: 3,
                    object_id: format!("1:{id}"),
                    offset: 0,
                    etag: "e".to_string(),
                    last_modified: Utc::now(),
                    iv: Vec::new(),
                    store_info: StoreInfo::LegacyMonolithic,
                },
            )
            .await
            .unwrap();
    }
    make_eligible(gateway.store(), "b1").await;

    engine.run_once().await.unwrap();

    assert!(gateway
        .store()
        .get_multipart("b1", "stale-key", "stale")
        .await
        .is_err());
    assert!(gateway
        .store()
        .get_multipart("b1", "fresh-key", "fresh")
        .await
        .is_ok());
}

/// A freshly claimed bucket is not eligible again within the interval.
#[tokio::test]
async fn buckets_are_processed_once_per_interval() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(r#"{"Rules":[{"ID":"r1","Status":"Enabled","Filter":{},"Expiration":{"Days":10}}]}"#),
        )
        .await
        .unwrap();
    seed_aged_version(gateway.store(), "b1", "first", 100, false).await;
    make_eligible(gateway.store(), "b1").await;

    engine.run_once().await.unwrap();
    assert!(!key_exists(
        gateway.store().get_object("b1", "first", VersionQuery::Latest).await
    ));
    let claimed = gateway.store().lifecycle_entry("b1").await.unwrap().unwrap();
    assert!(claimed.last_scanned > 0);

    // Another aged key appears, but the bucket was just scanned.
    seed_aged_version(gateway.store(), "b1", "second", 100, false).await;
    engine.run_once().await.unwrap();
    assert!(key_exists(
        gateway.store().get_object("b1", "second", VersionQuery::Latest).await
    ));
}

#[tokio::test]
async fn stop_flag_halts_the_run() {
    let (gateway, engine) = fixture().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    gateway
        .set_bucket_lifecycle(
            &alice(),
            "b1",
            rules(r#"{"Rules":[{"ID":"r1","Status":"Enabled","Filter":{},"Expiration":{"Days":10}}]}"#),
        )
        .await
        .unwrap();
    seed_aged_version(gateway.store(), "b1", "k", 100, false).await;
    make_eligible(gateway.store(), "b1").await;

    engine.request_stop();
    engine.run_once().await.unwrap();
    assert!(key_exists(
        gateway.store().get_object("b1", "k", VersionQuery::Latest).await
    ));
}
