use std::sync::Arc;

use gatehouse_cluster::{Cluster, MemoryCluster};
use gatehouse_core::{LifecycleConfiguration, StripeGeometry};
use gatehouse_gateway::objects::{GetObjectRequest, PutObjectInput};
use gatehouse_gateway::{Credential, Gateway, GatewayConfig, GatewayError};
use gatehouse_metadata::{Acl, ListUploadsQuery, MetaStore, VersioningState};
use gatehouse_storage::read_to_end;

const POOL: &str = "tiger";

async fn gateway() -> (Gateway, Arc<MemoryCluster>) {
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
    let gateway = Gateway::new(store, cluster.clone(), config).unwrap();
    gateway.bootstrap().await.unwrap();
    (gateway, cluster)
}

fn alice() -> Credential {
    Credential::new("alice")
}

async fn put(gateway: &Gateway, bucket: &str, key: &str, body: &[u8]) -> Option<String> {
    let mut source = body;
    gateway
        .put_object(&alice(), bucket, key, PutObjectInput::default(), &mut source)
        .await
        .unwrap()
        .version_id
}

async fn get(gateway: &Gateway, bucket: &str, key: &str, version_id: Option<&str>) -> Vec<u8> {
    let mut out = gateway
        .get_object(
            &alice(),
            bucket,
            key,
            GetObjectRequest {
                version_id: version_id.map(str::to_string),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    read_to_end(out.reader.as_mut()).await.unwrap()
}

async fn versioned_bucket(gateway: &Gateway, name: &str) {
    gateway.make_bucket(&alice(), name, Acl::default()).await.unwrap();
    gateway
        .set_bucket_versioning(&alice(), name, VersioningState::Enabled)
        .await
        .unwrap();
}

/// PUT v1, PUT v2, versionless DELETE: the delete marker becomes latest,
/// HEAD turns into NoSuchKey, and both old versions stay addressable.
#[tokio::test]
async fn versioned_put_put_delete() {
    let (gateway, _) = gateway().await;
    versioned_bucket(&gateway, "b1").await;

    let v1 = put(&gateway, "b1", "k", b"v1").await.unwrap();
    let v2 = put(&gateway, "b1", "k", b"v2").await.unwrap();
    assert_ne!(v1, v2);

    let deleted = gateway
        .delete_object(&alice(), "b1", "k", None)
        .await
        .unwrap();
    assert!(deleted.delete_marker);

    let head = gateway.head_object(&alice(), "b1", "k", None).await;
    assert!(matches!(head, Err(GatewayError::NoSuchKey { .. })));
    assert_eq!(head.unwrap_err().status_code(), 404);

    assert_eq!(get(&gateway, "b1", "k", Some(&v1)).await, b"v1");
    assert_eq!(get(&gateway, "b1", "k", Some(&v2)).await, b"v2");

    // Exactly one latest: the marker.
    let versions = gateway
        .store()
        .get_all_versions("b1", "k", None, 10, false)
        .await
        .unwrap();
    assert_eq!(versions.len(), 3);
    let latest: Vec<bool> = versions.iter().map(|o| o.is_latest).collect();
    assert_eq!(latest, vec![true, false, false]);
    assert!(versions[0].delete_marker);
}

#[tokio::test]
async fn unversioned_put_overwrites_and_reaps() {
    let (gateway, cluster) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();

    put(&gateway, "b1", "k", &vec![1u8; 5000]).await;
    assert!(cluster.object_count(POOL) > 0);
    let after_first = cluster.object_count(POOL);

    put(&gateway, "b1", "k", b"tiny").await;
    // Old payload gone, only the new object's single backend unit left.
    assert!(cluster.object_count(POOL) < after_first);
    assert_eq!(get(&gateway, "b1", "k", None).await, b"tiny");
    assert_eq!(gateway.store().get_bucket("b1").await.unwrap().usage, 4);

    gateway.delete_object(&alice(), "b1", "k", None).await.unwrap();
    assert_eq!(cluster.object_count(POOL), 0);
    assert_eq!(gateway.store().get_bucket("b1").await.unwrap().usage, 0);
    // Deleting an absent key still succeeds.
    gateway.delete_object(&alice(), "b1", "k", None).await.unwrap();
}

#[tokio::test]
async fn suspended_bucket_reuses_the_null_slot() {
    let (gateway, _) = gateway().await;
    versioned_bucket(&gateway, "b1").await;

    let v1 = put(&gateway, "b1", "k", b"versioned").await.unwrap();

    gateway
        .set_bucket_versioning(&alice(), "b1", VersioningState::Suspended)
        .await
        .unwrap();
    let n1 = put(&gateway, "b1", "k", b"null one").await.unwrap();
    assert_eq!(n1, "null");
    let n2 = put(&gateway, "b1", "k", b"null two").await.unwrap();
    assert_eq!(n2, "null");

    // The enabled-era version survives, the first null version does not.
    let versions = gateway
        .store()
        .get_all_versions("b1", "k", None, 10, false)
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(get(&gateway, "b1", "k", Some("null")).await, b"null two");
    assert_eq!(get(&gateway, "b1", "k", Some(&v1)).await, b"versioned");
    assert_eq!(
        versions.iter().filter(|o| o.null_version).count(),
        1,
        "one null version at most"
    );
}

#[tokio::test]
async fn deleting_the_latest_version_promotes_the_next() {
    let (gateway, _) = gateway().await;
    versioned_bucket(&gateway, "b1").await;

    let _v1 = put(&gateway, "b1", "k", b"one").await.unwrap();
    let v2 = put(&gateway, "b1", "k", b"two").await.unwrap();

    let out = gateway
        .delete_object(&alice(), "b1", "k", Some(&v2))
        .await
        .unwrap();
    assert!(!out.delete_marker);

    let (meta, _) = gateway.head_object(&alice(), "b1", "k", None).await.unwrap();
    assert!(meta.is_latest);
    assert_eq!(get(&gateway, "b1", "k", None).await, b"one");
}

#[tokio::test]
async fn versioning_cannot_return_to_disabled() {
    let (gateway, _) = gateway().await;
    versioned_bucket(&gateway, "b1").await;
    let err = gateway
        .set_bucket_versioning(&alice(), "b1", VersioningState::Disabled)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn bucket_creation_conflicts() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();

    let again = gateway.make_bucket(&alice(), "b1", Acl::default()).await;
    assert!(matches!(again, Err(GatewayError::BucketAlreadyOwnedByYou(_))));

    let bob = Credential::new("bob");
    let theirs = gateway.make_bucket(&bob, "b1", Acl::default()).await;
    assert!(matches!(theirs, Err(GatewayError::BucketAlreadyExists(_))));
    assert_eq!(theirs.unwrap_err().status_code(), 409);

    assert!(gateway.make_bucket(&alice(), "Bad_Name", Acl::default()).await.is_err());
}

#[tokio::test]
async fn bucket_deletion_requires_empty() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    put(&gateway, "b1", "k", b"x").await;

    let err = gateway.delete_bucket(&alice(), "b1").await.unwrap_err();
    assert!(matches!(err, GatewayError::BucketNotEmpty(_)));

    gateway.delete_object(&alice(), "b1", "k", None).await.unwrap();
    gateway.delete_bucket(&alice(), "b1").await.unwrap();
    assert!(gateway.head_bucket(&alice(), "b1").await.is_err());
}

#[tokio::test]
async fn owner_checks_guard_writes() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();

    let bob = Credential::new("bob");
    let mut body: &[u8] = b"data";
    let err = gateway
        .put_object(&bob, "b1", "k", PutObjectInput::default(), &mut body)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AccessDenied));
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn lifecycle_configuration_round_trip() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();

    assert!(matches!(
        gateway.get_bucket_lifecycle(&alice(), "b1").await,
        Err(GatewayError::NoSuchBucketLifecycle(_))
    ));

    let lifecycle: LifecycleConfiguration = serde_json::from_str(
        r#"{"Rules":[{"ID":"expire","Status":"Enabled","Filter":{"Prefix":"tmp/"},"Expiration":{"Days":7}}]}"#,
    )
    .unwrap();
    gateway
        .set_bucket_lifecycle(&alice(), "b1", lifecycle.clone())
        .await
        .unwrap();

    assert_eq!(
        gateway.get_bucket_lifecycle(&alice(), "b1").await.unwrap(),
        lifecycle
    );
    assert!(gateway.store().lifecycle_entry("b1").await.unwrap().is_some());

    gateway.delete_bucket_lifecycle(&alice(), "b1").await.unwrap();
    assert!(gateway.store().lifecycle_entry("b1").await.unwrap().is_none());
    assert!(gateway.get_bucket_lifecycle(&alice(), "b1").await.is_err());
}

#[tokio::test]
async fn multipart_upload_end_to_end() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();

    let upload_id = gateway
        .create_multipart_upload(&alice(), "b1", "big", PutObjectInput::default())
        .await
        .unwrap();

    let part_one = vec![1u8; 5_000];
    let part_two = vec![2u8; 3_000];
    let mut source = part_one.as_slice();
    let etag_one = gateway
        .upload_part(&alice(), "b1", "big", &upload_id, 1, &mut source)
        .await
        .unwrap();
    let mut source = part_two.as_slice();
    let etag_two = gateway
        .upload_part(&alice(), "b1", "big", &upload_id, 2, &mut source)
        .await
        .unwrap();

    let uploads = gateway
        .list_multipart_uploads(
            &alice(),
            "b1",
            &ListUploadsQuery {
                max_uploads: 100,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(uploads.uploads.len(), 1);

    let out = gateway
        .complete_multipart_upload(
            &alice(),
            "b1",
            "big",
            &upload_id,
            vec![(1, etag_one), (2, etag_two)],
        )
        .await
        .unwrap();
    assert_eq!(out.size, 8_000);
    assert!(out.etag.ends_with("-2"));

    let mut expected = part_one.clone();
    expected.extend_from_slice(&part_two);
    assert_eq!(get(&gateway, "b1", "big", None).await, expected);

    // Ranged read across the part boundary.
    let mut ranged = gateway
        .get_object(
            &alice(),
            "b1",
            "big",
            GetObjectRequest {
                range: Some((4_998, 4)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        read_to_end(ranged.reader.as_mut()).await.unwrap(),
        vec![1, 1, 2, 2]
    );

    // The upload rows are gone.
    assert!(gateway
        .store()
        .get_multipart("b1", "big", &upload_id)
        .await
        .is_err());
    assert_eq!(gateway.store().get_bucket("b1").await.unwrap().usage, 8_000);
}

#[tokio::test]
async fn multipart_completion_validates_the_manifest() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    let upload_id = gateway
        .create_multipart_upload(&alice(), "b1", "k", PutObjectInput::default())
        .await
        .unwrap();
    let mut source: &[u8] = b"part data";
    let etag = gateway
        .upload_part(&alice(), "b1", "k", &upload_id, 1, &mut source)
        .await
        .unwrap();

    let missing = gateway
        .complete_multipart_upload(&alice(), "b1", "k", &upload_id, vec![(2, etag.clone())])
        .await;
    assert!(matches!(missing, Err(GatewayError::InvalidPart(2))));

    let bad_etag = gateway
        .complete_multipart_upload(&alice(), "b1", "k", &upload_id, vec![(1, "beef".into())])
        .await;
    assert!(matches!(bad_etag, Err(GatewayError::InvalidPart(1))));

    let out_of_order = gateway
        .complete_multipart_upload(
            &alice(),
            "b1",
            "k",
            &upload_id,
            vec![(1, etag.clone()), (1, etag.clone())],
        )
        .await;
    assert!(matches!(out_of_order, Err(GatewayError::InvalidPartOrder)));
}

#[tokio::test]
async fn multipart_abort_reaps_part_payloads() {
    let (gateway, cluster) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    let upload_id = gateway
        .create_multipart_upload(&alice(), "b1", "k", PutObjectInput::default())
        .await
        .unwrap();
    let mut source: &[u8] = &[3u8; 4_000];
    gateway
        .upload_part(&alice(), "b1", "k", &upload_id, 1, &mut source)
        .await
        .unwrap();
    assert!(cluster.object_count(POOL) > 0);
    assert!(!gateway.store().is_empty_bucket("b1").await.unwrap());

    gateway
        .abort_multipart_upload(&alice(), "b1", "k", &upload_id)
        .await
        .unwrap();
    assert_eq!(cluster.object_count(POOL), 0);
    assert!(gateway.store().is_empty_bucket("b1").await.unwrap());
}

#[tokio::test]
async fn copy_object_preserves_bytes_and_etag() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "src", Acl::default()).await.unwrap();
    gateway.make_bucket(&alice(), "dst", Acl::default()).await.unwrap();

    let body = vec![7u8; 20_000];
    let mut source = body.as_slice();
    let put_out = gateway
        .put_object(&alice(), "src", "k", PutObjectInput::default(), &mut source)
        .await
        .unwrap();

    let copy_out = gateway
        .copy_object(&alice(), "src", "k", None, "dst", "copy", PutObjectInput::default())
        .await
        .unwrap();
    assert_eq!(copy_out.etag, put_out.etag);
    assert_eq!(copy_out.size, body.len() as u64);
    assert_eq!(get(&gateway, "dst", "copy", None).await, body);
}

#[tokio::test]
async fn append_object_grows_in_place() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();

    let mut source: &[u8] = b"hello";
    let out = gateway
        .append_object(&alice(), "b1", "k", 0, PutObjectInput::default(), &mut source)
        .await
        .unwrap();
    assert_eq!(out.next_position, 5);

    let mut source: &[u8] = b" world";
    let out = gateway
        .append_object(&alice(), "b1", "k", 5, PutObjectInput::default(), &mut source)
        .await
        .unwrap();
    assert_eq!(out.next_position, 11);
    assert_eq!(get(&gateway, "b1", "k", None).await, b"hello world");

    let mut source: &[u8] = b"x";
    let err = gateway
        .append_object(&alice(), "b1", "k", 3, PutObjectInput::default(), &mut source)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::InvalidPosition { expected: 11, got: 3 }
    ));
}

#[tokio::test]
async fn list_objects_v2_tokens_round_trip_and_reject_tampering() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    for key in ["a", "b", "c", "d", "e"] {
        put(&gateway, "b1", key, b"x").await;
    }

    let mut collected = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let (page, next) = gateway
            .list_objects_v2(&alice(), "b1", "", "", token.as_deref(), "", 2)
            .await
            .unwrap();
        collected.extend(page.objects.iter().map(|o| o.key.clone()));
        match next {
            Some(t) => token = Some(t),
            None => break,
        }
    }
    assert_eq!(collected, vec!["a", "b", "c", "d", "e"]);

    let err = gateway
        .list_objects_v2(&alice(), "b1", "", "", Some("not-a-token"), "", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidContinuationToken));
}

#[tokio::test]
async fn ranged_get_validates_offsets() {
    let (gateway, _) = gateway().await;
    gateway.make_bucket(&alice(), "b1", Acl::default()).await.unwrap();
    put(&gateway, "b1", "k", b"0123456789").await;

    let mut out = gateway
        .get_object(
            &alice(),
            "b1",
            "k",
            GetObjectRequest {
                range: Some((4, 3)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(read_to_end(out.reader.as_mut()).await.unwrap(), b"456");

    let err = gateway
        .get_object(
            &alice(),
            "b1",
            "k",
            GetObjectRequest {
                range: Some((10, 1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRange));
    assert_eq!(err.status_code(), 416);
}
