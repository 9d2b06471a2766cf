use std::collections::{BTreeMap, HashMap};

use chrono::DateTime;
use gatehouse_core::{InternalVersion, StoreInfo};
use gatehouse_metadata::*;

async fn store() -> MetaStore {
    MetaStore::new_in_memory().await.unwrap()
}

fn obj(bucket: &str, key: &str, nanos: u64) -> ObjectMeta {
    ObjectMeta {
        bucket: bucket.to_string(),
        key: key.to_string(),
        version: InternalVersion::from_modified_nanos(nanos),
        location: "ceph0".to_string(),
        pool: "tiger".to_string(),
        owner_id: "user1".to_string(),
        size: 1,
        object_id: format!("1:{key}:{nanos}"),
        last_modified: DateTime::from_timestamp_nanos(nanos as i64),
        etag: "etag".to_string(),
        content_type: "text/plain".to_string(),
        custom_attributes: HashMap::new(),
        acl: Acl::default(),
        null_version: false,
        delete_marker: false,
        sse_type: String::new(),
        encryption_key: Vec::new(),
        iv: Vec::new(),
        kind: ObjectKind::Normal,
        storage_class: StorageClass::Standard,
        is_latest: true,
        store_info: StoreInfo::LegacyMonolithic,
        parts: BTreeMap::new(),
    }
}

async fn insert_version(store: &MetaStore, object: &ObjectMeta) {
    let mut tx = store.begin().await.unwrap();
    store
        .set_latest_false(&object.bucket, &object.key, &mut tx)
        .await
        .unwrap();
    store.put_object(object, &mut tx).await.unwrap();
    tx.commit().await.unwrap();
}

fn keys(page: &ListObjectsPage) -> Vec<String> {
    page.objects.iter().map(|o| o.key.clone()).collect()
}

/// Concatenate every page of a listing with the given page size.
async fn paginate(
    store: &MetaStore,
    bucket: &str,
    versioned_bucket: bool,
    mut q: ListObjectsQuery,
) -> (Vec<(String, InternalVersion)>, Vec<String>) {
    let mut entries = Vec::new();
    let mut prefixes = Vec::new();
    loop {
        let page = store.list_objects(bucket, versioned_bucket, &q).await.unwrap();
        for o in &page.objects {
            entries.push((o.key.clone(), o.version));
        }
        for p in &page.common_prefixes {
            if !prefixes.contains(p) {
                prefixes.push(p.clone());
            }
        }
        if !page.truncated {
            break;
        }
        q.marker = page.next_marker.clone();
        q.version_id_marker = page.next_version_marker;
    }
    prefixes.sort();
    (entries, prefixes)
}

#[tokio::test]
async fn plain_listing_with_delimiter_groups_directories() {
    let store = store().await;
    for (i, key) in ["dir0/a", "dir0/b", "dir1/a", "z"].iter().enumerate() {
        insert_version(&store, &obj("b1", key, 1_000 + i as u64)).await;
    }

    let page = store
        .list_objects(
            "b1",
            false,
            &ListObjectsQuery {
                delimiter: "/".to_string(),
                max_keys: 1000,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.common_prefixes, vec!["dir0/", "dir1/"]);
    assert_eq!(keys(&page), vec!["z"]);
    assert!(!page.truncated);
}

#[tokio::test]
async fn plain_listing_respects_prefix_and_marker() {
    let store = store().await;
    for (i, key) in ["a/1", "a/2", "a_b", "b/1"].iter().enumerate() {
        insert_version(&store, &obj("b1", key, 1_000 + i as u64)).await;
    }

    // `_` must be treated literally, not as a LIKE wildcard.
    let page = store
        .list_objects(
            "b1",
            false,
            &ListObjectsQuery {
                prefix: "a_".to_string(),
                max_keys: 1000,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(keys(&page), vec!["a_b"]);

    let page = store
        .list_objects(
            "b1",
            false,
            &ListObjectsQuery {
                marker: "a/2".to_string(),
                max_keys: 1000,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(keys(&page), vec!["a_b", "b/1"]);
}

#[tokio::test]
async fn plain_pagination_concat_equals_single_listing() {
    let store = store().await;
    let all: Vec<String> = (0..17).map(|i| format!("key-{i:02}")).collect();
    for (i, key) in all.iter().enumerate() {
        insert_version(&store, &obj("b1", key, 1_000 + i as u64)).await;
    }

    let (full, _) = paginate(
        &store,
        "b1",
        false,
        ListObjectsQuery {
            max_keys: 1000,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(full.len(), 17);

    for page_size in [1usize, 2, 3, 5, 16, 17] {
        let (paged, _) = paginate(
            &store,
            "b1",
            false,
            ListObjectsQuery {
                max_keys: page_size,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(paged, full, "page size {page_size}");
    }
}

#[tokio::test]
async fn latest_view_skips_delete_markers_unless_asked() {
    let store = store().await;
    insert_version(&store, &obj("b1", "kept", 1_000)).await;
    insert_version(&store, &obj("b1", "gone", 2_000)).await;
    let mut marker = obj("b1", "gone", 3_000);
    marker.delete_marker = true;
    marker.size = 0;
    insert_version(&store, &marker).await;

    let q = ListObjectsQuery {
        max_keys: 1000,
        ..Default::default()
    };
    let page = store.list_objects("b1", true, &q).await.unwrap();
    assert_eq!(keys(&page), vec!["kept"]);

    let page = store
        .list_objects(
            "b1",
            true,
            &ListObjectsQuery {
                with_delete_markers: true,
                ..q
            },
        )
        .await
        .unwrap();
    assert_eq!(keys(&page), vec!["gone", "kept"]);
}

/// The list-object-versions shape of scenario: three versions each of
/// `dir0/a`, `dir0/b`, `dir1/a` and `z`, listed with a delimiter, must
/// fold the directories into common prefixes and return only `z`'s
/// versions, newest first.
#[tokio::test]
async fn versions_with_delimiter_fold_directories() {
    let store = store().await;
    let mut nanos = 1_000u64;
    for key in ["dir0/a", "dir0/b", "dir1/a", "z"] {
        for _ in 0..3 {
            insert_version(&store, &obj("b1", key, nanos)).await;
            nanos += 1_000;
        }
    }

    let page = store
        .list_objects(
            "b1",
            true,
            &ListObjectsQuery {
                delimiter: "/".to_string(),
                max_keys: 1000,
                versioned: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(page.common_prefixes, vec!["dir0/", "dir1/"]);
    let listed: Vec<(String, u64)> = page
        .objects
        .iter()
        .map(|o| (o.key.clone(), o.version.modified_nanos()))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("z".to_string(), 12_000),
            ("z".to_string(), 11_000),
            ("z".to_string(), 10_000),
        ]
    );
    assert!(!page.truncated);
}

#[tokio::test]
async fn versioned_listing_returns_every_version_newest_first_per_key() {
    let store = store().await;
    insert_version(&store, &obj("b1", "a", 1_000)).await;
    insert_version(&store, &obj("b1", "a", 2_000)).await;
    insert_version(&store, &obj("b1", "b", 3_000)).await;
    let mut marker = obj("b1", "b", 4_000);
    marker.delete_marker = true;
    marker.size = 0;
    insert_version(&store, &marker).await;

    let page = store
        .list_objects(
            "b1",
            true,
            &ListObjectsQuery {
                max_keys: 1000,
                versioned: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let listed: Vec<(String, u64, bool)> = page
        .objects
        .iter()
        .map(|o| (o.key.clone(), o.version.modified_nanos(), o.delete_marker))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("a".to_string(), 2_000, false),
            ("a".to_string(), 1_000, false),
            ("b".to_string(), 4_000, true),
            ("b".to_string(), 3_000, false),
        ]
    );
}

#[tokio::test]
async fn versioned_pagination_concat_equals_single_listing() {
    let store = store().await;
    let mut nanos = 1_000u64;
    for key in ["a", "b", "c"] {
        for _ in 0..4 {
            insert_version(&store, &obj("b1", key, nanos)).await;
            nanos += 1_000;
        }
    }

    let (full, _) = paginate(
        &store,
        "b1",
        true,
        ListObjectsQuery {
            max_keys: 1000,
            versioned: true,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(full.len(), 12);

    for page_size in [1usize, 2, 3, 5, 11, 12] {
        let (paged, _) = paginate(
            &store,
            "b1",
            true,
            ListObjectsQuery {
                max_keys: page_size,
                versioned: true,
                ..Default::default()
            },
        )
        .await;
        assert_eq!(paged, full, "page size {page_size}");
    }
}

#[tokio::test]
async fn versioned_delimiter_pagination_concat_equals_single_listing() {
    let store = store().await;
    let mut nanos = 1_000u64;
    for key in ["dir0/a", "dir1/b", "x", "y", "z"] {
        for _ in 0..3 {
            insert_version(&store, &obj("b1", key, nanos)).await;
            nanos += 1_000;
        }
    }

    let base = ListObjectsQuery {
        delimiter: "/".to_string(),
        max_keys: 1000,
        versioned: true,
        ..Default::default()
    };
    let (full, full_prefixes) = paginate(&store, "b1", true, base.clone()).await;
    assert_eq!(full.len(), 9);
    assert_eq!(full_prefixes, vec!["dir0/", "dir1/"]);

    for page_size in [1usize, 2, 3, 4, 7] {
        let (paged, prefixes) = paginate(
            &store,
            "b1",
            true,
            ListObjectsQuery {
                max_keys: page_size,
                ..base.clone()
            },
        )
        .await;
        assert_eq!(paged, full, "page size {page_size}");
        assert_eq!(prefixes, full_prefixes, "page size {page_size}");
    }
}
