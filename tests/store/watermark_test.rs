//! Watermark, interval, role and destination registry state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use feedcast::store::{ChatKind, Destination, DestinationMeta, MemoryStore, WatermarkStore};

fn store() -> WatermarkStore {
    WatermarkStore::new(Arc::new(MemoryStore::new()))
}

fn dest(id: i64, title: &str) -> Destination {
    Destination {
        id,
        meta: DestinationMeta {
            title: title.to_owned(),
            username: None,
            kind: ChatKind::Group,
            members: Some(3),
        },
    }
}

#[tokio::test]
async fn watermark_only_moves_forward() {
    let store = store();
    let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("date");
    let late = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).single().expect("date");

    assert_eq!(store.watermark().await.expect("read"), None);
    assert!(store.advance_watermark(late).await.expect("advance"));
    assert!(!store.advance_watermark(early).await.expect("advance"));
    assert!(!store.advance_watermark(late).await.expect("advance"));
    assert_eq!(store.watermark().await.expect("read"), Some(late));
}

#[tokio::test]
async fn interval_falls_back_to_default() {
    let store = store();
    let default = Duration::from_secs(300);
    assert_eq!(store.interval(default).await.expect("read"), default);

    store.set_interval(45).await.expect("write");
    assert_eq!(store.interval(default).await.expect("read"), Duration::from_secs(45));

    store.set_interval(0).await.expect("write");
    assert_eq!(store.interval(default).await.expect("read"), default);
}

#[tokio::test]
async fn owner_and_admins_persist() {
    let store = store();
    assert_eq!(store.owner().await.expect("read"), None);
    assert!(store.admins().await.expect("read").is_empty());

    store.set_owner(1).await.expect("write");
    store.set_admins(&[2, 3]).await.expect("write");

    assert_eq!(store.owner().await.expect("read"), Some(1));
    assert_eq!(store.admins().await.expect("read"), vec![2, 3]);
}

#[tokio::test]
async fn upsert_reports_new_and_refreshes_metadata() {
    let store = store();
    assert!(store.upsert_destination(&dest(-100, "Old")).await.expect("upsert"));
    assert!(!store.upsert_destination(&dest(-100, "New")).await.expect("upsert"));

    let found = store
        .destination(-100)
        .await
        .expect("read")
        .expect("should exist");
    assert_eq!(found.meta.title, "New");
    assert_eq!(store.destinations().await.expect("read").len(), 1);
}

#[tokio::test]
async fn removing_destinations_counts_only_registered_ones() {
    let store = store();
    for id in [1, 2, 3] {
        store.upsert_destination(&dest(id, "c")).await.expect("upsert");
    }

    assert!(store.remove_destination(2).await.expect("remove"));
    assert!(!store.remove_destination(2).await.expect("remove"));
    assert_eq!(store.remove_destinations(&[1, 2, 9]).await.expect("remove"), 1);
    assert_eq!(store.destination_ids().await.expect("read"), vec![3]);
}
