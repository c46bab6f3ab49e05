//! Tests for the SQLite lock store.

use super::*;
use chrono::Duration;
use serde_json::json;
use tempfile::TempDir;

fn lease(name: &str, owner: &str, now: DateTime<Utc>, ttl_ms: i64) -> LockRecord {
    LockRecord::new_lease(name, owner, now, Duration::milliseconds(ttl_ms), None)
}

#[tokio::test]
async fn insert_then_get_round_trips_row() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();
    let mut record = lease("reconcile", "a", now, 90_000);
    record.metadata = Some(json!({"operation": "reconcile", "attempt": 1}));

    assert_eq!(store.insert(&record).await.unwrap(), InsertOutcome::Inserted);

    let stored = store.get("reconcile").await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn duplicate_insert_reports_conflict() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();

    store.insert(&lease("job", "a", now, 1_000)).await.unwrap();
    let second = store.insert(&lease("job", "b", now, 1_000)).await.unwrap();

    assert_eq!(second, InsertOutcome::Conflict);
    let stored = store.get("job").await.unwrap().unwrap();
    assert_eq!(stored.owner_instance_id, "a");
}

#[tokio::test]
async fn get_missing_row_is_none() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    assert!(store.get("nothing").await.unwrap().is_none());
}

#[tokio::test]
async fn renew_is_filtered_by_owner() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();
    store.insert(&lease("job", "a", now, 1_000)).await.unwrap();

    let renewal = LeaseRenewal {
        expires_at: now + Duration::seconds(60),
        heartbeat_at: now + Duration::seconds(1),
        metadata: Some(json!({"renewed": true})),
    };

    assert!(store.renew("job", "b", &renewal).await.unwrap().is_none());

    let renewed = store.renew("job", "a", &renewal).await.unwrap().unwrap();
    assert_eq!(renewed.expires_at, renewal.expires_at);
    assert_eq!(renewed.heartbeat_at, renewal.heartbeat_at);
    assert_eq!(renewed.acquired_at, now);
    assert_eq!(renewed.metadata, Some(json!({"renewed": true})));
}

#[tokio::test]
async fn take_over_swaps_only_when_expiry_matches() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let past = timestamp_now() - Duration::seconds(10);
    let original = lease("job", "a", past, 1_000);
    store.insert(&original).await.unwrap();

    let now = timestamp_now();
    let claim = lease("job", "b", now, 5_000);

    // A stale observation loses the race.
    let stale = original.expires_at - Duration::milliseconds(1);
    assert!(!store.take_over(stale, &claim).await.unwrap());

    assert!(store.take_over(original.expires_at, &claim).await.unwrap());
    let stored = store.get("job").await.unwrap().unwrap();
    assert_eq!(stored.owner_instance_id, "b");
    assert_eq!(stored.acquired_at, now);

    // The same observation cannot win twice.
    let third = lease("job", "c", now, 5_000);
    assert!(!store.take_over(original.expires_at, &third).await.unwrap());
}

#[tokio::test]
async fn touch_heartbeat_only_updates_owned_row() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();
    let record = lease("job", "a", now, 60_000);
    store.insert(&record).await.unwrap();

    let later = now + Duration::seconds(5);
    assert_eq!(store.touch_heartbeat("job", "b", later).await.unwrap(), 0);
    assert_eq!(store.touch_heartbeat("job", "a", later).await.unwrap(), 1);
    assert_eq!(store.touch_heartbeat("gone", "a", later).await.unwrap(), 0);

    let stored = store.get("job").await.unwrap().unwrap();
    assert_eq!(stored.heartbeat_at, later);
    assert_eq!(stored.expires_at, record.expires_at);
}

#[tokio::test]
async fn delete_owned_leaves_foreign_rows() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();
    store.insert(&lease("job", "a", now, 60_000)).await.unwrap();

    assert_eq!(store.delete_owned("job", "b").await.unwrap(), 0);
    assert!(store.get("job").await.unwrap().is_some());

    assert_eq!(store.delete_owned("job", "a").await.unwrap(), 1);
    assert!(store.get("job").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_all_owned_only_touches_one_owner() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();
    store.insert(&lease("one", "a", now, 60_000)).await.unwrap();
    store.insert(&lease("two", "a", now, 60_000)).await.unwrap();
    store.insert(&lease("three", "b", now, 60_000)).await.unwrap();

    assert_eq!(store.delete_all_owned("a").await.unwrap(), 2);
    assert!(store.get("three").await.unwrap().is_some());
}

#[tokio::test]
async fn delete_expired_ignores_valid_rows_of_any_owner() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();
    let past = now - Duration::minutes(5);
    store.insert(&lease("stale-a", "a", past, 1_000)).await.unwrap();
    store.insert(&lease("stale-b", "b", past, 1_000)).await.unwrap();
    store.insert(&lease("live-a", "a", now, 60_000)).await.unwrap();
    store.insert(&lease("live-b", "b", now, 60_000)).await.unwrap();

    assert_eq!(store.delete_expired(now).await.unwrap(), 2);
    assert_eq!(store.delete_expired(now).await.unwrap(), 0);

    let active = store.list_active(now).await.unwrap();
    let names: Vec<&str> = active.iter().map(|r| r.lock_name.as_str()).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"live-a"));
    assert!(names.contains(&"live-b"));
}

#[tokio::test]
async fn list_active_orders_by_acquisition() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    let now = timestamp_now();
    store
        .insert(&lease("newer", "a", now - Duration::seconds(1), 60_000))
        .await
        .unwrap();
    store
        .insert(&lease("older", "b", now - Duration::seconds(30), 60_000))
        .await
        .unwrap();
    store
        .insert(&lease("expired", "c", now - Duration::minutes(10), 1_000))
        .await
        .unwrap();

    let active = store.list_active(now).await.unwrap();
    let names: Vec<&str> = active.iter().map(|r| r.lock_name.as_str()).collect();
    assert_eq!(names, vec!["older", "newer"]);
}

#[tokio::test]
async fn unconditional_delete_removes_any_row() {
    let store = SqliteLockStore::open_in_memory().unwrap();
    store
        .insert(&lease("job", "someone-else", timestamp_now(), 60_000))
        .await
        .unwrap();

    assert_eq!(store.delete("job").await.unwrap(), 1);
    assert_eq!(store.delete("job").await.unwrap(), 0);
}

#[tokio::test]
async fn separate_connections_share_one_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("locks.db");

    let first = SqliteLockStore::open(&path).unwrap();
    let second = SqliteLockStore::open(&path).unwrap();
    let now = timestamp_now();

    assert_eq!(
        first.insert(&lease("job", "a", now, 60_000)).await.unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        second.insert(&lease("job", "b", now, 60_000)).await.unwrap(),
        InsertOutcome::Conflict
    );
    let seen = second.get("job").await.unwrap().unwrap();
    assert_eq!(seen.owner_instance_id, "a");
}

#[test]
fn record_expiry_is_strict() {
    let now = timestamp_now();
    let record = lease("job", "a", now, 0);

    assert!(!record.is_expired_at(now));
    assert!(record.is_expired_at(now + Duration::milliseconds(1)));
    assert!(record.is_owned_by("a"));
    assert!(!record.is_owned_by("b"));
}

#[test]
fn record_display_flags_expired_leases() {
    let now = timestamp_now();
    let live = lease("job", "web-1", now, 60_000);
    let expired = lease("job", "web-1", now - Duration::minutes(2), 1_000);

    let live_display = live.to_string();
    assert!(live_display.contains("job"));
    assert!(live_display.contains("web-1"));
    assert!(live_display.contains("expires in"));
    assert!(expired.to_string().contains("EXPIRED"));
}

#[test]
fn format_duration_picks_largest_unit() {
    assert_eq!(format_duration(Duration::seconds(42)), "42s");
    assert_eq!(format_duration(Duration::seconds(125)), "2m 5s");
    assert_eq!(format_duration(Duration::minutes(150)), "2h 30m");
    assert_eq!(format_duration(Duration::hours(50)), "2d 2h");
    assert_eq!(format_duration(Duration::seconds(-7)), "7s");
}
