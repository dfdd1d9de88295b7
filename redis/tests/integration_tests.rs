//! Integration tests for the Redis backend.
//!
//! # Requirements
//!
//! A Redis server on `REDIS_URL` (default `redis://127.0.0.1:6379`). Run with
//! `cargo test -p ticket-registry-redis -- --ignored`.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages
#![allow(clippy::unwrap_used)] // Test code

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use ticket_registry_core::environment::Clock;
use ticket_registry_core::{
    ClusterLock, LockStore, LockingStrategy, RegistryCleaner, StorageError, StoredTicket,
    TicketCatalog, TicketRegistry, TicketStorage,
};
use ticket_registry_redis::{RedisConfig, RedisLockStore, RedisTicketStorage};
use ticket_registry_testing::{ManualClock, fixtures};

/// A config with a namespace unique to one test, so tests can run in parallel
/// against the same server.
fn config() -> RedisConfig {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisConfig::new(url).with_namespace(format!("test-{}", uuid::Uuid::new_v4()))
}

async fn storage() -> RedisTicketStorage {
    RedisTicketStorage::new(&config())
        .await
        .expect("Failed to connect to Redis")
}

fn record(key: &str) -> StoredTicket {
    StoredTicket {
        key: key.to_string(),
        prefix: "ST".to_string(),
        parent_key: Some("TGT-1".to_string()),
        payload: vec![0, 159, 146, 150],
        expires_at: Utc::now() + ChronoDuration::hours(1),
    }
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_save_find_upsert_and_delete() {
    let storage = storage().await;

    storage.save("service_tickets", record("ST-1")).await.unwrap();
    let mut updated = record("ST-1");
    updated.parent_key = None;
    updated.payload = vec![9];
    storage.save("service_tickets", updated.clone()).await.unwrap();

    let found = storage.find("service_tickets", "ST-1").await.unwrap().unwrap();
    assert_eq!(found.parent_key, None);
    assert_eq!(found.payload, vec![9]);
    assert_eq!(
        found.expires_at.timestamp_millis(),
        updated.expires_at.timestamp_millis()
    );

    assert!(storage.delete("service_tickets", "ST-1").await.unwrap());
    assert!(!storage.delete("service_tickets", "ST-1").await.unwrap());
    assert!(storage.find("service_tickets", "ST-1").await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_scan_count_delete_all_and_clear() {
    let storage = storage().await;

    for n in 1..=5 {
        storage
            .save("service_tickets", record(&format!("ST-{n}")))
            .await
            .unwrap();
    }
    storage.save("proxy_tickets", record("PT-1")).await.unwrap();

    let mut keys: Vec<_> = storage
        .scan_all("service_tickets")
        .await
        .unwrap()
        .into_iter()
        .map(|ticket| ticket.key)
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["ST-1", "ST-2", "ST-3", "ST-4", "ST-5"]);
    assert_eq!(storage.count("service_tickets").await.unwrap(), 5);

    let batch = vec!["ST-1".to_string(), "ST-2".to_string(), "ST-404".to_string()];
    assert_eq!(storage.delete_all("service_tickets", &batch).await.unwrap(), 2);
    assert_eq!(storage.clear("service_tickets").await.unwrap(), 3);
    assert_eq!(storage.count("service_tickets").await.unwrap(), 0);
    assert_eq!(storage.count("proxy_tickets").await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_invalid_location_is_rejected() {
    let storage = storage().await;
    assert_eq!(
        storage.find("bad name", "ST-1").await,
        Err(StorageError::UnknownLocation("bad name".to_string()))
    );
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_registry_cascade_over_redis() {
    let storage = storage().await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let registry = TicketRegistry::new(Arc::new(storage), TicketCatalog::default())
        .with_clock(clock.clone());

    let (tgt, sts) = fixtures::session_with_children("TGT-1", "a", 3, clock.now());
    registry.add_ticket(&tgt.into()).await.unwrap();
    for st in sts {
        registry.add_ticket(&st.into()).await.unwrap();
    }
    assert_eq!(registry.count_tickets().await.unwrap(), 4);

    let outcome = registry.delete_ticket_tree("TGT-1").await.unwrap();
    assert_eq!(outcome.total(), 4);
    assert_eq!(registry.count_tickets().await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_cleaner_over_redis() {
    let config = config();
    let storage = RedisTicketStorage::new(&config).await.unwrap();
    let locks = RedisLockStore::new(&config).await.unwrap();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let registry =
        TicketRegistry::new(Arc::new(storage), TicketCatalog::default()).with_clock(clock.clone());
    let (tgt, sts) = fixtures::session_with_children("TGT-1", "a", 2, clock.now());
    registry.add_ticket(&tgt.into()).await.unwrap();
    for st in sts {
        registry.add_ticket(&st.into()).await.unwrap();
    }

    let lock =
        ClusterLock::new("ticket-registry-cleaner", Arc::new(locks)).with_clock(clock.clone());
    let cleaner = RegistryCleaner::new(registry.clone(), Arc::new(lock));

    clock.advance(Duration::from_secs(11));
    assert_eq!(cleaner.clean().await, 2);
    assert_eq!(cleaner.clean().await, 0);
    assert_eq!(registry.session_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Redis running
async fn test_concurrent_lockers_single_winner() {
    let store = Arc::new(RedisLockStore::new(&config()).await.unwrap());
    let now = Utc::now();

    let handles: Vec<_> = (0..13)
        .map(|n| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .try_acquire(
                        "cleaner",
                        &format!("owner-{n}"),
                        now + ChronoDuration::hours(1),
                        now,
                    )
                    .await
                    .expect("acquire should not fail")
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let mut released = 0;
    for n in 0..13 {
        if store.release("cleaner", &format!("owner-{n}")).await.unwrap() {
            released += 1;
        }
    }
    assert_eq!(released, 1);

    let record = store.find("cleaner").await.unwrap().unwrap();
    assert_eq!(record.owner_id, None);
    assert_eq!(record.expiration_date, None);
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_lock_reentrancy_and_takeover() {
    let store = RedisLockStore::new(&config()).await.unwrap();
    let t0 = Utc::now();
    let at = |seconds: i64| t0 + ChronoDuration::seconds(seconds);

    assert!(store.find("cleaner").await.unwrap().is_none());
    assert!(store.try_acquire("cleaner", "node-a", at(60), at(0)).await.unwrap());
    assert!(!store.try_acquire("cleaner", "node-a", at(60), at(1)).await.unwrap());
    assert!(!store.try_acquire("cleaner", "node-b", at(70), at(10)).await.unwrap());

    assert!(store.try_acquire("cleaner", "node-b", at(130), at(61)).await.unwrap());
    assert!(!store.release("cleaner", "node-a").await.unwrap());
    let record = store.find("cleaner").await.unwrap().unwrap();
    assert_eq!(record.owner_id.as_deref(), Some("node-b"));

    assert!(store.release("cleaner", "node-b").await.unwrap());
    assert!(store.try_acquire("cleaner", "node-a", at(200), at(140)).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_cluster_lock_over_redis() {
    let store: Arc<dyn LockStore> = Arc::new(RedisLockStore::new(&config()).await.unwrap());

    let a = ClusterLock::new("cleaner", Arc::clone(&store)).with_owner_id("node-a");
    let b = ClusterLock::new("cleaner", store).with_owner_id("node-b");

    assert!(a.acquire().await);
    assert!(!b.acquire().await);
    assert_eq!(b.current_owner().await.unwrap().as_deref(), Some("node-a"));

    a.release().await;
    assert!(b.acquire().await);
    b.release().await;
}
