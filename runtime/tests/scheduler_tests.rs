//! Scheduler timing with paused tokio time.

#![allow(clippy::unwrap_used)] // Test code

use std::sync::Arc;
use std::time::Duration;
use ticket_registry_core::environment::Clock;
use ticket_registry_core::{
    CleanerConfig, NoLockingStrategy, RegistryCleaner, TicketCatalog, TicketRegistry,
};
use ticket_registry_runtime::CleanerScheduler;
use ticket_registry_testing::{fixtures, InMemoryLockStore, InMemoryTicketStorage, ManualClock};

struct Setup {
    storage: InMemoryTicketStorage,
    clock: Arc<ManualClock>,
    registry: TicketRegistry,
}

async fn setup_with_expired_service_ticket() -> Setup {
    let storage = InMemoryTicketStorage::new();
    let clock = Arc::new(ManualClock::default());
    let registry = TicketRegistry::new(Arc::new(storage.clone()), TicketCatalog::default())
        .with_clock(clock.clone());

    let (tgt, st) = fixtures::session_with_service_ticket(clock.now());
    registry.add_ticket(&tgt.into()).await.unwrap();
    registry.add_ticket(&st.into()).await.unwrap();
    clock.advance(Duration::from_secs(11));

    Setup {
        storage,
        clock,
        registry,
    }
}

#[tokio::test(start_paused = true)]
async fn first_pass_waits_for_the_start_delay() {
    let setup = setup_with_expired_service_ticket().await;
    let cleaner = RegistryCleaner::new(setup.registry.clone(), Arc::new(NoLockingStrategy));
    let (scheduler, shutdown) = CleanerScheduler::new(cleaner);
    let handle = scheduler
        .with_start_delay(Duration::from_secs(20))
        .with_repeat_interval(Duration::from_secs(120))
        .spawn(shutdown);

    tokio::time::sleep(Duration::from_secs(19)).await;
    assert_eq!(setup.storage.len("service_tickets"), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(setup.storage.len("service_tickets"), 0);
    assert_eq!(setup.storage.len("ticket_granting_tickets"), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn later_passes_follow_the_interval() {
    let setup = setup_with_expired_service_ticket().await;
    let cleaner = RegistryCleaner::new(setup.registry.clone(), Arc::new(NoLockingStrategy));
    let (scheduler, shutdown) = CleanerScheduler::new(cleaner);
    let handle = scheduler
        .with_start_delay(Duration::from_secs(1))
        .with_repeat_interval(Duration::from_secs(60))
        .spawn(shutdown);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(setup.storage.len("service_tickets"), 0);

    // The session expires on the registry clock; the next tick removes it.
    setup.clock.advance(Duration::from_secs(9 * 3600));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(setup.storage.len("ticket_granting_tickets"), 1);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(setup.storage.is_empty());

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_the_first_pass_cleans_nothing() {
    let setup = setup_with_expired_service_ticket().await;
    let cleaner = RegistryCleaner::new(setup.registry.clone(), Arc::new(NoLockingStrategy));
    let (scheduler, shutdown) = CleanerScheduler::new(cleaner);
    let handle = scheduler.spawn(shutdown);

    tokio::time::sleep(Duration::from_secs(5)).await;
    handle.shutdown().await.unwrap();
    assert_eq!(setup.storage.len("service_tickets"), 1);
}

#[tokio::test(start_paused = true)]
async fn configured_scheduler_uses_the_cluster_lock() {
    let setup = setup_with_expired_service_ticket().await;
    let locks = InMemoryLockStore::new();
    let mut config = CleanerConfig::default()
        .with_start_delay(1)
        .with_repeat_interval(60);
    config.lock.owner_id = Some("node-a".to_string());

    let (scheduler, shutdown) =
        CleanerScheduler::from_config(setup.registry.clone(), Arc::new(locks.clone()), &config);
    let handle = scheduler.spawn(shutdown);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(setup.storage.len("service_tickets"), 0);

    let record = locks.record(&config.lock.application_id).unwrap();
    assert_eq!(record.owner_id, None);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disabled_scheduler_exits_immediately() {
    let setup = setup_with_expired_service_ticket().await;
    let config = CleanerConfig::default().with_enabled(false).with_start_delay(0);
    let (scheduler, shutdown) = CleanerScheduler::from_config(
        setup.registry.clone(),
        Arc::new(InMemoryLockStore::new()),
        &config,
    );
    let handle = scheduler.spawn(shutdown);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handle.is_finished());
    assert_eq!(setup.storage.len("service_tickets"), 1);
    handle.shutdown().await.unwrap();
}
