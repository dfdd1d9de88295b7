//! Periodic trigger for the registry cleaner.
//!
//! The scheduler waits for the start delay, then runs one cleaner pass per
//! interval until it is told to stop. Every pass outcome (tickets removed,
//! lock contended, cleaner disabled) is logged and the loop continues; a
//! skipped pass is recovered by the next one.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use ticket_registry_core::{
    CleanerConfig, ClusterLock, LockStore, RegistryCleaner, TicketRegistry,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Errors from stopping a spawned scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The scheduler task panicked or was aborted.
    #[error("Scheduler task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Drives [`RegistryCleaner::clean`] on a fixed interval.
pub struct CleanerScheduler {
    cleaner: RegistryCleaner,
    start_delay: Duration,
    repeat_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl CleanerScheduler {
    /// Create a scheduler with the default delays (20s start, 120s repeat).
    ///
    /// Returns the scheduler and a shutdown sender. Send `true` to stop it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (mut scheduler, shutdown) = CleanerScheduler::new(cleaner);
    /// tokio::spawn(async move { scheduler.run().await });
    ///
    /// // Later:
    /// shutdown.send(true).ok();
    /// ```
    #[must_use]
    pub fn new(cleaner: RegistryCleaner) -> (Self, watch::Sender<bool>) {
        let defaults = CleanerConfig::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Self {
            cleaner,
            start_delay: defaults.start_delay(),
            repeat_interval: defaults.repeat_interval(),
            shutdown: shutdown_rx,
        };
        (scheduler, shutdown_tx)
    }

    /// Wire a cleaner, its cluster lock and the timing from configuration.
    #[must_use]
    pub fn from_config(
        registry: TicketRegistry,
        lock_store: Arc<dyn LockStore>,
        config: &CleanerConfig,
    ) -> (Self, watch::Sender<bool>) {
        let mut lock = ClusterLock::new(config.lock.application_id.clone(), lock_store)
            .with_ttl(config.lock.ttl());
        if let Some(owner_id) = &config.lock.owner_id {
            lock = lock.with_owner_id(owner_id.clone());
        }
        tracing::info!(
            application_id = %lock.application_id(),
            owner_id = %lock.owner_id(),
            "Configured cleaner lock"
        );

        let cleaner = RegistryCleaner::new(registry, Arc::new(lock)).with_enabled(config.enabled);
        let (scheduler, shutdown) = Self::new(cleaner);
        (
            scheduler
                .with_start_delay(config.start_delay())
                .with_repeat_interval(config.repeat_interval()),
            shutdown,
        )
    }

    /// Set the delay before the first pass.
    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Set the interval between passes. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Run passes until shutdown is signaled or the sender is dropped.
    pub async fn run(&mut self) {
        if !self.cleaner.is_enabled() {
            tracing::info!("Ticket registry cleaner is disabled, scheduler not started");
            return;
        }

        tracing::info!(
            start_delay_ms = self.start_delay.as_millis(),
            repeat_interval_ms = self.repeat_interval.as_millis(),
            "Starting cleaner scheduler"
        );

        tokio::select! {
            () = tokio::time::sleep(self.start_delay) => {}
            _ = self.shutdown.changed() => {
                tracing::info!("Cleaner scheduler stopped before first pass");
                return;
            }
        }

        let mut interval = tokio::time::interval(self.repeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*self.shutdown.borrow() {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }

                _ = interval.tick() => {
                    let removed = self.cleaner.clean().await;
                    tracing::debug!(
                        removed,
                        state = ?self.cleaner.state(),
                        "Cleaner pass finished"
                    );
                }
            }
        }

        tracing::info!("Cleaner scheduler stopped");
    }

    /// Run on a new task.
    #[must_use]
    pub fn spawn(mut self, shutdown: watch::Sender<bool>) -> SchedulerHandle {
        let task = tokio::spawn(async move { self.run().await });
        SchedulerHandle { shutdown, task }
    }
}

/// A scheduler running on its own task.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the current pass to finish.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskFailed`] if the task panicked.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        self.shutdown.send(true).ok();
        self.task.await?;
        Ok(())
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
