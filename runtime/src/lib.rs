//! # Ticket Registry Runtime
//!
//! Background machinery around the ticket registry.
//!
//! ## Core Components
//!
//! - **Cleaner scheduler**: runs the registry cleaner after a start delay and
//!   then on a fixed interval, with graceful shutdown
//! - **Metrics**: describes the registry's metrics and installs the
//!   Prometheus recorder
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ticket_registry_core::CleanerConfig;
//! use ticket_registry_runtime::CleanerScheduler;
//!
//! let (scheduler, shutdown) = CleanerScheduler::from_config(
//!     registry.clone(),
//!     Arc::new(lock_store),
//!     &CleanerConfig::default(),
//! );
//! let handle = scheduler.spawn(shutdown);
//!
//! // On SIGTERM:
//! handle.shutdown().await?;
//! ```

#![forbid(unsafe_code)]

/// Prometheus metrics for observability
pub mod metrics;

/// Periodic cleaner trigger
pub mod scheduler;

pub use scheduler::{CleanerScheduler, SchedulerError, SchedulerHandle};
