//! Prometheus metrics for the ticket registry.
//!
//! The core crate records metrics through the `metrics` facade; this module
//! describes them and installs a Prometheus recorder so they can be rendered
//! for scraping:
//! - Registry operations (`ticket_registry_*`)
//! - Cluster lock acquisition and release (`cluster_lock_*`)
//! - Cleaner passes (`registry_cleaner_*`)
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_registry_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Serve `server.render()` from the application's /metrics route.
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder for the registry's metrics.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder installed earlier in the process (common in tests) is not an
    /// error; [`Self::render`] then returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(BuildError::FailedToSetGlobalRecorder(_)) => {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
            Err(e) => Err(MetricsError::Install(e.to_string())),
        }
    }

    /// Configured address for the metrics endpoint. Nothing is bound here;
    /// the application serves [`Self::render`] on its own listener.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Registry
    describe_counter!(
        "ticket_registry_operations_total",
        "Registry storage operations by operation, storage location and outcome"
    );
    describe_histogram!(
        "ticket_registry_operation_duration_seconds",
        "Time taken by registry storage operations"
    );
    describe_counter!(
        "ticket_registry_cascade_deleted_total",
        "Tickets removed through cascade deletes"
    );

    // Cluster lock
    describe_counter!(
        "cluster_lock_acquire_total",
        "Lock acquisition attempts by outcome (acquired, contended, error)"
    );
    describe_counter!("cluster_lock_release_total", "Locks released by their owner");

    // Cleaner
    describe_counter!("registry_cleaner_runs_total", "Completed cleaner passes");
    describe_counter!(
        "registry_cleaner_skipped_total",
        "Cleaner passes skipped because the lock was held elsewhere"
    );
    describe_counter!(
        "registry_cleaner_removed_total",
        "Expired tickets removed by the cleaner, cascades included"
    );
    describe_histogram!(
        "registry_cleaner_duration_seconds",
        "Time taken by a cleaner pass"
    );
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code

    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:9090".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        metrics::counter!("registry_cleaner_removed_total").increment(3);
        metrics::counter!(
            "cluster_lock_acquire_total",
            "application" => "ticket-registry-cleaner",
            "outcome" => "acquired"
        )
        .increment(1);

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("registry_cleaner_removed_total"));
            assert!(rendered.contains("cluster_lock_acquire_total"));
        }
    }
}
