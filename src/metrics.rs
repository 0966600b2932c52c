//! Metrics collection and export for the connection pool

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Point-in-time metrics for a client's connection pool.
///
/// `total_destroyed` counts every closed connection; `total_evicted` and
/// `validation_failures` are the TTL/liveness subsets of it.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    /// Connections handed to requests over the pool's lifetime.
    pub total_acquired: usize,

    /// Connections returned to the idle set as reusable.
    pub total_released: usize,

    /// Connections opened against the transport.
    pub total_created: usize,

    /// Connections closed for any reason.
    pub total_destroyed: usize,

    /// Connections force-closed because their TTL elapsed.
    pub total_evicted: usize,

    /// Idle connections discarded by the pre-reuse liveness check.
    pub validation_failures: usize,

    /// Acquires that gave up waiting for a connection.
    pub acquire_timeouts: usize,

    /// Currently leased connections.
    pub leased_connections: usize,

    /// Currently idle connections.
    pub idle_connections: usize,

    /// Global connection cap.
    pub max_total: usize,

    /// Live connections over the global cap (0.0 to 1.0).
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a string map.
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_evicted".to_string(), self.total_evicted.to_string());
        metrics.insert(
            "validation_failures".to_string(),
            self.validation_failures.to_string(),
        );
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert(
            "leased_connections".to_string(),
            self.leased_connections.to_string(),
        );
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("max_total".to_string(), self.max_total.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format.
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        // Gauge metrics
        output.push_str("# HELP httpool_connections_leased Currently leased connections\n");
        output.push_str("# TYPE httpool_connections_leased gauge\n");
        output.push_str(&format!(
            "httpool_connections_leased{{{}}} {}\n",
            labels, metrics.leased_connections
        ));

        output.push_str("# HELP httpool_connections_idle Currently idle connections\n");
        output.push_str("# TYPE httpool_connections_idle gauge\n");
        output.push_str(&format!(
            "httpool_connections_idle{{{}}} {}\n",
            labels, metrics.idle_connections
        ));

        output.push_str("# HELP httpool_utilization Live connections over the global cap\n");
        output.push_str("# TYPE httpool_utilization gauge\n");
        output.push_str(&format!(
            "httpool_utilization{{{}}} {:.2}\n",
            labels, metrics.utilization
        ));

        // Counter metrics
        output.push_str("# HELP httpool_connections_acquired_total Connections handed to requests\n");
        output.push_str("# TYPE httpool_connections_acquired_total counter\n");
        output.push_str(&format!(
            "httpool_connections_acquired_total{{{}}} {}\n",
            labels, metrics.total_acquired
        ));

        output.push_str("# HELP httpool_connections_created_total Connections opened\n");
        output.push_str("# TYPE httpool_connections_created_total counter\n");
        output.push_str(&format!(
            "httpool_connections_created_total{{{}}} {}\n",
            labels, metrics.total_created
        ));

        output.push_str("# HELP httpool_connections_evicted_total Connections closed by TTL\n");
        output.push_str("# TYPE httpool_connections_evicted_total counter\n");
        output.push_str(&format!(
            "httpool_connections_evicted_total{{{}}} {}\n",
            labels, metrics.total_evicted
        ));

        output.push_str("# HELP httpool_validation_failures_total Idle liveness-check failures\n");
        output.push_str("# TYPE httpool_validation_failures_total counter\n");
        output.push_str(&format!(
            "httpool_validation_failures_total{{{}}} {}\n",
            labels, metrics.validation_failures
        ));

        output.push_str("# HELP httpool_acquire_timeouts_total Pool-wait timeouts\n");
        output.push_str("# TYPE httpool_acquire_timeouts_total counter\n");
        output.push_str(&format!(
            "httpool_acquire_timeouts_total{{{}}} {}\n",
            labels, metrics.acquire_timeouts
        ));

        output
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker.
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub total_evicted: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub acquire_timeouts: AtomicUsize,
    pub open_connections: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            total_acquired: AtomicUsize::new(0),
            total_released: AtomicUsize::new(0),
            total_created: AtomicUsize::new(0),
            total_destroyed: AtomicUsize::new(0),
            total_evicted: AtomicUsize::new(0),
            validation_failures: AtomicUsize::new(0),
            acquire_timeouts: AtomicUsize::new(0),
            open_connections: AtomicUsize::new(0),
        }
    }

    /// Record a closed connection; `evicted`/`validation` tag the reason.
    pub fn record_destroyed(&self, evicted: bool, validation: bool) {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
        if evicted {
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
        }
        if validation {
            self.validation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, idle: usize, max_total: usize) -> PoolMetrics {
        let open = self.open_connections.load(Ordering::Relaxed);
        let leased = open.saturating_sub(idle);
        let utilization = if max_total > 0 {
            open as f64 / max_total as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            leased_connections: leased,
            idle_connections: idle,
            max_total,
            utilization,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
