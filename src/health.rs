//! Health snapshot for the connection pool

use serde::Serialize;

/// Health status of a client's connection pool.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Whether the pool is healthy.
    pub is_healthy: bool,

    /// Live connections over the global cap (0.0 to 1.0).
    pub utilization: f64,

    /// Currently idle connections.
    pub idle_connections: usize,

    /// Currently leased connections.
    pub leased_connections: usize,

    /// Global connection cap.
    pub max_total: usize,

    /// Routes with at least one live or previously pooled connection.
    pub routes: usize,

    /// Warning messages.
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub(crate) fn new(idle: usize, leased: usize, max_total: usize, routes: usize) -> Self {
        let utilization = if max_total > 0 {
            (idle + leased) as f64 / max_total as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High pool utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if idle == 0 && leased == max_total && max_total > 0 {
            warnings.push("Pool is saturated, new acquires will queue".to_string());
            is_healthy = false;
        }

        Self {
            is_healthy,
            utilization,
            idle_connections: idle,
            leased_connections: leased,
            max_total,
            routes,
            warnings,
        }
    }

    /// Check if the pool is healthy.
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
