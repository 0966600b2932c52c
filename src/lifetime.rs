//! Connection lifetime bookkeeping

use std::time::{Duration, Instant};

use crate::config::PoolConfig;

/// When a pooled connection must be validated or discarded.
#[derive(Debug, Clone)]
pub(crate) struct ExpiryPolicy {
    /// Maximum lifetime before forced closure, regardless of health.
    pub ttl: Duration,

    /// Idle duration after which a connection is liveness-checked before reuse.
    pub validation_threshold: Duration,
}

impl ExpiryPolicy {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            ttl: config.connection_ttl,
            validation_threshold: config.idle_validation_threshold,
        }
    }
}

/// Creation and last-use timestamps carried by every pooled connection.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionAge {
    created_at: Instant,
    last_used: Instant,
}

impl ConnectionAge {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used: now,
        }
    }

    /// Record a return to the idle set.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Total lifetime exceeded the TTL.
    pub fn is_expired(&self, policy: &ExpiryPolicy) -> bool {
        self.created_at.elapsed() > policy.ttl
    }

    /// Idle long enough that the connection must be validated before reuse.
    pub fn needs_validation(&self, policy: &ExpiryPolicy) -> bool {
        self.last_used.elapsed() > policy.validation_threshold
    }
}
