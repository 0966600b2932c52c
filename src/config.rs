//! Client, pool and timeout configuration

use std::time::Duration;

use tracing::warn;

/// Environment variables consulted by [`ClientConfig::from_env`].
const ENV_SOCKET_TIMEOUT_MS: &str = "HTTPOOL_SOCKET_TIMEOUT_MS";
const ENV_CONNECT_TIMEOUT_MS: &str = "HTTPOOL_CONNECT_TIMEOUT_MS";
const ENV_POOL_WAIT_TIMEOUT_MS: &str = "HTTPOOL_POOL_WAIT_TIMEOUT_MS";
const ENV_MAX_PER_ROUTE: &str = "HTTPOOL_MAX_PER_ROUTE";
const ENV_MAX_TOTAL: &str = "HTTPOOL_MAX_TOTAL";

/// Configuration for the connection pool.
///
/// Values are fixed at pool construction and immutable afterward.
/// Invariant: `max_per_route <= max_total` and both are positive; the pool
/// clamps out-of-range values instead of failing.
///
/// # Examples
///
/// ```
/// use httpool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_total(64)
///     .with_max_per_route(16)
///     .with_connection_ttl(Duration::from_secs(30));
///
/// assert_eq!(config.max_total, 64);
/// assert_eq!(config.max_per_route, 16);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live connections across all routes (leased + idle).
    pub max_total: usize,

    /// Maximum live connections per route (leased + idle).
    pub max_per_route: usize,

    /// Idle duration after which a connection is liveness-checked before reuse.
    pub idle_validation_threshold: Duration,

    /// Maximum total lifetime of a connection before forced closure.
    pub connection_ttl: Duration,

    /// Cadence of the background sweep that closes expired idle connections.
    pub eviction_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 500,
            max_per_route: 400,
            idle_validation_threshold: Duration::from_millis(5000),
            connection_ttl: Duration::from_secs(60),
            eviction_interval: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global connection cap.
    pub fn with_max_total(mut self, max: usize) -> Self {
        self.max_total = max;
        self
    }

    /// Set the per-route connection cap.
    pub fn with_max_per_route(mut self, max: usize) -> Self {
        self.max_per_route = max;
        self
    }

    /// Set the idle threshold beyond which connections are validated before reuse.
    pub fn with_idle_validation_threshold(mut self, threshold: Duration) -> Self {
        self.idle_validation_threshold = threshold;
        self
    }

    /// Set the maximum lifetime of a connection.
    pub fn with_connection_ttl(mut self, ttl: Duration) -> Self {
        self.connection_ttl = ttl;
        self
    }

    /// Set the background eviction sweep interval.
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }
}

/// Process-default timeouts, each independently enforced per call.
///
/// # Examples
///
/// ```
/// use httpool::TimeoutConfig;
/// use std::time::Duration;
///
/// let timeouts = TimeoutConfig::new().with_socket(Duration::from_secs(5));
/// assert_eq!(timeouts.socket, Duration::from_secs(5));
/// assert_eq!(timeouts.connect, Duration::from_millis(2000));
/// ```
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Time allowed to establish a transport connection.
    pub connect: Duration,

    /// Time allowed to wait for a connection from the pool.
    pub pool_wait: Duration,

    /// Time allowed to wait for response bytes.
    pub socket: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(2000),
            pool_wait: Duration::from_millis(2000),
            socket: Duration::from_millis(3000),
        }
    }
}

impl TimeoutConfig {
    /// Create a timeout configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    pub fn with_connect(mut self, timeout: Duration) -> Self {
        self.connect = timeout;
        self
    }

    /// Set the pool-wait timeout.
    pub fn with_pool_wait(mut self, timeout: Duration) -> Self {
        self.pool_wait = timeout;
        self
    }

    /// Set the socket (response-wait) timeout.
    pub fn with_socket(mut self, timeout: Duration) -> Self {
        self.socket = timeout;
        self
    }
}

/// Per-call timeout overrides.
///
/// Unset fields fall back to the client's process defaults; overrides apply
/// to the one call only and never mutate shared configuration.
///
/// # Examples
///
/// ```
/// use httpool::RequestOptions;
/// use std::time::Duration;
///
/// let options = RequestOptions::new()
///     .with_socket_timeout(Duration::from_millis(500));
/// assert!(options.connect_timeout.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Override for the response-wait timeout.
    pub socket_timeout: Option<Duration>,

    /// Override for the connect timeout.
    pub connect_timeout: Option<Duration>,

    /// Override for the pool-wait timeout.
    pub pool_wait_timeout: Option<Duration>,
}

impl RequestOptions {
    /// Create an empty set of overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the response-wait timeout for this call.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Override the connect timeout for this call.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Override the pool-wait timeout for this call.
    pub fn with_pool_wait_timeout(mut self, timeout: Duration) -> Self {
        self.pool_wait_timeout = Some(timeout);
        self
    }

    /// Resolve the overrides against process defaults for a single call.
    pub(crate) fn resolve(&self, defaults: &TimeoutConfig) -> TimeoutConfig {
        TimeoutConfig {
            connect: self.connect_timeout.unwrap_or(defaults.connect),
            pool_wait: self.pool_wait_timeout.unwrap_or(defaults.pool_wait),
            socket: self.socket_timeout.unwrap_or(defaults.socket),
        }
    }
}

/// Aggregate startup configuration for an [`HttpClient`](crate::HttpClient).
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub timeouts: TimeoutConfig,
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// Unset variables use the hard-coded defaults; unparsable values are
    /// logged and fall back to their defaults as well.
    pub fn from_env() -> Self {
        let timeouts = TimeoutConfig {
            socket: parse_millis(ENV_SOCKET_TIMEOUT_MS, read_env(ENV_SOCKET_TIMEOUT_MS), 3000),
            connect: parse_millis(ENV_CONNECT_TIMEOUT_MS, read_env(ENV_CONNECT_TIMEOUT_MS), 2000),
            pool_wait: parse_millis(
                ENV_POOL_WAIT_TIMEOUT_MS,
                read_env(ENV_POOL_WAIT_TIMEOUT_MS),
                2000,
            ),
        };
        let pool = PoolConfig {
            max_per_route: parse_count(ENV_MAX_PER_ROUTE, read_env(ENV_MAX_PER_ROUTE), 400),
            max_total: parse_count(ENV_MAX_TOTAL, read_env(ENV_MAX_TOTAL), 500),
            ..PoolConfig::default()
        };
        Self { pool, timeouts }
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_millis(key: &str, raw: Option<String>, default_ms: u64) -> Duration {
    let millis = match raw {
        None => default_ms,
        Some(value) => match value.trim().parse::<u64>() {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(key, value = %value, %error, "unparsable timeout, using default {default_ms} ms");
                default_ms
            }
        },
    };
    Duration::from_millis(millis)
}

fn parse_count(key: &str, raw: Option<String>, default: usize) -> usize {
    match raw {
        None => default,
        Some(value) => match value.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            Ok(_) => {
                warn!(key, value = %value, "connection cap must be positive, using default {default}");
                default
            }
            Err(error) => {
                warn!(key, value = %value, %error, "unparsable connection cap, using default {default}");
                default
            }
        },
    }
}
