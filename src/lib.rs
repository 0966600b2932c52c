//! # httpool
//!
//! Pooled HTTP client facade with bounded per-route connection reuse and
//! timeout classification.
//!
//! ## Features
//!
//! - Bounded connection pool keyed by scheme+host+port, with per-route and
//!   global caps
//! - Idle-connection validation and TTL-based eviction, on checkout and via
//!   a background sweep
//! - Process-wide shared client created exactly once under concurrency
//! - JSON and form payloads over POST, or spliced onto the query for GET
//! - Per-call timeout overrides that never touch shared defaults
//! - Normalized results: network failures become sentinel status codes
//!   (-1 connect, -2 response wait, -9 other), never raised errors
//! - Pool metrics, health snapshots and Prometheus-format export
//!
//! ## Quick Start
//!
//! ```no_run
//! use httpool::{HttpClient, RequestOptions};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let client = HttpClient::shared();
//! let result = client
//!     .post_json("http://localhost:8080/notify", r#"{"event":"ping"}"#, RequestOptions::new())
//!     .await
//!     .unwrap();
//! match result.status_code {
//!     200 => println!("ok: {:?}", result.body),
//!     code => println!("failed: {code} {}", result.reason_phrase),
//! }
//! # }
//! ```

mod client;
mod config;
mod errors;
mod health;
mod lifetime;
mod metrics;
mod pool;
mod request;
mod response;
mod transport;

pub use client::HttpClient;
pub use config::{ClientConfig, PoolConfig, RequestOptions, TimeoutConfig};
pub use errors::{Error, PoolError, Result, TransportError};
pub use health::HealthStatus;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use response::{
    RequestResult, STATUS_CONNECT_TIMEOUT, STATUS_OTHER, STATUS_SOCKET_TIMEOUT,
};
