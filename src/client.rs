//! Shared HTTP client facade
//!
//! One [`HttpClient`] owns one connection pool. Construct it explicitly and
//! pass it around, or use [`HttpClient::shared`] for a process-wide instance
//! created exactly once from environment configuration.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use hyper::Method;
use tracing::info;

use crate::config::{ClientConfig, RequestOptions, TimeoutConfig};
use crate::errors::Result;
use crate::health::HealthStatus;
use crate::metrics::{MetricsExporter, PoolMetrics};
use crate::pool::ConnectionPool;
use crate::request::{self, Payload};
use crate::response::{self, RequestResult};
use crate::transport::{Connector, HyperConnector};

static SHARED: OnceLock<HttpClient> = OnceLock::new();

/// Pooled HTTP client issuing JSON- and form-encoded POST/GET requests.
///
/// Every call returns a [`RequestResult`]; network failures are encoded as
/// sentinel status codes, never raised. Cheap to share behind a reference;
/// all state lives in the pool.
///
/// Must be constructed within a tokio runtime (the pool spawns its eviction
/// sweep at construction).
pub struct HttpClient {
    pool: ConnectionPool,
    defaults: TimeoutConfig,
}

impl HttpClient {
    /// Create a client with its own connection pool.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(HyperConnector::new()))
    }

    pub(crate) fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            pool: ConnectionPool::new(&config.pool, connector),
            defaults: config.timeouts,
        }
    }

    /// The process-wide client, created on first use from
    /// [`ClientConfig::from_env`].
    ///
    /// Concurrent first callers race on a single initialization; everyone
    /// observes the same instance.
    pub fn shared() -> &'static HttpClient {
        SHARED.get_or_init(|| {
            info!("initializing shared http client from environment");
            HttpClient::new(ClientConfig::from_env())
        })
    }

    /// POST an already-serialized JSON document.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() {
    /// use httpool::{HttpClient, RequestOptions};
    ///
    /// let client = HttpClient::shared();
    /// let result = client
    ///     .post_json("http://localhost:8080/notify", r#"{"event":"ping"}"#, RequestOptions::new())
    ///     .await
    ///     .unwrap();
    /// if result.is_success() {
    ///     println!("body: {:?}", result.body);
    /// }
    /// # }
    /// ```
    pub async fn post_json(
        &self,
        url: &str,
        json: &str,
        options: RequestOptions,
    ) -> Result<RequestResult> {
        self.dispatch(Method::POST, url, Payload::Json(json.to_string()), options)
            .await
    }

    /// POST an ordered form parameter list as a URL-encoded body.
    pub async fn post_form<K, V>(
        &self,
        url: &str,
        params: &[(K, V)],
        options: RequestOptions,
    ) -> Result<RequestResult>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.dispatch(Method::POST, url, form_payload(params), options)
            .await
    }

    /// GET with the JSON document spliced onto the query string.
    pub async fn get_json(
        &self,
        url: &str,
        json: &str,
        options: RequestOptions,
    ) -> Result<RequestResult> {
        self.dispatch(Method::GET, url, Payload::Json(json.to_string()), options)
            .await
    }

    /// GET with the form parameters spliced onto the query string.
    pub async fn get_form<K, V>(
        &self,
        url: &str,
        params: &[(K, V)],
        options: RequestOptions,
    ) -> Result<RequestResult>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.dispatch(Method::GET, url, form_payload(params), options)
            .await
    }

    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        options: RequestOptions,
    ) -> Result<RequestResult> {
        let timeouts = options.resolve(&self.defaults);
        let outcome = request::execute(&self.pool, &timeouts, method, url, payload).await?;
        Ok(response::normalize(outcome, &timeouts).await)
    }

    /// Snapshot of the pool's counters.
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }

    /// Export pool metrics as a string map.
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export pool metrics in Prometheus exposition format.
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.metrics(), pool_name, tags)
    }

    /// Health snapshot of the pool.
    pub fn health_status(&self) -> HealthStatus {
        self.pool.health()
    }

    /// Close the pool: destroy idle connections and reject new acquires.
    ///
    /// In-flight requests finish and their connections are destroyed on
    /// release. Failures during teardown are logged, never propagated.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

fn form_payload<K, V>(params: &[(K, V)]) -> Payload
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    Payload::Form(
        params
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect(),
    )
}
