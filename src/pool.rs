//! Bounded per-route connection pool
//!
//! Connections are keyed by [`Route`] and counted against both a per-route
//! and a global cap for their whole lifetime, leased or idle. Capacity is
//! tracked with semaphore permits that travel with the connection, so a
//! dropped connection releases its slots no matter where it dies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use http_body_util::Full;
use hyper::{Request, Response};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::config::{PoolConfig, TimeoutConfig};
use crate::errors::{PoolError, TransportError};
use crate::health::HealthStatus;
use crate::lifetime::{ConnectionAge, ExpiryPolicy};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::transport::{Channel, Connector, ResponseBody, Route};

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A live connection owned by the pool, idle or leased.
pub(crate) struct PooledConnection {
    channel: Box<dyn Channel>,
    age: ConnectionAge,
    id: u64,
    route: Route,
    _route_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
}

struct RoutePool {
    idle: ArrayQueue<PooledConnection>,
    permits: Arc<Semaphore>,
}

impl RoutePool {
    fn new(max_per_route: usize) -> Self {
        Self {
            idle: ArrayQueue::new(max_per_route),
            permits: Arc::new(Semaphore::new(max_per_route)),
        }
    }
}

struct PoolShared {
    policy: ExpiryPolicy,
    max_per_route: usize,
    max_total: usize,
    routes: DashMap<Route, Arc<RoutePool>>,
    global_permits: Arc<Semaphore>,
    connector: Arc<dyn Connector>,
    metrics: MetricsTracker,
    closed: AtomicBool,
    next_id: AtomicU64,
    sweep_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_task.get_mut().take() {
            handle.abort();
        }
    }
}

enum Slot {
    Ready(PooledConnection),
    Open(OwnedSemaphorePermit, OwnedSemaphorePermit),
}

/// Shared handle to the pool; clones refer to the same pool.
#[derive(Clone)]
pub(crate) struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Build a pool and start its background eviction sweep.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: &PoolConfig, connector: Arc<dyn Connector>) -> Self {
        let max_total = config.max_total.max(1);
        let max_per_route = config.max_per_route.clamp(1, max_total);

        let shared = Arc::new(PoolShared {
            policy: ExpiryPolicy::from_config(config),
            max_per_route,
            max_total,
            routes: DashMap::new(),
            global_permits: Arc::new(Semaphore::new(max_total)),
            connector,
            metrics: MetricsTracker::new(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            sweep_task: parking_lot::Mutex::new(None),
        });

        // The sweep holds a weak reference so an abandoned pool can drop.
        let weak = Arc::downgrade(&shared);
        let period = config.eviction_interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { return };
                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                Self::sweep(&shared);
            }
        });
        *shared.sweep_task.lock() = Some(handle);

        Self { shared }
    }

    /// Check a connection out for one request, waiting at most
    /// `timeouts.pool_wait` for capacity.
    pub async fn acquire(
        &self,
        route: &Route,
        timeouts: &TimeoutConfig,
    ) -> Result<Lease, PoolError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let route_pool = self.route_pool(route);
        let wait = timeouts.pool_wait;

        let slot = tokio::time::timeout(wait, async {
            loop {
                if self.shared.closed.load(Ordering::SeqCst) {
                    return Err(PoolError::Closed);
                }
                if let Some(conn) = self.checkout_idle(&route_pool) {
                    return Ok(Slot::Ready(conn));
                }
                if let Some((route_permit, global_permit)) = self.try_reserve(&route_pool) {
                    return Ok(Slot::Open(route_permit, global_permit));
                }
                tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| {
            self.shared.metrics.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
            PoolError::AcquireTimeout(wait)
        })??;

        let conn = match slot {
            Slot::Ready(conn) => conn,
            Slot::Open(route_permit, global_permit) => {
                self.open(route, route_permit, global_permit, timeouts.connect).await?
            }
        };

        self.shared.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);
        Ok(Lease {
            conn: Some(conn),
            pool: self.clone(),
        })
    }

    /// Pop idle connections until one survives the TTL and liveness checks.
    fn checkout_idle(&self, route_pool: &RoutePool) -> Option<PooledConnection> {
        let policy = &self.shared.policy;
        while let Some(conn) = route_pool.idle.pop() {
            if conn.age.is_expired(policy) {
                trace!(route = %conn.route, id = conn.id, "idle connection expired");
                self.shared.metrics.record_destroyed(true, false);
                continue;
            }
            if conn.age.needs_validation(policy) && !conn.channel.is_live() {
                trace!(route = %conn.route, id = conn.id, "idle connection failed validation");
                self.shared.metrics.record_destroyed(false, true);
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Reserve one per-route and one global slot, or neither.
    fn try_reserve(
        &self,
        route_pool: &RoutePool,
    ) -> Option<(OwnedSemaphorePermit, OwnedSemaphorePermit)> {
        let route_permit = Arc::clone(&route_pool.permits).try_acquire_owned().ok()?;
        let global_permit = Arc::clone(&self.shared.global_permits)
            .try_acquire_owned()
            .ok()?;
        Some((route_permit, global_permit))
    }

    async fn open(
        &self,
        route: &Route,
        route_permit: OwnedSemaphorePermit,
        global_permit: OwnedSemaphorePermit,
        connect_timeout: Duration,
    ) -> Result<PooledConnection, PoolError> {
        let channel = self.shared.connector.connect(route, connect_timeout).await?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.total_created.fetch_add(1, Ordering::Relaxed);
        self.shared.metrics.open_connections.fetch_add(1, Ordering::Relaxed);
        debug!(route = %route, id, "opened connection");
        Ok(PooledConnection {
            channel,
            age: ConnectionAge::new(),
            id,
            route: route.clone(),
            _route_permit: route_permit,
            _global_permit: global_permit,
        })
    }

    fn release(&self, mut conn: PooledConnection, reusable: bool) {
        let shared = &self.shared;
        if reusable && !shared.closed.load(Ordering::SeqCst) && conn.channel.is_live() {
            conn.age.touch();
            let route = conn.route.clone();
            let route_pool = self.route_pool(&route);
            match route_pool.idle.push(conn) {
                Ok(()) => {
                    shared.metrics.total_released.fetch_add(1, Ordering::Relaxed);
                    trace!(route = %route, "connection returned to pool");
                    return;
                }
                Err(returned) => conn = returned,
            }
        }
        trace!(route = %conn.route, id = conn.id, "connection destroyed");
        shared.metrics.record_destroyed(false, false);
        drop(conn);
    }

    fn route_pool(&self, route: &Route) -> Arc<RoutePool> {
        self.shared
            .routes
            .entry(route.clone())
            .or_insert_with(|| Arc::new(RoutePool::new(self.shared.max_per_route)))
            .clone()
    }

    fn sweep(shared: &PoolShared) {
        for entry in shared.routes.iter() {
            let route_pool = entry.value();
            let mut kept = Vec::new();
            let mut evicted = 0usize;
            let mut dead = 0usize;

            while let Some(conn) = route_pool.idle.pop() {
                if conn.age.is_expired(&shared.policy) {
                    shared.metrics.record_destroyed(true, false);
                    evicted += 1;
                } else if !conn.channel.is_live() {
                    shared.metrics.record_destroyed(false, true);
                    dead += 1;
                } else {
                    kept.push(conn);
                }
            }
            for conn in kept {
                let _ = route_pool.idle.push(conn);
            }

            if evicted > 0 || dead > 0 {
                trace!(route = %entry.key(), evicted, dead, "swept idle connections");
            }
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        let idle = self.idle_count();
        self.shared.metrics.snapshot(idle, self.shared.max_total)
    }

    pub fn health(&self) -> HealthStatus {
        let idle = self.idle_count();
        let open = self.shared.metrics.open_connections.load(Ordering::Relaxed);
        HealthStatus::new(
            idle,
            open.saturating_sub(idle),
            self.shared.max_total,
            self.shared.routes.len(),
        )
    }

    fn idle_count(&self) -> usize {
        self.shared
            .routes
            .iter()
            .map(|entry| entry.value().idle.len())
            .sum()
    }

    /// Mark the pool closed and destroy every idle connection.
    ///
    /// Idempotent; in-flight leases drain as they are released.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.shared.sweep_task.lock().take() {
            handle.abort();
        }

        let mut drained = 0usize;
        for entry in self.shared.routes.iter() {
            while let Some(conn) = entry.value().idle.pop() {
                self.shared.metrics.record_destroyed(false, false);
                drop(conn);
                drained += 1;
            }
        }
        info!(drained, "connection pool shut down");
    }
}

/// RAII guard for a checked-out connection.
///
/// Dropping a lease without [`finish`](Lease::finish)ing it destroys the
/// connection and frees its capacity, so abandoned calls never leak slots.
pub(crate) struct Lease {
    conn: Option<PooledConnection>,
    pool: ConnectionPool,
}

impl Lease {
    pub async fn send(
        &mut self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<ResponseBody>, TransportError> {
        match self.conn.as_mut() {
            Some(conn) => conn.channel.send(request).await,
            None => Err(TransportError::Protocol("connection already released".to_string())),
        }
    }

    /// Return the connection to the pool (`reusable`) or destroy it.
    pub fn finish(mut self, reusable: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, reusable);
        }
    }

    #[cfg(test)]
    pub fn connection_id(&self) -> u64 {
        self.conn.as_ref().map(|conn| conn.id).unwrap_or(u64::MAX)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;
    use url::Url;

    fn test_route() -> Route {
        Route::from_url(&Url::parse("http://upstream.test/").unwrap()).unwrap()
    }

    fn timeouts(pool_wait_ms: u64) -> TimeoutConfig {
        TimeoutConfig::new().with_pool_wait(Duration::from_millis(pool_wait_ms))
    }

    fn pool_with(
        connector: &Arc<MockConnector>,
        config: PoolConfig,
    ) -> ConnectionPool {
        let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
        ConnectionPool::new(&config, connector)
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(&connector, PoolConfig::new());
        let route = test_route();

        let first = pool.acquire(&route, &timeouts(500)).await.unwrap();
        let first_id = first.connection_id();
        first.finish(true);

        let second = pool.acquire(&route, &timeouts(500)).await.unwrap();
        assert_eq!(second.connection_id(), first_id);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_acquires_never_exceed_the_global_cap() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(
            &connector,
            PoolConfig::new().with_max_total(3).with_max_per_route(3),
        );
        let route = test_route();

        let mut tasks = Vec::new();
        for _ in 0..9 {
            let pool = pool.clone();
            let route = route.clone();
            tasks.push(tokio::spawn(async move {
                let lease = pool.acquire(&route, &timeouts(2000)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                lease.finish(true);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(connector.connect_count() <= 3);
        let metrics = pool.metrics();
        assert_eq!(metrics.total_acquired, 9);
        assert_eq!(metrics.leased_connections, 0);
    }

    #[tokio::test]
    async fn per_route_cap_holds_below_the_global_cap() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(
            &connector,
            PoolConfig::new().with_max_total(10).with_max_per_route(2),
        );
        let route = test_route();

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let route = route.clone();
            tasks.push(tokio::spawn(async move {
                let lease = pool.acquire(&route, &timeouts(2000)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
                lease.finish(true);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(connector.connect_count() <= 2);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out_the_acquire() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(
            &connector,
            PoolConfig::new().with_max_total(1).with_max_per_route(1),
        );
        let route = test_route();

        let held = pool.acquire(&route, &timeouts(500)).await.unwrap();
        let second = pool.acquire(&route, &timeouts(60)).await;
        assert!(matches!(second, Err(PoolError::AcquireTimeout(_))));
        assert_eq!(pool.metrics().acquire_timeouts, 1);
        held.finish(true);
    }

    #[tokio::test]
    async fn expired_idle_connection_is_not_reused() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(
            &connector,
            PoolConfig::new()
                .with_connection_ttl(Duration::from_millis(30))
                .with_eviction_interval(Duration::from_secs(60)),
        );
        let route = test_route();

        let first = pool.acquire(&route, &timeouts(500)).await.unwrap();
        let first_id = first.connection_id();
        first.finish(true);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let second = pool.acquire(&route, &timeouts(500)).await.unwrap();
        assert_ne!(second.connection_id(), first_id);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(pool.metrics().total_evicted, 1);
    }

    #[tokio::test]
    async fn dead_idle_connection_is_replaced_not_failed() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(
            &connector,
            PoolConfig::new().with_idle_validation_threshold(Duration::ZERO),
        );
        let route = test_route();

        let first = pool.acquire(&route, &timeouts(500)).await.unwrap();
        first.finish(true);

        connector.liveness_switch().store(false, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = pool.acquire(&route, &timeouts(500)).await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(pool.metrics().validation_failures, 1);
        second.finish(false);
    }

    #[tokio::test]
    async fn dropped_lease_frees_capacity() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(
            &connector,
            PoolConfig::new().with_max_total(1).with_max_per_route(1),
        );
        let route = test_route();

        let lease = pool.acquire(&route, &timeouts(500)).await.unwrap();
        drop(lease);

        let again = pool.acquire(&route, &timeouts(500)).await.unwrap();
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(pool.metrics().total_destroyed, 1);
        again.finish(true);
    }

    #[tokio::test]
    async fn background_sweep_evicts_expired_idle_connections() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(
            &connector,
            PoolConfig::new()
                .with_connection_ttl(Duration::from_millis(30))
                .with_eviction_interval(Duration::from_millis(20)),
        );
        let route = test_route();

        let lease = pool.acquire(&route, &timeouts(500)).await.unwrap();
        lease.finish(true);
        assert_eq!(pool.metrics().idle_connections, 1);

        tokio::time::sleep(Duration::from_millis(120)).await;

        let metrics = pool.metrics();
        assert_eq!(metrics.idle_connections, 0);
        assert_eq!(metrics.total_evicted, 1);
    }

    #[tokio::test]
    async fn shutdown_drains_idle_connections_and_rejects_acquires() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(&connector, PoolConfig::new());
        let route = test_route();

        let lease = pool.acquire(&route, &timeouts(500)).await.unwrap();
        lease.finish(true);
        assert_eq!(pool.metrics().idle_connections, 1);

        pool.shutdown();
        assert_eq!(pool.metrics().idle_connections, 0);
        assert!(matches!(
            pool.acquire(&route, &timeouts(100)).await,
            Err(PoolError::Closed)
        ));
    }

    #[tokio::test]
    async fn health_reflects_leases() {
        let connector = Arc::new(MockConnector::with_status(200, "ok"));
        let pool = pool_with(&connector, PoolConfig::new().with_max_total(4));
        let route = test_route();

        let lease = pool.acquire(&route, &timeouts(500)).await.unwrap();
        let health = pool.health();
        assert_eq!(health.leased_connections, 1);
        assert_eq!(health.routes, 1);
        assert!(health.is_healthy());
        lease.finish(true);
    }
}
