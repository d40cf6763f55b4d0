use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use serde::de::DeserializeOwned;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::connection::PooledClient;
use crate::config::ConnectionConfig;
use crate::error::MssqlMiddlewareError;
use crate::executor::SqlExecutor;
use crate::mssql::build_tiberius_config;
use crate::results::ResultSet;
use crate::types::NamedParams;

type TiberiusPool = Pool<ConnectionManager>;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to an open SQL Server connection pool.
///
/// Cloning is cheap; every clone refers to the same set of physical
/// connections. Concurrent queries each borrow their own connection.
#[derive(Clone)]
pub struct MssqlPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: u64,
    endpoint: String,
    // None once closed
    pool: RwLock<Option<TiberiusPool>>,
    in_flight: TaskTracker,
    close_timeout: Duration,
}

/// Snapshot of the pool's connection counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

// Manual Debug implementation because bb8_tiberius::ConnectionManager doesn't implement Debug
impl std::fmt::Debug for MssqlPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlPool")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MssqlPool {
    /// Open a pool and wait until its first connection has finished the login handshake.
    ///
    /// # Errors
    /// Returns `MssqlMiddlewareError::ConfigError` for invalid pool sizing and
    /// `MssqlMiddlewareError::ConnectionError` if the server is unreachable,
    /// rejects the login, or TLS negotiation fails within the connect timeout.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, MssqlMiddlewareError> {
        let options = config.pool();
        options.validate()?;
        let endpoint = config.endpoint();
        let manager = ConnectionManager::new(build_tiberius_config(config));

        debug!(%endpoint, max_size = options.max_size(), "opening SQL Server connection pool");

        // At least one idle connection is required so `build` performs the handshake.
        let pool = Pool::builder()
            .max_size(options.max_size())
            .min_idle(Some(options.min_idle().clamp(1, options.max_size())))
            .connection_timeout(options.connect_timeout())
            .idle_timeout(options.idle_timeout())
            .build(manager)
            .await
            .map_err(|e| {
                MssqlMiddlewareError::ConnectionError(format!(
                    "Failed to create SQL Server pool for {endpoint}: {e}"
                ))
            })?;

        let opened = Self::from_pool(pool, endpoint, options.close_timeout());
        info!(pool_id = opened.id(), endpoint = %opened.endpoint(), "SQL Server connection pool opened");
        Ok(opened)
    }

    fn from_pool(pool: TiberiusPool, endpoint: String, close_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                endpoint,
                pool: RwLock::new(Some(pool)),
                in_flight: TaskTracker::new(),
                close_timeout,
            }),
        }
    }

    /// Process-unique identifier of this pool, for logs and diagnostics.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.in_flight.is_closed()
    }

    /// Connection counts, or `None` once the pool is closed.
    #[must_use]
    pub fn state(&self) -> Option<PoolState> {
        self.live_pool().map(|pool| {
            let state = pool.state();
            PoolState {
                connections: state.connections,
                idle_connections: state.idle_connections,
            }
        })
    }

    /// Number of checked-out clients.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Borrow a client from the pool.
    ///
    /// # Errors
    /// Returns `MssqlMiddlewareError::PoolClosed` after [`close`](Self::close), or
    /// `MssqlMiddlewareError::PoolError` if no connection becomes available in time.
    pub async fn connection(&self) -> Result<PooledClient, MssqlMiddlewareError> {
        // Take the token before checking for close so `close` either sees it or we see the close.
        let token = self.inner.in_flight.token();
        if self.inner.in_flight.is_closed() {
            return Err(MssqlMiddlewareError::PoolClosed);
        }
        let pool = self.live_pool().ok_or(MssqlMiddlewareError::PoolClosed)?;
        let conn = pool.get_owned().await?;
        Ok(PooledClient::new(conn, token))
    }

    /// Run a query and return its first result set.
    ///
    /// # Errors
    /// Returns an error if no connection is available, a parameter name is
    /// invalid, or the query fails.
    pub async fn execute(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ResultSet, MssqlMiddlewareError> {
        self.connection().await?.execute_select(query, params).await
    }

    /// Run a query and deserialize its first result set into `T`.
    ///
    /// # Errors
    /// Returns the errors of [`execute`](Self::execute), or
    /// `MssqlMiddlewareError::DecodeError` if a row does not fit `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<T>, MssqlMiddlewareError> {
        self.execute(query, params).await?.deserialize()
    }

    /// Stop handing out connections, wait for in-flight queries, and release
    /// every physical connection.
    ///
    /// Waiting is bounded by the configured close timeout; queries still
    /// running after that keep their own connection until they finish. Calling
    /// `close` again is a no-op.
    pub async fn close(&self) {
        if !self.inner.in_flight.close() {
            return;
        }
        let id = self.inner.id;
        let pending = self.inner.in_flight.len();
        if pending > 0 {
            debug!(pool_id = id, pending, "waiting for in-flight queries before closing");
        }
        if tokio::time::timeout(self.inner.close_timeout, self.inner.in_flight.wait())
            .await
            .is_err()
        {
            warn!(
                pool_id = id,
                pending = self.inner.in_flight.len(),
                timeout_ms = u64::try_from(self.inner.close_timeout.as_millis()).unwrap_or(u64::MAX),
                "in-flight queries outlived the close timeout; releasing idle connections now"
            );
        }
        let pool = self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(pool);
        info!(pool_id = id, endpoint = %self.inner.endpoint, "SQL Server connection pool closed");
    }

    fn live_pool(&self) -> Option<TiberiusPool> {
        self.inner
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SqlExecutor for MssqlPool {
    async fn execute_batch(&self, query: &str) -> Result<(), MssqlMiddlewareError> {
        self.connection().await?.execute_batch(query).await
    }

    async fn execute_select(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ResultSet, MssqlMiddlewareError> {
        self.execute(query, params).await
    }

    async fn execute_multi(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<ResultSet>, MssqlMiddlewareError> {
        self.connection().await?.execute_multi(query, params).await
    }

    async fn execute_dml(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<usize, MssqlMiddlewareError> {
        self.connection().await?.execute_dml(query, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A pool over an address nothing listens on; building it opens no connection.
    fn unconnected_pool(close_timeout: Duration) -> MssqlPool {
        let config = ConnectionConfig::builder()
            .host("127.0.0.1")
            .port(1)
            .build()
            .unwrap();
        let pool = Pool::builder().build_unchecked(ConnectionManager::new(build_tiberius_config(&config)));
        MssqlPool::from_pool(pool, config.endpoint(), close_timeout)
    }

    #[tokio::test]
    async fn close_waits_for_in_flight_checkout() {
        let pool = unconnected_pool(Duration::from_secs(30));
        let checkout = pool.inner.in_flight.token();

        let closing = tokio::spawn({
            let pool = pool.clone();
            async move { pool.close().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!closing.is_finished());
        assert!(pool.is_closed());
        assert!(pool.state().is_some(), "connections released while a query was running");
        assert!(matches!(
            pool.connection().await,
            Err(MssqlMiddlewareError::PoolClosed)
        ));

        drop(checkout);
        tokio::time::timeout(Duration::from_secs(5), closing)
            .await
            .expect("close did not finish after the checkout ended")
            .unwrap();
        assert!(pool.state().is_none());
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn close_timeout_releases_pool_despite_stuck_checkout() {
        let pool = unconnected_pool(Duration::from_millis(50));
        let checkout = pool.inner.in_flight.token();

        tokio::time::timeout(Duration::from_secs(5), pool.close())
            .await
            .expect("close ignored its timeout");

        assert!(pool.state().is_none());
        assert_eq!(pool.in_flight(), 1);
        drop(checkout);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_checkout_releases_its_slot() {
        let pool = unconnected_pool(Duration::from_secs(30));
        let holder = tokio::spawn({
            let pool = pool.clone();
            async move {
                let _checkout = pool.inner.in_flight.token();
                std::future::pending::<()>().await;
            }
        });
        while pool.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        holder.abort();
        assert!(holder.await.unwrap_err().is_cancelled());
        assert_eq!(pool.in_flight(), 0);

        tokio::time::timeout(Duration::from_secs(5), pool.close())
            .await
            .expect("close waited on a cancelled checkout");
        assert!(pool.state().is_none());
    }

    #[tokio::test]
    async fn stale_handle_fails_after_close() {
        let pool = unconnected_pool(Duration::from_secs(1));
        let stale = pool.clone();

        pool.close().await;
        pool.close().await;

        assert!(stale.is_closed());
        assert!(matches!(
            stale.execute("SELECT 1 AS number", None).await,
            Err(MssqlMiddlewareError::PoolClosed)
        ));
    }
}
