use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::MssqlPool;
use crate::config::ConnectionConfig;
use crate::error::MssqlMiddlewareError;

/// Opens and closes the pool a [`PoolManager`] hands out.
#[async_trait]
pub trait PoolFactory: Send + Sync {
    type Pool: Clone + Send + Sync + 'static;

    /// Open a pool, returning only once it is ready to serve queries.
    async fn open(&self, config: &ConnectionConfig) -> Result<Self::Pool, MssqlMiddlewareError>;

    /// Drain and release a pool previously returned by [`open`](Self::open).
    async fn close(&self, pool: Self::Pool);
}

/// The default factory: a `bb8` pool of tiberius clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiberiusPoolFactory;

#[async_trait]
impl PoolFactory for TiberiusPoolFactory {
    type Pool = MssqlPool;

    async fn open(&self, config: &ConnectionConfig) -> Result<MssqlPool, MssqlMiddlewareError> {
        MssqlPool::connect(config).await
    }

    async fn close(&self, pool: MssqlPool) {
        pool.close().await;
    }
}

/// Owner of the single live pool for a process.
///
/// Build one at startup and share it (by reference or `Arc`) with the code
/// that needs the database. There is no implicit initialization: [`get`]
/// fails until [`initialize`] has succeeded.
///
/// ```rust,no_run
/// use mssql_middleware::prelude::*;
///
/// # async fn demo() -> Result<(), MssqlMiddlewareError> {
/// let manager = PoolManager::new();
/// manager.initialize(&resolve()?).await?;
///
/// let rows = execute_sql(&manager, "SELECT 1 AS number", None).await?;
/// assert_eq!(rows.results[0].get("number"), Some(&RowValues::Int(1)));
///
/// manager.close().await;
/// # Ok(()) }
/// ```
///
/// [`get`]: PoolManager::get
/// [`initialize`]: PoolManager::initialize
pub struct PoolManager<F: PoolFactory = TiberiusPoolFactory> {
    factory: F,
    slot: RwLock<Option<F::Pool>>,
    // Serializes initialize/close so only one pool is ever opened at a time.
    lifecycle: Mutex<()>,
}

impl PoolManager<TiberiusPoolFactory> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_factory(TiberiusPoolFactory)
    }
}

impl Default for PoolManager<TiberiusPoolFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: PoolFactory> PoolManager<F> {
    #[must_use]
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            slot: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Open the pool, or return the one already open.
    ///
    /// Concurrent first calls are serialized: exactly one of them opens the
    /// pool and the rest receive it. When a pool already exists, `config` is
    /// not compared against the one it was opened with.
    ///
    /// # Errors
    /// Returns the factory's error (normally `MssqlMiddlewareError::ConnectionError`);
    /// the manager stays uninitialized so a later call can retry.
    pub async fn initialize(
        &self,
        config: &ConnectionConfig,
    ) -> Result<F::Pool, MssqlMiddlewareError> {
        let _guard = self.lifecycle.lock().await;
        if let Some(pool) = self.current() {
            debug!("SQL Server pool already initialized; reusing it");
            return Ok(pool);
        }

        let pool = self.factory.open(config).await?;
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(pool.clone());
        Ok(pool)
    }

    /// The live pool.
    ///
    /// # Errors
    /// Returns `MssqlMiddlewareError::NotInitialized` before a successful
    /// [`initialize`](Self::initialize) or after [`close`](Self::close).
    pub fn get(&self) -> Result<F::Pool, MssqlMiddlewareError> {
        self.current().ok_or(MssqlMiddlewareError::NotInitialized)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Close the live pool, if any, and reset to uninitialized.
    ///
    /// Safe to call any number of times and from several tasks at once; only
    /// the first caller that finds a pool closes it.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        let pool = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pool {
            Some(pool) => {
                self.factory.close(pool).await;
                info!("SQL Server pool manager reset");
            }
            None => debug!("close requested with no live SQL Server pool"),
        }
    }

    fn current(&self) -> Option<F::Pool> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<F: PoolFactory> std::fmt::Debug for PoolManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
        closed: AtomicUsize,
        refuse: AtomicBool,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct FakePool(usize);

    #[async_trait]
    impl PoolFactory for CountingFactory {
        type Pool = FakePool;

        async fn open(&self, _config: &ConnectionConfig) -> Result<FakePool, MssqlMiddlewareError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.refuse.load(Ordering::SeqCst) {
                return Err(MssqlMiddlewareError::ConnectionError(
                    "login refused".to_string(),
                ));
            }
            Ok(FakePool(self.opened.fetch_add(1, Ordering::SeqCst) + 1))
        }

        async fn close(&self, _pool: FakePool) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_initialize_opens_one_pool() {
        let manager = Arc::new(PoolManager::with_factory(CountingFactory::default()));
        let config = ConnectionConfig::default();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let config = config.clone();
                tokio::spawn(async move { manager.initialize(&config).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), FakePool(1));
        }
        assert_eq!(manager.factory().opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn get_before_initialize_fails() {
        let manager = PoolManager::with_factory(CountingFactory::default());
        assert!(matches!(
            manager.get(),
            Err(MssqlMiddlewareError::NotInitialized)
        ));
        assert!(!manager.is_initialized());
        assert_eq!(manager.factory().opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_initialize_leaves_manager_empty() {
        let manager = PoolManager::with_factory(CountingFactory::default());
        manager.factory().refuse.store(true, Ordering::SeqCst);

        let err = manager
            .initialize(&ConnectionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MssqlMiddlewareError::ConnectionError(_)));
        assert!(!manager.is_initialized());

        manager.factory().refuse.store(false, Ordering::SeqCst);
        assert_eq!(
            manager.initialize(&ConnectionConfig::default()).await.unwrap(),
            FakePool(1)
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_allows_reinitialize() {
        let manager = PoolManager::with_factory(CountingFactory::default());
        manager.close().await;
        assert_eq!(manager.factory().closed.load(Ordering::SeqCst), 0);

        manager.initialize(&ConnectionConfig::default()).await.unwrap();
        manager.close().await;
        manager.close().await;
        assert_eq!(manager.factory().closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.get(),
            Err(MssqlMiddlewareError::NotInitialized)
        ));

        let reopened = manager.initialize(&ConnectionConfig::default()).await.unwrap();
        assert_eq!(reopened, FakePool(2));
        assert_eq!(manager.get().unwrap(), FakePool(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_close_releases_once() {
        let manager = Arc::new(PoolManager::with_factory(CountingFactory::default()));
        manager.initialize(&ConnectionConfig::default()).await.unwrap();

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.close().await }
        });
        let second = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.close().await }
        });
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(manager.factory().closed.load(Ordering::SeqCst), 1);
    }
}
