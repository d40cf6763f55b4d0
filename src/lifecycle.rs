//! Startup and shutdown around the pool's lifetime.
//!
//! [`run_with_pool`] is the whole sequence in one call: initialize the pool,
//! run the application until it returns or the process receives SIGINT or
//! SIGTERM, then close the pool exactly once. A panic inside the application
//! also closes the pool before the panic continues.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::{error, info};

use crate::config::ConnectionConfig;
use crate::error::MssqlMiddlewareError;
use crate::pool::{PoolFactory, PoolManager};

/// How the application future ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome<T> {
    /// The application returned on its own.
    Completed(T),
    /// A shutdown signal arrived first; the application future was dropped.
    Interrupted,
}

/// Initialize the pool during startup and log the result.
///
/// # Errors
///
/// Returns the initialization error unchanged; the host should treat it as
/// fatal and not start serving.
pub async fn startup<F: PoolFactory>(
    manager: &PoolManager<F>,
    config: &ConnectionConfig,
) -> Result<F::Pool, MssqlMiddlewareError> {
    match manager.initialize(config).await {
        Ok(pool) => {
            info!(endpoint = %config.endpoint(), "SQL Server connection pool initialized");
            Ok(pool)
        }
        Err(e) => {
            error!(endpoint = %config.endpoint(), error = %e, "SQL Server connection pool failed to initialize");
            Err(e)
        }
    }
}

/// Listeners for the signals that should shut the process down.
#[derive(Debug)]
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Register SIGINT and SIGTERM handlers (Ctrl-C elsewhere).
    ///
    /// Registration is permanent for the process: once installed, SIGINT and
    /// SIGTERM no longer terminate it by default, even after this value is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `MssqlMiddlewareError::SignalError` if the handlers cannot be registered.
    #[cfg(unix)]
    pub fn install() -> Result<Self, MssqlMiddlewareError> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(MssqlMiddlewareError::SignalError)?,
            terminate: signal(SignalKind::terminate()).map_err(MssqlMiddlewareError::SignalError)?,
        })
    }

    /// Register SIGINT and SIGTERM handlers (Ctrl-C elsewhere).
    ///
    /// # Errors
    ///
    /// Never fails on this platform; registration happens on first wait.
    #[cfg(not(unix))]
    pub fn install() -> Result<Self, MssqlMiddlewareError> {
        Ok(Self {})
    }

    /// Wait for the first signal.
    #[cfg(unix)]
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received SIGINT"),
            _ = self.terminate.recv() => info!("Received SIGTERM"),
        }
    }

    /// Wait for the first signal.
    #[cfg(not(unix))]
    pub async fn recv(self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => {
                error!(error = %e, "Ctrl-C handler failed; waiting for the application instead");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run `app` with a live pool until it finishes or a shutdown signal arrives.
///
/// ```rust,no_run
/// use mssql_middleware::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<(), MssqlMiddlewareError> {
///     let manager = PoolManager::new();
///     let config = resolve()?;
///     let outcome = run_with_pool(&manager, &config, |pool| async move {
///         pool.execute("SELECT 1 AS number", None).await
///     })
///     .await?;
///     if let LifecycleOutcome::Completed(rows) = outcome {
///         println!("{:?}", rows?.to_json_rows());
///     }
///     Ok(())
/// }
/// ```
///
/// The SIGINT and SIGTERM handlers installed here stay registered after this
/// returns, so the default "terminate on Ctrl-C" behavior does not come back.
/// Hosts that keep running afterwards must handle those signals themselves,
/// or use [`run_until`] with their own shutdown future.
///
/// # Errors
///
/// Returns `SignalError` if the signal handlers cannot be installed, or the
/// startup error if the pool cannot be opened. In both cases `app` never runs.
pub async fn run_with_pool<F, A, Fut, T>(
    manager: &PoolManager<F>,
    config: &ConnectionConfig,
    app: A,
) -> Result<LifecycleOutcome<T>, MssqlMiddlewareError>
where
    F: PoolFactory,
    A: FnOnce(F::Pool) -> Fut,
    Fut: Future<Output = T>,
{
    let signal = ShutdownSignal::install()?;
    run_until(manager, config, signal.recv(), app).await
}

/// [`run_with_pool`] with a caller-supplied shutdown trigger.
///
/// # Errors
///
/// Returns the startup error if the pool cannot be opened; `app` never runs.
pub async fn run_until<F, S, A, Fut, T>(
    manager: &PoolManager<F>,
    config: &ConnectionConfig,
    shutdown: S,
    app: A,
) -> Result<LifecycleOutcome<T>, MssqlMiddlewareError>
where
    F: PoolFactory,
    S: Future<Output = ()>,
    A: FnOnce(F::Pool) -> Fut,
    Fut: Future<Output = T>,
{
    let pool = startup(manager, config).await?;
    // `app` is called inside the caught future: a panic in the closure itself must also close the pool.
    let app = AssertUnwindSafe(async move { app(pool).await }).catch_unwind();

    let finished = tokio::select! {
        result = app => Some(result),
        () = shutdown => None,
    };

    manager.close().await;

    match finished {
        Some(Ok(value)) => Ok(LifecycleOutcome::Completed(value)),
        Some(Err(panic)) => std::panic::resume_unwind(panic),
        None => {
            info!("Shutdown requested; SQL Server pool closed");
            Ok(LifecycleOutcome::Interrupted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingFactory {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl PoolFactory for TrackingFactory {
        type Pool = usize;

        async fn open(&self, _config: &ConnectionConfig) -> Result<usize, MssqlMiddlewareError> {
            Ok(self.opened.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn close(&self, _pool: usize) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn completed_app_closes_pool_once() {
        let manager = PoolManager::with_factory(TrackingFactory::default());
        let outcome = run_until(
            &manager,
            &ConnectionConfig::default(),
            std::future::pending::<()>(),
            |pool| async move { pool * 10 },
        )
        .await
        .unwrap();

        assert_eq!(outcome, LifecycleOutcome::Completed(10));
        assert_eq!(manager.factory().closed.load(Ordering::SeqCst), 1);
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn shutdown_interrupts_app_and_closes_pool() {
        let manager = PoolManager::with_factory(TrackingFactory::default());
        let outcome = run_until(
            &manager,
            &ConnectionConfig::default(),
            std::future::ready(()),
            |_pool| std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, LifecycleOutcome::Interrupted);
        assert_eq!(manager.factory().closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_app_still_closes_pool() {
        let manager = Arc::new(PoolManager::with_factory(TrackingFactory::default()));
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                run_until::<_, _, _, _, ()>(
                    &manager,
                    &ConnectionConfig::default(),
                    std::future::pending::<()>(),
                    |_pool| async move { panic!("handler blew up") },
                )
                .await
            }
        });

        let err = task.await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(manager.factory().closed.load(Ordering::SeqCst), 1);
        assert!(!manager.is_initialized());
    }

    #[tokio::test]
    async fn app_panicking_before_returning_a_future_still_closes_pool() {
        let manager = Arc::new(PoolManager::with_factory(TrackingFactory::default()));
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                run_until(
                    &manager,
                    &ConnectionConfig::default(),
                    std::future::pending::<()>(),
                    |_pool| -> std::future::Ready<()> { panic!("setup blew up") },
                )
                .await
            }
        });

        let err = task.await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(manager.factory().closed.load(Ordering::SeqCst), 1);
        assert!(!manager.is_initialized());
    }
}
