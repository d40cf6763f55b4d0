//! SQL Server connection pooling and named-parameter queries on top of tiberius.
//!
//! A [`PoolManager`] owns the single live pool of a process. Configuration is
//! resolved from `MSSQL_*` environment variables, the pool is opened once at
//! startup, shared by every query, and closed once at shutdown.
//!
//! ```rust,no_run
//! use mssql_middleware::prelude::*;
//!
//! # async fn demo() -> Result<(), MssqlMiddlewareError> {
//! let manager = PoolManager::new();
//! startup(&manager, &resolve()?).await?;
//!
//! let params = NamedParams::new().with("value", 42);
//! let rows = execute_sql(&manager, "SELECT @value AS value", Some(&params)).await?;
//! assert_eq!(rows.results[0].get("value"), Some(&RowValues::Int(42)));
//!
//! manager.close().await;
//! # Ok(()) }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod mssql;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod types;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, PoolOptions, Secret, resolve};
pub use error::MssqlMiddlewareError;
pub use executor::{
    SqlExecutor, execute_sql, execute_sql_as, execute_sql_batch, execute_sql_dml,
    execute_sql_multi,
};
pub use lifecycle::{LifecycleOutcome, ShutdownSignal, run_until, run_with_pool, startup};
pub use pool::{MssqlPool, PoolFactory, PoolManager, PoolState, PooledClient, TiberiusPoolFactory};
pub use results::{DbRow, ResultSet};
pub use types::{NamedParams, RowValues};
