//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::config::{ConnectionConfig, PoolOptions, resolve};
pub use crate::error::MssqlMiddlewareError;
pub use crate::executor::{
    SqlExecutor, execute_sql, execute_sql_as, execute_sql_batch, execute_sql_dml,
    execute_sql_multi,
};
pub use crate::lifecycle::{LifecycleOutcome, run_until, run_with_pool, startup};
pub use crate::pool::{MssqlPool, PoolManager};
pub use crate::results::{DbRow, ResultSet};
pub use crate::types::{NamedParams, RowValues};
