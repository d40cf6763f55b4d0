//! Query execution against the pool owned by a [`PoolManager`].
//!
//! Each function looks the pool up with [`PoolManager::get`], so calling them
//! before startup has initialized the pool fails with
//! [`MssqlMiddlewareError::NotInitialized`]. SQL text is sent verbatim; only
//! the named parameters are bound. Nothing here retries.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::MssqlMiddlewareError;
use crate::pool::{PoolFactory, PoolManager};
use crate::results::ResultSet;
use crate::types::NamedParams;

/// Statement execution on a shared pool.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Executes an unparameterized batch of statements.
    async fn execute_batch(&self, query: &str) -> Result<(), MssqlMiddlewareError>;

    /// Executes a query and returns its first result set.
    async fn execute_select(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ResultSet, MssqlMiddlewareError>;

    /// Executes a query and returns every result set it produces.
    async fn execute_multi(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<ResultSet>, MssqlMiddlewareError>;

    /// Executes a single DML statement and returns the number of rows affected.
    async fn execute_dml(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<usize, MssqlMiddlewareError>;
}

/// Run `query` with `params` bound by name and return the first result set.
///
/// # Errors
///
/// Returns `NotInitialized` if the pool has not been initialized,
/// `ParameterError` for an invalid parameter name, or `QueryError` when the
/// server or transport fails.
pub async fn execute_sql<F>(
    manager: &PoolManager<F>,
    query: &str,
    params: Option<&NamedParams>,
) -> Result<ResultSet, MssqlMiddlewareError>
where
    F: PoolFactory,
    F::Pool: SqlExecutor,
{
    manager.get()?.execute_select(query, params).await
}

/// Like [`execute_sql`], deserializing each row into `T`.
///
/// ```rust,no_run
/// use mssql_middleware::prelude::*;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Answer {
///     value: i64,
/// }
///
/// # async fn demo(manager: &PoolManager) -> Result<(), MssqlMiddlewareError> {
/// let params = NamedParams::new().with("value", 42);
/// let rows: Vec<Answer> =
///     execute_sql_as(manager, "SELECT @value AS value", Some(&params)).await?;
/// assert_eq!(rows[0].value, 42);
/// # Ok(()) }
/// ```
///
/// # Errors
///
/// Returns the errors of [`execute_sql`], or `DecodeError` when a row does not
/// fit `T`.
pub async fn execute_sql_as<T, F>(
    manager: &PoolManager<F>,
    query: &str,
    params: Option<&NamedParams>,
) -> Result<Vec<T>, MssqlMiddlewareError>
where
    T: DeserializeOwned,
    F: PoolFactory,
    F::Pool: SqlExecutor,
{
    execute_sql(manager, query, params).await?.deserialize()
}

/// Run `query` and return every result set it produces.
///
/// # Errors
///
/// Same as [`execute_sql`].
pub async fn execute_sql_multi<F>(
    manager: &PoolManager<F>,
    query: &str,
    params: Option<&NamedParams>,
) -> Result<Vec<ResultSet>, MssqlMiddlewareError>
where
    F: PoolFactory,
    F::Pool: SqlExecutor,
{
    manager.get()?.execute_multi(query, params).await
}

/// Run a DML statement and return the number of rows affected.
///
/// # Errors
///
/// Same as [`execute_sql`].
pub async fn execute_sql_dml<F>(
    manager: &PoolManager<F>,
    query: &str,
    params: Option<&NamedParams>,
) -> Result<usize, MssqlMiddlewareError>
where
    F: PoolFactory,
    F::Pool: SqlExecutor,
{
    manager.get()?.execute_dml(query, params).await
}

/// Run an unparameterized batch.
///
/// # Errors
///
/// Returns `NotInitialized` if the pool has not been initialized, or
/// `QueryError` when the batch fails.
pub async fn execute_sql_batch<F>(
    manager: &PoolManager<F>,
    query: &str,
) -> Result<(), MssqlMiddlewareError>
where
    F: PoolFactory,
    F::Pool: SqlExecutor,
{
    manager.get()?.execute_batch(query).await
}
