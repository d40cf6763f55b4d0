use tiberius::Query;

use super::config::MssqlClient;
use super::params::bind_named_params;
use super::query::{build_result_set, build_result_sets};
use crate::error::MssqlMiddlewareError;
use crate::results::ResultSet;
use crate::types::NamedParams;

/// Execute an unparameterized batch (DDL, procedure definitions, multi-statement scripts).
///
/// The text is sent as a plain SQL batch rather than through `sp_executesql`.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::QueryError` if execution fails.
pub async fn execute_batch(
    client: &mut MssqlClient,
    query: &str,
) -> Result<(), MssqlMiddlewareError> {
    client.simple_query(query).await?.into_results().await?;
    Ok(())
}

/// Execute a query with named parameters and return its first result set.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::ParameterError` for invalid names and
/// `MssqlMiddlewareError::QueryError` if execution or row streaming fails.
pub async fn execute_select(
    client: &mut MssqlClient,
    query: &str,
    params: Option<&NamedParams>,
) -> Result<ResultSet, MssqlMiddlewareError> {
    let query_builder = bind_named_params(query, params)?;
    build_result_set(client, query_builder).await
}

/// Execute a query with named parameters and return every result set it produces.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::ParameterError` for invalid names and
/// `MssqlMiddlewareError::QueryError` if execution or row streaming fails.
pub async fn execute_multi(
    client: &mut MssqlClient,
    query: &str,
    params: Option<&NamedParams>,
) -> Result<Vec<ResultSet>, MssqlMiddlewareError> {
    let query_builder = bind_named_params(query, params)?;
    build_result_sets(client, query_builder).await
}

/// Execute a DML query (INSERT, UPDATE, DELETE) with named parameters.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::QueryError` if execution fails, or
/// `MssqlMiddlewareError::ExecutionError` if the rows-affected count overflows.
pub async fn execute_dml(
    client: &mut MssqlClient,
    query: &str,
    params: Option<&NamedParams>,
) -> Result<usize, MssqlMiddlewareError> {
    let query_builder: Query<'_> = bind_named_params(query, params)?;
    let exec_result = query_builder.execute(client).await?;

    let rows_affected: u64 = exec_result.rows_affected().iter().sum();

    usize::try_from(rows_affected).map_err(|e| {
        MssqlMiddlewareError::ExecutionError(format!("Invalid rows affected count: {e}"))
    })
}
