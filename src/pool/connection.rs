use std::ops::{Deref, DerefMut};

use bb8::PooledConnection;
use bb8_tiberius::ConnectionManager;
use tokio_util::task::task_tracker::TaskTrackerToken;

use crate::error::MssqlMiddlewareError;
use crate::mssql::{self, MssqlClient};
use crate::results::ResultSet;
use crate::types::NamedParams;

/// A client checked out of the pool.
///
/// Dropping it (including when the owning future is cancelled) hands the
/// connection back to the pool and releases its slot in the in-flight count
/// that [`MssqlPool::close`](super::MssqlPool::close) waits on.
pub struct PooledClient {
    // Declared first so the connection is returned before the token is released.
    conn: PooledConnection<'static, ConnectionManager>,
    _in_flight: TaskTrackerToken,
}

impl PooledClient {
    pub(crate) fn new(
        conn: PooledConnection<'static, ConnectionManager>,
        in_flight: TaskTrackerToken,
    ) -> Self {
        Self {
            conn,
            _in_flight: in_flight,
        }
    }

    /// Executes a batch of SQL statements without parameters.
    ///
    /// # Errors
    /// Returns an error if the server rejects the batch.
    pub async fn execute_batch(&mut self, query: &str) -> Result<(), MssqlMiddlewareError> {
        mssql::execute_batch(self, query).await
    }

    /// Executes a query and returns its first result set.
    ///
    /// # Errors
    /// Returns an error if a parameter name is invalid or the query fails.
    pub async fn execute_select(
        &mut self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ResultSet, MssqlMiddlewareError> {
        mssql::execute_select(self, query, params).await
    }

    /// Executes a query and returns every result set.
    ///
    /// # Errors
    /// Returns an error if a parameter name is invalid or the query fails.
    pub async fn execute_multi(
        &mut self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<ResultSet>, MssqlMiddlewareError> {
        mssql::execute_multi(self, query, params).await
    }

    /// Executes a DML statement and returns the number of rows affected.
    ///
    /// # Errors
    /// Returns an error if a parameter name is invalid or the statement fails.
    pub async fn execute_dml(
        &mut self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<usize, MssqlMiddlewareError> {
        mssql::execute_dml(self, query, params).await
    }
}

impl Deref for PooledClient {
    type Target = MssqlClient;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

// Manual Debug implementation because the tiberius client doesn't implement Debug
impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledClient")
            .field(&"<TiberiusConnection>")
            .finish()
    }
}
