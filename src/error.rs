use thiserror::Error;

#[derive(Debug, Error)]
pub enum MssqlMiddlewareError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL Server pool not initialized; call PoolManager::initialize during startup")]
    NotInitialized,

    #[error("SQL Server pool has been closed")]
    PoolClosed,

    #[error("SQL Server query error: {0}")]
    QueryError(#[from] tiberius::error::Error),

    #[error(transparent)]
    PoolError(#[from] bb8::RunError<bb8_tiberius::Error>),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Row decoding error: {0}")]
    DecodeError(#[from] serde_json::Error),

    #[error("Failed to install shutdown signal handler: {0}")]
    SignalError(#[source] std::io::Error),
}
