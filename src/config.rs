//! Connection settings resolved from the process environment.
//!
//! Every variable is optional. Unset or empty variables fall back to the
//! defaults below; malformed numbers are rejected with
//! [`MssqlMiddlewareError::ConfigError`] naming the offending variable.
//!
//! | Variable | Default |
//! |---|---|
//! | `MSSQL_USER` | `""` |
//! | `MSSQL_PASSWORD` | `""` |
//! | `MSSQL_SERVER` | `"localhost"` |
//! | `MSSQL_DATABASE` | `""` |
//! | `MSSQL_PORT` | `1433` |
//! | `MSSQL_ENCRYPT` | `false` |
//! | `MSSQL_TRUST_SERVER_CERTIFICATE` | `false` |
//! | `MSSQL_POOL_MAX` | `10` |
//! | `MSSQL_POOL_MIN` | `0` |
//! | `MSSQL_CONNECT_TIMEOUT_MS` | `15000` |
//! | `MSSQL_IDLE_TIMEOUT_MS` | `30000` (`0` disables) |
//! | `MSSQL_CLOSE_TIMEOUT_MS` | `10000` |
//!
//! Boolean variables are true only for the literal string `"true"`.

use std::fmt;
use std::num::NonZeroU16;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MssqlMiddlewareError;

pub const USER_VAR: &str = "MSSQL_USER";
pub const PASSWORD_VAR: &str = "MSSQL_PASSWORD";
pub const SERVER_VAR: &str = "MSSQL_SERVER";
pub const DATABASE_VAR: &str = "MSSQL_DATABASE";
pub const PORT_VAR: &str = "MSSQL_PORT";
pub const ENCRYPT_VAR: &str = "MSSQL_ENCRYPT";
pub const TRUST_SERVER_CERTIFICATE_VAR: &str = "MSSQL_TRUST_SERVER_CERTIFICATE";
pub const POOL_MAX_VAR: &str = "MSSQL_POOL_MAX";
pub const POOL_MIN_VAR: &str = "MSSQL_POOL_MIN";
pub const CONNECT_TIMEOUT_VAR: &str = "MSSQL_CONNECT_TIMEOUT_MS";
pub const IDLE_TIMEOUT_VAR: &str = "MSSQL_IDLE_TIMEOUT_MS";
pub const CLOSE_TIMEOUT_VAR: &str = "MSSQL_CLOSE_TIMEOUT_MS";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1433;

/// Resolve the connection settings from the process environment.
///
/// # Errors
///
/// Returns `MssqlMiddlewareError::ConfigError` if a numeric variable is malformed.
pub fn resolve() -> Result<ConnectionConfig, MssqlMiddlewareError> {
    ConnectionConfig::from_env()
}

/// A password that never shows up in `Debug` output or serialized config.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("\"***\"")
        }
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Sizing and timeouts for the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolOptions {
    max_size: u32,
    min_idle: u32,
    connect_timeout_ms: u64,
    idle_timeout_ms: u64,
    close_timeout_ms: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 0,
            connect_timeout_ms: 15_000,
            idle_timeout_ms: 30_000,
            close_timeout_ms: 10_000,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    #[must_use]
    pub fn min_idle(&self) -> u32 {
        self.min_idle
    }

    /// How long a checkout (including a fresh handshake) may take.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Idle connections above `min_idle` are dropped after this long; `None` keeps them.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Upper bound on waiting for in-flight queries when the pool closes.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_min_idle(mut self, min_idle: u32) -> Self {
        self.min_idle = min_idle;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_millis(timeout);
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout_ms = timeout.map_or(0, duration_millis);
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = duration_millis(timeout);
        self
    }

    /// Check the sizing constraints.
    ///
    /// # Errors
    ///
    /// Returns `MssqlMiddlewareError::ConfigError` if `max_size` is zero, `min_idle`
    /// exceeds `max_size`, or the connect timeout is zero.
    pub fn validate(&self) -> Result<(), MssqlMiddlewareError> {
        if self.max_size == 0 {
            return Err(MssqlMiddlewareError::ConfigError(
                "pool max size must be at least 1".to_string(),
            ));
        }
        if self.min_idle > self.max_size {
            return Err(MssqlMiddlewareError::ConfigError(format!(
                "pool min idle ({}) exceeds max size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(MssqlMiddlewareError::ConfigError(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Everything needed to open the SQL Server pool.
///
/// Fields are read-only once built. Construct it from the environment
/// ([`ConnectionConfig::from_env`]), from any key lookup
/// ([`ConnectionConfig::from_lookup`]), with [`ConnectionConfig::builder`], or by
/// deserializing a host's runtime configuration (camelCase keys, `server` is
/// accepted as an alias for `host`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    user: String,
    #[serde(skip_serializing)]
    password: Secret,
    #[serde(alias = "server")]
    host: String,
    database: String,
    port: NonZeroU16,
    encrypt: bool,
    trust_server_certificate: bool,
    pool: PoolOptions,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: Secret::default(),
            host: DEFAULT_HOST.to_string(),
            database: String::new(),
            port: default_port(),
            encrypt: false,
            trust_server_certificate: false,
            pool: PoolOptions::default(),
        }
    }
}

fn default_port() -> NonZeroU16 {
    NonZeroU16::new(DEFAULT_PORT).unwrap_or(NonZeroU16::MIN)
}

impl ConnectionConfig {
    /// Read the `MSSQL_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `MssqlMiddlewareError::ConfigError` if a numeric variable is malformed.
    pub fn from_env() -> Result<Self, MssqlMiddlewareError> {
        Self::from_env_with_prefix("")
    }

    /// Read `{prefix}MSSQL_*` variables, e.g. `NUXT_MSSQL_PORT` with prefix `"NUXT_"`.
    ///
    /// Values that are not valid Unicode are decoded lossily.
    ///
    /// # Errors
    ///
    /// Returns `MssqlMiddlewareError::ConfigError` if a numeric variable is malformed.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, MssqlMiddlewareError> {
        Self::from_lookup_with_prefix(prefix, |key| match std::env::var(key) {
            Ok(value) => Some(value),
            Err(std::env::VarError::NotPresent) => None,
            Err(std::env::VarError::NotUnicode(raw)) => Some(raw.to_string_lossy().into_owned()),
        })
    }

    /// Resolve from an arbitrary key lookup instead of the process environment.
    ///
    /// ```rust
    /// use std::collections::HashMap;
    /// use mssql_middleware::config::ConnectionConfig;
    ///
    /// let vars = HashMap::from([("MSSQL_SERVER", "db.internal"), ("MSSQL_ENCRYPT", "true")]);
    /// let config = ConnectionConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))?;
    /// assert_eq!(config.host(), "db.internal");
    /// assert_eq!(config.port(), 1433);
    /// assert!(config.encrypt());
    /// # Ok::<(), mssql_middleware::MssqlMiddlewareError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `MssqlMiddlewareError::ConfigError` if a numeric variable is malformed.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, MssqlMiddlewareError>
    where
        L: Fn(&str) -> Option<String>,
    {
        Self::from_lookup_with_prefix("", lookup)
    }

    /// Resolve `{prefix}MSSQL_*` keys from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns `MssqlMiddlewareError::ConfigError` if a numeric variable is malformed.
    pub fn from_lookup_with_prefix<L>(prefix: &str, lookup: L) -> Result<Self, MssqlMiddlewareError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| -> Option<(String, String)> {
            let key = format!("{prefix}{name}");
            lookup(&key)
                .filter(|value| !value.is_empty())
                .map(|value| (key, value))
        };
        let text = |name: &str| var(name).map(|(_, value)| value);
        let flag = |name: &str| var(name).is_some_and(|(_, value)| value == "true");

        let defaults = PoolOptions::default();
        let pool = PoolOptions {
            max_size: parse_or(var(POOL_MAX_VAR), defaults.max_size)?,
            min_idle: parse_or(var(POOL_MIN_VAR), defaults.min_idle)?,
            connect_timeout_ms: parse_or(var(CONNECT_TIMEOUT_VAR), defaults.connect_timeout_ms)?,
            idle_timeout_ms: parse_or(var(IDLE_TIMEOUT_VAR), defaults.idle_timeout_ms)?,
            close_timeout_ms: parse_or(var(CLOSE_TIMEOUT_VAR), defaults.close_timeout_ms)?,
        };
        pool.validate()?;

        Ok(Self {
            user: text(USER_VAR).unwrap_or_default(),
            password: Secret::new(text(PASSWORD_VAR).unwrap_or_default()),
            host: text(SERVER_VAR).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            database: text(DATABASE_VAR).unwrap_or_default(),
            port: parse_or(var(PORT_VAR), default_port())?,
            encrypt: flag(ENCRYPT_VAR),
            trust_server_certificate: flag(TRUST_SERVER_CERTIFICATE_VAR),
            pool,
        })
    }

    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn password(&self) -> &Secret {
        &self.password
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.get()
    }

    #[must_use]
    pub fn encrypt(&self) -> bool {
        self.encrypt
    }

    #[must_use]
    pub fn trust_server_certificate(&self) -> bool {
        self.trust_server_certificate
    }

    #[must_use]
    pub fn pool(&self) -> &PoolOptions {
        &self.pool
    }

    /// `host:port/database`, for log lines.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

fn parse_or<T: FromStr>(
    raw: Option<(String, String)>,
    default: T,
) -> Result<T, MssqlMiddlewareError> {
    match raw {
        None => Ok(default),
        Some((key, value)) => value.trim().parse().map_err(|_| {
            MssqlMiddlewareError::ConfigError(format!(
                "{key} must be a positive integer in range, got {value:?}"
            ))
        }),
    }
}

/// Fluent builder for [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
    port: u16,
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self {
            config: ConnectionConfig::default(),
            port: DEFAULT_PORT,
        }
    }
}

impl ConnectionConfigBuilder {
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<Secret>) -> Self {
        self.config.password = password.into();
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.config.encrypt = encrypt;
        self
    }

    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.config.trust_server_certificate = trust;
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolOptions) -> Self {
        self.config.pool = pool;
        self
    }

    /// Validate and finish the configuration.
    ///
    /// # Errors
    ///
    /// Returns `MssqlMiddlewareError::ConfigError` for port 0 or invalid pool sizing.
    pub fn build(mut self) -> Result<ConnectionConfig, MssqlMiddlewareError> {
        self.config.port = NonZeroU16::new(self.port).ok_or_else(|| {
            MssqlMiddlewareError::ConfigError("port must be in 1..=65535".to_string())
        })?;
        self.config.pool.validate()?;
        Ok(self.config)
    }
}
