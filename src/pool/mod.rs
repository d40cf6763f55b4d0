pub mod connection;
pub mod manager;
pub mod types;

pub use connection::PooledClient;
pub use manager::{PoolFactory, PoolManager, TiberiusPoolFactory};
pub use types::{MssqlPool, PoolState};
