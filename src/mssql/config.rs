use tiberius::{AuthMethod, Client, Config as TiberiusConfig, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

use crate::config::ConnectionConfig;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Translate the resolved settings into a tiberius configuration.
///
/// `encrypt = false` still lets the driver protect the login packet
/// (`EncryptionLevel::Off`); the certificate is only trusted blindly when
/// `trust_server_certificate` is set. An empty database name leaves the login's
/// default database in place.
#[must_use]
pub fn build_tiberius_config(config: &ConnectionConfig) -> TiberiusConfig {
    let mut tiberius_config = TiberiusConfig::new();
    tiberius_config.host(config.host());
    tiberius_config.port(config.port());
    if !config.database().is_empty() {
        tiberius_config.database(config.database());
    }
    tiberius_config.authentication(AuthMethod::sql_server(
        config.user(),
        config.password().expose(),
    ));
    tiberius_config.encryption(if config.encrypt() {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });
    if config.trust_server_certificate() {
        tiberius_config.trust_cert();
    }
    tiberius_config.application_name(env!("CARGO_PKG_NAME"));
    tiberius_config
}
