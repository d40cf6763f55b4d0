// SQL Server support via tiberius
//
// - config: tiberius configuration from the resolved connection settings
// - params: named parameter validation and binding
// - query: result extraction and result set building
// - executor: statement execution on a single client

pub mod config;
pub mod executor;
pub mod params;
pub mod query;

pub use config::{MssqlClient, build_tiberius_config};
pub use executor::{execute_batch, execute_dml, execute_multi, execute_select};
pub use params::bind_named_params;
pub use query::{build_result_set, build_result_sets};
