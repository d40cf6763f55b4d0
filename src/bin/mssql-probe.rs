//! mssql-probe: open the pool from `MSSQL_*` variables, run one query, print the rows as JSON.

use clap::Parser;
use mssql_middleware::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Run a single query against SQL Server through the shared pool.
#[derive(Parser, Debug)]
#[command(name = "mssql-probe", version, about)]
struct Args {
    /// SQL to execute
    #[arg(short, long, default_value = "SELECT 1 AS number")]
    query: String,

    /// Named parameter as name=value; repeatable
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, RowValues)>,

    /// Prefix for the MSSQL_* variables, e.g. NUXT_
    #[arg(long, env = "MSSQL_ENV_PREFIX", default_value = "")]
    env_prefix: String,

    /// Log filter; RUST_LOG is used when unset
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(args: &Args) {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    if args.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Split `name=value` and infer the value's type: integer, float, bool, else text.
fn parse_param(raw: &str) -> Result<(String, RowValues), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }

    let value = if let Ok(i) = value.parse::<i64>() {
        RowValues::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        RowValues::Float(f)
    } else if let Ok(b) = value.parse::<bool>() {
        RowValues::Bool(b)
    } else {
        RowValues::Text(value.to_string())
    };
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args);

    let config = ConnectionConfig::from_env_with_prefix(&args.env_prefix)?;
    info!(
        endpoint = %config.endpoint(),
        "Starting mssql-probe v{}",
        env!("CARGO_PKG_VERSION")
    );

    let params: NamedParams = args.params.into_iter().collect();
    let params = (!params.is_empty()).then_some(params);

    let manager = PoolManager::new();
    let query = args.query;
    let outcome = run_with_pool(&manager, &config, |pool| async move {
        pool.execute(&query, params.as_ref()).await
    })
    .await?;

    match outcome {
        LifecycleOutcome::Completed(Ok(rows)) => {
            println!("{}", serde_json::to_string_pretty(&rows.to_json_rows())?);
            Ok(())
        }
        LifecycleOutcome::Completed(Err(e)) => {
            error!(error = %e, "query failed");
            Err(e.into())
        }
        LifecycleOutcome::Interrupted => Ok(()),
    }
}
