//! Catalog sync service binary.
//!
//! Runs the Postgres to Elasticsearch search sync and the Kafka to ClickHouse event sink,
//! each enabled by its configuration section, until SIGINT or SIGTERM.

use etl_config::shared::ReplicatorConfig;
use etl_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_replicator_config;
use crate::core::start_replicator_with_config;
use crate::error::{ReplicatorError, ReplicatorResult};
use crate::metrics::init_metrics;

mod config;
mod core;
mod error;
mod metrics;

fn main() {
    if let Err(err) = run() {
        eprint!("{}", err.render_report());
        std::process::exit(1);
    }
}

/// Loads configuration, installs tracing and starts the async runtime.
fn run() -> ReplicatorResult<()> {
    let replicator_config = load_replicator_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(replicator_config))
}

async fn async_main(replicator_config: ReplicatorConfig) -> ReplicatorResult<()> {
    // The exporter spawns its listener on the current runtime.
    init_metrics(env!("CARGO_BIN_NAME"))?;

    if let Err(err) = start_replicator_with_config(replicator_config).await {
        error!("{err}");
        return Err(err);
    }

    Ok(())
}
