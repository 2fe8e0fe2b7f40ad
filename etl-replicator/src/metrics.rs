use etl::metrics::register_metrics;

use crate::error::{ReplicatorError, ReplicatorResult};

/// Installs the Prometheus exporter and describes the service metrics.
pub fn init_metrics(service_name: &str) -> ReplicatorResult<()> {
    etl_telemetry::metrics::init_metrics(service_name).map_err(ReplicatorError::config)?;
    register_metrics();

    Ok(())
}
