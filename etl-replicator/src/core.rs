use std::future::Future;

use etl::concurrency::retry::retry_transient;
use etl::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use etl::error::{EtlError, EtlResult};
use etl::index::ElasticsearchIndex;
use etl::index::schema::IndexSchemas;
use etl::pipeline::{SearchSync, SearchSyncPipeline, SyncSettings};
use etl::sink::clickhouse::ClickHouseStore;
use etl::sink::kafka::KafkaEventSource;
use etl::sink::{AnalyticsStore, EventSink, SinkSettings};
use etl::source::PgCatalogSource;
use etl::store::cursor::ConfiguredCursorStore;
use etl_config::shared::{
    CursorStoreConfig, EventSinkConfig, PgConnectionConfig, ReplicatorConfig, RetryConfig,
    SearchSyncConfig,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use crate::error::ReplicatorResult;

/// Starts the configured services and runs them until shutdown.
///
/// The search sync and the event sink run side by side. When one of them fails the other
/// is shut down as well, so the process exits and gets restarted as a whole.
pub async fn start_replicator_with_config(config: ReplicatorConfig) -> ReplicatorResult<()> {
    info!("starting replicator service");

    log_config(&config);

    let (shutdown_tx, _) = create_shutdown_channel();
    let signal_handle = tokio::spawn(shutdown_on_signal(shutdown_tx.clone()));

    let search_sync = async {
        match config.search_sync.clone() {
            Some(search_sync) => {
                run_search_sync(search_sync, config.retry.clone(), shutdown_tx.clone()).await
            }
            None => {
                info!("search sync is not configured, skipping it");
                Ok(())
            }
        }
    };
    let event_sink = async {
        match config.event_sink.clone() {
            Some(event_sink) => {
                run_event_sink(event_sink, config.retry.clone(), shutdown_tx.clone()).await
            }
            None => {
                info!("event sink is not configured, skipping it");
                Ok(())
            }
        }
    };

    let (search_sync_result, event_sink_result) = tokio::join!(
        stop_all_on_error("search sync", search_sync, &shutdown_tx),
        stop_all_on_error("event sink", event_sink, &shutdown_tx),
    );

    signal_handle.abort();
    let _ = signal_handle.await;

    let errors: Vec<EtlError> = [search_sync_result, event_sink_result]
        .into_iter()
        .filter_map(Result::err)
        .collect();
    if !errors.is_empty() {
        return Err(EtlError::from(errors).into());
    }

    info!("replicator service completed");

    Ok(())
}

/// Awaits `service` and requests shutdown of the remaining services when it fails.
async fn stop_all_on_error<F>(
    name: &'static str,
    service: F,
    shutdown_tx: &ShutdownTx,
) -> EtlResult<()>
where
    F: Future<Output = EtlResult<()>>,
{
    let result = service.await;

    if let Err(err) = &result {
        error!(service = name, error = %err, "service failed, shutting down the others");
        shutdown_tx.shutdown();
    }

    result
}

/// Connects to the catalog and the search cluster, then runs the sync until shutdown.
#[tracing::instrument(skip_all)]
async fn run_search_sync(
    config: SearchSyncConfig,
    retry: RetryConfig,
    shutdown_tx: ShutdownTx,
) -> EtlResult<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();

    let settings = SyncSettings::from_config(&config)?;
    let schemas = IndexSchemas::load(config.schema_path.as_deref()).await?;

    let catalog = PgCatalogSource::new(&config.source);
    retry_transient(&retry, "catalog connection", || catalog.ping()).await?;

    let index = ElasticsearchIndex::new(&config.elasticsearch)?;
    retry_transient(&retry, "elasticsearch connection", || index.ping()).await?;

    let cursor_store = ConfiguredCursorStore::from_config(&config.cursor_store);

    let sync = SearchSync::new(settings, schemas, catalog, index, cursor_store);
    let mut pipeline = SearchSyncPipeline::new(sync);
    pipeline.start().await?;

    let pipeline_shutdown_tx = pipeline.shutdown_tx();
    let forward_handle = tokio::spawn(async move {
        if shutdown_rx.changed().await.is_ok() {
            pipeline_shutdown_tx.shutdown();
        }
    });

    let result = pipeline.wait().await;

    forward_handle.abort();
    let _ = forward_handle.await;

    result
}

/// Connects to the broker and the analytics store, then consumes events until shutdown.
#[tracing::instrument(skip_all)]
async fn run_event_sink(
    config: EventSinkConfig,
    retry: RetryConfig,
    shutdown_tx: ShutdownTx,
) -> EtlResult<()> {
    let shutdown_rx = shutdown_tx.subscribe();

    let source = KafkaEventSource::new(&config.kafka)?;
    retry_transient(&retry, "kafka connection", || source.ping()).await?;

    let store = ClickHouseStore::new(&config.clickhouse);
    retry_transient(&retry, "clickhouse connection", || store.ping()).await?;
    retry_transient(&retry, "clickhouse tables", || store.prepare()).await?;

    let sink = EventSink::new(SinkSettings::from_config(&config, &retry), source, store);

    sink.run(shutdown_rx).await
}

/// Waits for SIGINT or SIGTERM and signals every service to stop.
async fn shutdown_on_signal(shutdown_tx: ShutdownTx) {
    // SIGTERM is what Kubernetes sends before SIGKILL during pod termination.
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("sigint (ctrl+c) received, shutting down");
                }
                _ = sigterm.recv() => {
                    info!("sigterm received, shutting down");
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to register the sigterm handler, only ctrl+c is handled");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl+c");
                return;
            }
            info!("sigint (ctrl+c) received, shutting down");
        }
    }

    shutdown_tx.shutdown();
}

fn log_config(config: &ReplicatorConfig) {
    if let Some(search_sync) = &config.search_sync {
        log_search_sync_config(search_sync);
    }
    if let Some(event_sink) = &config.event_sink {
        log_event_sink_config(event_sink);
    }

    debug!(
        initial_retry_delay_ms = config.retry.initial_retry_delay_ms,
        max_retry_delay_ms = config.retry.max_retry_delay_ms,
        backoff_multiplier = config.retry.backoff_multiplier,
        max_attempts = config.retry.max_attempts,
        "retry config"
    );
}

fn log_search_sync_config(config: &SearchSyncConfig) {
    debug!(
        interval_secs = config.interval_secs,
        row_limit = config.row_limit,
        fallback_modified_time = config.fallback_modified_time,
        movies_index = config.indices.movies,
        genres_index = config.indices.genres,
        persons_index = config.indices.persons,
        schema_path = ?config.schema_path,
        "search sync config"
    );
    log_pg_connection_config(&config.source);
    debug!(
        url = config.elasticsearch.url,
        username = config.elasticsearch.username,
        request_timeout_ms = config.elasticsearch.request_timeout_ms,
        "elasticsearch config"
    );
    match &config.cursor_store {
        CursorStoreConfig::Memory => debug!("using memory cursor store"),
        CursorStoreConfig::File { path } => {
            debug!(path = %path.display(), "using file cursor store")
        }
    }
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        max_connections = config.max_connections,
        "catalog postgres connection config",
    );
}

fn log_event_sink_config(config: &EventSinkConfig) {
    debug!(
        bootstrap_servers = config.kafka.bootstrap_servers,
        group_id = config.kafka.group_id,
        auto_offset_reset = config.kafka.auto_offset_reset,
        session_timeout_ms = config.kafka.session_timeout_ms,
        "kafka config"
    );
    debug!(
        url = config.clickhouse.url,
        user = config.clickhouse.user,
        database = config.clickhouse.database,
        "clickhouse config"
    );
    debug!(
        max_size = config.batch.max_size,
        max_fill_ms = config.batch.max_fill_ms,
        max_buffered_events = config.max_buffered_events,
        "batch config"
    );
}
