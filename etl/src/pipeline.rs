use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use etl_config::shared::{IndexNames, SearchSyncConfig};
use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::index::SearchIndex;
use crate::index::schema::IndexSchemas;
use crate::metrics::{
    ERROR_KIND_LABEL, ETL_SYNC_CURSOR_TIMESTAMP_SECONDS, ETL_SYNC_DOCUMENTS_INDEXED_TOTAL,
    ETL_SYNC_ROWS_EXTRACTED_TOTAL, ETL_SYNC_TICK_DURATION_SECONDS, ETL_SYNC_TICK_FAILURES_TOTAL,
    INDEX_LABEL, STREAM_LABEL,
};
use crate::source::CatalogSource;
use crate::store::cursor::CursorStore;
use crate::sync::denormalize::load_film_documents;
use crate::sync::extract::extract_changes;
use crate::types::{Cursor, IndexDocument, IndexKind, SyncStream};

/// Knobs of the search sync.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval: Duration,
    /// Maximum changed rows read per stream and tick, also the size of a bulk request.
    pub row_limit: usize,
    /// Starting point of streams without a stored cursor.
    pub fallback_time: DateTime<Utc>,
    pub indices: IndexNames,
}

impl SyncSettings {
    pub fn from_config(config: &SearchSyncConfig) -> EtlResult<Self> {
        let fallback_time = config.fallback_time().map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid search sync configuration",
                err,
                source: err
            )
        })?;

        Ok(Self {
            interval: config.interval(),
            row_limit: config.row_limit,
            fallback_time,
            indices: config.indices.clone(),
        })
    }
}

/// Result of a successful stream tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Nothing changed, the cursor stayed where it was.
    Idle,
    /// Changes were written and the cursor advanced.
    Synced {
        changed_rows: usize,
        documents: usize,
        cursor: Cursor,
    },
}

/// Results of one tick, per stream.
pub type TickReport = BTreeMap<SyncStream, EtlResult<StreamOutcome>>;

/// Drives every sync stream from the catalog into the search indices.
#[derive(Debug, Clone)]
pub struct SearchSync<C, I, S> {
    settings: SyncSettings,
    schemas: IndexSchemas,
    catalog: C,
    index: I,
    cursor_store: S,
}

impl<C, I, S> SearchSync<C, I, S>
where
    C: CatalogSource + Sync,
    I: SearchIndex + Sync,
    S: CursorStore + Sync,
{
    pub fn new(
        settings: SyncSettings,
        schemas: IndexSchemas,
        catalog: C,
        index: I,
        cursor_store: S,
    ) -> Self {
        Self {
            settings,
            schemas,
            catalog,
            index,
            cursor_store,
        }
    }

    /// Loads stored cursors and creates missing indices.
    pub async fn prepare(&self) -> EtlResult<()> {
        let loaded = self.cursor_store.load_cursors().await?;
        info!(cursors = loaded, "loaded sync cursors");

        for kind in IndexKind::ALL {
            let name = kind.index_name(&self.settings.indices);
            self.index
                .ensure_index(name, &self.schemas.definition(kind))
                .await?;
        }

        Ok(())
    }

    /// Runs every stream once. A failing stream does not stop the others.
    pub async fn run_tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::new();

        for stream in SyncStream::ALL {
            let stream_started = Instant::now();
            let result = self.sync_stream(stream).await;

            histogram!(ETL_SYNC_TICK_DURATION_SECONDS, STREAM_LABEL => stream.to_string())
                .record(stream_started.elapsed().as_secs_f64());

            if let Err(err) = &result {
                counter!(
                    ETL_SYNC_TICK_FAILURES_TOTAL,
                    STREAM_LABEL => stream.to_string(),
                    ERROR_KIND_LABEL => format!("{:?}", err.kind()),
                )
                .increment(1);
                error!(%stream, error = %err, "sync stream failed, cursor left in place");
            }

            report.insert(stream, result);
        }

        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "sync tick finished");

        report
    }

    /// Extracts, denormalizes and writes the pending changes of `stream`, then advances its cursor.
    pub async fn sync_stream(&self, stream: SyncStream) -> EtlResult<StreamOutcome> {
        let cursor = self
            .cursor_store
            .get_cursor(stream)
            .await?
            .unwrap_or_else(|| Cursor::initial(stream, self.settings.fallback_time));

        let batch = extract_changes(&self.catalog, &cursor, self.settings.row_limit).await?;
        let Some(next_cursor) = batch.next_cursor().cloned() else {
            return Ok(StreamOutcome::Idle);
        };

        counter!(ETL_SYNC_ROWS_EXTRACTED_TOTAL, STREAM_LABEL => stream.to_string())
            .increment(batch.changed.len() as u64);

        let root_ids: Vec<Uuid> = batch.root_ids.iter().copied().collect();
        let mut documents = 0;
        for chunk in root_ids.chunks(self.settings.row_limit.max(1)) {
            documents += self.write_chunk(stream.index, chunk).await?;
        }

        self.cursor_store.store_cursor(next_cursor.clone()).await?;

        gauge!(ETL_SYNC_CURSOR_TIMESTAMP_SECONDS, STREAM_LABEL => stream.to_string())
            .set(next_cursor.last_modified.timestamp() as f64);
        info!(
            %stream,
            changed_rows = batch.changed.len(),
            documents,
            cursor = %next_cursor.last_modified,
            "synced stream"
        );

        Ok(StreamOutcome::Synced {
            changed_rows: batch.changed.len(),
            documents,
            cursor: next_cursor,
        })
    }

    async fn write_chunk(&self, index: IndexKind, root_ids: &[Uuid]) -> EtlResult<usize> {
        match index {
            IndexKind::Movies => {
                let documents = load_film_documents(&self.catalog, root_ids).await?;
                self.write_documents(index, &documents).await
            }
            IndexKind::Genres => {
                let documents = self.catalog.genres(root_ids).await?;
                self.write_documents(index, &documents).await
            }
            IndexKind::Persons => {
                let documents = self.catalog.persons(root_ids).await?;
                self.write_documents(index, &documents).await
            }
        }
    }

    async fn write_documents<T>(&self, index: IndexKind, documents: &[T]) -> EtlResult<usize>
    where
        T: IndexDocument,
    {
        if documents.is_empty() {
            return Ok(0);
        }

        let name = index.index_name(&self.settings.indices);
        let indexed = self
            .index
            .upsert_all(name, documents)
            .await?
            .into_result(name)?;

        counter!(ETL_SYNC_DOCUMENTS_INDEXED_TOTAL, INDEX_LABEL => name.to_string())
            .increment(indexed as u64);

        Ok(indexed)
    }

    /// Runs a tick every interval until shutdown. A tick in progress is finished first.
    pub async fn run(self, mut shutdown_rx: ShutdownRx) -> EtlResult<()> {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.settings.interval.as_secs(),
            row_limit = self.settings.row_limit,
            "search sync started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("shutting down search sync");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.run_tick().await;
                }
            }
        }
    }
}

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started { handle: JoinHandle<EtlResult<()>> },
}

/// Owns the background task running a [`SearchSync`].
#[derive(Debug)]
pub struct SearchSyncPipeline<C, I, S> {
    sync: SearchSync<C, I, S>,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl<C, I, S> SearchSyncPipeline<C, I, S>
where
    C: CatalogSource + Clone + Send + Sync + 'static,
    I: SearchIndex + Clone + Send + Sync + 'static,
    S: CursorStore + Clone + Send + Sync + 'static,
{
    pub fn new(sync: SearchSync<C, I, S>) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            sync,
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Prepares cursors and indices, then spawns the tick loop.
    pub async fn start(&mut self) -> EtlResult<()> {
        info!("starting search sync pipeline");

        self.sync.prepare().await?;

        let sync = self.sync.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(sync.run(shutdown_rx));

        self.state = PipelineState::Started { handle };

        Ok(())
    }

    pub async fn wait(self) -> EtlResult<()> {
        let PipelineState::Started { handle } = self.state else {
            info!("search sync was not started, nothing to wait for");
            return Ok(());
        };

        match handle.await {
            Ok(result) => result,
            Err(err) => Err(EtlError::from((
                ErrorKind::InvalidState,
                "Search sync task panicked",
                err.to_string(),
            ))),
        }
    }

    pub fn shutdown(&self) {
        info!("shutting down search sync pipeline");
        self.shutdown_tx.shutdown();
    }

    pub async fn shutdown_and_wait(self) -> EtlResult<()> {
        self.shutdown();
        self.wait().await
    }
}
