use std::time::Duration;

use etl_config::shared::{EventSinkConfig, RetryConfig};
use metrics::{counter, gauge, histogram};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::concurrency::retry::Backoff;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{EtlError, EtlResult};
use crate::metrics::{
    ERROR_KIND_LABEL, ETL_SINK_BUFFERED_EVENTS, ETL_SINK_EVENTS_DROPPED_TOTAL,
    ETL_SINK_EVENTS_FLUSHED_TOTAL, ETL_SINK_FLUSH_DURATION_SECONDS, ETL_SINK_FLUSH_FAILURES_TOTAL,
    EVENT_KIND_LABEL, REASON_LABEL,
};
use crate::sink::{
    AnalyticsStore, EventBatch, EventBuffers, EventSource, OffsetTracker, SourceMessage,
};
use crate::types::{AnalyticsEvent, EventKind};

/// How often buffers are checked for expiry when time based flushing is off.
const IDLE_CHECK_PERIOD: Duration = Duration::from_secs(1);

/// Smallest period of the expiry check.
const MIN_CHECK_PERIOD: Duration = Duration::from_millis(10);

/// Knobs of the event sink.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// A kind's buffer is flushed before it would grow past this many events, and no insert
    /// carries more.
    pub max_batch_size: usize,
    /// A kind's buffer is flushed once its oldest event waited this long.
    pub max_fill: Option<Duration>,
    /// Reading stops while this many events are buffered.
    pub max_buffered_events: usize,
    pub retry: RetryConfig,
}

impl SinkSettings {
    pub fn from_config(config: &EventSinkConfig, retry: &RetryConfig) -> Self {
        Self {
            max_batch_size: config.batch.max_size,
            max_fill: config.batch.max_fill(),
            max_buffered_events: config.max_buffered_events,
            retry: retry.clone(),
        }
    }

    fn check_period(&self) -> Duration {
        match self.max_fill {
            Some(max_fill) => (max_fill / 2).max(MIN_CHECK_PERIOD),
            None => IDLE_CHECK_PERIOD,
        }
    }
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DropReason {
    UnknownKind,
    MissingPayload,
    Malformed,
}

impl DropReason {
    fn as_str(&self) -> &'static str {
        match self {
            DropReason::UnknownKind => "unknown_kind",
            DropReason::MissingPayload => "missing_payload",
            DropReason::Malformed => "malformed",
        }
    }
}

/// What woke the consumer loop.
enum Step {
    Shutdown,
    Check,
    Received(EtlResult<Option<SourceMessage>>),
}

/// Consumes tracking messages, buffers them per kind and stores them in batches.
///
/// Offsets are committed only after the events before them are stored, so delivery is at
/// least once: a crash between storing and committing stores a batch again on restart.
#[derive(Debug)]
pub struct EventSink<Src, St> {
    settings: SinkSettings,
    source: Src,
    store: St,
    buffers: EventBuffers,
    offsets: OffsetTracker,
    flush_backoff: Backoff,
    /// Size and time triggered flushes wait until then after a failed flush.
    next_flush_at: Option<Instant>,
}

impl<Src, St> EventSink<Src, St>
where
    Src: EventSource + Sync,
    St: AnalyticsStore + Sync,
{
    pub fn new(settings: SinkSettings, source: Src, store: St) -> Self {
        let flush_backoff = Backoff::new(settings.retry.clone());

        Self {
            settings,
            source,
            store,
            buffers: EventBuffers::new(),
            offsets: OffsetTracker::new(),
            flush_backoff,
            next_flush_at: None,
        }
    }

    /// Number of events waiting for a flush.
    pub fn buffered(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffered_for(&self, kind: EventKind) -> usize {
        self.buffers.kind_len(kind)
    }

    /// Runs until shutdown or until the source is exhausted, then flushes what is buffered.
    pub async fn run(mut self, mut shutdown_rx: ShutdownRx) -> EtlResult<()> {
        info!(
            max_batch_size = self.settings.max_batch_size,
            max_fill_ms = self.settings.max_fill.map(|max_fill| max_fill.as_millis() as u64),
            max_buffered_events = self.settings.max_buffered_events,
            "event sink started"
        );

        let mut check = tokio::time::interval(self.settings.check_period());
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut source_backoff = Backoff::new(self.settings.retry.clone());

        loop {
            if self.buffers.len() >= self.settings.max_buffered_events
                && !self.relieve_pressure(&mut shutdown_rx).await
            {
                return self.finish().await;
            }

            let step = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => Step::Shutdown,
                _ = check.tick() => Step::Check,
                message = self.source.recv() => Step::Received(message),
            };

            match step {
                Step::Shutdown => {
                    info!("shutting down event sink");
                    return self.finish().await;
                }
                Step::Check => self.flush_expired().await,
                Step::Received(Ok(Some(message))) => {
                    source_backoff.reset();
                    self.handle_message(message).await;
                }
                Step::Received(Ok(None)) => {
                    info!("event source exhausted");
                    return self.finish().await;
                }
                Step::Received(Err(err)) => {
                    source_backoff.record_failure();
                    if !err.is_transient() || source_backoff.is_exhausted() {
                        error!(error = %err, "event source failed, stopping event sink");
                        if let Err(flush_err) = self.finish().await {
                            return Err(vec![err, flush_err].into());
                        }
                        return Err(err);
                    }

                    let delay = source_backoff.delay();
                    warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "event source failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Buffers one message, flushing its kind first when the buffer is full.
    ///
    /// After a failed flush the buffer keeps growing until the flush backoff elapses. Messages
    /// that cannot be decoded are dropped and their offsets count as processed.
    pub async fn handle_message(&mut self, message: SourceMessage) {
        let Some(kind) = EventKind::resolve(&message.topic, message.key_str()) else {
            self.drop_message(&message, DropReason::UnknownKind, None);
            return;
        };

        let Some(payload) = message.payload.as_deref() else {
            self.drop_message(&message, DropReason::MissingPayload, None);
            return;
        };

        let event = match AnalyticsEvent::decode(kind, payload) {
            Ok(event) => event,
            Err(err) => {
                self.drop_message(&message, DropReason::Malformed, Some(&err));
                return;
            }
        };

        if self.buffers.kind_len(kind) >= self.settings.max_batch_size
            && self.flush_due(Instant::now())
        {
            if let Err(err) = self.flush_kind(kind).await {
                error!(%kind, error = %err, "flush failed, events stay buffered");
            }
        }

        self.offsets
            .track_pending(&message.topic, message.partition, message.offset);
        self.buffers.push(
            event,
            (message.topic, message.partition, message.offset),
            Instant::now(),
        );
        gauge!(ETL_SINK_BUFFERED_EVENTS).set(self.buffers.len() as f64);
    }

    /// Stores everything buffered for `kind` in batches of at most `max_batch_size` events,
    /// then commits the offsets that became safe.
    ///
    /// On failure the events that were not stored go back to the buffer and the flush backoff
    /// advances.
    pub async fn flush_kind(&mut self, kind: EventKind) -> EtlResult<()> {
        let mut stored = false;
        let mut result = Ok(());

        while let Some(batch) = self.buffers.take(kind, self.settings.max_batch_size) {
            if let Err(err) = self.store_batch(batch).await {
                result = Err(err);
                break;
            }
            stored = true;
        }

        match result {
            Ok(()) => {
                self.flush_backoff.reset();
                self.next_flush_at = None;
            }
            Err(_) => {
                self.flush_backoff.record_failure();
                let delay = self.flush_backoff.delay();
                self.next_flush_at = Some(Instant::now() + delay);
                debug!(%kind, delay_ms = delay.as_millis() as u64, "delaying the next flush");
            }
        }

        if stored {
            if let Err(err) = self.commit().await {
                warn!(error = %err, "offset commit failed, it is retried after the next flush");
            }
        }

        result
    }

    async fn store_batch(&mut self, batch: EventBatch) -> EtlResult<()> {
        let kind = batch.kind;
        let started = Instant::now();
        if let Err(err) = self.store.insert(kind, &batch.events).await {
            counter!(
                ETL_SINK_FLUSH_FAILURES_TOTAL,
                EVENT_KIND_LABEL => kind.table_name(),
                ERROR_KIND_LABEL => format!("{:?}", err.kind()),
            )
            .increment(1);
            self.buffers.restore(batch);
            return Err(err);
        }

        histogram!(ETL_SINK_FLUSH_DURATION_SECONDS, EVENT_KIND_LABEL => kind.table_name())
            .record(started.elapsed().as_secs_f64());
        counter!(ETL_SINK_EVENTS_FLUSHED_TOTAL, EVENT_KIND_LABEL => kind.table_name())
            .increment(batch.events.len() as u64);
        gauge!(ETL_SINK_BUFFERED_EVENTS).set(self.buffers.len() as f64);
        info!(%kind, count = batch.events.len(), "flushed events");

        self.offsets.complete(&batch.offsets);

        Ok(())
    }

    fn flush_due(&self, now: Instant) -> bool {
        self.next_flush_at.is_none_or(|next_flush_at| now >= next_flush_at)
    }

    /// Commits the positions that moved since the last commit.
    async fn commit(&mut self) -> EtlResult<()> {
        let positions = self.offsets.commit_positions();
        if positions.is_empty() {
            return Ok(());
        }

        self.source.commit(&positions).await?;
        self.offsets.mark_committed(&positions);
        debug!(partitions = positions.len(), "committed offsets");

        Ok(())
    }

    async fn flush_expired(&mut self) {
        let now = Instant::now();
        if let Some(max_fill) = self.settings.max_fill {
            if self.flush_due(now) {
                for kind in self.buffers.expired(max_fill, now) {
                    if let Err(err) = self.flush_kind(kind).await {
                        error!(
                            %kind,
                            error = %err,
                            "time based flush failed, events stay buffered"
                        );
                    }
                }
            }
        }

        // Dropped messages may have moved a partition without any flush.
        if let Err(err) = self.commit().await {
            warn!(error = %err, "offset commit failed");
        }
    }

    /// Flushes every kind. Returns the errors of the kinds that could not be stored.
    async fn flush_all(&mut self) -> Vec<EtlError> {
        let mut errors = Vec::new();

        for kind in self.buffers.kinds() {
            if let Err(err) = self.flush_kind(kind).await {
                error!(%kind, error = %err, "flush failed");
                errors.push(err);
            }
        }

        errors
    }

    /// Flushes with backoff until the buffers drop under their bound.
    ///
    /// Returns `false` when shutdown was requested meanwhile.
    async fn relieve_pressure(&mut self, shutdown_rx: &mut ShutdownRx) -> bool {
        let mut backoff = Backoff::new(self.settings.retry.clone());

        warn!(
            buffered = self.buffers.len(),
            max_buffered_events = self.settings.max_buffered_events,
            "event buffers are full, pausing consumption"
        );

        loop {
            let errors = self.flush_all().await;
            if errors.is_empty() || self.buffers.len() < self.settings.max_buffered_events {
                return true;
            }

            backoff.record_failure();
            let delay = backoff.delay();
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Final flush and commit before the loop exits.
    async fn finish(&mut self) -> EtlResult<()> {
        let mut errors = self.flush_all().await;
        if let Err(err) = self.commit().await {
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!("event sink stopped with every buffered event stored");

        Ok(())
    }

    fn drop_message(
        &mut self,
        message: &SourceMessage,
        reason: DropReason,
        err: Option<&EtlError>,
    ) {
        warn!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = message.key_str(),
            reason = reason.as_str(),
            error = err.map(tracing::field::display),
            "dropping tracking message"
        );
        counter!(ETL_SINK_EVENTS_DROPPED_TOTAL, REASON_LABEL => reason.as_str()).increment(1);

        self.offsets
            .track_processed(&message.topic, message.partition, message.offset);
    }
}
