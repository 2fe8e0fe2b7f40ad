//! Metric names and labels emitted by the search sync and the event sink.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

/// Label for the sync stream, formatted as `index/entity`.
pub const STREAM_LABEL: &str = "stream";

/// Label for the target search index.
pub const INDEX_LABEL: &str = "index";

/// Label for the analytics event kind.
pub const EVENT_KIND_LABEL: &str = "event_kind";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for why events were dropped.
pub const REASON_LABEL: &str = "reason";

// Search sync metrics

/// Counter of documents written to a search index.
pub const ETL_SYNC_DOCUMENTS_INDEXED_TOTAL: &str = "etl_sync_documents_indexed_total";

/// Counter of changed catalog rows picked up by extraction.
pub const ETL_SYNC_ROWS_EXTRACTED_TOTAL: &str = "etl_sync_rows_extracted_total";

/// Counter of stream ticks that failed and left the cursor in place.
pub const ETL_SYNC_TICK_FAILURES_TOTAL: &str = "etl_sync_tick_failures_total";

/// Histogram of the time taken by one stream tick.
pub const ETL_SYNC_TICK_DURATION_SECONDS: &str = "etl_sync_tick_duration_seconds";

/// Gauge of the cursor position of a stream, as a unix timestamp.
pub const ETL_SYNC_CURSOR_TIMESTAMP_SECONDS: &str = "etl_sync_cursor_timestamp_seconds";

// Event sink metrics

/// Counter of events inserted into the analytics store.
pub const ETL_SINK_EVENTS_FLUSHED_TOTAL: &str = "etl_sink_events_flushed_total";

/// Counter of messages dropped without being stored.
pub const ETL_SINK_EVENTS_DROPPED_TOTAL: &str = "etl_sink_events_dropped_total";

/// Counter of failed flushes.
pub const ETL_SINK_FLUSH_FAILURES_TOTAL: &str = "etl_sink_flush_failures_total";

/// Histogram of the time taken by one flush.
pub const ETL_SINK_FLUSH_DURATION_SECONDS: &str = "etl_sink_flush_duration_seconds";

/// Gauge of events waiting in memory for a flush.
pub const ETL_SINK_BUFFERED_EVENTS: &str = "etl_sink_buffered_events";

/// Registers descriptions of every metric. Safe to call multiple times.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            ETL_SYNC_DOCUMENTS_INDEXED_TOTAL,
            Unit::Count,
            "Documents written to a search index, labeled by index"
        );
        describe_counter!(
            ETL_SYNC_ROWS_EXTRACTED_TOTAL,
            Unit::Count,
            "Changed catalog rows picked up by extraction, labeled by stream"
        );
        describe_counter!(
            ETL_SYNC_TICK_FAILURES_TOTAL,
            Unit::Count,
            "Failed stream ticks, labeled by stream and error_kind"
        );
        describe_histogram!(
            ETL_SYNC_TICK_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of one stream tick, labeled by stream"
        );
        describe_gauge!(
            ETL_SYNC_CURSOR_TIMESTAMP_SECONDS,
            Unit::Seconds,
            "Modification time the cursor of a stream points at, labeled by stream"
        );

        describe_counter!(
            ETL_SINK_EVENTS_FLUSHED_TOTAL,
            Unit::Count,
            "Events inserted into the analytics store, labeled by event_kind"
        );
        describe_counter!(
            ETL_SINK_EVENTS_DROPPED_TOTAL,
            Unit::Count,
            "Tracking messages dropped without being stored, labeled by reason"
        );
        describe_counter!(
            ETL_SINK_FLUSH_FAILURES_TOTAL,
            Unit::Count,
            "Failed flushes, labeled by event_kind and error_kind"
        );
        describe_histogram!(
            ETL_SINK_FLUSH_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of one flush, labeled by event_kind"
        );
        describe_gauge!(
            ETL_SINK_BUFFERED_EVENTS,
            Unit::Count,
            "Events waiting in memory for a flush"
        );
    });
}
