use std::future::Future;

use crate::error::EtlResult;
use crate::types::{AnalyticsEvent, EventKind};

/// A message read from the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl SourceMessage {
    /// The key as text, `None` when missing or not utf-8.
    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|key| std::str::from_utf8(key).ok())
    }
}

/// Next offset to read in a topic partition. Everything before it is processed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CommitPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A partitioned log of tracking messages with committable read positions.
pub trait EventSource {
    /// Waits for the next message. `Ok(None)` means the source is exhausted.
    fn recv(&self) -> impl Future<Output = EtlResult<Option<SourceMessage>>> + Send;

    /// Records `positions` as processed, so a restart resumes from them.
    fn commit(&self, positions: &[CommitPosition]) -> impl Future<Output = EtlResult<()>> + Send;
}

/// Column store receiving events, one table per [`EventKind`].
pub trait AnalyticsStore {
    /// Creates the database and tables that do not exist yet.
    fn prepare(&self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Inserts `events`, all of `kind`, in one request.
    fn insert(
        &self,
        kind: EventKind,
        events: &[AnalyticsEvent],
    ) -> impl Future<Output = EtlResult<()>> + Send;
}
