use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::EtlResult;
use crate::sink::AnalyticsStore;
use crate::types::{AnalyticsEvent, EventKind};

#[derive(Debug, Default)]
struct Inner {
    prepared: bool,
    batches: Vec<(EventKind, Vec<AnalyticsEvent>)>,
}

/// Analytics store keeping inserted batches in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAnalyticsStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_prepared(&self) -> bool {
        self.inner.lock().await.prepared
    }

    /// Every insert in arrival order.
    pub async fn batches(&self) -> Vec<(EventKind, Vec<AnalyticsEvent>)> {
        self.inner.lock().await.batches.clone()
    }

    /// Events stored for `kind`, in insertion order.
    pub async fn events(&self, kind: EventKind) -> Vec<AnalyticsEvent> {
        let inner = self.inner.lock().await;

        inner
            .batches
            .iter()
            .filter(|(batch_kind, _)| *batch_kind == kind)
            .flat_map(|(_, events)| events.iter().cloned())
            .collect()
    }

    /// Number of events stored per kind.
    pub async fn counts(&self) -> BTreeMap<EventKind, usize> {
        let inner = self.inner.lock().await;

        let mut counts = BTreeMap::new();
        for (kind, events) in &inner.batches {
            *counts.entry(*kind).or_insert(0) += events.len();
        }

        counts
    }
}

impl AnalyticsStore for MemoryAnalyticsStore {
    async fn prepare(&self) -> EtlResult<()> {
        self.inner.lock().await.prepared = true;

        Ok(())
    }

    async fn insert(&self, kind: EventKind, events: &[AnalyticsEvent]) -> EtlResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        self.inner
            .lock()
            .await
            .batches
            .push((kind, events.to_vec()));

        Ok(())
    }
}
