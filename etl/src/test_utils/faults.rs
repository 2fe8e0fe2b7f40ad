use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::index::{BulkFailure, BulkResult, SearchIndex};
use crate::sink::AnalyticsStore;
use crate::types::{AnalyticsEvent, EventKind, IndexDocument};

#[derive(Debug, Default)]
struct IndexFaults {
    unavailable_indices: HashSet<String>,
    rejected_documents: HashSet<Uuid>,
}

/// Wraps a [`SearchIndex`] and fails selected writes.
#[derive(Debug, Clone)]
pub struct FaultyIndex<I> {
    inner: I,
    faults: Arc<Mutex<IndexFaults>>,
}

impl<I> FaultyIndex<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(IndexFaults::default())),
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Fails every bulk request to `index` with a write error.
    pub async fn fail_writes_to(&self, index: &str) {
        self.faults
            .lock()
            .await
            .unavailable_indices
            .insert(index.to_string());
    }

    /// Reports `id` as rejected in bulk responses while storing the other documents.
    pub async fn reject_document(&self, id: Uuid) {
        self.faults.lock().await.rejected_documents.insert(id);
    }

    pub async fn clear_faults(&self) {
        let mut faults = self.faults.lock().await;
        faults.unavailable_indices.clear();
        faults.rejected_documents.clear();
    }
}

impl<I> SearchIndex for FaultyIndex<I>
where
    I: SearchIndex + Sync,
{
    async fn ensure_index(&self, index: &str, definition: &serde_json::Value) -> EtlResult<()> {
        self.inner.ensure_index(index, definition).await
    }

    async fn upsert_all<T>(&self, index: &str, documents: &[T]) -> EtlResult<BulkResult>
    where
        T: IndexDocument,
    {
        let (unavailable, rejected) = {
            let faults = self.faults.lock().await;
            (
                faults.unavailable_indices.contains(index),
                faults.rejected_documents.clone(),
            )
        };

        if unavailable {
            return Err(etl_error!(
                ErrorKind::IndexWriteFailed,
                "Search index is unavailable",
                detail = index.to_string()
            ));
        }

        let (refused, accepted): (Vec<&T>, Vec<&T>) = documents
            .iter()
            .partition(|document| rejected.contains(&document.document_id()));

        let mut result = self.inner.upsert_all(index, &accepted).await?;
        result
            .failures
            .extend(refused.into_iter().map(|document| BulkFailure {
                document_id: document.document_id().to_string(),
                status: 400,
                reason: "document rejected".to_string(),
            }));

        Ok(result)
    }
}

#[derive(Debug, Default)]
struct StoreFaults {
    failing_inserts: usize,
    attempts: usize,
}

/// Wraps an [`AnalyticsStore`] and fails a number of upcoming inserts.
#[derive(Debug, Clone)]
pub struct FaultyAnalyticsStore<S> {
    inner: S,
    faults: Arc<Mutex<StoreFaults>>,
}

impl<S> FaultyAnalyticsStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(StoreFaults::default())),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fails the next `count` inserts with a connection error.
    pub async fn fail_next_inserts(&self, count: usize) {
        self.faults.lock().await.failing_inserts = count;
    }

    /// Number of inserts attempted, failed ones included.
    pub async fn insert_attempts(&self) -> usize {
        self.faults.lock().await.attempts
    }
}

impl<S> AnalyticsStore for FaultyAnalyticsStore<S>
where
    S: AnalyticsStore + Sync,
{
    async fn prepare(&self) -> EtlResult<()> {
        self.inner.prepare().await
    }

    async fn insert(&self, kind: EventKind, events: &[AnalyticsEvent]) -> EtlResult<()> {
        {
            let mut faults = self.faults.lock().await;
            faults.attempts += 1;

            if faults.failing_inserts > 0 {
                faults.failing_inserts -= 1;
                return Err(etl_error!(
                    ErrorKind::AnalyticsConnectionFailed,
                    "Analytics store is unavailable",
                    detail = kind.table_name().to_string()
                ));
            }
        }

        self.inner.insert(kind, events).await
    }
}
