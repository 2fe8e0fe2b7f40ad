use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::EtlResult;
use crate::index::{BulkResult, SearchIndex};
use crate::types::IndexDocument;

#[derive(Debug, Default)]
struct Inner {
    definitions: HashMap<String, serde_json::Value>,
    documents: HashMap<String, BTreeMap<Uuid, serde_json::Value>>,
    bulk_requests: usize,
}

/// In-memory search index for tests and local runs.
///
/// Documents are stored as the json they would be sent as, keyed by index and id, so writing a
/// document twice leaves a single copy.
#[derive(Debug, Clone, Default)]
pub struct MemoryIndex {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the indices created through [`SearchIndex::ensure_index`].
    pub async fn indices(&self) -> Vec<String> {
        let inner = self.inner.lock().await;

        let mut indices: Vec<String> = inner.definitions.keys().cloned().collect();
        indices.sort();

        indices
    }

    /// Documents of `index` ordered by id.
    pub async fn documents(&self, index: &str) -> BTreeMap<Uuid, serde_json::Value> {
        let inner = self.inner.lock().await;

        inner.documents.get(index).cloned().unwrap_or_default()
    }

    pub async fn document(&self, index: &str, id: Uuid) -> Option<serde_json::Value> {
        let inner = self.inner.lock().await;

        inner
            .documents
            .get(index)
            .and_then(|documents| documents.get(&id))
            .cloned()
    }

    /// Number of non-empty bulk requests received.
    pub async fn bulk_requests(&self) -> usize {
        self.inner.lock().await.bulk_requests
    }
}

impl SearchIndex for MemoryIndex {
    async fn ensure_index(&self, index: &str, definition: &serde_json::Value) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        if !inner.definitions.contains_key(index) {
            info!(index, "creating in-memory index");
            inner
                .definitions
                .insert(index.to_string(), definition.clone());
        }

        Ok(())
    }

    async fn upsert_all<T>(&self, index: &str, documents: &[T]) -> EtlResult<BulkResult>
    where
        T: IndexDocument,
    {
        if documents.is_empty() {
            return Ok(BulkResult::default());
        }

        let mut values = Vec::with_capacity(documents.len());
        for document in documents {
            values.push((document.document_id(), serde_json::to_value(document)?));
        }

        let mut inner = self.inner.lock().await;
        inner.bulk_requests += 1;

        let stored = inner.documents.entry(index.to_string()).or_default();
        for (id, value) in values {
            stored.insert(id, value);
        }

        Ok(BulkResult {
            indexed: documents.len(),
            failures: Vec::new(),
        })
    }
}
