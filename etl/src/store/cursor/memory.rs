use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::EtlResult;
use crate::store::cursor::CursorStore;
use crate::types::{Cursor, SyncStream};

#[derive(Debug, Default)]
struct Inner {
    cursors: BTreeMap<SyncStream, Cursor>,
    /// Every stored value per stream, oldest first.
    history: HashMap<SyncStream, Vec<Cursor>>,
}

/// Cursor store keeping everything in memory. Progress is lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all values ever stored for `stream`.
    pub async fn cursor_history(&self, stream: SyncStream) -> Vec<Cursor> {
        let inner = self.inner.lock().await;

        inner.history.get(&stream).cloned().unwrap_or_default()
    }
}

impl CursorStore for MemoryCursorStore {
    async fn load_cursors(&self) -> EtlResult<usize> {
        let inner = self.inner.lock().await;

        Ok(inner.cursors.len())
    }

    async fn get_cursor(&self, stream: SyncStream) -> EtlResult<Option<Cursor>> {
        let inner = self.inner.lock().await;

        Ok(inner.cursors.get(&stream).cloned())
    }

    async fn store_cursor(&self, cursor: Cursor) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .history
            .entry(cursor.stream)
            .or_default()
            .push(cursor.clone());
        inner.cursors.insert(cursor.stream, cursor);

        Ok(())
    }
}
