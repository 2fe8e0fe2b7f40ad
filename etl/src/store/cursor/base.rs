use std::future::Future;

use etl_config::shared::CursorStoreConfig;

use crate::error::EtlResult;
use crate::store::cursor::{FileCursorStore, MemoryCursorStore};
use crate::types::{Cursor, SyncStream};

/// Storage of one [`Cursor`] per [`SyncStream`].
///
/// Implementations keep a cache that [`CursorStore::load_cursors`] fills once at startup;
/// reads are served from the cache and writes go to both the cache and the backing store.
pub trait CursorStore {
    /// Loads persisted cursors into the cache and returns how many were found.
    ///
    /// A store without prior state loads nothing and succeeds.
    fn load_cursors(&self) -> impl Future<Output = EtlResult<usize>> + Send;

    /// Returns the cursor of `stream`, `None` if it never synced.
    fn get_cursor(
        &self,
        stream: SyncStream,
    ) -> impl Future<Output = EtlResult<Option<Cursor>>> + Send;

    /// Replaces the cursor of `cursor.stream`. On success the new value is durable.
    fn store_cursor(&self, cursor: Cursor) -> impl Future<Output = EtlResult<()>> + Send;
}

/// Cursor store selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredCursorStore {
    Memory(MemoryCursorStore),
    File(FileCursorStore),
}

impl ConfiguredCursorStore {
    pub fn from_config(config: &CursorStoreConfig) -> Self {
        match config {
            CursorStoreConfig::Memory => Self::Memory(MemoryCursorStore::new()),
            CursorStoreConfig::File { path } => Self::File(FileCursorStore::new(path.clone())),
        }
    }
}

impl CursorStore for ConfiguredCursorStore {
    async fn load_cursors(&self) -> EtlResult<usize> {
        match self {
            Self::Memory(store) => store.load_cursors().await,
            Self::File(store) => store.load_cursors().await,
        }
    }

    async fn get_cursor(&self, stream: SyncStream) -> EtlResult<Option<Cursor>> {
        match self {
            Self::Memory(store) => store.get_cursor(stream).await,
            Self::File(store) => store.get_cursor(stream).await,
        }
    }

    async fn store_cursor(&self, cursor: Cursor) -> EtlResult<()> {
        match self {
            Self::Memory(store) => store.store_cursor(cursor).await,
            Self::File(store) => store.store_cursor(cursor).await,
        }
    }
}
