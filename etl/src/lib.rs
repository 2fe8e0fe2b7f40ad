//! Incremental sync of the movie catalog into search indices, and batched ingestion of
//! tracking events into the analytics store.
//!
//! The search sync reads changed rows from the catalog per [`types::SyncStream`], resolves them
//! to the documents they affect, rewrites those documents in bulk and only then advances the
//! stream's [`types::Cursor`]. The event sink buffers tracking events per
//! [`types::EventKind`] and stores them in batches, committing source offsets after each
//! successful insert.

pub mod concurrency;
pub mod error;
pub mod index;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
