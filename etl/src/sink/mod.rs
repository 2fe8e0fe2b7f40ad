//! Batched ingestion of tracking events into the analytics store.

mod base;
mod buffer;
pub mod clickhouse;
mod core;
pub mod kafka;
pub mod memory;
mod offsets;

pub use base::*;
pub use buffer::*;
pub use core::*;
pub use offsets::*;
