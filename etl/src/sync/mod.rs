//! Incremental synchronization of the catalog into the search indices.

pub mod denormalize;
pub mod extract;
