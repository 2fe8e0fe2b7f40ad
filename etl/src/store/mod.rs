//! Persistence of sync progress.

pub mod cursor;
