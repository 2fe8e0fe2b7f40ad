//! Search index writers.

mod base;
mod elasticsearch;
pub mod memory;
pub mod schema;

pub use base::*;
pub use elasticsearch::*;
