//! Read access to the relational catalog.

mod base;
mod postgres;

pub use base::*;
pub use postgres::*;
