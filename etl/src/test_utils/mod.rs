//! In-memory collaborators for exercising the search sync and the event sink without external
//! services.

pub mod catalog;
pub mod event_source;
pub mod faults;
