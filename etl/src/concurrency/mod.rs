//! Shutdown signalling and retry helpers shared by the long running loops.

pub mod retry;
pub mod shutdown;
