//! Data types shared by the search sync and the event sink.

mod cursor;
mod document;
mod event;
mod stream;

pub use cursor::*;
pub use document::*;
pub use event::*;
pub use stream::*;
