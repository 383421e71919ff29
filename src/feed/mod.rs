//! The conversation feed: history paging, live messages, translated view
//! and undo send.

pub mod handle;
pub mod links;
pub mod scroll;
pub mod source;
pub mod store;
pub mod time;
pub mod translate;

pub use handle::{Feed, FeedOptions};
pub use source::{MessageSource, Retractor};
pub use store::{ChangeLog, FeedChange, FeedDelta, FeedSnapshot, LoadPhase, MessageStore, Retraction};
