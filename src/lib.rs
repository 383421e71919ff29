pub mod api;
pub mod app;
pub mod error;
pub mod feed;
pub mod storage;
pub mod ui;
pub mod utils;

pub use error::{FeedError, FeedResult};
