//! Per-user materialized news feeds.
//!
//! Preferences (category, source, author) are matched against the article
//! catalog on a schedule and materialized as feed entries, which are then
//! served through a filtered, paginated query and pruned after a retention
//! horizon.

pub mod config;
pub mod error;
pub mod feed_query;
pub mod logging;
pub mod matching;
pub mod read_state;
pub mod retention;
pub mod scheduler;
pub mod storage;
pub mod util;

pub use error::{ErrorKind, FeedError, Result};
