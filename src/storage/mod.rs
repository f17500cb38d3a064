mod catalog;
mod feed_entries;
mod leases;
mod preferences;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    Article, DatabaseError, DimensionResolver, DimensionSets, FeedEntry, FeedFilter, FeedItem,
    NewArticle, Preference, PreferenceDimension, PreferenceTarget, UnknownDimension,
};
