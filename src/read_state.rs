//! Read-state mutations on a user's feed.

use chrono::Utc;

use crate::error::{FeedError, Result};
use crate::storage::{Database, FeedEntry};

/// Set the read flag on a feed entry; `is_read` defaults to `true`.
pub async fn mark_read(
    db: &Database,
    user_id: i64,
    article_id: i64,
    is_read: Option<bool>,
) -> Result<FeedEntry> {
    mark_read_at(db, user_id, article_id, is_read, Utc::now().timestamp()).await
}

/// [`mark_read`] with an explicit update time.
///
/// Fails with `NotFound` if the article is not in the catalog, or if it is
/// but has no entry in this user's feed.
pub async fn mark_read_at(
    db: &Database,
    user_id: i64,
    article_id: i64,
    is_read: Option<bool>,
    now: i64,
) -> Result<FeedEntry> {
    if !db.article_exists(article_id).await? {
        return Err(FeedError::NotFound(format!("article {article_id}")));
    }

    let is_read = is_read.unwrap_or(true);
    let entry = db
        .set_feed_entry_read(user_id, article_id, is_read, now)
        .await?
        .ok_or_else(|| {
            FeedError::NotFound(format!(
                "feed entry for user {user_id} article {article_id}"
            ))
        })?;

    tracing::debug!(
        user_id = user_id,
        article_id = article_id,
        is_read = is_read,
        "Feed entry read state updated"
    );
    Ok(entry)
}

/// Remove every entry from a user's feed. Returns the number removed.
pub async fn clear_feed(db: &Database, user_id: i64) -> Result<u64> {
    let removed = db.clear_feed(user_id).await?;
    tracing::info!(user_id = user_id, removed = removed, "Feed cleared");
    Ok(removed)
}
