use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{DatabaseError, FeedEntry, FeedFilter, FeedItem};
use crate::util::{escape_like, fold_case};

/// Columns selected for a decorated feed item
const FEED_ITEM_COLUMNS: &str = "a.id, a.title, a.content, a.category_id, a.source_id, \
     a.author_id, a.published_at, a.created_at, upn.is_read, upn.created_at AS preferred_at";

/// Append the shared FROM/WHERE clause for a user's filtered feed.
///
/// Join-derived predicates (author, category, publisher, search) are part of
/// the same WHERE clause as the entry predicates, so COUNT and the page slice
/// see the same population.
fn push_feed_predicates(builder: &mut QueryBuilder<'_, Sqlite>, user_id: i64, filter: &FeedFilter) {
    builder.push(
        " FROM user_preferred_news upn \
         INNER JOIN news_articles a ON a.id = upn.article_id \
         WHERE upn.user_id = ",
    );
    builder.push_bind(user_id);

    if let Some(is_read) = filter.is_read {
        builder.push(" AND upn.is_read = ");
        builder.push_bind(is_read);
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND upn.created_at >= ");
        builder.push_bind(from);
    }
    if let Some(before) = filter.created_before {
        builder.push(" AND upn.created_at < ");
        builder.push_bind(before);
    }
    if let Some(author_id) = filter.author_id {
        builder.push(" AND a.author_id = ");
        builder.push_bind(author_id);
    }
    if let Some(category_id) = filter.category_id {
        builder.push(" AND a.category_id = ");
        builder.push_bind(category_id);
    }
    if let Some(publisher_id) = filter.publisher_id {
        builder.push(" AND a.source_id = ");
        builder.push_bind(publisher_id);
    }
    if let Some(search) = filter.search.as_deref() {
        // Both sides are folded in Rust; the *_folded columns are written at insert
        let pattern = format!("%{}%", escape_like(&fold_case(search)));
        builder.push(" AND (a.title_folded LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\' OR a.content_folded LIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\')");
    }
}

impl Database {
    // ========================================================================
    // Feed Entry Mutations
    // ========================================================================

    /// Insert an unread feed entry unless one already exists for the pair.
    ///
    /// Returns `true` when a new row was created and `false` when the
    /// (user, article) pair was already materialized.
    pub async fn insert_feed_entry_if_absent(
        &self,
        user_id: i64,
        article_id: i64,
        created_at: i64,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_preferred_news (user_id, article_id, is_read, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            ON CONFLICT(user_id, article_id) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(created_at)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_feed_entry(
        &self,
        user_id: i64,
        article_id: i64,
    ) -> Result<Option<FeedEntry>, DatabaseError> {
        let entry = sqlx::query_as::<_, FeedEntry>(
            r#"
            SELECT user_id, article_id, is_read, created_at, updated_at
            FROM user_preferred_news
            WHERE user_id = ? AND article_id = ?
        "#,
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Set the read flag, returning the updated entry or `None` if absent.
    ///
    /// `created_at` is never touched.
    pub async fn set_feed_entry_read(
        &self,
        user_id: i64,
        article_id: i64,
        is_read: bool,
        updated_at: i64,
    ) -> Result<Option<FeedEntry>, DatabaseError> {
        let entry = sqlx::query_as::<_, FeedEntry>(
            r#"
            UPDATE user_preferred_news
            SET is_read = ?, updated_at = ?
            WHERE user_id = ? AND article_id = ?
            RETURNING user_id, article_id, is_read, created_at, updated_at
        "#,
        )
        .bind(is_read)
        .bind(updated_at)
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Delete every entry in a user's feed, returns the count removed
    pub async fn clear_feed(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_preferred_news WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Count entries materialized strictly before `cutoff`
    pub async fn count_entries_before(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_preferred_news WHERE created_at < ?")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Delete entries materialized strictly before `cutoff` in one statement
    pub async fn delete_entries_before(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_preferred_news WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Feed Retrieval
    // ========================================================================

    /// Count a user's entries matching the full filter
    pub async fn count_feed(&self, user_id: i64, filter: &FeedFilter) -> Result<u64, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*)");
        push_feed_predicates(&mut builder, user_id, filter);
        let row: (i64,) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    /// Filtered total plus one page slice, read under a single transaction.
    ///
    /// Rows are ordered by materialization time, newest first, with the entry
    /// id as tie-breaker so page boundaries are stable.
    pub async fn fetch_feed_page(
        &self,
        user_id: i64,
        filter: &FeedFilter,
        offset: u64,
        limit: u64,
    ) -> Result<(u64, Vec<FeedItem>), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*)");
        push_feed_predicates(&mut count, user_id, filter);
        let (total,): (i64,) = count.build_query_as().fetch_one(&mut *tx).await?;

        let mut page: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        page.push(FEED_ITEM_COLUMNS);
        push_feed_predicates(&mut page, user_id, filter);
        page.push(" ORDER BY upn.created_at DESC, upn.id DESC LIMIT ");
        page.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        page.push(" OFFSET ");
        page.push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
        let items: Vec<FeedItem> = page.build_query_as().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        Ok((u64::try_from(total).unwrap_or(0), items))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, FeedFilter, NewArticle};

    const NOW: i64 = 1_760_000_000;
    const DAY: i64 = 86_400;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_article(title: &str, content: &str, author_id: i64) -> NewArticle {
        NewArticle {
            title: title.to_string(),
            content: content.to_string(),
            category_id: 1,
            source_id: 2,
            author_id,
            published_at: None,
            created_at: NOW,
        }
    }

    /// Seeds one user with `titles.len()` entries, entry i materialized i hours before NOW
    async fn seed(db: &Database, titles: &[&str]) -> (i64, Vec<i64>) {
        let user = db.insert_user("alice").await.unwrap();
        let mut ids = Vec::new();
        for (i, title) in titles.iter().enumerate() {
            let id = db.insert_article(&test_article(title, "body", 1)).await.unwrap();
            db.insert_feed_entry_if_absent(user, id, NOW - i as i64 * 3600)
                .await
                .unwrap();
            ids.push(id);
        }
        (user, ids)
    }

    #[tokio::test]
    async fn test_insert_if_absent_reports_creation() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        let article = db.insert_article(&test_article("a", "b", 1)).await.unwrap();

        assert!(db.insert_feed_entry_if_absent(user, article, NOW).await.unwrap());
        assert!(!db.insert_feed_entry_if_absent(user, article, NOW + 10).await.unwrap());

        let entry = db.get_feed_entry(user, article).await.unwrap().unwrap();
        assert!(!entry.is_read);
        assert_eq!(entry.created_at, NOW, "second insert must not overwrite");
    }

    #[tokio::test]
    async fn test_set_feed_entry_read_keeps_created_at() {
        let db = test_db().await;
        let (user, ids) = seed(&db, &["one"]).await;

        let entry = db
            .set_feed_entry_read(user, ids[0], true, NOW + 50)
            .await
            .unwrap()
            .unwrap();
        assert!(entry.is_read);
        assert_eq!(entry.created_at, NOW);
        assert_eq!(entry.updated_at, NOW + 50);

        let missing = db.set_feed_entry_read(user, 999, true, NOW).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_count_and_delete_before_cutoff() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        let old = db.insert_article(&test_article("old", "b", 1)).await.unwrap();
        let edge = db.insert_article(&test_article("edge", "b", 1)).await.unwrap();
        let fresh = db.insert_article(&test_article("fresh", "b", 1)).await.unwrap();
        db.insert_feed_entry_if_absent(user, old, NOW - 40 * DAY).await.unwrap();
        db.insert_feed_entry_if_absent(user, edge, NOW - 30 * DAY).await.unwrap();
        db.insert_feed_entry_if_absent(user, fresh, NOW).await.unwrap();

        let cutoff = NOW - 30 * DAY;
        assert_eq!(db.count_entries_before(cutoff).await.unwrap(), 1);
        assert_eq!(db.delete_entries_before(cutoff).await.unwrap(), 1);
        assert_eq!(db.count_entries_before(cutoff).await.unwrap(), 0);
        assert!(db.get_feed_entry(user, edge).await.unwrap().is_some());
        assert!(db.get_feed_entry(user, fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_feed_only_touches_one_user() {
        let db = test_db().await;
        let (user, ids) = seed(&db, &["one", "two"]).await;
        let other = db.insert_user("bob").await.unwrap();
        db.insert_feed_entry_if_absent(other, ids[0], NOW).await.unwrap();

        assert_eq!(db.clear_feed(user).await.unwrap(), 2);
        assert!(db.get_feed_entry(other, ids[0]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fetch_feed_page_orders_newest_first() {
        let db = test_db().await;
        let (user, ids) = seed(&db, &["one", "two", "three"]).await;

        let (total, items) = db
            .fetch_feed_page(user, &FeedFilter::default(), 0, 2)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![ids[0], ids[1]]);
        assert_eq!(items[0].preferred_at, NOW);

        let (_, rest) = db
            .fetch_feed_page(user, &FeedFilter::default(), 2, 2)
            .await
            .unwrap();
        assert_eq!(rest.iter().map(|i| i.id).collect::<Vec<_>>(), vec![ids[2]]);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_over_title_and_content() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        let in_title = db.insert_article(&test_article("AI wins", "x", 1)).await.unwrap();
        let in_body = db.insert_article(&test_article("News", "about ai", 1)).await.unwrap();
        let neither = db.insert_article(&test_article("Sports", "ball", 1)).await.unwrap();
        for id in [in_title, in_body, neither] {
            db.insert_feed_entry_if_absent(user, id, NOW).await.unwrap();
        }

        let filter = FeedFilter {
            search: Some("Ai".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_feed(user, &filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_case() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        let accented = db
            .insert_article(&test_article("ÉCOLE reform", "Über news", 1))
            .await
            .unwrap();
        let plain = db.insert_article(&test_article("Ecole", "uber", 1)).await.unwrap();
        for id in [accented, plain] {
            db.insert_feed_entry_if_absent(user, id, NOW).await.unwrap();
        }

        for query in ["ÉCOLE", "école", "ÉcOlE", "Über", "über", "ÜBER NEWS"] {
            let filter = FeedFilter {
                search: Some(query.to_string()),
                ..Default::default()
            };
            let (total, items) = db.fetch_feed_page(user, &filter, 0, 10).await.unwrap();
            assert_eq!(total, 1, "query {query:?}");
            assert_eq!(items[0].id, accented, "query {query:?}");
        }

        let filter = FeedFilter {
            search: Some("reform".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_feed(user, &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_wildcards_are_literal() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        let pct = db.insert_article(&test_article("100% done", "x", 1)).await.unwrap();
        let plain = db.insert_article(&test_article("1000 done", "x", 1)).await.unwrap();
        for id in [pct, plain] {
            db.insert_feed_entry_if_absent(user, id, NOW).await.unwrap();
        }

        let filter = FeedFilter {
            search: Some("0%".to_string()),
            ..Default::default()
        };
        let (total, items) = db.fetch_feed_page(user, &filter, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, pct);
    }

    #[tokio::test]
    async fn test_join_filters_apply_before_count() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        for i in 0..6 {
            let id = db
                .insert_article(&test_article(&format!("a{i}"), "x", i % 2))
                .await
                .unwrap();
            db.insert_feed_entry_if_absent(user, id, NOW - i).await.unwrap();
        }

        let filter = FeedFilter {
            author_id: Some(1),
            ..Default::default()
        };
        let (total, page) = db.fetch_feed_page(user, &filter, 0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|i| i.author_id == 1));
    }

    #[tokio::test]
    async fn test_created_range_bounds() {
        let db = test_db().await;
        let (user, ids) = seed(&db, &["h0", "h1", "h2", "h3"]).await;

        let filter = FeedFilter {
            created_from: Some(NOW - 2 * 3600),
            created_before: Some(NOW),
            ..Default::default()
        };
        let (total, items) = db.fetch_feed_page(user, &filter, 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![ids[1], ids[2]]);
    }
}
