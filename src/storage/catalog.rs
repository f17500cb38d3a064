use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, DatabaseError, DimensionSets, NewArticle};
use crate::util::fold_case;

/// Hard cap on candidates fetched for one user in one pass
const MAX_CANDIDATES: i64 = 10_000;

impl Database {
    // ========================================================================
    // Users
    // ========================================================================

    pub async fn insert_user(&self, name: &str) -> Result<i64, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let row: (i64,) =
            sqlx::query_as("INSERT INTO users (name, created_at) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// All user ids, ascending
    pub async fn list_user_ids(&self) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// The subset of `ids` naming existing users, ascending and deduplicated
    pub async fn existing_user_ids(&self, ids: &[i64]) -> Result<Vec<i64>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT id FROM users WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ========================================================================
    // Articles
    // ========================================================================

    /// Insert an article along with case-folded copies of its text for search
    pub async fn insert_article(&self, article: &NewArticle) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO news_articles
                (title, content, category_id, source_id, author_id, published_at, created_at,
                 title_folded, content_folded)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&article.title)
        .bind(&article.content)
        .bind(article.category_id)
        .bind(article.source_id)
        .bind(article.author_id)
        .bind(article.published_at)
        .bind(article.created_at)
        .bind(fold_case(&article.title))
        .bind(fold_case(&article.content))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>, DatabaseError> {
        let article = sqlx::query_as::<_, Article>(
            r#"
            SELECT id, title, content, category_id, source_id, author_id,
                   published_at, created_at
            FROM news_articles
            WHERE id = ?
        "#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(article)
    }

    pub async fn article_exists(&self, article_id: i64) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM news_articles WHERE id = ?")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Articles created at or after `since` that match any of the user's
    /// dimension sets and have no feed entry for `user_id` yet.
    ///
    /// Newest first, at most `limit` rows. Returns nothing for empty sets.
    pub async fn find_candidates(
        &self,
        user_id: i64,
        sets: &DimensionSets,
        since: i64,
        limit: usize,
    ) -> Result<Vec<Article>, DatabaseError> {
        if sets.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let safe_limit: i64 = i64::try_from(limit)
            .unwrap_or(i64::MAX)
            .min(MAX_CANDIDATES);

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            r#"SELECT a.id, a.title, a.content, a.category_id, a.source_id, a.author_id,
                      a.published_at, a.created_at
               FROM news_articles a
               WHERE a.created_at >= "#,
        );
        builder.push_bind(since);

        builder.push(" AND (");
        for (i, (dimension, ids)) in sets.non_empty().enumerate() {
            if i > 0 {
                builder.push(" OR ");
            }
            builder.push("a.");
            builder.push(dimension.resolver().column);
            builder.push(" IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
        }
        builder.push(")");

        builder.push(
            " AND NOT EXISTS (SELECT 1 FROM user_preferred_news upn \
             WHERE upn.article_id = a.id AND upn.user_id = ",
        );
        builder.push_bind(user_id);
        builder.push(") ORDER BY a.created_at DESC, a.id DESC LIMIT ");
        builder.push_bind(safe_limit);

        let rows: Vec<Article> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DimensionSets, NewArticle, PreferenceTarget};

    const NOW: i64 = 1_760_000_000;
    const HOUR: i64 = 3600;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_article(category_id: i64, source_id: i64, author_id: i64, created_at: i64) -> NewArticle {
        NewArticle {
            title: format!("Article c{category_id} s{source_id} a{author_id}"),
            content: "Body".to_string(),
            category_id,
            source_id,
            author_id,
            published_at: Some(created_at),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_article() {
        let db = test_db().await;
        let id = db.insert_article(&test_article(1, 2, 3, NOW)).await.unwrap();

        let article = db.get_article(id).await.unwrap().unwrap();
        assert_eq!(article.category_id, 1);
        assert_eq!(article.source_id, 2);
        assert_eq!(article.author_id, 3);
        assert_eq!(article.created_at, NOW);
        assert!(db.article_exists(id).await.unwrap());
        assert!(!db.article_exists(id + 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_existing_user_ids_filters_unknown() {
        let db = test_db().await;
        let a = db.insert_user("alice").await.unwrap();
        let b = db.insert_user("bob").await.unwrap();

        let found = db.existing_user_ids(&[b, 999, a, a]).await.unwrap();
        assert_eq!(found, vec![a, b]);
        assert_eq!(db.list_user_ids().await.unwrap(), vec![a, b]);
        assert!(db.existing_user_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_candidates_or_across_dimensions() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        let by_category = db.insert_article(&test_article(5, 1, 1, NOW - HOUR)).await.unwrap();
        let by_author = db.insert_article(&test_article(9, 1, 7, NOW - 2 * HOUR)).await.unwrap();
        db.insert_article(&test_article(9, 1, 1, NOW - HOUR)).await.unwrap();

        let mut sets = DimensionSets::default();
        sets.insert(PreferenceTarget::Category(5));
        sets.insert(PreferenceTarget::Author(7));

        let found = db.find_candidates(user, &sets, NOW - 24 * HOUR, 100).await.unwrap();
        let ids: Vec<_> = found.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![by_category, by_author], "newest first");
    }

    #[tokio::test]
    async fn test_find_candidates_respects_window_and_limit() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        for i in 0..5 {
            db.insert_article(&test_article(5, 1, 1, NOW - i * HOUR)).await.unwrap();
        }
        db.insert_article(&test_article(5, 1, 1, NOW - 30 * 24 * HOUR)).await.unwrap();

        let mut sets = DimensionSets::default();
        sets.insert(PreferenceTarget::Category(5));

        let all = db.find_candidates(user, &sets, NOW - 7 * 24 * HOUR, 100).await.unwrap();
        assert_eq!(all.len(), 5, "old article outside window");

        let capped = db.find_candidates(user, &sets, NOW - 7 * 24 * HOUR, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].created_at, NOW);
        assert_eq!(capped[1].created_at, NOW - HOUR);
    }

    #[tokio::test]
    async fn test_find_candidates_excludes_materialized() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        let other = db.insert_user("bob").await.unwrap();
        let a1 = db.insert_article(&test_article(5, 1, 1, NOW)).await.unwrap();
        let a2 = db.insert_article(&test_article(5, 1, 1, NOW - HOUR)).await.unwrap();
        db.insert_feed_entry_if_absent(user, a1, NOW).await.unwrap();

        let mut sets = DimensionSets::default();
        sets.insert(PreferenceTarget::Category(5));

        let found = db.find_candidates(user, &sets, 0, 100).await.unwrap();
        assert_eq!(found.iter().map(|a| a.id).collect::<Vec<_>>(), vec![a2]);

        // Another user's entry does not exclude anything
        let found = db.find_candidates(other, &sets, 0, 100).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_find_candidates_empty_sets() {
        let db = test_db().await;
        let user = db.insert_user("alice").await.unwrap();
        db.insert_article(&test_article(5, 1, 1, NOW)).await.unwrap();

        let found = db
            .find_candidates(user, &DimensionSets::default(), 0, 100)
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
