use std::collections::BTreeSet;

use super::schema::Database;
use super::types::{
    DatabaseError, DimensionSets, Preference, PreferenceDimension, PreferenceTarget,
};

impl Database {
    // ========================================================================
    // User Preference Operations
    // ========================================================================

    /// Declare a preference, returns whether a new row was created.
    ///
    /// Re-declaring an existing (user, dimension, target) is a no-op.
    pub async fn add_preference(
        &self,
        user_id: i64,
        target: PreferenceTarget,
    ) -> Result<bool, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, preference_type, preference_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, preference_type, preference_id) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(target.dimension().as_str())
        .bind(target.target_id())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a preference, returns whether it existed
    pub async fn remove_preference(
        &self,
        user_id: i64,
        target: PreferenceTarget,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM user_preferences WHERE user_id = ? AND preference_type = ? AND preference_id = ?",
        )
        .bind(user_id)
        .bind(target.dimension().as_str())
        .bind(target.target_id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove every preference for a user, returns the count removed
    pub async fn clear_preferences(&self, user_id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_preferences WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All of a user's preferences, grouped by dimension then target id.
    ///
    /// Rows whose stored type no longer parses are skipped with a warning;
    /// the CHECK constraint keeps that from happening in practice.
    pub async fn list_preferences(&self, user_id: i64) -> Result<Vec<Preference>, DatabaseError> {
        let rows: Vec<(i64, i64, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, user_id, preference_type, preference_id, created_at
            FROM user_preferences
            WHERE user_id = ?
            ORDER BY preference_type, preference_id
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, user_id, kind, target_id, created_at)| {
                match kind.parse::<PreferenceDimension>() {
                    Ok(dimension) => Some(Preference {
                        id,
                        user_id,
                        target: PreferenceTarget::new(dimension, target_id),
                        created_at,
                    }),
                    Err(e) => {
                        tracing::warn!(preference_id = id, error = %e, "Skipping preference row");
                        None
                    }
                }
            })
            .collect())
    }

    /// Target ids the user follows on one dimension
    pub async fn list_preference_ids(
        &self,
        user_id: i64,
        dimension: PreferenceDimension,
    ) -> Result<BTreeSet<i64>, DatabaseError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT preference_id FROM user_preferences WHERE user_id = ? AND preference_type = ?",
        )
        .bind(user_id)
        .bind(dimension.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Load all three dimension sets for a user
    pub async fn load_dimension_sets(&self, user_id: i64) -> Result<DimensionSets, DatabaseError> {
        let mut sets = DimensionSets::default();
        for dimension in PreferenceDimension::ALL {
            let ids = self.list_preference_ids(user_id, dimension).await?;
            sets.set(dimension, ids);
        }
        Ok(sets)
    }
}
