use super::schema::Database;
use super::types::DatabaseError;

impl Database {
    // ========================================================================
    // Job Leases
    // ========================================================================

    /// Try to take the named lease for `ttl_secs`.
    ///
    /// Succeeds when no lease row exists or the existing one has expired at
    /// `now`. A live lease held by anyone, including `holder`, is left alone.
    pub async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl_secs: i64,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let expires_at = now.saturating_add(ttl_secs.max(1));
        let result = sqlx::query(
            r#"
            INSERT INTO job_leases (name, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE job_leases.expires_at <= ?
        "#,
        )
        .bind(name)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Release a lease, returns whether `holder` still owned it
    pub async fn release_lease(&self, name: &str, holder: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM job_leases WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
