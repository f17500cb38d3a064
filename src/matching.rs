//! Preference matching.
//!
//! For every user in scope, finds catalog articles created inside the lookback
//! window that match at least one of the user's preference dimensions and are
//! not in the user's feed yet, and materializes up to `per_user_limit` of them
//! as unread feed entries. A second run with the same inputs adds nothing.
//!
//! Users are processed on a bounded concurrency pool. A failing user is
//! logged and reported; the rest of the batch carries on.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::MatchingConfig;
use crate::error::{FeedError, Result};
use crate::storage::Database;
use crate::util::days_before;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const DEFAULT_PER_USER_LIMIT: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Which users a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UserScope {
    #[default]
    All,
    /// Explicit subset. Unknown ids are ignored.
    Only(Vec<i64>),
}

#[derive(Debug, Clone)]
pub struct MatchingOptions {
    pub lookback_days: u32,
    pub per_user_limit: usize,
    pub scope: UserScope,
    pub concurrency: usize,
    /// Users not started before this much wall-clock time has passed are skipped.
    pub budget: Option<Duration>,
}

impl Default for MatchingOptions {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            per_user_limit: DEFAULT_PER_USER_LIMIT,
            scope: UserScope::All,
            concurrency: DEFAULT_CONCURRENCY,
            budget: None,
        }
    }
}

impl From<&MatchingConfig> for MatchingOptions {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            per_user_limit: config.per_user_limit,
            scope: UserScope::All,
            concurrency: config.concurrency,
            budget: Some(Duration::from_secs(config.run_budget_secs)),
        }
    }
}

/// Per-user counters: candidates found and entries actually created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub processed: usize,
    pub added: usize,
}

#[derive(Debug)]
pub enum UserStatus {
    Matched(UserCounts),
    NoPreferences,
    DeadlineSkipped,
    /// `counts` holds what was written before the error
    Failed { error: FeedError, counts: UserCounts },
}

/// Outcome of one user within a run.
#[derive(Debug)]
pub struct UserOutcome {
    pub user_id: i64,
    pub status: UserStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserReport {
    pub user_id: i64,
    pub processed: usize,
    pub added: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFailure {
    pub user_id: i64,
    pub error: String,
    /// Entries created for this user before the failure; they are kept
    pub added: usize,
}

/// Aggregate result of a matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchingReport {
    pub lookback_days: u32,
    pub per_user_limit: usize,
    /// Users the run attempted, including those without preferences
    pub users_processed: usize,
    pub users_without_preferences: usize,
    pub deadline_skipped: usize,
    pub total_processed: usize,
    pub total_added: usize,
    /// Users with at least one candidate, ascending by id
    pub users: Vec<UserReport>,
    pub failures: Vec<UserFailure>,
}

/// Match one user at `now`.
///
/// Returns `None` when the user has no preferences on any dimension.
pub async fn match_user(
    db: &Database,
    user_id: i64,
    lookback_days: u32,
    per_user_limit: usize,
    now: i64,
) -> Result<Option<UserCounts>> {
    let mut counts = UserCounts::default();
    let has_preferences =
        match_user_into(db, user_id, lookback_days, per_user_limit, now, &mut counts).await?;
    Ok(has_preferences.then_some(counts))
}

/// Matching body; `counts` is updated as entries are written so a caller
/// still sees them when a later insert fails.
async fn match_user_into(
    db: &Database,
    user_id: i64,
    lookback_days: u32,
    per_user_limit: usize,
    now: i64,
    counts: &mut UserCounts,
) -> Result<bool> {
    let sets = db.load_dimension_sets(user_id).await?;
    if sets.is_empty() {
        tracing::debug!(user_id = user_id, "User has no preferences, skipping");
        return Ok(false);
    }

    let since = days_before(now, lookback_days);
    let candidates = db
        .find_candidates(user_id, &sets, since, per_user_limit)
        .await?;
    debug_assert!(
        candidates.iter().all(|article| sets.matches(article)),
        "candidate query returned an article outside the user's dimension sets"
    );

    counts.processed = candidates.len();

    for article in &candidates {
        if db
            .insert_feed_entry_if_absent(user_id, article.id, now)
            .await?
        {
            counts.added += 1;
        } else {
            // Another run materialized it between the candidate query and now
            let conflict = FeedError::Conflict(format!(
                "feed entry for user {} article {} already exists",
                user_id, article.id
            ));
            tracing::warn!(
                user_id = user_id,
                article_id = article.id,
                error = %conflict,
                "Duplicate feed entry, skipping"
            );
        }
    }

    Ok(true)
}

/// Run matching over the configured scope at the current time.
pub async fn run_matching(db: &Database, options: &MatchingOptions) -> Result<MatchingReport> {
    run_matching_at(db, options, Utc::now().timestamp()).await
}

/// Run matching with an explicit `now` (UNIX seconds).
///
/// Fails only if the user list itself cannot be loaded; per-user failures are
/// collected into the report.
pub async fn run_matching_at(
    db: &Database,
    options: &MatchingOptions,
    now: i64,
) -> Result<MatchingReport> {
    if options.per_user_limit == 0 {
        return Err(FeedError::invalid("per-user limit must be at least 1"));
    }

    let user_ids = match &options.scope {
        UserScope::All => db.list_user_ids().await?,
        UserScope::Only(ids) => db.existing_user_ids(ids).await?,
    };

    let mut report = MatchingReport {
        lookback_days: options.lookback_days,
        per_user_limit: options.per_user_limit,
        ..Default::default()
    };

    if user_ids.is_empty() {
        tracing::warn!("No users found to process");
        return Ok(report);
    }

    tracing::info!(
        users = user_ids.len(),
        days_lookback = options.lookback_days,
        limit_per_user = options.per_user_limit,
        "Starting user preferred news update"
    );

    let deadline = options.budget.map(|budget| Instant::now() + budget);
    let lookback_days = options.lookback_days;
    let per_user_limit = options.per_user_limit;

    let mut outcomes: Vec<UserOutcome> = stream::iter(user_ids)
        .map(|user_id| {
            let db = db.clone();
            async move {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return UserOutcome {
                        user_id,
                        status: UserStatus::DeadlineSkipped,
                    };
                }

                let mut counts = UserCounts::default();
                let result = match_user_into(
                    &db,
                    user_id,
                    lookback_days,
                    per_user_limit,
                    now,
                    &mut counts,
                )
                .await;
                let status = match result {
                    Ok(true) => {
                        tracing::debug!(
                            user_id = user_id,
                            processed = counts.processed,
                            added = counts.added,
                            "User matched"
                        );
                        UserStatus::Matched(counts)
                    }
                    Ok(false) => UserStatus::NoPreferences,
                    Err(error) => {
                        tracing::error!(
                            user_id = user_id,
                            added = counts.added,
                            error = %error.detail(),
                            "Failed to match user preferences"
                        );
                        UserStatus::Failed { error, counts }
                    }
                };

                UserOutcome { user_id, status }
            }
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    // Completion order is arbitrary
    outcomes.sort_by_key(|o| o.user_id);

    for outcome in outcomes {
        match outcome.status {
            UserStatus::Matched(counts) => {
                report.users_processed += 1;
                report.total_processed += counts.processed;
                report.total_added += counts.added;
                if counts.processed > 0 {
                    report.users.push(UserReport {
                        user_id: outcome.user_id,
                        processed: counts.processed,
                        added: counts.added,
                    });
                }
            }
            UserStatus::NoPreferences => {
                report.users_processed += 1;
                report.users_without_preferences += 1;
            }
            UserStatus::DeadlineSkipped => report.deadline_skipped += 1,
            UserStatus::Failed { error, counts } => {
                report.users_processed += 1;
                report.total_processed += counts.processed;
                report.total_added += counts.added;
                report.failures.push(UserFailure {
                    user_id: outcome.user_id,
                    error: error.to_string(),
                    added: counts.added,
                });
            }
        }
    }

    if report.deadline_skipped > 0 {
        tracing::warn!(
            skipped = report.deadline_skipped,
            "Run budget exhausted, remaining users deferred to the next run"
        );
    }

    tracing::info!(
        users_processed = report.users_processed,
        total_processed = report.total_processed,
        total_added = report.total_added,
        failed_users = report.failures.len(),
        days_lookback = report.lookback_days,
        limit_per_user = report.per_user_limit,
        "User preferred news update completed"
    );

    Ok(report)
}
