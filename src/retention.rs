//! Pruning of old feed entries.
//!
//! Entries materialized more than `horizon_days` ago are deleted in one bulk
//! statement. A non-dry run must be confirmed with `force`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RetentionConfig;
use crate::error::{FeedError, Result};
use crate::storage::Database;
use crate::util::days_before;

pub const DEFAULT_HORIZON_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionOptions {
    pub horizon_days: u32,
    /// Count only, delete nothing
    pub dry_run: bool,
    /// Required to delete
    pub force: bool,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            dry_run: false,
            force: false,
        }
    }
}

impl From<&RetentionConfig> for RetentionOptions {
    /// Scheduled runs are unattended and always confirmed.
    fn from(config: &RetentionConfig) -> Self {
        Self {
            horizon_days: config.horizon_days,
            dry_run: false,
            force: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub horizon_days: u32,
    /// Entries created strictly before this instant (UNIX seconds) qualify
    pub cutoff: i64,
    /// Qualifying entries counted before deletion
    pub matched: u64,
    pub deleted: u64,
    pub dry_run: bool,
}

fn format_cutoff(cutoff: i64) -> String {
    DateTime::<Utc>::from_timestamp(cutoff, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| cutoff.to_string())
}

pub async fn run_retention(db: &Database, options: &RetentionOptions) -> Result<RetentionReport> {
    run_retention_at(db, options, Utc::now().timestamp()).await
}

/// Run retention with cutoff `now - horizon_days`.
pub async fn run_retention_at(
    db: &Database,
    options: &RetentionOptions,
    now: i64,
) -> Result<RetentionReport> {
    if !options.dry_run && !options.force {
        return Err(FeedError::invalid(
            "deleting feed entries requires force; use dry_run to preview",
        ));
    }

    let cutoff = days_before(now, options.horizon_days);
    let cutoff_date = format_cutoff(cutoff);
    let mut report = RetentionReport {
        horizon_days: options.horizon_days,
        cutoff,
        matched: 0,
        deleted: 0,
        dry_run: options.dry_run,
    };

    tracing::info!(
        days = options.horizon_days,
        cutoff = %cutoff_date,
        dry_run = options.dry_run,
        "Starting preferred news cleanup"
    );

    report.matched = db.count_entries_before(cutoff).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to count old feed entries");
        FeedError::from(e)
    })?;

    if report.matched == 0 {
        tracing::info!(cutoff = %cutoff_date, "No old entries to delete");
        return Ok(report);
    }

    if options.dry_run {
        tracing::info!(
            would_delete = report.matched,
            cutoff = %cutoff_date,
            "Dry run, nothing deleted"
        );
        return Ok(report);
    }

    report.deleted = db.delete_entries_before(cutoff).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to delete old feed entries");
        FeedError::from(e)
    })?;

    tracing::info!(
        entries_deleted = report.deleted,
        days_kept = options.horizon_days,
        cutoff_date = %cutoff_date,
        "User preferred news cleanup completed"
    );

    Ok(report)
}
