//! Periodic job runner for matching and retention.
//!
//! Matching runs on a fixed interval, retention once a day at a configured UTC
//! time. Each run first takes a lease row in `job_leases`; if another process
//! (or a previous, still running tick) holds it, the tick does nothing.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use std::future::Future;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use uuid::Uuid;

use crate::config::{Config, ConfigError, MatchingConfig, RetentionConfig};
use crate::error::Result;
use crate::matching::{run_matching_at, MatchingOptions, MatchingReport};
use crate::retention::{run_retention_at, RetentionOptions, RetentionReport};
use crate::storage::Database;

pub const MATCHING_JOB: &str = "update-preferred-news";
pub const RETENTION_JOB: &str = "cleanup-preferred-news";

/// Lease slack on top of the matching run budget
const LEASE_GRACE_SECS: i64 = 300;
const RETENTION_LEASE_SECS: i64 = 3600;

pub struct Scheduler {
    db: Database,
    matching: MatchingConfig,
    retention: RetentionConfig,
    retention_time: NaiveTime,
    holder: String,
}

impl Scheduler {
    pub fn new(db: Database, config: &Config) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            db,
            matching: config.matching.clone(),
            retention: config.retention.clone(),
            retention_time: config.retention.daily_time()?,
            holder: Uuid::new_v4().to_string(),
        })
    }

    /// Run both job loops until `shutdown` resolves.
    ///
    /// A job interrupted by shutdown keeps its lease until the lease expires.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            interval_minutes = self.matching.interval_minutes,
            retention_at = %self.retention_time,
            holder = %self.holder,
            "Scheduler started"
        );

        tokio::select! {
            _ = self.matching_loop() => {}
            _ = self.retention_loop() => {}
            _ = shutdown => {
                tracing::info!("Scheduler shutting down");
            }
        }
    }

    async fn matching_loop(&self) {
        let period = Duration::from_secs(self.matching.interval_minutes.saturating_mul(60));
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            self.run_matching_tick(Utc::now().timestamp()).await;
        }
    }

    async fn retention_loop(&self) {
        loop {
            let wait = duration_until_next(Utc::now(), self.retention_time);
            tracing::debug!(wait_secs = wait.as_secs(), "Next retention run scheduled");
            sleep(wait).await;
            self.run_retention_tick(Utc::now().timestamp()).await;
        }
    }

    /// One scheduled matching run over all users.
    ///
    /// Returns `None` if the tick was skipped or the run failed.
    pub async fn run_matching_tick(&self, now: i64) -> Option<MatchingReport> {
        let options = MatchingOptions::from(&self.matching);
        let ttl = i64::try_from(self.matching.run_budget_secs)
            .unwrap_or(i64::MAX)
            .saturating_add(LEASE_GRACE_SECS);
        self.with_lease(MATCHING_JOB, ttl, now, || {
            run_matching_at(&self.db, &options, now)
        })
        .await
    }

    /// One scheduled retention run with the configured horizon.
    pub async fn run_retention_tick(&self, now: i64) -> Option<RetentionReport> {
        let options = RetentionOptions::from(&self.retention);
        self.with_lease(RETENTION_JOB, RETENTION_LEASE_SECS, now, || {
            run_retention_at(&self.db, &options, now)
        })
        .await
    }

    async fn with_lease<T, F, Fut>(&self, job: &str, ttl_secs: i64, now: i64, run: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self
            .db
            .try_acquire_lease(job, &self.holder, ttl_secs, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(job = job, "Previous run still active, skipping tick");
                return None;
            }
            Err(e) => {
                tracing::error!(job = job, error = %e, "Failed to acquire job lease");
                return None;
            }
        }

        let result = run().await;

        if let Err(e) = self.db.release_lease(job, &self.holder).await {
            tracing::warn!(job = job, error = %e, "Failed to release job lease");
        }

        match result {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(job = job, error = %e.detail(), "Scheduled job failed");
                None
            }
        }
    }
}

/// Time from `now` until the next occurrence of `at` (UTC). An `at` equal to
/// the current time of day means tomorrow.
pub fn duration_until_next(now: DateTime<Utc>, at: NaiveTime) -> Duration {
    let today = now.date_naive().and_time(at).and_utc();
    let next = if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
