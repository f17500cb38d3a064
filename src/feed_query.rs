//! Filtered, paginated feed retrieval.
//!
//! Every filter (read state, date range, author, category, publisher and
//! search) is resolved into one [`FeedFilter`] and pushed down to storage, so
//! `total` and the page slice are computed over the same filtered population.

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FeedSettings;
use crate::error::{FeedError, Result};
use crate::storage::{Database, FeedFilter, FeedItem};
use crate::util::{days_before, MAX_SEARCH_QUERY_LENGTH};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Named retrieval parameters as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedQuery {
    pub is_read: Option<bool>,
    /// Page size
    pub limit: Option<u32>,
    /// Only entries materialized within the last `days` days
    pub days: Option<u32>,
    /// `YYYY-MM-DD`, inclusive
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`, inclusive
    pub end_date: Option<String>,
    pub author_id: Option<i64>,
    pub category_id: Option<i64>,
    pub publisher_id: Option<i64>,
    pub search: Option<String>,
    /// 1-based
    pub page: Option<u32>,
}

/// A validated query: storage filter plus page coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub filter: FeedFilter,
    pub page: u32,
    pub per_page: u32,
}

/// Pagination envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage<T> {
    pub current_page: u32,
    pub per_page: u32,
    pub last_page: u64,
    /// 1-based position of the first item, `None` on an empty page
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub total: u64,
    pub data: Vec<T>,
}

impl<T> FeedPage<T> {
    fn new(page: u32, per_page: u32, total: u64, data: Vec<T>) -> Self {
        let per = u64::from(per_page);
        let last_page = total.div_ceil(per).max(1);
        let offset = u64::from(page - 1) * per;
        let (from, to) = if data.is_empty() {
            (None, None)
        } else {
            (Some(offset + 1), Some(offset + data.len() as u64))
        };
        Self {
            current_page: page,
            per_page,
            last_page,
            from,
            to,
            total,
            data,
        }
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        FeedError::invalid(format!("{field} must be a YYYY-MM-DD date, got '{value}'"))
    })
}

fn midnight_utc(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

impl FeedQuery {
    /// Validate and resolve against `now` (UNIX seconds).
    pub fn resolve(&self, now: i64, settings: &FeedSettings) -> Result<ResolvedQuery> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(FeedError::invalid("page must be at least 1"));
        }

        let per_page = match self.limit {
            Some(0) => return Err(FeedError::invalid("limit must be at least 1")),
            Some(limit) => limit.min(settings.max_page_size),
            None => settings.default_page_size,
        };

        let start = self
            .start_date
            .as_deref()
            .map(|s| parse_date("start_date", s))
            .transpose()?;
        let end = self
            .end_date
            .as_deref()
            .map(|s| parse_date("end_date", s))
            .transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(FeedError::invalid(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }

        let mut created_from = start.map(midnight_utc);
        if let Some(days) = self.days {
            if days == 0 {
                return Err(FeedError::invalid("days must be at least 1"));
            }
            let since = days_before(now, days);
            created_from = Some(created_from.map_or(since, |from| from.max(since)));
        }
        // Inclusive end day: everything before the following midnight
        let created_before = end.and_then(|d| d.succ_opt()).map(midnight_utc);

        let search = match self.search.as_deref().map(str::trim) {
            Some(s) if s.chars().count() > MAX_SEARCH_QUERY_LENGTH => {
                return Err(FeedError::invalid(format!(
                    "search must be at most {MAX_SEARCH_QUERY_LENGTH} characters"
                )));
            }
            Some("") | None => None,
            Some(s) => Some(s.to_string()),
        };

        Ok(ResolvedQuery {
            filter: FeedFilter {
                is_read: self.is_read,
                created_from,
                created_before,
                author_id: self.author_id,
                category_id: self.category_id,
                publisher_id: self.publisher_id,
                search,
            },
            page,
            per_page,
        })
    }
}

/// Serve one page of `user_id`'s feed.
pub async fn query_feed(
    db: &Database,
    user_id: i64,
    query: &FeedQuery,
    settings: &FeedSettings,
) -> Result<FeedPage<FeedItem>> {
    query_feed_at(db, user_id, query, settings, Utc::now().timestamp()).await
}

/// [`query_feed`] with an explicit `now`, which anchors the `days` filter.
pub async fn query_feed_at(
    db: &Database,
    user_id: i64,
    query: &FeedQuery,
    settings: &FeedSettings,
    now: i64,
) -> Result<FeedPage<FeedItem>> {
    let resolved = query.resolve(now, settings)?;
    let offset = u64::from(resolved.page - 1) * u64::from(resolved.per_page);

    let (total, items) = db
        .fetch_feed_page(
            user_id,
            &resolved.filter,
            offset,
            u64::from(resolved.per_page),
        )
        .await?;

    tracing::debug!(
        user_id = user_id,
        page = resolved.page,
        per_page = resolved.per_page,
        total = total,
        returned = items.len(),
        "Feed page served"
    );

    Ok(FeedPage::new(resolved.page, resolved.per_page, total, items))
}
