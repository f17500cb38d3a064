use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process. Retry once it is released.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// text in sqlx's error display.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Preference Dimensions
// ============================================================================

/// A facet of an article a user can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceDimension {
    Category,
    Source,
    Author,
}

/// How one dimension is looked up in the catalog.
#[derive(Debug, Clone, Copy)]
pub struct DimensionResolver {
    /// Column of `news_articles` holding the target id
    pub column: &'static str,
    /// Reads the same target id off a loaded article
    pub target: fn(&Article) -> i64,
}

impl PreferenceDimension {
    pub const ALL: [PreferenceDimension; 3] = [
        PreferenceDimension::Category,
        PreferenceDimension::Source,
        PreferenceDimension::Author,
    ];

    /// Stored value of `user_preferences.preference_type`
    pub fn as_str(self) -> &'static str {
        match self {
            PreferenceDimension::Category => "category",
            PreferenceDimension::Source => "source",
            PreferenceDimension::Author => "author",
        }
    }

    pub fn resolver(self) -> DimensionResolver {
        match self {
            PreferenceDimension::Category => DimensionResolver {
                column: "category_id",
                target: |a| a.category_id,
            },
            PreferenceDimension::Source => DimensionResolver {
                column: "source_id",
                target: |a| a.source_id,
            },
            PreferenceDimension::Author => DimensionResolver {
                column: "author_id",
                target: |a| a.author_id,
            },
        }
    }
}

impl fmt::Display for PreferenceDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown preference dimension '{0}' (expected category, source or author)")]
pub struct UnknownDimension(pub String);

impl FromStr for PreferenceDimension {
    type Err = UnknownDimension;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "category" => Ok(PreferenceDimension::Category),
            "source" | "publisher" => Ok(PreferenceDimension::Source),
            "author" => Ok(PreferenceDimension::Author),
            _ => Err(UnknownDimension(s.to_string())),
        }
    }
}

/// A single preference declaration: the dimension plus its target id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceTarget {
    Category(i64),
    Source(i64),
    Author(i64),
}

impl PreferenceTarget {
    pub fn new(dimension: PreferenceDimension, target_id: i64) -> Self {
        match dimension {
            PreferenceDimension::Category => PreferenceTarget::Category(target_id),
            PreferenceDimension::Source => PreferenceTarget::Source(target_id),
            PreferenceDimension::Author => PreferenceTarget::Author(target_id),
        }
    }

    pub fn dimension(self) -> PreferenceDimension {
        match self {
            PreferenceTarget::Category(_) => PreferenceDimension::Category,
            PreferenceTarget::Source(_) => PreferenceDimension::Source,
            PreferenceTarget::Author(_) => PreferenceDimension::Author,
        }
    }

    pub fn target_id(self) -> i64 {
        match self {
            PreferenceTarget::Category(id)
            | PreferenceTarget::Source(id)
            | PreferenceTarget::Author(id) => id,
        }
    }
}

/// Per-dimension target id sets for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionSets {
    sets: BTreeMap<PreferenceDimension, BTreeSet<i64>>,
}

impl DimensionSets {
    pub fn insert(&mut self, target: PreferenceTarget) {
        self.sets
            .entry(target.dimension())
            .or_default()
            .insert(target.target_id());
    }

    pub fn set(&mut self, dimension: PreferenceDimension, ids: BTreeSet<i64>) {
        if ids.is_empty() {
            self.sets.remove(&dimension);
        } else {
            self.sets.insert(dimension, ids);
        }
    }

    pub fn ids(&self, dimension: PreferenceDimension) -> Option<&BTreeSet<i64>> {
        self.sets.get(&dimension).filter(|ids| !ids.is_empty())
    }

    /// True when every dimension is empty.
    pub fn is_empty(&self) -> bool {
        self.sets.values().all(BTreeSet::is_empty)
    }

    /// Dimensions with at least one target, in a stable order.
    pub fn non_empty(&self) -> impl Iterator<Item = (PreferenceDimension, &BTreeSet<i64>)> {
        self.sets
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(dim, ids)| (*dim, ids))
    }

    /// Boolean match: the article satisfies at least one dimension.
    pub fn matches(&self, article: &Article) -> bool {
        self.non_empty()
            .any(|(dim, ids)| ids.contains(&(dim.resolver().target)(article)))
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Article as held by the catalog
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category_id: i64,
    pub source_id: i64,
    pub author_id: i64,
    pub published_at: Option<i64>,
    pub created_at: i64,
}

/// Article to be written into the catalog
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub category_id: i64,
    pub source_id: i64,
    pub author_id: i64,
    pub published_at: Option<i64>,
    pub created_at: i64,
}

/// Stored preference row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub id: i64,
    pub user_id: i64,
    pub target: PreferenceTarget,
    pub created_at: i64,
}

// ============================================================================
// Feed
// ============================================================================

/// Materialized link between a user and an article.
///
/// `created_at` is set once when matching inserts the row and doubles as the
/// entry's `preferred_at`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct FeedEntry {
    pub user_id: i64,
    pub article_id: i64,
    pub is_read: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Article decorated with the reader's feed state
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct FeedItem {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category_id: i64,
    pub source_id: i64,
    pub author_id: i64,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub is_read: bool,
    pub preferred_at: i64,
}

/// Fully resolved feed predicate. Every field narrows the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    pub is_read: Option<bool>,
    /// Inclusive lower bound on the entry's `created_at`
    pub created_from: Option<i64>,
    /// Exclusive upper bound on the entry's `created_at`
    pub created_before: Option<i64>,
    pub author_id: Option<i64>,
    pub category_id: Option<i64>,
    pub publisher_id: Option<i64>,
    /// Case-insensitive substring of title or content
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(category_id: i64, source_id: i64, author_id: i64) -> Article {
        Article {
            id: 1,
            title: "t".to_string(),
            content: "c".to_string(),
            category_id,
            source_id,
            author_id,
            published_at: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_dimension_round_trip_through_str() {
        for dim in PreferenceDimension::ALL {
            assert_eq!(dim.as_str().parse::<PreferenceDimension>().unwrap(), dim);
        }
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let err = "keyword".parse::<PreferenceDimension>().unwrap_err();
        assert_eq!(err, UnknownDimension("keyword".to_string()));
    }

    #[test]
    fn test_dimension_sets_empty_when_all_sets_empty() {
        let mut sets = DimensionSets::default();
        assert!(sets.is_empty());
        sets.set(PreferenceDimension::Author, BTreeSet::new());
        assert!(sets.is_empty());
        sets.insert(PreferenceTarget::Author(3));
        assert!(!sets.is_empty());
    }

    #[test]
    fn test_dimension_sets_match_any_dimension() {
        let mut sets = DimensionSets::default();
        sets.insert(PreferenceTarget::Category(5));
        sets.insert(PreferenceTarget::Author(7));

        assert!(sets.matches(&article(5, 1, 1)));
        assert!(sets.matches(&article(9, 1, 7)));
        assert!(!sets.matches(&article(9, 5, 1)), "source 5 is not a category");
    }

    #[test]
    fn test_resolver_columns() {
        assert_eq!(PreferenceDimension::Category.resolver().column, "category_id");
        assert_eq!(PreferenceDimension::Source.resolver().column, "source_id");
        assert_eq!(PreferenceDimension::Author.resolver().column, "author_id");
    }
}
