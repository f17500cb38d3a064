//! Small helpers shared by the query layer.

/// Maximum allowed search query length
pub const MAX_SEARCH_QUERY_LENGTH: usize = 256;

/// Seconds in one day
pub const SECS_PER_DAY: i64 = 86_400;

/// Escape `\`, `%` and `_` so the text matches literally inside a
/// `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Case folding applied to both searchable text and search queries.
///
/// Full Unicode lowercasing; SQLite's own `LOWER()` only folds ASCII.
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// `now - days`, saturating at the i64 range
pub fn days_before(now: i64, days: u32) -> i64 {
    now.saturating_sub(i64::from(days).saturating_mul(SECS_PER_DAY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like_plain_text_unchanged() {
        assert_eq!(escape_like("rust news"), "rust news");
    }

    #[test]
    fn test_escape_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn test_fold_case_non_ascii() {
        assert_eq!(fold_case("ÉCOLE Über"), "école über");
    }

    #[test]
    fn test_days_before() {
        assert_eq!(days_before(10 * SECS_PER_DAY, 3), 7 * SECS_PER_DAY);
        assert_eq!(days_before(100, 0), 100);
    }
}
