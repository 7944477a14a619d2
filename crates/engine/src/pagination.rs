//! Keyset pagination for the admin listings.
//!
//! Listings are ordered newest first by `(created_at, key)`. The cursor is the
//! position of the last row returned, encoded as `<rfc3339>|<key>`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use postbox_common::error::AppError;

/// Default page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Largest page an admin listing will return.
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub key: String,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, key: impl Into<String>) -> Self {
        Self {
            created_at,
            key: key.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}|{}", self.created_at.to_rfc3339(), self.key)
    }

    pub fn decode(raw: &str) -> Result<Self, AppError> {
        let invalid = || AppError::Validation(format!("Invalid cursor '{}'", raw));

        let (ts, key) = raw.split_once('|').ok_or_else(invalid)?;
        let created_at = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| invalid())?
            .with_timezone(&Utc);
        if key.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(created_at, key))
    }
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_size(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// One page of an admin listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with `LIMIT limit + 1`. The extra row,
    /// if present, only signals that another page exists.
    pub fn from_overfetch(mut rows: Vec<T>, limit: i64, cursor_of: impl Fn(&T) -> Cursor) -> Self {
        let limit = usize::try_from(limit).unwrap_or(0);
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let next_cursor = if has_more {
            rows.last().map(|row| cursor_of(row).encode())
        } else {
            None
        };

        Self {
            items: rows,
            next_cursor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cursor_roundtrip_with_uuid_key() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let cursor = Cursor::new(at, "6f1c6a4e-5d7b-4b8e-9a55-0f0c2d1e9b77");
        let encoded = cursor.encode();
        assert_eq!(
            encoded,
            "2026-03-04T05:06:07+00:00|6f1c6a4e-5d7b-4b8e-9a55-0f0c2d1e9b77"
        );
        assert_eq!(Cursor::decode(&encoded).unwrap(), cursor);
    }

    #[test]
    fn test_cursor_key_may_contain_separator() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let cursor = Cursor::new(at, "odd|address@x.com");
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap().key, "odd|address@x.com");
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(matches!(Cursor::decode("nope"), Err(AppError::Validation(_))));
        assert!(Cursor::decode("not-a-date|abc").is_err());
        assert!(Cursor::decode("2026-03-04T05:06:07Z|").is_err());
    }

    #[test]
    fn test_page_size_clamped() {
        assert_eq!(page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_overfetch_sets_next_cursor() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let rows = vec!["a", "b", "c"];
        let page = Page::from_overfetch(rows, 2, |k| Cursor::new(at, *k));
        assert_eq!(page.items, vec!["a", "b"]);
        assert_eq!(page.next_cursor, Some(Cursor::new(at, "b").encode()));

        let last = Page::from_overfetch(vec!["a"], 2, |k| Cursor::new(at, *k));
        assert_eq!(last.next_cursor, None);
    }
}
