//! Relational metastore backends
//!
//! PostgreSQL and MySQL share the Asherah table
//! `encryption_key(id VARCHAR, created TIMESTAMP, key_record TEXT)`.
//! Scans page by keyset over `(created, id)`.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


pub mod mysql;
pub mod postgres;

pub use mysql::MySqlMetastore;
pub use postgres::PostgresMetastore;

use crate::error::{MetastoreError, MetastoreResult};
use crate::record::{EnvelopeKeyRecord, PageToken, RecordKey, ScanPage};
use asherah_types::KeyRecord;
use chrono::{DateTime, NaiveDateTime};

/// Default number of rows fetched per scan page
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Escape character used by the `LIKE` prefix patterns (`ESCAPE '!'`)
pub const LIKE_ESCAPE: char = '!';

/// One `encryption_key` row before its payload is decoded
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredRow {
    pub id: String,
    pub created: NaiveDateTime,
    pub key_record: String,
}

impl StoredRow {
    pub fn into_record(self) -> MetastoreResult<EnvelopeKeyRecord> {
        let key = RecordKey::new(self.id, self.created.and_utc().timestamp());
        let key_record = KeyRecord::from_json(&self.key_record)
            .map_err(|e| MetastoreError::InvalidRecord(format!("{} for {}", e, key)))?;

        Ok(EnvelopeKeyRecord::new(key.id, key.created, key_record))
    }
}

/// Assemble a scan page from the rows of one keyset query
///
/// A full page continues after its last row. The cursor keeps the stored
/// timestamp as is, so rows sharing a second are neither repeated nor skipped.
pub(crate) fn keyset_page(rows: Vec<MetastoreResult<StoredRow>>, page_size: i64) -> MetastoreResult<ScanPage> {
    let next = if (rows.len() as i64) < page_size {
        None
    } else {
        match rows.last() {
            Some(Ok(last)) => Some(PageToken::Keyset {
                created: last.created,
                id: last.id.clone(),
            }),
            Some(Err(e)) => {
                return Err(MetastoreError::Scan(format!(
                    "Cannot resume after an unreadable row: {}",
                    e
                )))
            }
            None => None,
        }
    };

    let records = rows
        .into_iter()
        .map(|row| row.and_then(StoredRow::into_record))
        .collect();

    Ok(ScanPage { records, next })
}

/// Map a SQLSTATE onto the metastore taxonomy
///
/// Connection and authorization classes are connectivity failures, schema
/// and privilege errors (class 42, unknown database or schema) are
/// configuration failures. Anything else only affects the statement at hand.
pub(crate) fn classify_sql_state(operation: &str, state: &str, message: &str) -> MetastoreError {
    let described = format!("{} failed: {} (SQLSTATE {})", operation, message, state);
    match state.get(..2) {
        Some("08") | Some("28") | Some("57") => MetastoreError::Connectivity(described),
        Some("42") | Some("3D") | Some("3F") => MetastoreError::Configuration(described),
        _ => MetastoreError::Backend(described),
    }
}

/// Unix seconds to the `TIMESTAMP` representation of `created`
pub(crate) fn to_timestamp(created: i64) -> MetastoreResult<NaiveDateTime> {
    DateTime::from_timestamp(created, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| MetastoreError::InvalidRecord(format!("created {} out of range", created)))
}

/// `LIKE` pattern matching ids that start with `prefix` literally
///
/// `_` and `%` are wildcards in `LIKE`, and Asherah prefixes start with `_`.
pub fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 4);
    for c in prefix.chars() {
        if matches!(c, '_' | '%') || c == LIKE_ESCAPE {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stored(id: &str, created: NaiveDateTime) -> StoredRow {
        StoredRow {
            id: id.to_string(),
            created,
            key_record: r#"{"Created":1,"Key":"a2V5"}"#.to_string(),
        }
    }

    fn at(second: u32, millis: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 3, 7)
            .unwrap()
            .and_hms_milli_opt(17, 34, second, millis)
            .unwrap()
    }

    /// Rows after `token` in `(created, id)` order, as the next-page query selects them
    fn rows_after(table: &[StoredRow], token: Option<&PageToken>, limit: usize) -> Vec<MetastoreResult<StoredRow>> {
        let mut sorted = table.to_vec();
        sorted.sort_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)));
        sorted
            .into_iter()
            .filter(|row| match token {
                Some(PageToken::Keyset { created, id }) => (row.created, &row.id) > (*created, id),
                _ => true,
            })
            .take(limit)
            .map(Ok)
            .collect()
    }

    #[test]
    fn test_like_prefix_pattern_escapes_wildcards() {
        assert_eq!(like_prefix_pattern("_IK_"), "!_IK!_%");
        assert_eq!(like_prefix_pattern("_SK_50%"), "!_SK!_50!%%");
        assert_eq!(like_prefix_pattern("a!b"), "a!!b%");
        assert_eq!(like_prefix_pattern(r"a\b"), r"a\b%");
    }

    #[test]
    fn test_to_timestamp() {
        let ts = to_timestamp(1551980041).unwrap();
        assert_eq!(ts.and_utc().timestamp(), 1551980041);
        assert!(to_timestamp(i64::MAX).is_err());
    }

    #[test]
    fn test_keyset_paging_within_one_second() {
        let table = vec![
            stored("_IK_a", at(1, 100)),
            stored("_IK_b", at(1, 200)),
            stored("_IK_c", at(1, 300)),
            stored("_IK_d", at(1, 400)),
            stored("_IK_e", at(2, 0)),
        ];

        let mut seen = Vec::new();
        let mut token = None;
        for _ in 0..10 {
            let page = keyset_page(rows_after(&table, token.as_ref(), 2), 2).unwrap();
            for record in page.records {
                seen.push(record.unwrap().id);
            }
            token = page.next;
            if token.is_none() {
                break;
            }
        }

        assert_eq!(seen, vec!["_IK_a", "_IK_b", "_IK_c", "_IK_d", "_IK_e"]);
    }

    #[test]
    fn test_cursor_keeps_sub_second_precision() {
        let page = keyset_page(vec![Ok(stored("_SK_1", at(5, 250)))], 1).unwrap();
        assert_eq!(
            page.next,
            Some(PageToken::Keyset {
                created: at(5, 250),
                id: "_SK_1".to_string(),
            })
        );
        assert_eq!(page.records[0].as_ref().unwrap().created, at(5, 0).and_utc().timestamp());
    }

    #[test]
    fn test_short_page_ends_scan() {
        let page = keyset_page(vec![Ok(stored("_SK_1", at(5, 0)))], 2).unwrap();
        assert!(page.next.is_none());
    }

    #[test]
    fn test_unreadable_last_row_stops_scan() {
        let rows = vec![
            Ok(stored("_SK_1", at(5, 0))),
            Err(MetastoreError::InvalidRecord("created column".to_string())),
        ];
        assert!(matches!(keyset_page(rows, 2), Err(MetastoreError::Scan(_))));
    }

    #[test]
    fn test_undecodable_payload_is_reported_in_place() {
        let mut bad = stored("_SK_2", at(6, 0));
        bad.key_record = "{not json".to_string();

        let page = keyset_page(vec![Ok(stored("_SK_1", at(5, 0))), Ok(bad)], 10).unwrap();
        assert!(page.records[0].is_ok());
        assert!(matches!(page.records[1], Err(MetastoreError::InvalidRecord(_))));
    }

    #[test]
    fn test_sql_state_classification() {
        // PostgreSQL
        assert!(matches!(
            classify_sql_state("UPDATE", "42501", "permission denied for table encryption_key"),
            MetastoreError::Configuration(_)
        ));
        assert!(matches!(
            classify_sql_state("SELECT", "42P01", "relation \"encryption_key\" does not exist"),
            MetastoreError::Configuration(_)
        ));
        assert!(matches!(
            classify_sql_state("SELECT", "28P01", "password authentication failed"),
            MetastoreError::Connectivity(_)
        ));
        assert!(matches!(
            classify_sql_state("SELECT", "57P01", "terminating connection due to administrator command"),
            MetastoreError::Connectivity(_)
        ));

        // MySQL
        assert!(classify_sql_state("SELECT", "28000", "Access denied for user").is_fatal());
        assert!(classify_sql_state("SELECT", "42S02", "Table 'asherah.encryption_key' doesn't exist").is_fatal());
        assert!(classify_sql_state("UPDATE", "42000", "UPDATE command denied to user").is_fatal());
        assert!(classify_sql_state("SELECT", "08S01", "Communications link failure").is_fatal());

        // Row level
        assert!(!classify_sql_state("UPDATE", "23505", "duplicate key").is_fatal());
        assert!(!classify_sql_state("UPDATE", "HY000", "Lock wait timeout exceeded").is_fatal());
        assert!(!classify_sql_state("UPDATE", "40001", "could not serialize access").is_fatal());
    }
}
