//! Envelope key record identity, scan filters and pagination
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


use crate::error::MetastoreResult;
use asherah_types::{KeyClass, KeyRecord};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of an envelope key record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub id: String,
    pub created: i64,
}

impl RecordKey {
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            created,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={}, created={}", self.id, self.created)
    }
}

/// A stored envelope key, addressed by `(id, created)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeKeyRecord {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: i64,
    #[serde(rename = "KeyRecord")]
    pub key_record: KeyRecord,
}

impl EnvelopeKeyRecord {
    pub fn new(id: impl Into<String>, created: i64, key_record: KeyRecord) -> Self {
        Self {
            id: id.into(),
            created,
            key_record,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.id.clone(), self.created)
    }

    pub fn is_revoked(&self) -> bool {
        self.key_record.is_revoked()
    }

    /// Copy of this record with `KeyRecord.Revoked` set; identity is untouched
    pub fn with_revoked(&self) -> Self {
        Self {
            id: self.id.clone(),
            created: self.created,
            key_record: self.key_record.with_revoked(),
        }
    }

    /// Copy of this record with the key material replaced, for logging
    pub fn redacted(&self) -> Self {
        Self {
            id: self.id.clone(),
            created: self.created,
            key_record: self.key_record.redacted(),
        }
    }

    pub fn key_class(&self) -> Option<KeyClass> {
        KeyClass::from_id(&self.id)
    }
}

/// Selection of bulk revocation candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub id_prefix: String,
    /// Exclusive upper bound on `created`
    pub created_before: i64,
}

impl ScanFilter {
    pub fn new(id_prefix: impl Into<String>, created_before: i64) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            created_before,
        }
    }

    pub fn for_class(class: KeyClass, created_before: i64) -> Self {
        Self::new(class.prefix(), created_before)
    }

    pub fn matches_key(&self, id: &str, created: i64) -> bool {
        id.starts_with(&self.id_prefix) && created < self.created_before
    }

    pub fn matches(&self, record: &EnvelopeKeyRecord) -> bool {
        self.matches_key(&record.id, record.created)
    }
}

/// Continuation point of a paginated scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// Resume after this key (DynamoDB `ExclusiveStartKey`)
    After(RecordKey),
    /// Resume after `(created, id)` in the SQL sort order
    ///
    /// `created` is the stored column value, sub-second part included.
    Keyset { created: NaiveDateTime, id: String },
    /// Resume at this position of an ordered listing
    Offset(usize),
}

/// One page of scan results
///
/// Records that could not be decoded are returned in place as errors so a
/// single malformed row does not hide the rest of the page.
#[derive(Debug, Default)]
pub struct ScanPage {
    pub records: Vec<MetastoreResult<EnvelopeKeyRecord>>,
    pub next: Option<PageToken>,
}

/// A record that could not be written during a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub key: RecordKey,
    pub reason: String,
}

/// Result of a batch update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
}

impl BatchOutcome {
    pub fn new(attempted: usize) -> Self {
        Self {
            attempted,
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, key: RecordKey, reason: impl Into<String>) {
        self.failures.push(ItemFailure {
            key,
            reason: reason.into(),
        });
    }
}
