//! File-backed metastore for local development and tests
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


use crate::error::{MetastoreError, MetastoreResult};
use crate::metastore::Metastore;
use crate::record::{BatchOutcome, EnvelopeKeyRecord, PageToken, RecordKey, ScanFilter, ScanPage};
use async_trait::async_trait;
use asherah_types::KeyRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default number of records returned per scan page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Local metastore: one JSON file per envelope key record
pub struct LocalMetastore {
    /// Storage directory
    storage_path: PathBuf,
    page_size: usize,
    /// In-memory index of every record on disk, ordered by `(id, created)`
    records: RwLock<BTreeMap<RecordKey, KeyRecord>>,
}

impl LocalMetastore {
    /// Open (and create if needed) a local metastore directory
    pub async fn open<P: AsRef<Path>>(storage_path: P) -> MetastoreResult<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();

        fs::create_dir_all(&storage_path).await?;

        let store = Self {
            storage_path,
            page_size: DEFAULT_PAGE_SIZE,
            records: RwLock::new(BTreeMap::new()),
        };

        store.load_records().await?;

        Ok(store)
    }

    /// Override the scan page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store a new record; returns `false` if `(id, created)` already exists
    pub async fn store(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<bool> {
        let key = record.key();
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Ok(false);
        }

        self.write_record(record).await?;
        records.insert(key, record.key_record.clone());

        debug!(id = %record.id, created = record.created, "Envelope key record stored");
        Ok(true)
    }

    /// Number of records currently stored
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// `<hex id>.<created>.json`; hex keeps distinct ids in distinct files
    fn record_path(&self, key: &RecordKey) -> PathBuf {
        self.storage_path
            .join(format!("{}.{}.json", hex::encode(key.id.as_bytes()), key.created))
    }

    async fn load_records(&self) -> MetastoreResult<()> {
        let mut records = self.records.write().await;
        records.clear();

        let mut entries = fs::read_dir(&self.storage_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read envelope key record");
                    continue;
                }
            };

            match serde_json::from_str::<EnvelopeKeyRecord>(&content) {
                Ok(record) => {
                    records.insert(record.key(), record.key_record);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse envelope key record");
                }
            }
        }

        info!(
            path = %self.storage_path.display(),
            records = records.len(),
            "Local metastore loaded"
        );
        Ok(())
    }

    async fn write_record(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<()> {
        let path = self.record_path(&record.key());
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json).await?;
        Ok(())
    }

    /// Replace a stored payload; 0 when the record does not exist
    async fn replace(
        &self,
        records: &mut BTreeMap<RecordKey, KeyRecord>,
        record: &EnvelopeKeyRecord,
    ) -> MetastoreResult<u64> {
        let key = record.key();
        if !records.contains_key(&key) {
            return Ok(0);
        }

        self.write_record(record).await?;
        records.insert(key, record.key_record.clone());
        Ok(1)
    }
}

#[async_trait]
impl Metastore for LocalMetastore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn get_by_key(&self, id: &str, created: i64) -> MetastoreResult<Option<EnvelopeKeyRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&RecordKey::new(id, created))
            .map(|key_record| EnvelopeKeyRecord::new(id, created, key_record.clone())))
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        token: Option<PageToken>,
    ) -> MetastoreResult<ScanPage> {
        let offset = match token {
            None => 0,
            Some(PageToken::Offset(offset)) => offset,
            Some(other) => {
                return Err(MetastoreError::Configuration(format!(
                    "Local metastore cannot resume from {:?}",
                    other
                )))
            }
        };

        let records = self.records.read().await;
        let mut matching = records
            .iter()
            .filter(|(key, record)| filter.matches_key(&key.id, key.created) && !record.is_revoked())
            .skip(offset);

        let page: Vec<_> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, record)| Ok(EnvelopeKeyRecord::new(key.id.clone(), key.created, record.clone())))
            .collect();

        let next = if matching.next().is_some() {
            Some(PageToken::Offset(offset + page.len()))
        } else {
            None
        };

        debug!(offset, returned = page.len(), more = next.is_some(), "Scanned local metastore page");

        Ok(ScanPage { records: page, next })
    }

    async fn update_revoked(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64> {
        let mut records = self.records.write().await;
        self.replace(&mut records, record).await
    }

    async fn batch_update_revoked(
        &self,
        records: &[EnvelopeKeyRecord],
    ) -> MetastoreResult<BatchOutcome> {
        let mut outcome = BatchOutcome::new(records.len());
        let mut stored = self.records.write().await;

        for record in records {
            match self.replace(&mut stored, record).await {
                Ok(1) => outcome.succeeded += 1,
                Ok(_) => outcome.record_failure(record.key(), "record no longer exists"),
                Err(e) => outcome.record_failure(record.key(), e.to_string()),
            }
        }

        Ok(outcome)
    }
}
