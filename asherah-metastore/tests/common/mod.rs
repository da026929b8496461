//! Test doubles shared by the integration tests

#![allow(dead_code)]

use asherah_metastore::local_store::LocalMetastore;
use asherah_metastore::{
    BatchOutcome, EnvelopeKeyRecord, Metastore, MetastoreError, MetastoreResult, PageToken,
    RecordKey, ScanFilter, ScanPage,
};
use asherah_types::{KeyMeta, KeyRecord};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tempfile::TempDir;

/// A write issued against a metastore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    Update(RecordKey),
    Batch(Vec<RecordKey>),
}

pub fn key_record(created: i64) -> KeyRecord {
    KeyRecord::new(
        created,
        "c2VjcmV0LWtleS1tYXRlcmlhbA==",
        Some(KeyMeta {
            key_id: "_SK_api_ecomm".to_string(),
            created: 1,
        }),
    )
}

pub fn record(id: &str, created: i64) -> EnvelopeKeyRecord {
    EnvelopeKeyRecord::new(id, created, key_record(created))
}

pub fn record_with_flag(id: &str, created: i64, revoked: bool) -> EnvelopeKeyRecord {
    let mut record = record(id, created);
    record.key_record.revoked = Some(revoked);
    record
}

/// Local metastore that records every write and can fail chosen items
pub struct RecordingMetastore {
    pub inner: LocalMetastore,
    pub writes: Mutex<Vec<WriteCall>>,
    pub failing_ids: HashSet<String>,
    pub fatal_scan: bool,
}

impl RecordingMetastore {
    pub async fn new(records: &[EnvelopeKeyRecord]) -> (Self, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let inner = LocalMetastore::open(temp_dir.path())
            .await
            .unwrap()
            .with_page_size(2);
        for record in records {
            assert!(inner.store(record).await.unwrap());
        }

        let store = Self {
            inner,
            writes: Mutex::new(Vec::new()),
            failing_ids: HashSet::new(),
            fatal_scan: false,
        };
        (store, temp_dir)
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing_ids.insert(id.to_string());
        self
    }

    pub fn with_fatal_scan(mut self) -> Self {
        self.fatal_scan = true;
        self
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.lock().unwrap().clone()
    }

    pub async fn stored(&self, id: &str, created: i64) -> Option<EnvelopeKeyRecord> {
        self.inner.get_by_key(id, created).await.unwrap()
    }
}

#[async_trait]
impl Metastore for RecordingMetastore {
    fn backend_name(&self) -> &'static str {
        "recording"
    }

    async fn get_by_key(&self, id: &str, created: i64) -> MetastoreResult<Option<EnvelopeKeyRecord>> {
        self.inner.get_by_key(id, created).await
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        token: Option<PageToken>,
    ) -> MetastoreResult<ScanPage> {
        if self.fatal_scan && token.is_some() {
            return Err(MetastoreError::Connectivity("connection reset".to_string()));
        }
        self.inner.scan_page(filter, token).await
    }

    async fn update_revoked(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64> {
        self.writes.lock().unwrap().push(WriteCall::Update(record.key()));
        self.inner.update_revoked(record).await
    }

    async fn batch_update_revoked(
        &self,
        records: &[EnvelopeKeyRecord],
    ) -> MetastoreResult<BatchOutcome> {
        self.writes
            .lock()
            .unwrap()
            .push(WriteCall::Batch(records.iter().map(|r| r.key()).collect()));

        let (failing, passing): (Vec<_>, Vec<_>) = records
            .iter()
            .cloned()
            .partition(|r| self.failing_ids.contains(&r.id));

        let mut outcome = self.inner.batch_update_revoked(&passing).await?;
        outcome.attempted = records.len();
        for record in failing {
            outcome.record_failure(record.key(), "simulated write failure");
        }
        Ok(outcome)
    }
}

/// Metastore that returns fixed scan pages regardless of the filter
pub struct StaticMetastore {
    pub pages: Vec<Vec<MetastoreResult<EnvelopeKeyRecord>>>,
    pub update_rows: u64,
    pub writes: Mutex<Vec<WriteCall>>,
}

impl StaticMetastore {
    pub fn new(pages: Vec<Vec<MetastoreResult<EnvelopeKeyRecord>>>) -> Self {
        Self {
            pages,
            update_rows: 1,
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Metastore for StaticMetastore {
    fn backend_name(&self) -> &'static str {
        "static"
    }

    async fn get_by_key(&self, id: &str, created: i64) -> MetastoreResult<Option<EnvelopeKeyRecord>> {
        for page in &self.pages {
            for record in page.iter().flatten() {
                if record.id == id && record.created == created {
                    return Ok(Some(record.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn scan_page(
        &self,
        _filter: &ScanFilter,
        token: Option<PageToken>,
    ) -> MetastoreResult<ScanPage> {
        let index = match token {
            None => 0,
            Some(PageToken::Offset(index)) => index,
            Some(other) => panic!("unexpected token {:?}", other),
        };

        let records = self.pages[index]
            .iter()
            .map(|result| match result {
                Ok(record) => Ok(record.clone()),
                Err(e) => Err(MetastoreError::InvalidRecord(e.to_string())),
            })
            .collect();
        let next = (index + 1 < self.pages.len()).then(|| PageToken::Offset(index + 1));

        Ok(ScanPage { records, next })
    }

    async fn update_revoked(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64> {
        self.writes.lock().unwrap().push(WriteCall::Update(record.key()));
        Ok(self.update_rows)
    }

    async fn batch_update_revoked(
        &self,
        records: &[EnvelopeKeyRecord],
    ) -> MetastoreResult<BatchOutcome> {
        self.writes
            .lock()
            .unwrap()
            .push(WriteCall::Batch(records.iter().map(|r| r.key()).collect()));
        let mut outcome = BatchOutcome::new(records.len());
        outcome.succeeded = records.len();
        Ok(outcome)
    }
}
