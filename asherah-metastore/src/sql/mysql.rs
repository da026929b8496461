//! MySQL metastore backend
//!
//! The sqlx session time zone defaults to UTC, so `created` converts to unix
//! seconds without an offset.
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


use super::{classify_sql_state, keyset_page, like_prefix_pattern, to_timestamp, StoredRow, DEFAULT_PAGE_SIZE};
use crate::error::{MetastoreError, MetastoreResult};
use crate::metastore::Metastore;
use crate::record::{BatchOutcome, EnvelopeKeyRecord, PageToken, ScanFilter, ScanPage};
use asherah_config::SqlConfig;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use tracing::{debug, error, info};

pub const SELECT_BY_KEY_QUERY: &str =
    "SELECT id, created, key_record FROM encryption_key WHERE id = ? AND created = ?";

pub const SELECT_FIRST_PAGE_QUERY: &str = "SELECT id, created, key_record FROM encryption_key
    WHERE created < ? AND id LIKE ? ESCAPE '!'
    ORDER BY created, id
    LIMIT ?";

pub const SELECT_NEXT_PAGE_QUERY: &str = "SELECT id, created, key_record FROM encryption_key
    WHERE created < ? AND id LIKE ? ESCAPE '!' AND (created, id) > (?, ?)
    ORDER BY created, id
    LIMIT ?";

pub const UPDATE_KEY_RECORD_BY_KEY_QUERY: &str =
    "UPDATE encryption_key SET key_record = ? WHERE id = ? AND created = ?";

/// MySQL metastore
pub struct MySqlMetastore {
    pool: MySqlPool,
    page_size: i64,
}

impl MySqlMetastore {
    /// Connect to the database
    ///
    /// A single connection is enough; the revocation engine issues one
    /// statement at a time.
    pub async fn connect(config: &SqlConfig) -> MetastoreResult<Self> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connecting to MySQL metastore"
        );

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| MetastoreError::Connectivity(format!("Failed to connect to database: {}", e)))?;

        Ok(Self::with_pool(pool))
    }

    /// Wrap an existing pool
    pub fn with_pool(pool: MySqlPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the scan page size
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn update(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64> {
        let payload = record.key_record.to_json()?;
        let created_at = to_timestamp(record.created)?;

        let result = sqlx::query(UPDATE_KEY_RECORD_BY_KEY_QUERY)
            .bind(payload)
            .bind(record.id.as_str())
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| query_error("UPDATE key record", e))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Metastore for MySqlMetastore {
    fn backend_name(&self) -> &'static str {
        "mysql"
    }

    async fn get_by_key(&self, id: &str, created: i64) -> MetastoreResult<Option<EnvelopeKeyRecord>> {
        let created_at = to_timestamp(created)?;
        let row = sqlx::query(SELECT_BY_KEY_QUERY)
            .bind(id)
            .bind(created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("SELECT by key", e))?;

        row.as_ref()
            .map(|row| stored_row(row).and_then(StoredRow::into_record))
            .transpose()
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        token: Option<PageToken>,
    ) -> MetastoreResult<ScanPage> {
        let cutoff = to_timestamp(filter.created_before)?;
        let pattern = like_prefix_pattern(&filter.id_prefix);

        let query = match token {
            None => sqlx::query(SELECT_FIRST_PAGE_QUERY)
                .bind(cutoff)
                .bind(pattern)
                .bind(self.page_size),
            Some(PageToken::Keyset { created, id }) => sqlx::query(SELECT_NEXT_PAGE_QUERY)
                .bind(cutoff)
                .bind(pattern)
                .bind(created)
                .bind(id)
                .bind(self.page_size),
            Some(other) => {
                return Err(MetastoreError::Configuration(format!(
                    "MySQL scan cannot resume from {:?}",
                    other
                )))
            }
        };

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_error("SELECT by created and id prefix", e))?;

        let page = keyset_page(rows.iter().map(stored_row).collect(), self.page_size)?;
        debug!(returned = page.records.len(), more = page.next.is_some(), "Scanned MySQL page");

        Ok(page)
    }

    async fn update_revoked(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64> {
        self.update(record).await
    }

    /// Statements run outside a transaction, so every row commits on its own.
    async fn batch_update_revoked(
        &self,
        records: &[EnvelopeKeyRecord],
    ) -> MetastoreResult<BatchOutcome> {
        let mut outcome = BatchOutcome::new(records.len());

        for record in records {
            match self.update(record).await {
                Ok(1) => outcome.succeeded += 1,
                Ok(rows) => outcome.record_failure(record.key(), format!("updated {} rows", rows)),
                Err(e) if e.is_fatal() => {
                    error!(
                        succeeded = outcome.succeeded,
                        total = records.len(),
                        "Aborting batch update"
                    );
                    return Err(e);
                }
                Err(e) => outcome.record_failure(record.key(), e.to_string()),
            }
        }

        Ok(outcome)
    }
}

fn query_error(operation: &str, err: sqlx::Error) -> MetastoreError {
    match &err {
        sqlx::Error::Database(db_error) => match db_error.code() {
            Some(state) => classify_sql_state(operation, &state, db_error.message()),
            None => MetastoreError::Backend(format!("{} failed: {}", operation, db_error)),
        },
        sqlx::Error::Configuration(_) => {
            MetastoreError::Configuration(format!("{} failed: {}", operation, err))
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            MetastoreError::Connectivity(format!("{} failed: {}", operation, err))
        }
        _ => MetastoreError::Backend(format!("{} failed: {}", operation, err)),
    }
}

fn stored_row(row: &MySqlRow) -> MetastoreResult<StoredRow> {
    let id: String = row
        .try_get(0)
        .map_err(|e| MetastoreError::InvalidRecord(format!("id column: {}", e)))?;
    let created = row
        .try_get(1)
        .map_err(|e| MetastoreError::InvalidRecord(format!("created column for {}: {}", id, e)))?;
    let key_record = row
        .try_get(2)
        .map_err(|e| MetastoreError::InvalidRecord(format!("key_record column for {}: {}", id, e)))?;

    Ok(StoredRow {
        id,
        created,
        key_record,
    })
}
