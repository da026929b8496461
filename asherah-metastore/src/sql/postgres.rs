//! PostgreSQL metastore backend
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
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

pub const SELECT_BY_KEY_QUERY: &str =
    "SELECT id, created, key_record FROM encryption_key WHERE id = $1 AND created = $2";

pub const SELECT_FIRST_PAGE_QUERY: &str = "SELECT id, created, key_record FROM encryption_key
    WHERE created < $1 AND id LIKE $2 ESCAPE '!'
    ORDER BY created, id
    LIMIT $3";

pub const SELECT_NEXT_PAGE_QUERY: &str = "SELECT id, created, key_record FROM encryption_key
    WHERE created < $1 AND id LIKE $2 ESCAPE '!' AND (created, id) > ($4::TIMESTAMP, $5::VARCHAR)
    ORDER BY created, id
    LIMIT $3";

pub const UPDATE_KEY_RECORD_BY_KEY_QUERY: &str =
    "UPDATE encryption_key SET key_record = $1 WHERE id = $2 AND created = $3";

/// PostgreSQL metastore
pub struct PostgresMetastore {
    client: Client,
    page_size: i64,
}

impl PostgresMetastore {
    /// Connect to the database
    pub async fn connect(config: &SqlConfig) -> MetastoreResult<Self> {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connecting to PostgreSQL metastore"
        );

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            MetastoreError::Connectivity(format!("Failed to connect to database: {}", e))
        })?;

        // Spawn connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Database connection error");
            }
        });

        Ok(Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Override the scan page size
    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl Metastore for PostgresMetastore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn get_by_key(&self, id: &str, created: i64) -> MetastoreResult<Option<EnvelopeKeyRecord>> {
        let created_at = to_timestamp(created)?;
        let row = self
            .client
            .query_opt(SELECT_BY_KEY_QUERY, &[&id, &created_at])
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

        let rows = match token {
            None => self
                .client
                .query(SELECT_FIRST_PAGE_QUERY, &[&cutoff, &pattern, &self.page_size])
                .await,
            Some(PageToken::Keyset { created, id }) => self
                .client
                .query(
                    SELECT_NEXT_PAGE_QUERY,
                    &[&cutoff, &pattern, &self.page_size, &created, &id],
                )
                .await,
            Some(other) => {
                return Err(MetastoreError::Configuration(format!(
                    "PostgreSQL scan cannot resume from {:?}",
                    other
                )))
            }
        }
        .map_err(|e| query_error("SELECT by created and id prefix", e))?;

        let page = keyset_page(rows.iter().map(stored_row).collect(), self.page_size)?;
        debug!(returned = page.records.len(), more = page.next.is_some(), "Scanned PostgreSQL page");

        Ok(page)
    }

    async fn update_revoked(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64> {
        let payload = record.key_record.to_json()?;
        let created_at = to_timestamp(record.created)?;

        self.client
            .execute(UPDATE_KEY_RECORD_BY_KEY_QUERY, &[&payload, &record.id, &created_at])
            .await
            .map_err(|e| query_error("UPDATE key record", e))
    }

    /// Each update commits on its own, so a failed row never rolls back the
    /// rows written before it.
    async fn batch_update_revoked(
        &self,
        records: &[EnvelopeKeyRecord],
    ) -> MetastoreResult<BatchOutcome> {
        let mut outcome = BatchOutcome::new(records.len());
        let statement = self
            .client
            .prepare(UPDATE_KEY_RECORD_BY_KEY_QUERY)
            .await
            .map_err(|e| query_error("PREPARE update", e))?;

        for record in records {
            let (payload, created_at) = match (record.key_record.to_json(), to_timestamp(record.created)) {
                (Ok(payload), Ok(created_at)) => (payload, created_at),
                (Err(e), _) => {
                    outcome.record_failure(record.key(), e.to_string());
                    continue;
                }
                (_, Err(e)) => {
                    outcome.record_failure(record.key(), e.to_string());
                    continue;
                }
            };

            match self
                .client
                .execute(&statement, &[&payload, &record.id, &created_at])
                .await
            {
                Ok(1) => outcome.succeeded += 1,
                Ok(rows) => outcome.record_failure(record.key(), format!("updated {} rows", rows)),
                Err(e) => {
                    let err = query_error("UPDATE key record", e);
                    if err.is_fatal() {
                        error!(
                            succeeded = outcome.succeeded,
                            total = records.len(),
                            "Aborting batch update"
                        );
                        return Err(err);
                    }
                    outcome.record_failure(record.key(), err.to_string());
                }
            }
        }

        Ok(outcome)
    }
}

fn query_error(operation: &str, err: tokio_postgres::Error) -> MetastoreError {
    if err.is_closed() {
        return MetastoreError::Connectivity(format!("{} failed: {}", operation, err));
    }
    match err.as_db_error() {
        Some(db_error) => classify_sql_state(operation, db_error.code().code(), db_error.message()),
        None => MetastoreError::Connectivity(format!("{} failed: {}", operation, err)),
    }
}

fn stored_row(row: &Row) -> MetastoreResult<StoredRow> {
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
