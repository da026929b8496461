//! Key revocation engine
//!
//! Drives a [`Metastore`] to revoke one key by `(id, created)` or every key of
//! a class created before a cutoff. Revocation only ever flips
//! `KeyRecord.Revoked` to `true`, so every operation can be re-run safely.
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
use crate::metastore::Metastore;
use crate::record::{EnvelopeKeyRecord, ItemFailure, ScanFilter};
use asherah_types::{DataRowRecord, KeyClass};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Whether write operations are performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Perform every read, suppress every write
    DryRun,
    Execute,
}

impl RunMode {
    pub fn from_execute_flag(execute: bool) -> Self {
        if execute {
            RunMode::Execute
        } else {
            RunMode::DryRun
        }
    }

    pub fn is_dry_run(&self) -> bool {
        *self == RunMode::DryRun
    }
}

/// Result of a single-key revocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleOutcome {
    NotFound,
    AlreadyRevoked,
    /// Dry run: the record would have been revoked
    WouldRevoke,
    /// Rows reported by the backend; anything but 1 is suspicious
    Revoked { rows: u64 },
    /// A non-fatal lookup or update error
    Failed { reason: String },
}

/// Result of a bulk revocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub dry_run: bool,
    /// Records returned by the scan
    pub fetched: usize,
    /// Scan results that could not be decoded
    pub unreadable: usize,
    /// Scan results outside the prefix or cutoff
    pub out_of_range: usize,
    pub already_revoked: usize,
    /// Records written, or that would have been written in a dry run
    pub attempted: usize,
    pub revoked: usize,
    pub failures: Vec<ItemFailure>,
}

/// Revocation engine over a metastore backend
pub struct Revoker {
    metastore: Arc<dyn Metastore>,
    mode: RunMode,
}

impl Revoker {
    pub fn new(metastore: Arc<dyn Metastore>, mode: RunMode) -> Self {
        Self { metastore, mode }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Revoke the record identified by `(id, created)`
    ///
    /// Only fatal metastore errors are returned as `Err`.
    pub async fn revoke_single(&self, id: &str, created: i64) -> MetastoreResult<SingleOutcome> {
        let record = match self.metastore.get_by_key(id, created).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(id, created, "Envelope key record not found!");
                return Ok(SingleOutcome::NotFound);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!(id, created, error = %e, "Failed to load envelope key record");
                return Ok(SingleOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        info!(id, created, "Found envelope key record. Revoking...");

        if record.is_revoked() {
            warn!(id, created, "Envelope key record already revoked!");
            return Ok(SingleOutcome::AlreadyRevoked);
        }

        let revoked = record.with_revoked();

        if self.mode.is_dry_run() {
            let preview = serde_json::to_string(&revoked.redacted())?;
            info!(
                id,
                created,
                record = %preview,
                "DRY-RUN would update envelope key record and set KeyRecord.Revoked = true"
            );
            return Ok(SingleOutcome::WouldRevoke);
        }

        match self.metastore.update_revoked(&revoked).await {
            Ok(rows) => {
                if rows == 1 {
                    info!(id, created, "Marked envelope key record revoked successfully!");
                } else {
                    warn!(id, created, rows, "Expected to revoke exactly 1 envelope key record");
                }
                Ok(SingleOutcome::Revoked { rows })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(id, created, error = %e, "Failed to revoke envelope key record");
                Ok(SingleOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Revoke every record whose id starts with `id_prefix` and whose
    /// `created` is strictly before `created_before`
    ///
    /// Reads the whole candidate set before writing anything. On scan based
    /// backends this reads the entire table.
    pub async fn revoke_bulk(&self, id_prefix: &str, created_before: i64) -> MetastoreResult<BulkReport> {
        let filter = ScanFilter::new(id_prefix, created_before);
        let mut report = BulkReport {
            dry_run: self.mode.is_dry_run(),
            ..Default::default()
        };

        let mut candidates = Vec::new();
        {
            let mut scan = self.metastore.scan_candidates(&filter);
            while let Some(result) = scan.next().await {
                match result {
                    Ok(record) => candidates.push(record),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        report.unreadable += 1;
                        warn!(error = %e, "Skipping unreadable envelope key record");
                    }
                }
            }
        }
        report.fetched = candidates.len();

        info!(
            backend = self.metastore.backend_name(),
            fetched = report.fetched,
            id_prefix,
            created_before,
            "Fetched {} rows to revoke using id_prefix={}, created<{}",
            report.fetched,
            id_prefix,
            created_before
        );

        candidates.retain(|record| {
            let in_range = filter.matches(record);
            if !in_range {
                warn!(id = %record.id, created = record.created, "Scan returned a record outside the filter, skipping");
            }
            in_range
        });
        report.out_of_range = report.fetched - candidates.len();

        // Ascending created spreads writes across partitions
        candidates.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

        let to_revoke: Vec<EnvelopeKeyRecord> = candidates
            .iter()
            .filter(|record| !record.is_revoked())
            .map(EnvelopeKeyRecord::with_revoked)
            .collect();
        report.already_revoked = candidates.len() - to_revoke.len();
        report.attempted = to_revoke.len();

        if to_revoke.is_empty() {
            info!(id_prefix, created_before, "No envelope key records to revoke");
            return Ok(report);
        }

        if self.mode.is_dry_run() {
            info!(
                count = to_revoke.len(),
                "DRY-RUN would have batch written {} revoked keys",
                to_revoke.len()
            );
            return Ok(report);
        }

        match self.metastore.batch_update_revoked(&to_revoke).await {
            Ok(outcome) => {
                report.revoked = outcome.succeeded;
                report.failures = outcome.failures;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                report.failures = to_revoke
                    .iter()
                    .map(|record| ItemFailure {
                        key: record.key(),
                        reason: e.to_string(),
                    })
                    .collect();
            }
        }

        for failure in &report.failures {
            error!(key = %failure.key, reason = %failure.reason, "Failed to revoke envelope key record");
        }

        info!(
            revoked = report.revoked,
            attempted = report.attempted,
            "Marked {} of {} keys revoked successfully!",
            report.revoked,
            report.attempted
        );

        Ok(report)
    }

    /// Revoke every system or intermediate key created before `created_before`
    pub async fn revoke_class(&self, class: KeyClass, created_before: i64) -> MetastoreResult<BulkReport> {
        info!(class = %class, created_before, "Revoking keys by class");
        self.revoke_bulk(class.prefix(), created_before).await
    }

    /// Revoke the intermediate key that protected a data row
    pub async fn revoke_data_row_parent(&self, drr: &DataRowRecord) -> MetastoreResult<SingleOutcome> {
        match drr.parent_key_meta() {
            Ok(meta) => {
                info!(parent = %meta, "Revoking parent key of data row record");
                self.revoke_single(&meta.key_id, meta.created).await
            }
            Err(e) => {
                error!(error = %e, "Data row record has no parent key");
                Ok(SingleOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }
}
