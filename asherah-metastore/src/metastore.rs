//! Metastore adapter interface
//!
//! Every backend (DynamoDB, relational, local files) implements this trait so
//! the revocation engine never branches on the backend type. Backends that
//! page differently (continuation keys, keysets, offsets) all surface their
//! cursors as a [`PageToken`] and are consumed through one lazy stream.
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
use crate::record::{BatchOutcome, EnvelopeKeyRecord, PageToken, ScanFilter, ScanPage};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// Trait for metastore backends
#[async_trait]
pub trait Metastore: Send + Sync {
    /// Short backend name for log lines
    fn backend_name(&self) -> &'static str;

    /// Load one record; `None` when it does not exist
    async fn get_by_key(&self, id: &str, created: i64) -> MetastoreResult<Option<EnvelopeKeyRecord>>;

    /// Fetch one page of records matching the filter
    ///
    /// Backends may leave out already revoked records when they can filter
    /// server side. Callers must not rely on it.
    async fn scan_page(
        &self,
        filter: &ScanFilter,
        token: Option<PageToken>,
    ) -> MetastoreResult<ScanPage>;

    /// Persist `record` (which already carries `Revoked = true`)
    ///
    /// Returns the number of stored records that were updated.
    async fn update_revoked(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64>;

    /// Persist many revoked records, in the given order
    ///
    /// A failure of one item is reported in the outcome and does not stop the
    /// remaining items. Only fatal errors are returned as `Err`.
    async fn batch_update_revoked(
        &self,
        records: &[EnvelopeKeyRecord],
    ) -> MetastoreResult<BatchOutcome>;

    /// Lazily page through every record matching the filter
    ///
    /// A failed page ends the stream with a fatal [`MetastoreError::Scan`]
    /// so that a partial candidate list is never mistaken for a complete one.
    fn scan_candidates<'a>(
        &'a self,
        filter: &'a ScanFilter,
    ) -> BoxStream<'a, MetastoreResult<EnvelopeKeyRecord>> {
        // None: exhausted, Some(None): first page, Some(Some(t)): continue at t
        stream::unfold(Some(None), move |state: Option<Option<PageToken>>| async move {
            let token = match state {
                Some(token) => token,
                None => return None,
            };
            match self.scan_page(filter, token).await {
                Ok(page) => Some((page.records, page.next.map(Some))),
                Err(e) if e.is_fatal() => Some((vec![Err(e)], None)),
                Err(e) => Some((vec![Err(MetastoreError::Scan(e.to_string()))], None)),
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }
}
