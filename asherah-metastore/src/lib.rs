//! Asherah Metastore
//!
//! Metastore adapters (DynamoDB, PostgreSQL, MySQL, local files) and the key
//! revocation engine used by the `revoke-keys` maintenance tool.
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



pub mod backend;
pub mod backoff;
pub mod cli;
pub mod dynamodb_store;
pub mod error;
pub mod local_store;
pub mod metastore;
pub mod record;
pub mod revoker;
pub mod sql;

pub use backend::init_metastore;
pub use error::{MetastoreError, MetastoreResult};
pub use metastore::Metastore;
pub use record::{BatchOutcome, EnvelopeKeyRecord, ItemFailure, PageToken, RecordKey, ScanFilter, ScanPage};
pub use revoker::{BulkReport, Revoker, RunMode, SingleOutcome};
