//! Error types for metastore access
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


use asherah_types::AsherahTypesError;
use thiserror::Error;

/// Metastore errors
#[derive(Error, Debug)]
pub enum MetastoreError {
    #[error("Envelope key record not found: {0}")]
    NotFound(String),

    #[error("Metastore connectivity error: {0}")]
    Connectivity(String),

    #[error("Metastore scan aborted: {0}")]
    Scan(String),

    #[error("Invalid envelope key record: {0}")]
    InvalidRecord(String),

    #[error("Metastore backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MetastoreError {
    /// Fatal errors abort the whole run; everything else is scoped to one record
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MetastoreError::Connectivity(_)
                | MetastoreError::Scan(_)
                | MetastoreError::Io(_)
                | MetastoreError::Configuration(_)
        )
    }
}

impl From<AsherahTypesError> for MetastoreError {
    fn from(err: AsherahTypesError) -> Self {
        MetastoreError::InvalidRecord(err.to_string())
    }
}

/// Result type for metastore operations
pub type MetastoreResult<T> = Result<T, MetastoreError>;
