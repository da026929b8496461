//! Data row records returned by an encrypt call
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


use serde::{Deserialize, Serialize};

use crate::envelope::{KeyMeta, KeyRecord};
use crate::error::{AsherahTypesError, Result};

/// Encrypted payload together with the wrapped data row key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRowRecord {
    #[serde(rename = "Key")]
    pub key: KeyRecord,
    /// Base64 encoded ciphertext
    #[serde(rename = "Data")]
    pub data: String,
}

impl DataRowRecord {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AsherahTypesError::InvalidPayload(e.to_string()))
    }

    /// The intermediate key that wrapped this row's data key
    pub fn parent_key_meta(&self) -> Result<&KeyMeta> {
        self.key
            .parent_key_meta
            .as_ref()
            .ok_or_else(|| AsherahTypesError::MissingField("Key.ParentKeyMeta".to_string()))
    }
}
