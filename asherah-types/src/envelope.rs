//! Envelope key record payloads as persisted in the metastore
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
use serde_json::{Map, Value};
use std::fmt;

/// Placeholder written over key material before a record is logged
pub const REDACTED: &str = "<REDACTED>";

/// Id prefix of system keys
pub const SYSTEM_KEY_PREFIX: &str = "_SK_";

/// Id prefix of intermediate keys
pub const INTERMEDIATE_KEY_PREFIX: &str = "_IK_";

/// Tier of the key hierarchy a record belongs to, encoded in its id prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyClass {
    /// System key (`_SK_`), wrapped by the KMS master key
    System,
    /// Intermediate key (`_IK_`), wrapped by a system key
    Intermediate,
}

impl KeyClass {
    /// Id prefix shared by every key of this class
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyClass::System => SYSTEM_KEY_PREFIX,
            KeyClass::Intermediate => INTERMEDIATE_KEY_PREFIX,
        }
    }

    /// Classify a key id by its prefix
    pub fn from_id(id: &str) -> Option<Self> {
        if id.starts_with(SYSTEM_KEY_PREFIX) {
            Some(KeyClass::System)
        } else if id.starts_with(INTERMEDIATE_KEY_PREFIX) {
            Some(KeyClass::Intermediate)
        } else {
            None
        }
    }
}

impl fmt::Display for KeyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyClass::System => write!(f, "system"),
            KeyClass::Intermediate => write!(f, "intermediate"),
        }
    }
}

/// Reference to the key that wrapped another key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyMeta {
    #[serde(rename = "KeyId")]
    pub key_id: String,
    #[serde(rename = "Created")]
    pub created: i64,
}

impl fmt::Display for KeyMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMeta [keyId={} created={}]", self.key_id, self.created)
    }
}

/// Nested key record payload stored alongside `(Id, Created)`
///
/// Fields this crate does not know about are kept in `extra` so that a
/// whole-record replace never drops data written by newer clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(rename = "Created")]
    pub created: i64,

    /// Base64 encoded, encrypted key material
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "ParentKeyMeta", default, skip_serializing_if = "Option::is_none")]
    pub parent_key_meta: Option<KeyMeta>,

    /// Absent until the record is revoked for the first time
    #[serde(rename = "Revoked", default, skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KeyRecord {
    pub fn new(created: i64, key: impl Into<String>, parent_key_meta: Option<KeyMeta>) -> Self {
        Self {
            created,
            key: key.into(),
            parent_key_meta,
            revoked: None,
            extra: Map::new(),
        }
    }

    /// A missing flag counts as not revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked.unwrap_or(false)
    }

    /// Copy of this payload with the revoked flag set
    pub fn with_revoked(&self) -> Self {
        Self {
            revoked: Some(true),
            ..self.clone()
        }
    }

    /// Copy of this payload that is safe to log
    pub fn redacted(&self) -> Self {
        Self {
            key: REDACTED.to_string(),
            ..self.clone()
        }
    }

    /// Compact JSON as stored by the relational metastore
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WITH_PARENT: &str = r#"{
        "Revoked":false,
        "ParentKeyMeta":{"KeyId":"_SK_api_ecomm","Created":1551980040},
        "Key":"WXSRYxyx6YJgv/gCLuYmZo+tCILhPp+Fklx8rZPBH+56zu2hVoI8N8TVDyvi9u+H7akWLD6cYBvAtO5Z",
        "Created":1551980041
    }"#;

    #[test]
    fn test_parse_key_record() {
        let record = KeyRecord::from_json(WITH_PARENT).unwrap();
        assert_eq!(record.created, 1551980041);
        assert_eq!(record.revoked, Some(false));
        assert!(!record.is_revoked());

        let parent = record.parent_key_meta.unwrap();
        assert_eq!(parent.key_id, "_SK_api_ecomm");
        assert_eq!(parent.created, 1551980040);
    }

    #[test]
    fn test_missing_revoked_is_not_revoked() {
        let record = KeyRecord::from_json(r#"{"Key":"abc","Created":10}"#).unwrap();
        assert_eq!(record.revoked, None);
        assert!(!record.is_revoked());
        assert!(record.parent_key_meta.is_none());
    }

    #[test]
    fn test_with_revoked_leaves_original_untouched() {
        let record = KeyRecord::new(10, "abc", None);
        let revoked = record.with_revoked();

        assert!(revoked.is_revoked());
        assert!(!record.is_revoked());
        assert_eq!(revoked.key, record.key);
        assert_eq!(revoked.created, record.created);
    }

    #[test]
    fn test_unknown_fields_survive_revocation() {
        let record =
            KeyRecord::from_json(r#"{"Key":"abc","Created":10,"Algorithm":"aes-256-gcm"}"#).unwrap();
        let json = record.with_revoked().to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["Algorithm"], "aes-256-gcm");
        assert_eq!(value["Revoked"], true);
    }

    #[test]
    fn test_redacted_hides_key_material() {
        let record = KeyRecord::from_json(WITH_PARENT).unwrap();
        let json = record.redacted().to_json().unwrap();

        assert!(json.contains(REDACTED));
        assert!(!json.contains("WXSRYxyx6YJgv"));
    }

    #[test]
    fn test_key_class_from_id() {
        assert_eq!(KeyClass::from_id("_SK_api_ecomm"), Some(KeyClass::System));
        assert_eq!(KeyClass::from_id("_IK_shopper_api_ecomm"), Some(KeyClass::Intermediate));
        assert_eq!(KeyClass::from_id("SK_missing_underscore"), None);
        assert_eq!(KeyClass::Intermediate.prefix(), "_IK_");
    }
}
