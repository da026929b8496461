//! DynamoDB metastore backend
//!
//! Records live in a table keyed by `Id` (partition) and `Created` (sort),
//! with the key record payload stored as the `KeyRecord` map attribute.
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
use crate::backoff::BackoffPolicy;
use asherah_config::DynamoDbConfig;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use rusoto_core::credential::{DefaultCredentialsProvider, ProvideAwsCredentials};
use rusoto_core::{request::HttpClient, Region, RusotoError};
use rusoto_dynamodb::{
    AttributeValue, BatchWriteItemError, BatchWriteItemInput, DynamoDb, DynamoDbClient,
    GetItemError, GetItemInput, PutRequest, ScanError, ScanInput, UpdateItemError,
    UpdateItemInput, WriteRequest,
};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const PARTITION_KEY: &str = "Id";
pub const SORT_KEY: &str = "Created";
pub const KEY_RECORD: &str = "KeyRecord";
pub const REVOKED: &str = "Revoked";

/// BatchWriteItem accepts at most 25 write requests
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// AWS error types meaning the request's identity or signature was rejected
const AUTH_ERROR_TYPES: &[&str] = &[
    "AccessDeniedException",
    "ExpiredTokenException",
    "IncompleteSignatureException",
    "InvalidClientTokenId",
    "InvalidSignatureException",
    "MissingAuthenticationTokenException",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

type Item = HashMap<String, AttributeValue>;

/// DynamoDB metastore
pub struct DynamoDbMetastore {
    client: DynamoDbClient,
    table_name: String,
    backoff: BackoffPolicy,
}

impl DynamoDbMetastore {
    /// Create a metastore client from configuration, using the default
    /// AWS credential chain
    pub fn new(config: &DynamoDbConfig) -> MetastoreResult<Self> {
        let credentials = DefaultCredentialsProvider::new().map_err(|e| {
            MetastoreError::Connectivity(format!("Failed to load AWS credentials: {}", e))
        })?;
        Self::with_credentials(config, credentials)
    }

    /// Create a metastore client with explicit credentials
    ///
    /// A plain `http://` endpoint (DynamoDB Local) gets a connector without
    /// TLS; everything else is HTTPS only.
    pub fn with_credentials<P>(config: &DynamoDbConfig, credentials: P) -> MetastoreResult<Self>
    where
        P: ProvideAwsCredentials + Send + Sync + 'static,
    {
        let region = Self::region(config)?;

        info!(
            table = %config.table_name,
            region = region.name(),
            endpoint = config.endpoint.as_deref().unwrap_or("default"),
            "Initializing DynamoDB metastore"
        );

        let client = match config.endpoint.as_deref() {
            Some(endpoint) if endpoint.starts_with("http://") => DynamoDbClient::new_with(
                HttpClient::from_connector(HttpConnector::new()),
                credentials,
                region,
            ),
            _ => {
                let http_client = HttpClient::new().map_err(|e| {
                    MetastoreError::Connectivity(format!("Failed to create HTTP client: {}", e))
                })?;
                DynamoDbClient::new_with(http_client, credentials, region)
            }
        };

        Ok(Self::with_client(client, &config.table_name))
    }

    /// Wrap an existing client
    pub fn with_client(client: DynamoDbClient, table_name: &str) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn region(config: &DynamoDbConfig) -> MetastoreResult<Region> {
        match (&config.endpoint, &config.region) {
            (Some(endpoint), region) => Ok(Region::Custom {
                name: region.clone().unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: endpoint.clone(),
            }),
            (None, Some(region)) => region.parse::<Region>().map_err(|e| {
                MetastoreError::Configuration(format!("Invalid AWS region {}: {}", region, e))
            }),
            (None, None) => Ok(Region::default()),
        }
    }

    fn missing_table(&self, message: &str) -> MetastoreError {
        MetastoreError::Configuration(format!("Table {} not found: {}", self.table_name, message))
    }

    fn revoked_path_names() -> HashMap<String, String> {
        HashMap::from([
            ("#id".to_string(), PARTITION_KEY.to_string()),
            ("#created".to_string(), SORT_KEY.to_string()),
            ("#kr".to_string(), KEY_RECORD.to_string()),
            ("#rv".to_string(), REVOKED.to_string()),
        ])
    }

    /// Send one chunk, resubmitting unprocessed items with backoff
    async fn write_chunk(
        &self,
        chunk: &[EnvelopeKeyRecord],
        outcome: &mut BatchOutcome,
    ) -> MetastoreResult<()> {
        let mut pending = Vec::with_capacity(chunk.len());
        for record in chunk {
            match record_to_item(record) {
                Ok(item) => pending.push(WriteRequest {
                    put_request: Some(PutRequest { item }),
                    delete_request: None,
                }),
                Err(e) => outcome.record_failure(record.key(), e.to_string()),
            }
        }

        let mut backoff = self.backoff.start();
        while !pending.is_empty() {
            let input = BatchWriteItemInput {
                request_items: HashMap::from([(self.table_name.clone(), pending.clone())]),
                ..Default::default()
            };

            match self.client.batch_write_item(input).await {
                Ok(output) => {
                    let unprocessed = output
                        .unprocessed_items
                        .and_then(|mut items| items.remove(&self.table_name))
                        .unwrap_or_default();
                    outcome.succeeded += pending.len() - unprocessed.len();
                    pending = unprocessed;
                }
                Err(RusotoError::Service(BatchWriteItemError::ProvisionedThroughputExceeded(msg)))
                | Err(RusotoError::Service(BatchWriteItemError::RequestLimitExceeded(msg))) => {
                    warn!(error = %msg, pending = pending.len(), "BatchWriteItem throttled");
                }
                Err(RusotoError::Service(BatchWriteItemError::ResourceNotFound(msg))) => {
                    return Err(self.missing_table(&msg));
                }
                Err(e) => {
                    let err = dispatch_error("BatchWriteItem", e);
                    if err.is_fatal() {
                        return Err(err);
                    }
                    for request in pending.drain(..) {
                        if let Some(key) = request_key(&request) {
                            outcome.record_failure(key, err.to_string());
                        }
                    }
                }
            }

            if pending.is_empty() {
                break;
            }
            let Some(delay) = backoff.next_delay() else {
                warn!(
                    unprocessed = pending.len(),
                    resubmissions = backoff.resubmissions(),
                    "Giving up on unprocessed batch items"
                );
                for request in pending.drain(..) {
                    if let Some(key) = request_key(&request) {
                        outcome.record_failure(key, "unprocessed after resubmissions");
                    }
                }
                break;
            };

            debug!(
                resubmission = backoff.resubmissions(),
                unprocessed = pending.len(),
                delay_ms = delay.as_millis() as u64,
                "Resubmitting unprocessed batch items"
            );
            sleep(delay).await;
        }

        Ok(())
    }
}

#[async_trait]
impl Metastore for DynamoDbMetastore {
    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }

    async fn get_by_key(&self, id: &str, created: i64) -> MetastoreResult<Option<EnvelopeKeyRecord>> {
        let input = GetItemInput {
            table_name: self.table_name.clone(),
            key: key_attributes(&RecordKey::new(id, created)),
            consistent_read: Some(true),
            ..Default::default()
        };

        let output = self.client.get_item(input).await.map_err(|e| match e {
            RusotoError::Service(GetItemError::ResourceNotFound(msg)) => self.missing_table(&msg),
            other => dispatch_error("GetItem", other),
        })?;

        output.item.map(|item| item_to_record(&item)).transpose()
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        token: Option<PageToken>,
    ) -> MetastoreResult<ScanPage> {
        let exclusive_start_key = match token {
            None => None,
            Some(PageToken::After(key)) => Some(key_attributes(&key)),
            Some(other) => {
                return Err(MetastoreError::Configuration(format!(
                    "DynamoDB scan cannot resume from {:?}",
                    other
                )))
            }
        };

        let input = ScanInput {
            table_name: self.table_name.clone(),
            filter_expression: Some(
                "#created < :cutoff AND begins_with(#id, :prefix) \
                 AND (#kr.#rv = :false OR attribute_not_exists(#kr.#rv))"
                    .to_string(),
            ),
            expression_attribute_names: Some(Self::revoked_path_names()),
            expression_attribute_values: Some(HashMap::from([
                (":cutoff".to_string(), number_attribute(filter.created_before)),
                (":prefix".to_string(), string_attribute(&filter.id_prefix)),
                (":false".to_string(), bool_attribute(false)),
            ])),
            exclusive_start_key,
            ..Default::default()
        };

        let output = self.client.scan(input).await.map_err(|e| match e {
            RusotoError::Service(ScanError::ResourceNotFound(msg)) => self.missing_table(&msg),
            other => dispatch_error("Scan", other),
        })?;

        let records: Vec<_> = output
            .items
            .unwrap_or_default()
            .iter()
            .map(item_to_record)
            .collect();

        let next = output
            .last_evaluated_key
            .map(|key| item_key(&key).map(PageToken::After))
            .transpose()
            .map_err(|e| MetastoreError::Scan(format!("Unusable LastEvaluatedKey: {}", e)))?;

        debug!(returned = records.len(), more = next.is_some(), "Scanned DynamoDB page");

        Ok(ScanPage { records, next })
    }

    async fn update_revoked(&self, record: &EnvelopeKeyRecord) -> MetastoreResult<u64> {
        let input = UpdateItemInput {
            table_name: self.table_name.clone(),
            key: key_attributes(&record.key()),
            update_expression: Some("SET #kr.#rv = :true".to_string()),
            condition_expression: Some("attribute_exists(#id)".to_string()),
            expression_attribute_names: Some(HashMap::from([
                ("#id".to_string(), PARTITION_KEY.to_string()),
                ("#kr".to_string(), KEY_RECORD.to_string()),
                ("#rv".to_string(), REVOKED.to_string()),
            ])),
            expression_attribute_values: Some(HashMap::from([(
                ":true".to_string(),
                bool_attribute(true),
            )])),
            ..Default::default()
        };

        match self.client.update_item(input).await {
            Ok(_) => Ok(1),
            Err(RusotoError::Service(UpdateItemError::ConditionalCheckFailed(_))) => Ok(0),
            Err(RusotoError::Service(UpdateItemError::ResourceNotFound(msg))) => {
                Err(self.missing_table(&msg))
            }
            Err(e) => Err(dispatch_error("UpdateItem", e)),
        }
    }

    async fn batch_update_revoked(
        &self,
        records: &[EnvelopeKeyRecord],
    ) -> MetastoreResult<BatchOutcome> {
        let mut outcome = BatchOutcome::new(records.len());

        for chunk in records.chunks(MAX_BATCH_WRITE_ITEMS) {
            self.write_chunk(chunk, &mut outcome).await?;
        }

        Ok(outcome)
    }
}

/// Map a request error onto the metastore taxonomy
fn dispatch_error<E: std::error::Error + 'static>(operation: &str, err: RusotoError<E>) -> MetastoreError {
    match err {
        RusotoError::Service(e) => MetastoreError::Backend(format!("{} failed: {}", operation, e)),
        RusotoError::Validation(msg) => {
            MetastoreError::Configuration(format!("{} rejected: {}", operation, msg))
        }
        RusotoError::Unknown(response) => {
            classify_response(operation, response.status.as_u16(), &response.body_as_str())
        }
        other => MetastoreError::Connectivity(format!("{} failed: {}", operation, other)),
    }
}

/// Classify an error response rusoto could not map to a typed service error
///
/// Rejected credentials arrive as 400 responses whose `__type` names the
/// problem, or as plain 401/403.
fn classify_response(operation: &str, status: u16, body: &str) -> MetastoreError {
    let error_type = aws_error_type(body);
    let message = format!("{} failed with status {}: {}", operation, status, body);

    let rejected_identity = matches!(status, 401 | 403)
        || error_type.as_deref().map_or(false, |t| AUTH_ERROR_TYPES.contains(&t));

    if rejected_identity || status >= 500 {
        MetastoreError::Connectivity(message)
    } else {
        MetastoreError::Backend(message)
    }
}

/// Short error type of a JSON error body, without the service namespace
fn aws_error_type(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error_type = value.get("__type")?.as_str()?;
    Some(error_type.rsplit('#').next().unwrap_or(error_type).to_string())
}

fn string_attribute(value: &str) -> AttributeValue {
    AttributeValue {
        s: Some(value.to_string()),
        ..Default::default()
    }
}

fn number_attribute(value: i64) -> AttributeValue {
    AttributeValue {
        n: Some(value.to_string()),
        ..Default::default()
    }
}

fn bool_attribute(value: bool) -> AttributeValue {
    AttributeValue {
        bool: Some(value),
        ..Default::default()
    }
}

fn key_attributes(key: &RecordKey) -> Item {
    HashMap::from([
        (PARTITION_KEY.to_string(), string_attribute(&key.id)),
        (SORT_KEY.to_string(), number_attribute(key.created)),
    ])
}

fn item_key(item: &Item) -> MetastoreResult<RecordKey> {
    let id = item
        .get(PARTITION_KEY)
        .and_then(|value| value.s.clone())
        .ok_or_else(|| MetastoreError::InvalidRecord(format!("missing string attribute {}", PARTITION_KEY)))?;
    let created = item
        .get(SORT_KEY)
        .and_then(|value| value.n.as_deref())
        .and_then(|n| n.parse::<i64>().ok())
        .ok_or_else(|| {
            MetastoreError::InvalidRecord(format!("missing integer attribute {} for {}", SORT_KEY, id))
        })?;
    Ok(RecordKey { id, created })
}

fn request_key(request: &WriteRequest) -> Option<RecordKey> {
    request
        .put_request
        .as_ref()
        .and_then(|put| item_key(&put.item).ok())
}

/// Decode a table item into a record
pub fn item_to_record(item: &Item) -> MetastoreResult<EnvelopeKeyRecord> {
    let key = item_key(item)?;
    let payload = item.get(KEY_RECORD).ok_or_else(|| {
        MetastoreError::InvalidRecord(format!("missing {} attribute for {}", KEY_RECORD, key))
    })?;

    let key_record = serde_json::from_value(attribute_to_json(payload)?)
        .map_err(|e| MetastoreError::InvalidRecord(format!("{} for {}", e, key)))?;

    Ok(EnvelopeKeyRecord::new(key.id, key.created, key_record))
}

/// Encode a record as a table item
pub fn record_to_item(record: &EnvelopeKeyRecord) -> MetastoreResult<Item> {
    let mut item = key_attributes(&record.key());
    let payload = serde_json::to_value(&record.key_record)?;
    item.insert(KEY_RECORD.to_string(), json_to_attribute(&payload));
    Ok(item)
}

/// Convert a DynamoDB attribute into JSON, preserving nested maps and lists
pub fn attribute_to_json(value: &AttributeValue) -> MetastoreResult<Value> {
    if let Some(s) = &value.s {
        return Ok(Value::String(s.clone()));
    }
    if let Some(n) = &value.n {
        return parse_number(n).map(Value::Number);
    }
    if let Some(b) = value.bool {
        return Ok(Value::Bool(b));
    }
    if value.null == Some(true) {
        return Ok(Value::Null);
    }
    if let Some(m) = &value.m {
        let mut object = Map::with_capacity(m.len());
        for (name, nested) in m {
            object.insert(name.clone(), attribute_to_json(nested)?);
        }
        return Ok(Value::Object(object));
    }
    if let Some(l) = &value.l {
        return l.iter().map(attribute_to_json).collect::<MetastoreResult<Vec<_>>>().map(Value::Array);
    }
    // Sets and binaries have no JSON form that converts back to the same type
    let kind = if value.ss.is_some() || value.ns.is_some() || value.bs.is_some() {
        "set"
    } else {
        "binary"
    };
    Err(MetastoreError::InvalidRecord(format!(
        "unsupported {} attribute in key record",
        kind
    )))
}

/// Convert JSON into a DynamoDB attribute
pub fn json_to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue {
            null: Some(true),
            ..Default::default()
        },
        Value::Bool(b) => bool_attribute(*b),
        Value::Number(n) => AttributeValue {
            n: Some(n.to_string()),
            ..Default::default()
        },
        Value::String(s) => string_attribute(s),
        Value::Array(items) => AttributeValue {
            l: Some(items.iter().map(json_to_attribute).collect()),
            ..Default::default()
        },
        Value::Object(object) => AttributeValue {
            m: Some(
                object
                    .iter()
                    .map(|(name, nested)| (name.clone(), json_to_attribute(nested)))
                    .collect(),
            ),
            ..Default::default()
        },
    }
}

fn parse_number(n: &str) -> MetastoreResult<Number> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(Number::from(i));
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| MetastoreError::InvalidRecord(format!("invalid number attribute {}", n)))
}
