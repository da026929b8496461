//! Backend selection
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


use crate::dynamodb_store::DynamoDbMetastore;
use crate::error::MetastoreResult;
use crate::local_store::LocalMetastore;
use crate::metastore::Metastore;
use crate::sql::{MySqlMetastore, PostgresMetastore};
use asherah_config::MetastoreConfig;
use std::sync::Arc;
use tracing::info;

/// Open the metastore described by `config`
pub async fn init_metastore(config: &MetastoreConfig) -> MetastoreResult<Arc<dyn Metastore>> {
    info!(backend = config.backend_name(), "Initializing metastore");

    let metastore: Arc<dyn Metastore> = match config {
        MetastoreConfig::DynamoDb(dynamodb) => Arc::new(DynamoDbMetastore::new(dynamodb)?),
        MetastoreConfig::Postgres(sql) => Arc::new(PostgresMetastore::connect(sql).await?),
        MetastoreConfig::MySql(sql) => Arc::new(MySqlMetastore::connect(sql).await?),
        MetastoreConfig::Local(local) => Arc::new(LocalMetastore::open(&local.path).await?),
    };

    Ok(metastore)
}
