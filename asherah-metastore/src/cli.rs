//! Command line interface of the `revoke-keys` tool
//!
//! Usage:
//!   revoke-keys single --id <id> --created <ts> [--execute]
//!   revoke-keys single --data-row-record <path> [--execute]
//!   revoke-keys bulk --created-before <ts> --type system|intermediate [--execute]
//!
//! Without `--execute` every write is suppressed and only logged.
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


use crate::backend::init_metastore;
use crate::revoker::{Revoker, RunMode, SingleOutcome};
use anyhow::{Context, Result};
use asherah_config::{
    DynamoDbConfig, LocalConfig, LogFormat, MetastoreConfig, SqlConfig, DEFAULT_DYNAMODB_TABLE,
    DEFAULT_LOCAL_PATH, DEFAULT_MYSQL_PORT, DEFAULT_POSTGRES_PORT,
};
use asherah_types::{DataRowRecord, KeyClass};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

/// `--metastore` values that need the SQL connection flags
const SQL_BACKENDS: [(&str, &str); 3] = [
    ("metastore", "postgres"),
    ("metastore", "sql"),
    ("metastore", "mysql"),
];

/// Revoke envelope keys in an Asherah metastore
#[derive(Parser, Debug)]
#[command(name = "revoke-keys")]
#[command(version)]
#[command(about = "Revoke envelope keys in an Asherah metastore. NOTE: performs a dry run by default.")]
pub struct Cli {
    /// Execute write operations, which do not run by default (read operations always execute)
    #[arg(long, global = true)]
    pub execute: bool,

    /// Metastore backend
    #[arg(long, value_enum, env = "ASHERAH_METASTORE", default_value = "dynamodb")]
    pub metastore: MetastoreKind,

    /// DynamoDB table name
    #[arg(long, env = "ASHERAH_DYNAMODB_TABLE", default_value = DEFAULT_DYNAMODB_TABLE)]
    pub table: String,

    /// AWS region of the DynamoDB table
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Custom DynamoDB endpoint (e.g. DynamoDB Local)
    #[arg(long, env = "ASHERAH_DYNAMODB_ENDPOINT")]
    pub endpoint: Option<String>,

    /// SQL database host
    #[arg(long, env = "ASHERAH_SQL_HOST", required_if_eq_any(SQL_BACKENDS))]
    pub host: Option<String>,

    /// SQL database port [default: 5432 for postgres, 3306 for mysql]
    #[arg(long, env = "ASHERAH_SQL_PORT")]
    pub port: Option<u16>,

    /// SQL database name
    #[arg(long, env = "ASHERAH_SQL_DATABASE", required_if_eq_any(SQL_BACKENDS))]
    pub database: Option<String>,

    /// SQL database user
    #[arg(long, env = "ASHERAH_SQL_USER", required_if_eq_any(SQL_BACKENDS))]
    pub user: Option<String>,

    /// SQL database password
    #[arg(
        long,
        env = "ASHERAH_SQL_PASSWORD",
        hide_env_values = true,
        required_if_eq_any(SQL_BACKENDS)
    )]
    pub password: Option<String>,

    /// Directory of the local metastore
    #[arg(long, env = "ASHERAH_LOCAL_METASTORE_PATH", default_value = DEFAULT_LOCAL_PATH)]
    pub path: PathBuf,

    /// Log output format (overrides LOG_FORMAT)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Command,
}

/// Supported metastore backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetastoreKind {
    Dynamodb,
    #[value(alias = "sql")]
    Postgres,
    Mysql,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Console,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Console => LogFormat::Console,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Key tier selected for bulk revocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyTypeArg {
    System,
    Intermediate,
}

impl From<KeyTypeArg> for KeyClass {
    fn from(arg: KeyTypeArg) -> Self {
        match arg {
            KeyTypeArg::System => KeyClass::System,
            KeyTypeArg::Intermediate => KeyClass::Intermediate,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Revoke a single key by id and created time
    Single(SingleArgs),

    /// Revoke all system or intermediate keys created before the given time.
    /// WARNING: scans the *entire* metastore, which may be expensive. Prefer
    /// revoking individual system keys where possible.
    Bulk(BulkArgs),
}

#[derive(Args, Debug)]
pub struct SingleArgs {
    /// The key id
    #[arg(long, requires = "created", required_unless_present = "data_row_record")]
    pub id: Option<String>,

    /// The key created time (unix seconds)
    #[arg(long, requires = "id")]
    pub created: Option<i64>,

    /// Revoke the intermediate key referenced by this data row record (JSON file)
    #[arg(long, conflicts_with_all = ["id", "created"])]
    pub data_row_record: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BulkArgs {
    /// The created time cutoff (exclusive, unix seconds)
    #[arg(long)]
    pub created_before: i64,

    /// The type of keys to revoke
    #[arg(long = "type", value_enum)]
    pub key_type: KeyTypeArg,
}

impl Cli {
    pub fn run_mode(&self) -> RunMode {
        RunMode::from_execute_flag(self.execute)
    }

    /// Backend configuration assembled from flags and environment
    pub fn metastore_config(&self) -> Result<MetastoreConfig> {
        let config = match self.metastore {
            MetastoreKind::Dynamodb => MetastoreConfig::DynamoDb(DynamoDbConfig {
                table_name: self.table.clone(),
                region: self.region.clone(),
                endpoint: self.endpoint.clone(),
            }),
            MetastoreKind::Postgres => {
                MetastoreConfig::Postgres(self.sql_config("postgres", DEFAULT_POSTGRES_PORT)?)
            }
            MetastoreKind::Mysql => MetastoreConfig::MySql(self.sql_config("mysql", DEFAULT_MYSQL_PORT)?),
            MetastoreKind::Local => MetastoreConfig::Local(LocalConfig {
                path: self.path.clone(),
            }),
        };
        Ok(config)
    }

    fn sql_config(&self, backend: &str, default_port: u16) -> Result<SqlConfig> {
        let required = |value: &Option<String>, flag: &str| {
            value
                .clone()
                .with_context(|| format!("--{} is required for the {} metastore", flag, backend))
        };

        Ok(SqlConfig {
            host: required(&self.host, "host")?,
            port: self.port.unwrap_or(default_port),
            database: required(&self.database, "database")?,
            user: required(&self.user, "user")?,
            password: required(&self.password, "password")?,
        })
    }
}

/// Run the selected command
///
/// Returns `Err` only for fatal conditions; per-record outcomes such as
/// "not found" or partial batch failures are logged and end successfully.
pub async fn run(cli: Cli) -> Result<()> {
    let mode = cli.run_mode();
    let config = cli.metastore_config()?;

    info!(
        metastore = config.backend_name(),
        dry_run = mode.is_dry_run(),
        "Starting key revocation"
    );

    let metastore = init_metastore(&config)
        .await
        .context("Failed to initialize metastore")?;
    let revoker = Revoker::new(metastore, mode);

    match &cli.command {
        Command::Single(args) => {
            let outcome = match (&args.data_row_record, &args.id, args.created) {
                (Some(path), _, _) => {
                    let json = tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let drr = DataRowRecord::from_json(&json)
                        .with_context(|| format!("Invalid data row record in {}", path.display()))?;
                    revoker.revoke_data_row_parent(&drr).await?
                }
                (None, Some(id), Some(created)) => revoker.revoke_single(id, created).await?,
                _ => anyhow::bail!("single requires --id and --created, or --data-row-record"),
            };
            info!(outcome = ?outcome, "Single key revocation finished");
            if let SingleOutcome::Failed { reason } = outcome {
                info!(reason = %reason, "Re-run once the cause is resolved; revocation is idempotent");
            }
        }
        Command::Bulk(args) => {
            let report = revoker
                .revoke_class(args.key_type.into(), args.created_before)
                .await?;
            info!(
                dry_run = report.dry_run,
                fetched = report.fetched,
                unreadable = report.unreadable,
                already_revoked = report.already_revoked,
                attempted = report.attempted,
                revoked = report.revoked,
                failed = report.failures.len(),
                "Bulk key revocation finished"
            );
        }
    }

    Ok(())
}
