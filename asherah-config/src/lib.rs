//! Configuration management for the Asherah metastore tooling

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Default DynamoDB table used by Asherah
pub const DEFAULT_DYNAMODB_TABLE: &str = "EncryptionKey";

/// Default PostgreSQL port
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Default MySQL port
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Default directory of the local metastore
pub const DEFAULT_LOCAL_PATH: &str = "./metastore";

/// DynamoDB metastore configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DynamoDbConfig {
    pub table_name: String,
    /// AWS region, falls back to the SDK default chain when unset
    pub region: Option<String>,
    /// Custom endpoint, e.g. DynamoDB Local
    pub endpoint: Option<String>,
}

impl Default for DynamoDbConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_DYNAMODB_TABLE.to_string(),
            region: None,
            endpoint: None,
        }
    }
}

/// Relational metastore configuration, shared by PostgreSQL and MySQL
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SqlConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for SqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// File-backed metastore configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalConfig {
    pub path: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LOCAL_PATH),
        }
    }
}

/// Backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetastoreConfig {
    DynamoDb(DynamoDbConfig),
    Postgres(SqlConfig),
    MySql(SqlConfig),
    Local(LocalConfig),
}

impl MetastoreConfig {
    /// Backend name used in log lines
    pub fn backend_name(&self) -> &'static str {
        match self {
            MetastoreConfig::DynamoDb(_) => "dynamodb",
            MetastoreConfig::Postgres(_) => "postgres",
            MetastoreConfig::MySql(_) => "mysql",
            MetastoreConfig::Local(_) => "local",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Console,
        }
    }
}

impl LoggingConfig {
    /// Load logging configuration from `LOG_LEVEL` and `LOG_FORMAT`
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("level", "info")?
            .set_default("format", "console")?
            .add_source(config::Environment::with_prefix("LOG"))
            .build()?
            .try_deserialize()
    }
}

/// Load a `.env` file if one exists
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
