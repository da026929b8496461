//! Command Line Tests

mod common;

use asherah_config::{LogFormat, MetastoreConfig};
use asherah_metastore::cli::{run, Cli, Command, KeyTypeArg, MetastoreKind};
use asherah_metastore::local_store::LocalMetastore;
use asherah_metastore::{Metastore, RunMode};
use clap::Parser;
use common::record;
use std::path::Path;
use tempfile::TempDir;

async fn seed(path: &Path) {
    let store = LocalMetastore::open(path).await.unwrap();
    for record in [record("_SK_old", 100), record("_SK_new", 300), record("_IK_old", 100)] {
        store.store(&record).await.unwrap();
    }
}

async fn is_revoked(path: &Path, id: &str, created: i64) -> bool {
    let store = LocalMetastore::open(path).await.unwrap();
    store
        .get_by_key(id, created)
        .await
        .unwrap()
        .map(|record| record.is_revoked())
        .unwrap_or(false)
}

#[test]
fn test_dry_run_is_default() {
    let cli = Cli::try_parse_from(["revoke-keys", "single", "--id", "_SK_1", "--created", "100"]).unwrap();
    assert_eq!(cli.run_mode(), RunMode::DryRun);

    let cli = Cli::try_parse_from([
        "revoke-keys",
        "single",
        "--id",
        "_SK_1",
        "--created",
        "100",
        "--execute",
    ])
    .unwrap();
    assert_eq!(cli.run_mode(), RunMode::Execute);
}

#[test]
fn test_bulk_arguments() {
    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "local",
        "bulk",
        "--created-before",
        "1700000000",
        "--type",
        "intermediate",
    ])
    .unwrap();

    assert_eq!(cli.metastore, MetastoreKind::Local);
    match cli.command {
        Command::Bulk(args) => {
            assert_eq!(args.created_before, 1_700_000_000);
            assert_eq!(args.key_type, KeyTypeArg::Intermediate);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_bulk_rejects_unknown_type() {
    let result = Cli::try_parse_from([
        "revoke-keys",
        "bulk",
        "--created-before",
        "100",
        "--type",
        "data",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_single_requires_created_with_id() {
    let result = Cli::try_parse_from(["revoke-keys", "single", "--id", "_SK_1"]);
    assert!(result.is_err());

    let result = Cli::try_parse_from(["revoke-keys", "single"]);
    assert!(result.is_err());
}

#[test]
fn test_data_row_record_conflicts_with_id() {
    let result = Cli::try_parse_from([
        "revoke-keys",
        "single",
        "--data-row-record",
        "drr.json",
        "--id",
        "_IK_1",
        "--created",
        "1",
    ]);
    assert!(result.is_err());

    let cli = Cli::try_parse_from(["revoke-keys", "single", "--data-row-record", "drr.json"]).unwrap();
    assert!(matches!(cli.command, Command::Single(ref args) if args.data_row_record.is_some()));
}

#[test]
fn test_postgres_config() {
    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "sql",
        "--host",
        "db.internal",
        "--database",
        "asherah",
        "--user",
        "root",
        "--password",
        "Password123",
        "bulk",
        "--created-before",
        "100",
        "--type",
        "system",
    ])
    .unwrap();

    match cli.metastore_config().unwrap() {
        MetastoreConfig::Postgres(config) => {
            assert_eq!(config.host, "db.internal");
            assert_eq!(config.port, 5432);
            assert_eq!(config.database, "asherah");
        }
        other => panic!("unexpected config {:?}", other),
    }
}

#[test]
fn test_mysql_config_defaults_to_mysql_port() {
    let args = |port: Option<&'static str>| {
        let mut args = vec![
            "revoke-keys",
            "--metastore",
            "mysql",
            "--host",
            "db.internal",
            "--database",
            "asherah",
            "--user",
            "root",
            "--password",
            "Password123",
        ];
        if let Some(port) = port {
            args.extend(["--port", port]);
        }
        args.extend(["single", "--id", "_SK_1", "--created", "1"]);
        args
    };

    let cli = Cli::try_parse_from(args(None)).unwrap();
    assert_eq!(cli.metastore, MetastoreKind::Mysql);
    match cli.metastore_config().unwrap() {
        MetastoreConfig::MySql(config) => assert_eq!(config.port, 3306),
        other => panic!("unexpected config {:?}", other),
    }

    let cli = Cli::try_parse_from(args(Some("33060"))).unwrap();
    match cli.metastore_config().unwrap() {
        MetastoreConfig::MySql(config) => assert_eq!(config.port, 33060),
        other => panic!("unexpected config {:?}", other),
    }
}

#[test]
fn test_mysql_requires_connection_flags() {
    let result = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "mysql",
        "single",
        "--id",
        "_SK_1",
        "--created",
        "1",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_log_format_flag() {
    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--log-format",
        "json",
        "single",
        "--id",
        "_SK_1",
        "--created",
        "1",
    ])
    .unwrap();
    assert_eq!(cli.log_format.map(LogFormat::from), Some(LogFormat::Json));
}

#[tokio::test]
async fn test_run_bulk_dry_run_leaves_store_untouched() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path()).await;

    let path = temp_dir.path().to_str().unwrap();
    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "local",
        "--path",
        path,
        "bulk",
        "--created-before",
        "200",
        "--type",
        "system",
    ])
    .unwrap();
    run(cli).await.unwrap();

    assert!(!is_revoked(temp_dir.path(), "_SK_old", 100).await);
    assert!(!is_revoked(temp_dir.path(), "_SK_new", 300).await);
}

#[tokio::test]
async fn test_run_bulk_execute() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path()).await;

    let path = temp_dir.path().to_str().unwrap();
    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "local",
        "--path",
        path,
        "bulk",
        "--created-before",
        "200",
        "--type",
        "system",
        "--execute",
    ])
    .unwrap();
    run(cli).await.unwrap();

    assert!(is_revoked(temp_dir.path(), "_SK_old", 100).await);
    assert!(!is_revoked(temp_dir.path(), "_SK_new", 300).await);
    assert!(!is_revoked(temp_dir.path(), "_IK_old", 100).await);
}

#[tokio::test]
async fn test_run_single_missing_key_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path()).await;

    let path = temp_dir.path().to_str().unwrap();
    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "local",
        "--path",
        path,
        "single",
        "--id",
        "_IK_5",
        "--created",
        "50",
        "--execute",
    ])
    .unwrap();

    run(cli).await.unwrap();
}

#[tokio::test]
async fn test_run_single_from_data_row_record() {
    let temp_dir = TempDir::new().unwrap();
    seed(temp_dir.path()).await;

    let drr_path = temp_dir.path().join("drr.txt");
    std::fs::write(
        &drr_path,
        r#"{"Key":{"Created":150,"Key":"ZW5jcnlwdGVk","ParentKeyMeta":{"KeyId":"_IK_old","Created":100}},"Data":"ZGF0YQ=="}"#,
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "local",
        "--path",
        temp_dir.path().to_str().unwrap(),
        "single",
        "--data-row-record",
        drr_path.to_str().unwrap(),
        "--execute",
    ])
    .unwrap();
    run(cli).await.unwrap();

    assert!(is_revoked(temp_dir.path(), "_IK_old", 100).await);
}

#[tokio::test]
async fn test_run_rejects_invalid_data_row_record() {
    let temp_dir = TempDir::new().unwrap();
    let drr_path = temp_dir.path().join("drr.txt");
    std::fs::write(&drr_path, "not json").unwrap();

    let cli = Cli::try_parse_from([
        "revoke-keys",
        "--metastore",
        "local",
        "--path",
        temp_dir.path().to_str().unwrap(),
        "single",
        "--data-row-record",
        drr_path.to_str().unwrap(),
    ])
    .unwrap();

    assert!(run(cli).await.is_err());
}
