//! Revoke Keys
//!
//! Maintenance tool that marks envelope keys revoked in an Asherah metastore.
//! Configuration is loaded from environment variables (via .env file);
//! command-line arguments override environment variables.

use asherah_config::{load_dotenv, LogFormat, LoggingConfig};
use asherah_metastore::cli::{run, Cli};
use clap::Parser;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load .env file (ignore if not found)
    load_dotenv();

    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env().unwrap_or_default();
    if let Some(format) = cli.log_format {
        logging.format = LogFormat::from(format);
    }
    if let Err(e) = asherah_logging::init(&logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Key revocation aborted");
        std::process::exit(1);
    }
}
