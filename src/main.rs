use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};

// Added for tracing file logging
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use filedepot::config::ServerConfig;
use filedepot::network;

#[derive(Parser)]
#[command(author, version, about = "Store and retrieve files over TCP", long_about = None)]
struct Cli {
    /// Port to listen on
    port: u16,

    /// Directory where files are stored (defaults to the current directory)
    download_dir: Option<PathBuf>,

    /// JSON config file; the positional arguments override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Disconnect clients that make no progress for this many seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Directory for rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        config.port = self.port;
        if let Some(dir) = self.download_dir {
            config.storage_dir = dir;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = Some(secs);
        }
        if let Some(dir) = self.log_dir {
            config.log_dir = dir;
        }

        Ok(config)
    }
}

// Function to initialize tracing and file logging
// Returns a WorkerGuard that must be kept alive for logs to be written
fn init_logging(log_dir: &Path, log_file_prefix: &str) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_prefix);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false); // Don't use ANSI codes in files

    let console_layer = fmt::layer().with_writer(std::io::stdout);

    // Use RUST_LOG env var, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;

    // This guard needs to stay in scope, otherwise logs stop writing.
    let _guard = init_logging(&config.log_dir, "filedepot")?;

    info!("Starting server on port {}...", config.port);
    if let Err(e) = network::start_server(&config).await {
        error!("Server failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}
