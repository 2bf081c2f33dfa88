//! CLI entry point for the transit vehicle poller.
//!
//! Provides subcommands for running the polling daemon, running startup
//! recovery alone, and validating a configuration file.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_poller::adapter::AdapterRegistry;
use transit_poller::config::Config;
use transit_poller::fetch::BasicClient;
use transit_poller::recovery::recover;
use transit_poller::scheduler::Scheduler;
use transit_poller::store::{MemoryStore, VehicleStore};

#[derive(Parser)]
#[command(name = "transit_poller")]
#[command(about = "Polls AVL and GTFS-RT vehicle feeds into a cache store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every enabled feed until interrupted
    Run {
        /// Path to the JSON configuration
        #[arg(short, long, default_value = "config.json", env = "CONFIG_PATH")]
        config: PathBuf,

        /// Start polling without the startup recovery pass
        #[arg(long, default_value_t = false)]
        no_recovery: bool,
    },
    /// Run startup recovery once and print its summary
    Recover {
        /// Path to the JSON configuration
        #[arg(short, long, default_value = "config.json", env = "CONFIG_PATH")]
        config: PathBuf,
    },
    /// Validate a configuration and list the tuples it would poll
    CheckConfig {
        /// Path to the JSON configuration
        #[arg(short, long, default_value = "config.json", env = "CONFIG_PATH")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/transit_poller.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_poller.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            no_recovery,
        } => {
            let config = load_config(&config)?;
            let registry = registry(&config)?;
            config.validate(&registry)?;
            let store = open_store(&config).await?;

            let mut scheduler = Scheduler::new(Arc::new(registry), store);
            if let Some(summary) = scheduler.start(&config, !no_recovery).await {
                info!(
                    skipped = summary.skipped,
                    fetched = summary.fetched,
                    total_vehicles = summary.total_vehicles,
                    "Recovery summary"
                );
            }

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("Shutdown requested, draining in-flight cycles");
            scheduler.stop_all().await;
        }
        Commands::Recover { config } => {
            let config = load_config(&config)?;
            let registry = registry(&config)?;
            config.validate(&registry)?;
            let store = open_store(&config).await?;

            let scheduler = Scheduler::new(Arc::new(registry), store);
            let mut pollers = scheduler.build_pollers(&config);
            let summary = recover(&mut pollers, config.recovery_max_age_minutes).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            let registry = registry(&config)?;
            config.validate(&registry)?;

            let scheduler = Scheduler::new(Arc::new(registry), Arc::new(MemoryStore::new()));
            let pollers = scheduler.build_pollers(&config);
            for poller in &pollers {
                info!(
                    tuple = %poller.id(),
                    interval_secs = poller.interval().as_secs(),
                    pattern = %poller.status_pattern(),
                    "Tuple"
                );
            }
            info!(
                operators = config.operators.len(),
                tuples = pollers.len(),
                "Configuration is valid"
            );
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
    info!(path = %path.display(), operators = config.operators.len(), "Configuration loaded");
    Ok(config)
}

fn registry(config: &Config) -> Result<AdapterRegistry> {
    let client = BasicClient::new(Duration::from_secs(config.http_timeout_secs))
        .context("building HTTP client")?;
    Ok(AdapterRegistry::with_builtin(Arc::new(client)))
}

/// Redis when the feature is compiled in and a URL is configured, otherwise
/// an in-process store.
async fn open_store(config: &Config) -> Result<Arc<dyn VehicleStore>> {
    let redis_url = config
        .redis_url
        .clone()
        .or_else(|| std::env::var("REDIS_URL").ok());

    #[cfg(feature = "redis-store")]
    if let Some(url) = &redis_url {
        let store = transit_poller::store::RedisStore::connect(url).await?;
        return Ok(Arc::new(store));
    }

    if redis_url.is_some() {
        warn!("REDIS_URL set but built without the redis-store feature, using the in-memory store");
    }
    Ok(Arc::new(MemoryStore::new()))
}
