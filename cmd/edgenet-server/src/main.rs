use clap::{Parser, ValueEnum};
use pkg_api::AppState;
use pkg_api::server::serve;
use pkg_constants::paths::{DEFAULT_SERVER_CONFIG, DEFAULT_SERVER_PORT, MEMORY_DATA_DIR};
use pkg_constants::timing::{DEFAULT_WORKERS, EVICTION_SETTLE_MILLIS, FALLBACK_SWEEP_HOURS};
use pkg_controllers::{EngineConfig, QuotaEngine};
use pkg_state::client::StateStore;
use pkg_types::config::{ServerConfigFile, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "edgenet-server", about = "EdgeNet hierarchical quota accounting server")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage (`memory://` for an ephemeral store)
    #[arg(long)]
    data_dir: Option<String>,

    /// Number of reconciliation workers
    #[arg(long)]
    workers: Option<usize>,

    /// Pause after each eviction before re-reading quotas
    #[arg(long)]
    eviction_settle_ms: Option<u64>,

    /// Sweep period used when an expiry watch cannot be established
    #[arg(long)]
    fallback_sweep_hours: Option<u64>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

/// Settings after merging CLI args > config file > defaults.
#[derive(Debug)]
struct Settings {
    port: u16,
    data_dir: String,
    engine: EngineConfig,
    log_format: LogFormat,
}

impl Settings {
    fn merge(cli: Cli, file: ServerConfigFile) -> anyhow::Result<Self> {
        let log_format = match cli.log_format {
            Some(format) => format,
            None => match file.log_format.as_deref() {
                Some(raw) => LogFormat::from_str(raw, true)
                    .map_err(|e| anyhow::anyhow!("invalid log-format '{}': {}", raw, e))?,
                None => LogFormat::Text,
            },
        };
        Ok(Self {
            port: cli.port.or(file.port).unwrap_or(DEFAULT_SERVER_PORT),
            data_dir: cli
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| MEMORY_DATA_DIR.to_string()),
            engine: EngineConfig {
                workers: cli.workers.or(file.workers).unwrap_or(DEFAULT_WORKERS),
                eviction_settle: Duration::from_millis(
                    cli.eviction_settle_ms
                        .or(file.eviction_settle_ms)
                        .unwrap_or(EVICTION_SETTLE_MILLIS),
                ),
                fallback_sweep: Duration::from_secs(
                    cli.fallback_sweep_hours
                        .or(file.fallback_sweep_hours)
                        .unwrap_or(FALLBACK_SWEEP_HOURS)
                        .saturating_mul(3600),
                ),
            },
            log_format,
        })
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&config_path)?;
    let settings = Settings::merge(cli, file_cfg)?;
    init_tracing(settings.log_format);

    info!("Starting edgenet-server");
    info!("  Config:    {}", config_path);
    info!("  Port:      {}", settings.port);
    info!("  Data dir:  {}", settings.data_dir);
    info!("  Workers:   {}", settings.engine.workers);

    let store = StateStore::open(&settings.data_dir).await?;
    let engine = QuotaEngine::new(store.clone(), settings.engine);
    let state = AppState::new(store.clone(), engine.tuner(), engine.gate());
    let handle = engine.start().await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let served = serve(addr, state, shutdown_signal()).await;

    handle.shutdown().await;
    store.close().await?;
    served
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_and_file_overrides_defaults() {
        let cli = Cli::parse_from(["edgenet-server", "--port", "9000", "--workers", "8"]);
        let file: ServerConfigFile = file_config();
        let settings = Settings::merge(cli, file).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.engine.workers, 8);
        assert_eq!(settings.data_dir, "/var/lib/edgenet");
        assert_eq!(settings.engine.eviction_settle, Duration::from_millis(50));
        assert_eq!(settings.engine.fallback_sweep, Duration::from_secs(FALLBACK_SWEEP_HOURS * 3600));
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn defaults_select_the_memory_store() {
        let cli = Cli::parse_from(["edgenet-server"]);
        let settings = Settings::merge(cli, ServerConfigFile::default()).unwrap();
        assert_eq!(settings.port, DEFAULT_SERVER_PORT);
        assert_eq!(settings.data_dir, MEMORY_DATA_DIR);
        assert_eq!(settings.engine.workers, DEFAULT_WORKERS);
        assert_eq!(settings.log_format, LogFormat::Text);
    }

    #[test]
    fn unknown_log_format_is_an_error() {
        let cli = Cli::parse_from(["edgenet-server"]);
        let file = ServerConfigFile {
            log_format: Some("xml".into()),
            ..Default::default()
        };
        assert!(Settings::merge(cli, file).is_err());
    }

    #[test]
    fn huge_sweep_period_saturates() {
        let cli = Cli::parse_from(["edgenet-server", "--fallback-sweep-hours", &u64::MAX.to_string()]);
        let settings = Settings::merge(cli, ServerConfigFile::default()).unwrap();
        assert_eq!(settings.engine.fallback_sweep, Duration::from_secs(u64::MAX));
    }

    fn file_config() -> ServerConfigFile {
        ServerConfigFile {
            port: Some(7000),
            data_dir: Some("/var/lib/edgenet".into()),
            workers: Some(1),
            eviction_settle_ms: Some(50),
            fallback_sweep_hours: None,
            log_format: Some("json".into()),
        }
    }
}
