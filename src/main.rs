//! ODDSBAND: Betfair SP odds-band bet placer
//!
//! Entry point. Loads configuration, initialises structured logging,
//! discovers today's eligible races, and monitors every one of them
//! concurrently until the session completes. Errors outside the
//! per-market lifecycle are logged, notified, and end the process.

use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use tracing::{error, info, warn};

use oddsband::alerts::{self, failure_message, Notifier};
use oddsband::config::{self, AppConfig};
use oddsband::engine::{MonitorSettings, Session};
use oddsband::platforms::betfair::BetfairClient;
use oddsband::platforms::{GatewayProvider, MarketDiscovery};
use oddsband::storage::BetLogStore;
use oddsband::strategy::bands::BandCatalog;

const BANNER: &str = r#"
  ___  ____  ____  ____  ____    _    _   _ ____
 / _ \|  _ \|  _ \/ ___|| __ )  / \  | \ | |  _ \
| | | | | | | | | \___ \|  _ \ / _ \ |  \| | | | |
| |_| | |_| | |_| |___) | |_) / ___ \| |\  | |_| |
 \___/|____/|____/|____/|____/_/   \_\_| \_|____/

  Betfair SP odds-band bet placer
  v0.1.0
"#;

const CONFIG_PATH_ENV: &str = "ODDSBAND_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| config::DEFAULT_CONFIG_FILE.into());
    let cfg = AppConfig::load_or_default(&config_path);

    println!("{BANNER}");
    info!(
        config = %config_path,
        catalog = %cfg.positive_differences_path.display(),
        bet_log = %cfg.bet_log_path.display(),
        dry_run = cfg.monitor.dry_run,
        "ODDSBAND starting up"
    );

    let notifier = alerts::from_config(&cfg);

    if let Err(e) = run(&cfg, Arc::clone(&notifier)).await {
        error!(error = %format!("{e:#}"), "Unhandled error, shutting down");
        notifier.send(&failure_message(&e, Local::now())).await;
        return Err(e);
    }

    info!("ODDSBAND shut down cleanly.");
    Ok(())
}

/// Discover today's markets and run the session over them.
async fn run(cfg: &AppConfig, notifier: Arc<dyn Notifier>) -> Result<()> {
    let catalog = Arc::new(BandCatalog::load(&cfg.positive_differences_path));
    if catalog.is_empty() {
        warn!("Band catalog is empty, no bets will be placed");
    }

    let store = Arc::new(BetLogStore::new(&cfg.bet_log_path));

    let client = Arc::new(BetfairClient::new().context("Failed to create Betfair client")?);

    let markets = client
        .eligible_markets()
        .await
        .context("Failed to discover today's markets")?;
    info!(count = markets.len(), "Eligible markets found");
    for market in &markets {
        info!(market = %market, "Queued");
    }

    let provider: Arc<dyn GatewayProvider> = Arc::new(client);
    let session = Session::new(
        provider,
        catalog,
        store,
        notifier,
        MonitorSettings::from(&cfg.monitor),
    );

    let report = session.run(markets).await;
    info!(
        markets = report.markets,
        bets = report.bets_placed(),
        failed = report.failed_monitors(),
        "Session complete"
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("oddsband=info"));

    let json_logging = std::env::var("ODDSBAND_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
