//! Meridian - relative-strength agent trading system
//!
//! Scanner -> Analyzer -> Executor over the event bus, gated by the risk
//! engine. Runs against the paper broker with CSV-backed data unless a
//! live broker integration is wired in.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use meridian::agents::Orchestrator;
use meridian::broker::PaperBroker;
use meridian::comms::Notifier;
use meridian::config::Config;
use meridian::data::HistoricalData;

const SEP: &str = "===========================================================";

#[tokio::main]
async fn main() -> Result<()> {
    // Invalid configuration must stop the process before any scheduling
    let cfg = Config::load(Path::new("config.toml")).unwrap_or_else(|e| {
        eprintln!("Failed to load config.toml: {}. Exiting.", e);
        std::process::exit(1);
    });

    let level = match cfg.system.log_level.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", SEP);
    info!("  {} - Relative-Strength Agent Trading System", cfg.system.name);
    info!("{}", SEP);

    let watchlist = cfg.effective_watchlist();
    info!("Universe: {} symbols", watchlist.len());

    // Data access before scanning
    let data = Arc::new(HistoricalData::load_dir(Path::new(&cfg.data.csv_dir)).unwrap_or_else(
        |e| {
            warn!("no historical data loaded from {}: {}", cfg.data.csv_dir, e);
            HistoricalData::new()
        },
    ));
    info!("Data: {} symbols loaded from {}", data.len(), cfg.data.csv_dir);

    let broker = Arc::new(PaperBroker::new(
        rust_decimal::Decimal::try_from(cfg.account.starting_cash).unwrap_or_default(),
    ));

    let notifier = if cfg.telegram.enabled {
        Notifier::new(true, cfg.telegram.bot_token.clone(), cfg.telegram.chat_id.clone())
    } else {
        Notifier::disabled()
    };

    let mut orchestrator =
        Orchestrator::new(cfg.orchestrator_config(), data, broker, notifier.clone());

    info!("Risk: {}", orchestrator.risk().status());
    info!("Mode: {}", if cfg.executor.auto_trade { "AUTO" } else { "MANUAL (signals only)" });

    notifier.notify_startup(&cfg.system.name);
    orchestrator.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    orchestrator.shutdown().await;

    Ok(())
}
