//! Batch stock screener.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the HTTP collaborators into a `Screener`, runs one pass, and
//! prints the run report as JSON on stdout.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use screener::analysis::client::EngineClient;
use screener::config::AppConfig;
use screener::data::market::MarketDataClient;
use screener::screening::Screener;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    info!(
        config = %config_path,
        universe = %cfg.screening.universe,
        target_count = cfg.screening.target_count,
        concurrency = cfg.pipeline.analysis_concurrency,
        "Screener starting up"
    );

    let market = Arc::new(MarketDataClient::new(&cfg.market_data)?);
    let engine = Arc::new(EngineClient::new(cfg.engine.resolve()?)?);

    let screener = Screener::new(market.clone(), market, engine, cfg.pipeline.clone());
    let report = screener.run_with_report(&cfg.screening).await;

    for metrics in &report.stages {
        info!(stage = %metrics.stage, "{metrics}");
    }
    for pick in &report.picks {
        info!("{pick}");
    }

    let json = serde_json::to_string_pretty(&report).context("Failed to serialise run report")?;
    println!("{json}");

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("screener=info"));

    let json_logging = std::env::var("SCREENER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
