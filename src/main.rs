use anyhow::Context;
use autotrader::api::BinanceFuturesClient;
use autotrader::config::{Credentials, Settings, SettingsOverrides};
use autotrader::execution::{ExecutionController, TokioClock, TracingObserver};
use autotrader::models::Interval;
use autotrader::scheduler::PollingScheduler;
use autotrader::strategy::EmaTrendSignal;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Keep one Binance futures position in line with an EMA trend signal
#[derive(Debug, Parser)]
#[command(name = "autotrader", version)]
struct Cli {
    /// TOML settings file (defaults to ./autotrader.toml when present)
    #[arg(short, long)]
    config: Option<String>,

    /// Trading pair, e.g. ETH/USDT
    #[arg(short, long)]
    symbol: Option<String>,

    /// Polling and bar interval
    #[arg(short, long, value_enum)]
    interval: Option<Interval>,

    /// Quote-asset notional per order, before leverage
    #[arg(long)]
    notional: Option<f64>,

    #[arg(long)]
    leverage: Option<u32>,

    /// Close attempts before the fallback full close
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let overrides = SettingsOverrides {
        symbol: cli.symbol.clone(),
        interval: cli.interval,
        notional_per_order: cli.notional,
        leverage: cli.leverage,
        max_close_attempts: cli.max_attempts,
    };
    let settings =
        Settings::load(cli.config.as_deref(), &overrides).context("Invalid configuration")?;

    tracing::info!("🚀 autotrader starting");
    log_settings(&settings);

    // Startup failures are fatal: never enter the loop with an unusable client
    let credentials = Credentials::from_env().context("Missing exchange credentials")?;
    let client = Arc::new(BinanceFuturesClient::new(credentials, settings.recv_window_ms)?);
    client
        .connect()
        .await
        .context("Failed to load futures markets")?;
    tracing::info!(
        "✅ Using {} mode",
        if client.is_testnet() { "Testnet" } else { "Mainnet" }
    );

    let clock = Arc::new(TokioClock);
    let controller = Arc::new(ExecutionController::new(
        settings.controller_config(),
        client.clone(),
        clock.clone(),
        Arc::new(TracingObserver),
    ));
    controller.initialize().await;

    let source = Arc::new(EmaTrendSignal::new(
        client.clone(),
        settings.ema_fast,
        settings.ema_slow,
    ));
    let scheduler = PollingScheduler::new(
        settings.exchange_symbol(),
        settings.interval,
        source,
        controller,
        clock,
    );

    if cli.once {
        scheduler.run_once().await;
        return Ok(());
    }

    tracing::info!("Press Ctrl+C to stop...");
    tokio::select! {
        _ = scheduler.run() => {
            tracing::error!("Polling loop exited unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
    }

    tracing::info!("👋 autotrader stopped");
    Ok(())
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autotrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_settings(settings: &Settings) {
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {} ({})", settings.symbol, settings.exchange_symbol());
    tracing::info!("  Interval: {} ({}s)", settings.interval, settings.interval.as_secs());
    tracing::info!(
        "  Notional per order: {:.2} {}",
        settings.notional_per_order,
        settings.quote_asset
    );
    tracing::info!("  Leverage: {}x", settings.leverage);
    tracing::info!(
        "  Close retries: {} (backoff {}s)",
        settings.max_close_attempts,
        settings.backoff_secs
    );
    tracing::info!("  Signal: EMA {}/{}", settings.ema_fast, settings.ema_slow);
    tracing::info!(
        "  On position query failure: {:?}",
        settings.position_query_failure
    );
}
