use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use scalpbot::bot::build_mexc_client;
use scalpbot::{Bot, Result, Settings};
use tokio_util::sync::CancellationToken;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Spot scalping bot for MEXC
#[derive(Parser, Debug)]
#[command(name = "scalpbot", version, about)]
struct Cli {
    /// Config file (defaults to ./config.{yaml,toml,json} if present)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Start with the buy worker switched off
    #[arg(long)]
    no_buy: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.no_buy {
        settings.trading.buy_enabled_on_start = false;
    }

    tracing::info!("🚀 scalpbot starting");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {}", settings.trading.symbol);
    tracing::info!("  Order size: {} {}", settings.trading.order_size, settings.trading.base_asset);
    tracing::info!("  Profit: {}%", settings.trading.profit_percent);
    tracing::info!(
        "  Workers: buy every {}s, sell every {}s, profit every {}s",
        settings.workers.buy_period_secs,
        settings.workers.sell_period_secs,
        settings.workers.profit_period_secs
    );

    let exchange = Arc::new(build_mexc_client(&settings)?);
    let bot = Bot::new(settings, exchange);

    let shutdown = CancellationToken::new();
    let running = bot.start(shutdown.clone()).await?;

    tracing::info!("Press Ctrl+C to stop...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    running.stop(SHUTDOWN_DEADLINE).await;

    let status = bot.status();
    tracing::info!(
        tracked_orders = status.tracked_orders,
        last_profit = ?status.last_profit,
        "👋 scalpbot stopped"
    );
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scalpbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
