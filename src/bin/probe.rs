use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use scalpbot::api::Exchange;
use scalpbot::bot::build_mexc_client;
use scalpbot::models::{OpenOrderCounts, Order};
use scalpbot::{MexcClient, Result, Settings};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Poke the configured venue: prices, candles, orders, and the private stream.
#[derive(Parser, Debug)]
#[command(name = "probe", version, about)]
struct Cli {
    /// Config file (defaults to ./config.{yaml,toml,json} if present)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Current ticker price
    Price,

    /// Recent closed one-minute candles
    Klines {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Open orders with buy/sell counts
    OpenOrders,

    /// Order history for the last N hours
    History {
        #[arg(long, default_value = "24")]
        hours: i64,
    },

    /// Log private order updates for a while
    Listen {
        #[arg(long, default_value = "60")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("scalpbot=debug")
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Price => {
            let price = public_client(&settings)?.get_price().await?;
            println!("{} {}", settings.trading.symbol, price);
        }
        Commands::Klines { limit } => {
            let klines = public_client(&settings)?.get_klines("1m", limit).await?;
            for k in &klines {
                println!(
                    "{}  o={} h={} l={} c={} v={}",
                    format_ms(k.open_time),
                    k.open,
                    k.high,
                    k.low,
                    k.close,
                    k.volume
                );
            }
            println!("{} candles", klines.len());
        }
        Commands::OpenOrders => {
            let orders = build_mexc_client(&settings)?.get_open_orders().await?;
            print_orders(&orders);
            let counts = OpenOrderCounts::from_orders(&orders);
            println!("open buys: {}, open sells: {}", counts.buys, counts.sells);
        }
        Commands::History { hours } => {
            let now = Utc::now().timestamp_millis();
            let start = now - hours * 3_600_000;
            let orders = build_mexc_client(&settings)?
                .get_all_orders(start, now)
                .await?;
            print_orders(&orders);
            println!("{} orders", orders.len());
        }
        Commands::Listen { seconds } => {
            let client = build_mexc_client(&settings)?;
            let shutdown = CancellationToken::new();
            let (tx, mut rx) = mpsc::channel(settings.stream.channel_capacity.max(1));
            let stream = client.subscribe_order_updates(shutdown.clone(), tx).await?;

            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                    update = rx.recv() => match update {
                        Some(update) => println!(
                            "{} {:?} price={} qty={}",
                            update.order_id, update.status, update.price, update.quantity
                        ),
                        None => break,
                    },
                }
            }

            shutdown.cancel();
            let _ = stream.await;
        }
    }

    Ok(())
}

/// Price and candle endpoints are unsigned, so credentials are optional here
fn public_client(settings: &Settings) -> Result<MexcClient> {
    let credentials = &settings.exchange.credentials;
    let client = MexcClient::new(
        &credentials.api_key,
        &credentials.secret_key,
        &settings.trading.symbol,
    )?
    .with_base_url(&settings.exchange.base_url);
    Ok(client)
}

fn print_orders(orders: &[Order]) {
    for o in orders {
        println!(
            "{:<28} {:<4} {:<18} price={} qty={}/{} created={}",
            o.order_id,
            o.side.as_str(),
            format!("{:?}", o.status),
            o.price,
            o.executed_qty,
            o.orig_qty,
            format_ms(o.created_at)
        );
    }
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
