use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::api::Exchange;
use crate::config::TradingSettings;
use crate::execution::OrderRegistry;
use crate::models::{OpenOrderCounts, OrderRequest};
use crate::state::ControlState;
use crate::strategy::adjust_timeout;

const TREND_INTERVAL: &str = "1m";
const TREND_CANDLES: usize = 10;
const INSUFFICIENT_BALANCE_BACKOFF: Duration = Duration::from_secs(15);

/// What a buy cycle ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Disabled,
    Cancelled,
    OpenOrderCap { open: usize },
    InsufficientBalance { balance: f64, required: f64 },
    Placed { order_id: String, price: f64 },
}

/// Places one limit buy at market price per cycle, paced by the recent trend
pub struct BuyWorker {
    exchange: Arc<dyn Exchange>,
    registry: OrderRegistry,
    control: ControlState,
    trading: TradingSettings,
    backoff: Duration,
}

impl BuyWorker {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        registry: OrderRegistry,
        control: ControlState,
        trading: TradingSettings,
    ) -> Self {
        Self {
            exchange,
            registry,
            control,
            trading,
            backoff: INSUFFICIENT_BALANCE_BACKOFF,
        }
    }

    /// Pause applied when the quote balance cannot cover an order
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> anyhow::Result<BuyOutcome> {
        if !self.control.buy_enabled() {
            return Ok(BuyOutcome::Disabled);
        }

        let klines = self
            .exchange
            .get_klines(TREND_INTERVAL, TREND_CANDLES)
            .await
            .context("failed to fetch klines")?;
        let delay = adjust_timeout(self.trading.base_buy_timeout_secs, &klines);
        tracing::debug!(delay_secs = delay, "Waiting before buy");
        if !pause(shutdown, Duration::from_secs(delay)).await {
            return Ok(BuyOutcome::Cancelled);
        }

        let open_orders = self
            .exchange
            .get_open_orders()
            .await
            .context("failed to fetch open orders")?;
        let counts = OpenOrderCounts::from_orders(&open_orders);
        if counts.total() >= self.trading.max_open_orders {
            return Ok(BuyOutcome::OpenOrderCap {
                open: counts.total(),
            });
        }

        let account = self
            .exchange
            .get_account()
            .await
            .context("failed to fetch account")?;
        let balance = account.free_balance(&self.trading.quote_asset);
        let price = self
            .exchange
            .get_price()
            .await
            .context("failed to fetch price")?;

        let required = self.trading.order_size * price;
        tracing::debug!(price, balance, required, "Buy check");

        if balance < required {
            pause(shutdown, self.backoff).await;
            return Ok(BuyOutcome::InsufficientBalance { balance, required });
        }

        let ack = self
            .exchange
            .place_order(&OrderRequest::limit_buy(self.trading.order_size, price))
            .await
            .context("failed to place buy")?;
        self.registry.track(&ack.order_id);

        Ok(BuyOutcome::Placed {
            order_id: ack.order_id,
            price,
        })
    }
}

#[async_trait]
impl Worker for BuyWorker {
    fn name(&self) -> &str {
        "buy"
    }

    async fn process(&self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        match self.run_cycle(shutdown).await? {
            BuyOutcome::Disabled => tracing::debug!("Buy worker is switched off"),
            BuyOutcome::Cancelled => {}
            BuyOutcome::OpenOrderCap { open } => {
                tracing::warn!(open, "Open order limit reached, skipping buy")
            }
            BuyOutcome::InsufficientBalance { balance, required } => tracing::info!(
                balance,
                required,
                "Not enough {} for a buy, waiting",
                self.trading.quote_asset
            ),
            BuyOutcome::Placed { order_id, price } => tracing::info!(
                order_id = %order_id,
                price,
                quantity = self.trading.order_size,
                "🛒 Buy order placed"
            ),
        }
        Ok(())
    }
}

/// Sleep unless shutdown comes first. Returns false when cancelled.
async fn pause(shutdown: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !shutdown.is_cancelled();
    }
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::paper::paper_order;
    use crate::api::PaperExchange;
    use crate::models::{Kline, OrderSide, OrderStatus, OrderType};
    use std::time::Instant;

    fn candle(open: f64, close: f64) -> Kline {
        Kline {
            open_time: 0,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1.0,
            close_time: 59_999,
        }
    }

    fn setup(balance: f64) -> (PaperExchange, OrderRegistry, BuyWorker) {
        let venue = PaperExchange::new("KASUSDT");
        venue.set_price(1.0);
        venue.set_balance("USDT", balance);

        let registry = OrderRegistry::new();
        let control = ControlState::new();
        control.set_buy_enabled(true);

        let trading = TradingSettings {
            base_buy_timeout_secs: 0,
            ..TradingSettings::default()
        };
        let worker = BuyWorker::new(Arc::new(venue.clone()), registry.clone(), control, trading)
            .with_backoff(Duration::from_millis(1));
        (venue, registry, worker)
    }

    #[tokio::test]
    async fn test_places_and_tracks_buy() {
        let (venue, registry, worker) = setup(100.0);

        let outcome = worker.run_cycle(&CancellationToken::new()).await.unwrap();

        let BuyOutcome::Placed { order_id, price } = outcome else {
            panic!("expected a placed buy, got {:?}", outcome);
        };
        assert_eq!(price, 1.0);
        assert!(registry.is_tracked(&order_id));

        let placed = venue.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].1.side, OrderSide::Buy);
        assert_eq!(placed[0].1.order_type, OrderType::Limit);
        assert_eq!(placed[0].1.quantity, 40.0);
        assert_eq!(placed[0].1.price, Some(1.0));
    }

    #[tokio::test]
    async fn test_trend_delay_from_seeded_candles() {
        let (venue, registry, worker) = setup(100.0);
        let worker = BuyWorker {
            trading: TradingSettings {
                base_buy_timeout_secs: 1,
                ..TradingSettings::default()
            },
            ..worker
        };
        // Newest candle last: green, green, red keeps the base delay
        venue.set_klines(vec![candle(1.0, 1.1), candle(1.1, 1.2), candle(1.2, 1.15)]);

        let started = Instant::now();
        let outcome = worker.run_cycle(&CancellationToken::new()).await.unwrap();
        let waited = started.elapsed();

        assert!(matches!(outcome, BuyOutcome::Placed { .. }));
        assert!(waited >= Duration::from_millis(950), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(3), "waited {:?}", waited);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_falling_candles_keep_base_delay() {
        let (venue, _registry, worker) = setup(100.0);
        let worker = BuyWorker {
            trading: TradingSettings {
                base_buy_timeout_secs: 3600,
                ..TradingSettings::default()
            },
            ..worker
        };
        // A long falling run still waits the full base delay
        venue.set_klines(vec![candle(1.0, 0.9), candle(0.9, 0.8), candle(0.8, 0.7)]);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = worker.run_cycle(&shutdown).await.unwrap();

        assert_eq!(outcome, BuyOutcome::Cancelled);
        assert!(venue.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_flag_skips_everything() {
        let venue = PaperExchange::new("KASUSDT");
        venue.set_balance("USDT", 100.0);
        let worker = BuyWorker::new(
            Arc::new(venue.clone()),
            OrderRegistry::new(),
            ControlState::new(),
            TradingSettings::default(),
        );

        let outcome = worker.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, BuyOutcome::Disabled);
        assert!(venue.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_balance_backs_off() {
        let (venue, registry, worker) = setup(39.0);

        let outcome = worker.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            outcome,
            BuyOutcome::InsufficientBalance {
                balance: 39.0,
                required: 40.0
            }
        );
        assert!(venue.placed_orders().is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_open_order_cap() {
        let (venue, _registry, worker) = setup(100.0);
        let worker = BuyWorker {
            trading: TradingSettings {
                max_open_orders: 2,
                base_buy_timeout_secs: 0,
                ..TradingSettings::default()
            },
            ..worker
        };
        venue.insert_order(paper_order("a", OrderSide::Buy, OrderStatus::New, 1.0, 1.0, 0.0, 1));
        venue.insert_order(paper_order(
            "b",
            OrderSide::Sell,
            OrderStatus::PartiallyFilled,
            1.0,
            1.0,
            0.5,
            1,
        ));

        let outcome = worker.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, BuyOutcome::OpenOrderCap { open: 2 });
        assert!(venue.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_trend_delay() {
        let (venue, _registry, worker) = setup(100.0);
        let worker = BuyWorker {
            trading: TradingSettings {
                base_buy_timeout_secs: 3600,
                ..TradingSettings::default()
            },
            ..worker
        };
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = worker.run_cycle(&shutdown).await.unwrap();

        assert_eq!(outcome, BuyOutcome::Cancelled);
        assert!(venue.placed_orders().is_empty());
    }
}
