use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scalpbot::api::paper::paper_order;
use scalpbot::api::Exchange;
use scalpbot::config::TradingSettings;
use scalpbot::execution::{OrderListener, OrderRegistry};
use scalpbot::state::ControlState;
use scalpbot::workers::{BuyOutcome, BuyWorker, SellWorker};
use scalpbot::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn trading() -> TradingSettings {
    TradingSettings {
        order_size: 40.0,
        profit_percent: 0.3,
        base_buy_timeout_secs: 0,
        ..Default::default()
    }
}

fn funded_venue() -> PaperExchange {
    let venue = PaperExchange::new("KASUSDT");
    venue.set_price(1.0);
    venue.set_balance("USDT", 100.0);
    venue.set_balance("KAS", 40.0);
    venue
}

fn fill_update(order_id: &str) -> OrderUpdate {
    OrderUpdate {
        order_id: order_id.to_string(),
        price: "1".to_string(),
        quantity: "40".to_string(),
        status: StreamOrderStatus::FullyTraded,
        created_at: 0,
    }
}

fn sells(venue: &PaperExchange) -> Vec<OrderRequest> {
    venue
        .placed_orders()
        .into_iter()
        .map(|(_, request)| request)
        .filter(|request| request.side == OrderSide::Sell)
        .collect()
}

/// Poll until `cond` holds or two seconds pass
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn test_buy_fill_places_paired_sell() {
    let _ = tracing_subscriber::fmt::try_init();

    let venue = funded_venue();
    let exchange: Arc<dyn Exchange> = Arc::new(venue.clone());
    let registry = OrderRegistry::new();
    let shutdown = CancellationToken::new();

    let (tx, rx) = mpsc::channel(16);
    let stream = exchange
        .subscribe_order_updates(shutdown.clone(), tx)
        .await
        .unwrap();
    let listener = OrderListener::new(exchange.clone(), registry.clone(), 0.3, rx)
        .start(shutdown.clone());

    // 1. One buy at market price
    let control = ControlState::new();
    control.set_buy_enabled(true);
    let buyer = BuyWorker::new(exchange.clone(), registry.clone(), control, trading());
    let BuyOutcome::Placed { order_id, price } = buyer.run_cycle(&shutdown).await.unwrap() else {
        panic!("expected a buy to be placed");
    };
    assert_eq!(price, 1.0);
    assert!(registry.is_tracked(&order_id));

    // 2. The venue fills it and the listener answers with a take-profit sell
    venue.simulate_fill(&order_id).await.unwrap();
    assert!(eventually(|| registry.is_empty()).await, "fill was never handled");

    let sells = sells(&venue);
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].order_type, OrderType::Limit);
    assert_eq!(sells[0].quantity, 40.0);
    assert!((sells[0].price.unwrap() - 1.003).abs() < 1e-9);

    shutdown.cancel();
    listener.wait().await;
    stream.await.unwrap();
}

#[tokio::test]
async fn test_duplicate_fill_updates_sell_once() {
    let venue = funded_venue();
    let exchange: Arc<dyn Exchange> = Arc::new(venue.clone());
    let registry = OrderRegistry::new();
    let shutdown = CancellationToken::new();

    let (tx, rx) = mpsc::channel(16);
    exchange
        .subscribe_order_updates(shutdown.clone(), tx)
        .await
        .unwrap();
    let listener = OrderListener::new(exchange.clone(), registry.clone(), 0.3, rx)
        .start(shutdown.clone());

    registry.track("B-1");
    venue.push_update(fill_update("B-1")).await;
    venue.push_update(fill_update("B-1")).await;

    assert!(eventually(|| registry.is_empty()).await);
    shutdown.cancel();
    listener.wait().await;

    assert_eq!(sells(&venue).len(), 1);
}

#[tokio::test]
async fn test_reconciler_skips_fill_the_listener_handled() {
    let venue = funded_venue();
    let exchange: Arc<dyn Exchange> = Arc::new(venue.clone());
    let registry = OrderRegistry::new();
    let shutdown = CancellationToken::new();

    // Filled a minute ago, so the reconciler considers it missed
    let minute_ago = Utc::now().timestamp_millis() - 60_000;
    venue.insert_order(paper_order("B-2", OrderSide::Buy, OrderStatus::Filled, 1.0, 40.0, 40.0, minute_ago));
    registry.track("B-2");

    let (tx, rx) = mpsc::channel(16);
    exchange
        .subscribe_order_updates(shutdown.clone(), tx)
        .await
        .unwrap();
    let listener = OrderListener::new(exchange.clone(), registry.clone(), 0.3, rx)
        .start(shutdown.clone());

    venue.push_update(fill_update("B-2")).await;
    assert!(eventually(|| registry.is_empty()).await);

    let report = SellWorker::new(exchange.clone(), registry.clone(), trading())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.sold_filled, 0);
    assert_eq!(sells(&venue).len(), 1);

    shutdown.cancel();
    listener.wait().await;
}

#[tokio::test]
async fn test_listener_ignores_fill_the_reconciler_handled() {
    let venue = funded_venue();
    let exchange: Arc<dyn Exchange> = Arc::new(venue.clone());
    let registry = OrderRegistry::new();
    let shutdown = CancellationToken::new();

    let minute_ago = Utc::now().timestamp_millis() - 60_000;
    venue.insert_order(paper_order("B-3", OrderSide::Buy, OrderStatus::Filled, 1.0, 40.0, 40.0, minute_ago));
    registry.track("B-3");

    let report = SellWorker::new(exchange.clone(), registry.clone(), trading())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.sold_filled, 1);
    assert!(registry.is_empty());

    // A late stream update for the same order is a no-op
    let (tx, rx) = mpsc::channel(16);
    exchange
        .subscribe_order_updates(shutdown.clone(), tx)
        .await
        .unwrap();
    let listener = OrderListener::new(exchange.clone(), registry.clone(), 0.3, rx)
        .start(shutdown.clone());
    venue.push_update(fill_update("B-3")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    shutdown.cancel();
    listener.wait().await;
    assert_eq!(sells(&venue).len(), 1);
}

#[tokio::test]
async fn test_bot_runs_full_cycle_and_stops() {
    let mut settings = Settings::default();
    settings.trading = TradingSettings {
        max_open_orders: 1,
        ..trading()
    };
    settings.workers.buy_period_secs = 1;
    settings.workers.sell_period_secs = 3600;
    settings.workers.profit_period_secs = 3600;

    let venue = funded_venue();
    let bot = Bot::new(settings, Arc::new(venue.clone()));
    let running = bot.start(CancellationToken::new()).await.unwrap();

    assert!(eventually(|| !venue.placed_orders().is_empty()).await, "no buy placed");
    bot.control().set_buy_enabled(false);
    let (buy_id, buy) = venue.placed_orders().remove(0);
    assert_eq!(buy.side, OrderSide::Buy);

    venue.simulate_fill(&buy_id).await.unwrap();
    assert!(eventually(|| bot.registry().is_empty()).await);
    assert_eq!(sells(&venue).len(), 1);

    // First profit cycle has run
    assert!(eventually(|| bot.status().last_profit.is_some()).await);

    running.stop(Duration::from_secs(2)).await;
    let status = bot.status();
    assert!(!status.buy_enabled);
    assert_eq!(status.tracked_orders, 0);
}
