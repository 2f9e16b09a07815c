//! In-memory venue.
//!
//! Fills only happen when a test calls `simulate_fill`; balances are whatever
//! was set and never move.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::ExchangeError;
use super::Exchange;
use crate::models::{
    AccountInfo, Balance, Kline, Order, OrderAck, OrderRequest, OrderSide, OrderStatus, OrderType,
    OrderUpdate, StreamOrderStatus,
};

const DEFAULT_PAGE_LIMIT: usize = 1000;

#[derive(Default)]
struct PaperState {
    price: f64,
    balances: HashMap<String, f64>,
    klines: Vec<Kline>,
    orders: Vec<Order>,
    placed: Vec<(String, OrderRequest)>,
    cancelled: Vec<String>,
    history_calls: usize,
    next_id: u64,
    reject_orders: bool,
    page_limit: usize,
    updates: Option<mpsc::Sender<OrderUpdate>>,
}

#[derive(Clone)]
pub struct PaperExchange {
    symbol: String,
    state: Arc<Mutex<PaperState>>,
}

impl PaperExchange {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            state: Arc::new(Mutex::new(PaperState {
                page_limit: DEFAULT_PAGE_LIMIT,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_price(&self, price: f64) {
        self.lock().price = price;
    }

    pub fn set_balance(&self, asset: &str, free: f64) {
        self.lock().balances.insert(asset.to_string(), free);
    }

    pub fn set_klines(&self, klines: Vec<Kline>) {
        self.lock().klines = klines;
    }

    /// Cap on orders returned by one history query, newest kept
    pub fn set_page_limit(&self, limit: usize) {
        self.lock().page_limit = limit;
    }

    /// Make every subsequent placement fail with an HTTP 500
    pub fn reject_orders(&self, reject: bool) {
        self.lock().reject_orders = reject;
    }

    pub fn insert_order(&self, order: Order) {
        self.lock().orders.push(order);
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.lock().orders.iter().find(|o| o.order_id == order_id).cloned()
    }

    /// Every placement request in submission order, with the id it was given
    pub fn placed_orders(&self) -> Vec<(String, OrderRequest)> {
        self.lock().placed.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn history_calls(&self) -> usize {
        self.lock().history_calls
    }

    /// Fill an order completely and push the matching stream update.
    pub async fn simulate_fill(&self, order_id: &str) -> Result<(), ExchangeError> {
        let (update, sender) = {
            let mut state = self.lock();
            let now = Utc::now().timestamp_millis();
            let order = state
                .orders
                .iter_mut()
                .find(|o| o.order_id == order_id)
                .ok_or_else(|| ExchangeError::UnknownOrder(order_id.to_string()))?;

            order.status = OrderStatus::Filled;
            order.executed_qty = order.orig_qty;
            order.update_time = Some(now);

            let update = OrderUpdate {
                order_id: order.order_id.clone(),
                price: order.price.to_string(),
                quantity: order.executed_qty.to_string(),
                status: StreamOrderStatus::FullyTraded,
                created_at: order.created_at,
            };
            (update, state.updates.clone())
        };

        if let Some(sender) = sender {
            let _ = sender.send(update).await;
        }
        Ok(())
    }

    /// Push a raw stream update, as if the venue had sent it
    pub async fn push_update(&self, update: OrderUpdate) {
        let sender = self.lock().updates.clone();
        if let Some(sender) = sender {
            let _ = sender.send(update).await;
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_price(&self) -> Result<f64, ExchangeError> {
        Ok(self.lock().price)
    }

    async fn get_account(&self) -> Result<AccountInfo, ExchangeError> {
        let balances = self
            .lock()
            .balances
            .iter()
            .map(|(asset, free)| Balance {
                asset: asset.clone(),
                free: *free,
                locked: 0.0,
            })
            .collect();
        Ok(AccountInfo { balances })
    }

    async fn get_open_orders(&self) -> Result<Vec<Order>, ExchangeError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .filter(|o| o.status.is_open())
            .cloned()
            .collect())
    }

    async fn get_all_orders(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Order>, ExchangeError> {
        let mut state = self.lock();
        state.history_calls += 1;

        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| o.created_at >= start_ms && o.created_at <= end_ms)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        if orders.len() > state.page_limit {
            orders.drain(..orders.len() - state.page_limit);
        }
        Ok(orders)
    }

    async fn get_klines(&self, _interval: &str, limit: usize) -> Result<Vec<Kline>, ExchangeError> {
        let state = self.lock();
        let skip = state.klines.len().saturating_sub(limit);
        Ok(state.klines[skip..].to_vec())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let mut state = self.lock();
        if state.reject_orders {
            return Err(ExchangeError::Http {
                status: 500,
                body: "paper venue rejecting orders".to_string(),
            });
        }

        state.next_id += 1;
        let order_id = format!("PAPER-{}", state.next_id);
        let now = Utc::now().timestamp_millis();
        let price = request.price.unwrap_or(state.price);
        let filled_now = request.order_type == OrderType::Market;

        state.orders.push(Order {
            symbol: self.symbol.clone(),
            order_id: order_id.clone(),
            price,
            orig_qty: request.quantity,
            executed_qty: if filled_now { request.quantity } else { 0.0 },
            status: if filled_now { OrderStatus::Filled } else { OrderStatus::New },
            order_type: request.order_type,
            side: request.side,
            created_at: now,
            update_time: Some(now),
        });
        state.placed.push((order_id.clone(), request.clone()));

        Ok(OrderAck {
            symbol: self.symbol.clone(),
            order_id,
            price: Some(price),
            orig_qty: Some(request.quantity),
            side: request.side,
            transact_time: Some(now),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let mut state = self.lock();
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| ExchangeError::UnknownOrder(order_id.to_string()))?;

        if !order.status.is_open() {
            return Err(ExchangeError::Http {
                status: 400,
                body: format!("order {} is not open", order_id),
            });
        }

        order.status = if order.executed_qty > 0.0 {
            OrderStatus::PartiallyCanceled
        } else {
            OrderStatus::Canceled
        };
        order.update_time = Some(Utc::now().timestamp_millis());
        state.cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn subscribe_order_updates(
        &self,
        shutdown: CancellationToken,
        tx: mpsc::Sender<OrderUpdate>,
    ) -> Result<JoinHandle<()>, ExchangeError> {
        self.lock().updates = Some(tx);

        let state = self.state.clone();
        Ok(tokio::spawn(async move {
            shutdown.cancelled().await;
            // Dropping the sender closes the consumer side
            state.lock().unwrap_or_else(PoisonError::into_inner).updates = None;
        }))
    }
}

/// Build an order the way the venue would report it. Handy in tests.
pub fn paper_order(
    order_id: &str,
    side: OrderSide,
    status: OrderStatus,
    price: f64,
    orig_qty: f64,
    executed_qty: f64,
    created_at: i64,
) -> Order {
    Order {
        symbol: "KASUSDT".to_string(),
        order_id: order_id.to_string(),
        price,
        orig_qty,
        executed_qty,
        status,
        order_type: OrderType::Limit,
        side,
        created_at,
        update_time: Some(created_at),
    }
}
