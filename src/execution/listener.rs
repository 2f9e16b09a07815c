use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::pricing::take_profit_price;
use super::registry::OrderRegistry;
use crate::api::Exchange;
use crate::models::{OrderRequest, OrderUpdate, StreamOrderStatus};

/// Turns stream fills of tracked buys into paired take-profit sells.
///
/// Failures are logged and the update dropped; the reconciliation worker
/// picks up anything missed here.
pub struct OrderListener {
    exchange: Arc<dyn Exchange>,
    registry: OrderRegistry,
    profit_percent: f64,
    updates: mpsc::Receiver<OrderUpdate>,
}

pub struct ListenerHandle {
    handle: JoinHandle<()>,
}

impl ListenerHandle {
    /// Wait until the listener has drained and exited
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            tracing::error!("Order listener task failed: {}", e);
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }
}

impl OrderListener {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        registry: OrderRegistry,
        profit_percent: f64,
        updates: mpsc::Receiver<OrderUpdate>,
    ) -> Self {
        Self {
            exchange,
            registry,
            profit_percent,
            updates,
        }
    }

    pub fn start(self, shutdown: CancellationToken) -> ListenerHandle {
        ListenerHandle {
            handle: tokio::spawn(self.run(shutdown)),
        }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("👂 Order listener started");

        loop {
            let update = tokio::select! {
                _ = shutdown.cancelled() => break,
                update = self.updates.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };

            if let Err(e) = self.handle_update(&update).await {
                tracing::error!(order_id = %update.order_id, "Dropping order update: {:#}", e);
            }
        }

        tracing::info!("Order listener stopped");
    }

    /// Returns true when a paired sell was placed
    async fn handle_update(&self, update: &OrderUpdate) -> anyhow::Result<bool> {
        tracing::debug!(order_id = %update.order_id, status = ?update.status, "Order update");

        if update.status != StreamOrderStatus::FullyTraded {
            return Ok(false);
        }
        let Some(claim) = self.registry.claim(&update.order_id) else {
            return Ok(false);
        };

        let fill_price: f64 = update
            .price
            .parse()
            .with_context(|| format!("invalid fill price {:?}", update.price))?;
        let quantity: f64 = update
            .quantity
            .parse()
            .with_context(|| format!("invalid fill quantity {:?}", update.quantity))?;

        let sell_price = take_profit_price(fill_price, self.profit_percent);
        let ack = self
            .exchange
            .place_order(&OrderRequest::limit_sell(quantity, sell_price))
            .await
            .context("paired sell placement failed")?;

        tracing::info!(
            buy_order = %update.order_id,
            sell_order = %ack.order_id,
            price = sell_price,
            quantity,
            "💰 Buy filled, take-profit sell placed"
        );
        claim.resolve();
        Ok(true)
    }
}
