use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::api::Exchange;
use crate::config::TradingSettings;
use crate::execution::{take_profit_price, OrderRegistry};
use crate::models::{OpenOrderCounts, Order, OrderRequest, OrderStatus};

/// Filled buys older than this were missed by the listener
const FILL_GRACE_MS: i64 = 15_000;
/// Unfilled or partially filled buys older than this are retired
const STALE_ORDER_MS: i64 = 10 * 60 * 1000;
const HISTORY_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub sold_filled: usize,
    pub cancelled_stale: usize,
    pub repriced_partial: usize,
    pub untracked_cancelled: usize,
    pub skipped: usize,
}

/// Reconciles tracked orders against the venue's order history.
///
/// Covers fills the stream listener missed and retires buys that sat on the
/// book too long.
pub struct SellWorker {
    exchange: Arc<dyn Exchange>,
    registry: OrderRegistry,
    trading: TradingSettings,
}

impl SellWorker {
    pub fn new(exchange: Arc<dyn Exchange>, registry: OrderRegistry, trading: TradingSettings) -> Self {
        Self {
            exchange,
            registry,
            trading,
        }
    }

    pub async fn run_cycle(&self) -> anyhow::Result<ReconcileReport> {
        let now = Utc::now().timestamp_millis();
        let history = self
            .exchange
            .get_all_orders(now - HISTORY_WINDOW_MS, now)
            .await
            .context("failed to fetch order history")?;
        let open_orders = self
            .exchange
            .get_open_orders()
            .await
            .context("failed to fetch open orders")?;

        let counts = OpenOrderCounts::from_orders(&open_orders);
        tracing::info!(buys = counts.buys, sells = counts.sells, "📋 Open orders");

        let tracked: Vec<&Order> = history
            .iter()
            .filter(|o| self.registry.is_tracked(&o.order_id))
            .collect();
        let mut report = ReconcileReport::default();
        if tracked.is_empty() {
            return Ok(report);
        }

        let account = self
            .exchange
            .get_account()
            .await
            .context("failed to fetch account")?;
        let mut base_free = account.free_balance(&self.trading.base_asset);

        for order in tracked {
            match order.status {
                OrderStatus::Filled if now - order.last_update() > FILL_GRACE_MS => {
                    if base_free < order.executed_qty {
                        tracing::warn!(
                            order_id = %order.order_id,
                            needed = order.executed_qty,
                            available = base_free,
                            "Not enough {} to sell filled order",
                            self.trading.base_asset
                        );
                        report.skipped += 1;
                        continue;
                    }
                    if self.sell_filled(order).await? {
                        base_free -= order.executed_qty;
                        report.sold_filled += 1;
                    }
                }
                OrderStatus::New if now - order.created_at > STALE_ORDER_MS => {
                    if self.cancel_stale(order).await? {
                        report.cancelled_stale += 1;
                    }
                }
                OrderStatus::PartiallyFilled if now - order.created_at > STALE_ORDER_MS => {
                    if !self.resell_allowed(order, base_free) {
                        report.skipped += 1;
                        continue;
                    }
                    if self.resell_at_market(order, true).await? {
                        base_free -= order.executed_qty;
                        report.repriced_partial += 1;
                    }
                }
                OrderStatus::Canceled if order.executed_qty == 0.0 => {
                    // Cancelled elsewhere with nothing bought, nothing left to do
                    if self.registry.untrack(&order.order_id) {
                        tracing::info!(order_id = %order.order_id, "Tracked order was cancelled on the venue");
                        report.untracked_cancelled += 1;
                    }
                }
                OrderStatus::PartiallyCanceled | OrderStatus::Canceled => {
                    // Remainder already off the book, only the filled part is left
                    if order.executed_notional() < self.trading.min_notional {
                        if self.registry.untrack(&order.order_id) {
                            tracing::info!(
                                order_id = %order.order_id,
                                notional = order.executed_notional(),
                                "Cancelled order left dust below minimum notional, dropping it"
                            );
                            report.untracked_cancelled += 1;
                        }
                        continue;
                    }
                    if !self.resell_allowed(order, base_free) {
                        report.skipped += 1;
                        continue;
                    }
                    if self.resell_at_market(order, false).await? {
                        base_free -= order.executed_qty;
                        report.repriced_partial += 1;
                    }
                }
                _ => {}
            }
        }

        Ok(report)
    }

    async fn sell_filled(&self, order: &Order) -> anyhow::Result<bool> {
        let Some(claim) = self.registry.claim(&order.order_id) else {
            return Ok(false);
        };

        let price = take_profit_price(order.price, self.trading.profit_percent);
        let ack = self
            .exchange
            .place_order(&OrderRequest::limit_sell(order.executed_qty, price))
            .await
            .with_context(|| format!("failed to sell filled order {}", order.order_id))?;

        tracing::info!(
            buy_order = %order.order_id,
            sell_order = %ack.order_id,
            price,
            quantity = order.executed_qty,
            "💰 Sell placed for missed fill"
        );
        claim.resolve();
        Ok(true)
    }

    async fn cancel_stale(&self, order: &Order) -> anyhow::Result<bool> {
        let Some(claim) = self.registry.claim(&order.order_id) else {
            return Ok(false);
        };

        self.exchange
            .cancel_order(&order.order_id)
            .await
            .with_context(|| format!("failed to cancel stale order {}", order.order_id))?;

        tracing::info!(order_id = %order.order_id, "🗑️  Stale buy cancelled");
        claim.resolve();
        Ok(true)
    }

    /// Minimum notional and base balance checks shared by every resell path
    fn resell_allowed(&self, order: &Order, base_free: f64) -> bool {
        let notional = order.executed_notional();
        if notional < self.trading.min_notional {
            tracing::debug!(
                order_id = %order.order_id,
                notional,
                "Partial fill below minimum notional, leaving it"
            );
            return false;
        }
        if base_free < order.executed_qty {
            tracing::warn!(
                order_id = %order.order_id,
                needed = order.executed_qty,
                available = base_free,
                "Not enough {} to resell partial fill",
                self.trading.base_asset
            );
            return false;
        }
        true
    }

    /// Sell the executed quantity at the current price. With `cancel_first` the
    /// resting remainder is cancelled before selling.
    async fn resell_at_market(&self, order: &Order, cancel_first: bool) -> anyhow::Result<bool> {
        let Some(claim) = self.registry.claim(&order.order_id) else {
            return Ok(false);
        };

        if cancel_first {
            self.exchange
                .cancel_order(&order.order_id)
                .await
                .with_context(|| format!("failed to cancel partial order {}", order.order_id))?;
        }
        let price = self
            .exchange
            .get_price()
            .await
            .context("failed to fetch price")?;
        let ack = self
            .exchange
            .place_order(&OrderRequest::limit_sell(order.executed_qty, price))
            .await
            .with_context(|| format!("failed to resell partial order {}", order.order_id))?;

        tracing::info!(
            buy_order = %order.order_id,
            sell_order = %ack.order_id,
            old_price = order.price,
            price,
            quantity = order.executed_qty,
            "Partial buy retired, filled part resold at market"
        );
        claim.resolve();
        Ok(true)
    }
}

#[async_trait]
impl Worker for SellWorker {
    fn name(&self) -> &str {
        "sell"
    }

    async fn process(&self, _shutdown: &CancellationToken) -> anyhow::Result<()> {
        let report = self.run_cycle().await?;
        tracing::debug!(?report, tracked = self.registry.len(), "Reconciliation done");
        Ok(())
    }
}
