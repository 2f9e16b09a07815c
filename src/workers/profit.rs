use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::Worker;
use crate::api::Exchange;
use crate::execution::realized_profit;
use crate::models::{Order, OrderSide, OrderStatus};
use crate::state::ProfitCache;

/// Look-back covered by the profit figure (just under a week)
const LOOKBACK_MS: i64 = 59 * 24 * 7 * 60 * 1000;
const PAGE_DELAY: Duration = Duration::from_millis(200);

/// Periodically recomputes realized profit from filled sells
pub struct ProfitWorker {
    exchange: Arc<dyn Exchange>,
    cache: ProfitCache,
    profit_percent: f64,
    page_delay: Duration,
}

impl ProfitWorker {
    pub fn new(exchange: Arc<dyn Exchange>, cache: ProfitCache, profit_percent: f64) -> Self {
        Self {
            exchange,
            cache,
            profit_percent,
            page_delay: PAGE_DELAY,
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Walk order history backwards page by page, then overwrite the cache.
    ///
    /// Returns `None` when shutdown interrupted the walk; the cache is left alone.
    pub async fn compute(&self, shutdown: &CancellationToken) -> anyhow::Result<Option<f64>> {
        let now = Utc::now().timestamp_millis();
        let start = now - LOOKBACK_MS;
        let mut end = now;
        let mut sold_notional = 0.0;
        let mut pages = 0;

        loop {
            let page = self
                .exchange
                .get_all_orders(start, end)
                .await
                .with_context(|| format!("failed to fetch orders in [{}, {}]", start, end))?;
            let Some(earliest) = page.iter().map(|o| o.created_at).min() else {
                break;
            };

            pages += 1;
            sold_notional += filled_sell_notional(&page);

            end = earliest - 1;
            if end < start {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.page_delay) => {}
            }
        }

        let profit = realized_profit(sold_notional, self.profit_percent);
        self.cache.set(profit);
        tracing::info!(profit, sold_notional, pages, "📈 Profit recomputed");
        Ok(Some(profit))
    }
}

/// Quote notional of fully filled sells
pub fn filled_sell_notional(orders: &[Order]) -> f64 {
    orders
        .iter()
        .filter(|o| o.side == OrderSide::Sell && o.status == OrderStatus::Filled)
        .map(Order::executed_notional)
        .sum()
}

#[async_trait]
impl Worker for ProfitWorker {
    fn name(&self) -> &str {
        "profit"
    }

    async fn process(&self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        self.compute(shutdown).await?;
        Ok(())
    }
}
