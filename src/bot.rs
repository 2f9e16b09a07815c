use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{Exchange, MexcClient};
use crate::config::Settings;
use crate::execution::{ListenerHandle, OrderListener, OrderRegistry};
use crate::state::{ControlState, ProfitCache};
use crate::workers::{spawn_worker, BuyWorker, ProfitWorker, SellWorker, Worker};

/// Snapshot for anything that reports on the bot without touching the venue
#[derive(Debug, Clone, PartialEq)]
pub struct BotStatus {
    pub buy_enabled: bool,
    pub tracked_orders: usize,
    pub last_profit: Option<f64>,
    pub profit_updated_at: Option<DateTime<Utc>>,
}

/// Build the production venue client from settings
pub fn build_mexc_client(settings: &Settings) -> anyhow::Result<MexcClient> {
    let credentials = settings.require_credentials()?;
    let exchange = &settings.exchange;

    let client = MexcClient::new(
        &credentials.api_key,
        &credentials.secret_key,
        &settings.trading.symbol,
    )?
    .with_base_url(&exchange.base_url)
    .with_ws_url(&exchange.ws_url)
    .with_timeout(Duration::from_millis(exchange.request_timeout_ms))?
    .with_mutation_delay(Duration::from_millis(exchange.mutation_delay_ms))
    .with_stream_config(settings.stream.to_stream_config());
    Ok(client)
}

/// Shared state plus everything needed to start the bot's tasks
pub struct Bot {
    settings: Settings,
    exchange: Arc<dyn Exchange>,
    registry: OrderRegistry,
    control: ControlState,
    profit: ProfitCache,
}

impl Bot {
    pub fn new(settings: Settings, exchange: Arc<dyn Exchange>) -> Self {
        let control = ControlState::new();
        control.set_buy_enabled(settings.trading.buy_enabled_on_start);

        Self {
            settings,
            exchange,
            registry: OrderRegistry::new(),
            control,
            profit: ProfitCache::new(),
        }
    }

    pub fn registry(&self) -> &OrderRegistry {
        &self.registry
    }

    pub fn control(&self) -> &ControlState {
        &self.control
    }

    pub fn profit_cache(&self) -> &ProfitCache {
        &self.profit
    }

    pub fn status(&self) -> BotStatus {
        let profit = self.profit.get();
        BotStatus {
            buy_enabled: self.control.buy_enabled(),
            tracked_orders: self.registry.len(),
            last_profit: profit.map(|p| p.value),
            profit_updated_at: profit.map(|p| p.computed_at),
        }
    }

    /// Start the stream session, the order listener, and the three workers.
    ///
    /// Everything stops when `shutdown` is cancelled; use `RunningBot::stop`
    /// to wait for that.
    pub async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<RunningBot> {
        let trading = &self.settings.trading;
        let periods = &self.settings.workers;

        let (tx, rx) = mpsc::channel(self.settings.stream.channel_capacity.max(1));
        let stream = self
            .exchange
            .subscribe_order_updates(shutdown.clone(), tx)
            .await
            .context("failed to start order stream")?;

        let listener = OrderListener::new(
            self.exchange.clone(),
            self.registry.clone(),
            trading.profit_percent,
            rx,
        )
        .start(shutdown.clone());

        let buy: Arc<dyn Worker> = Arc::new(BuyWorker::new(
            self.exchange.clone(),
            self.registry.clone(),
            self.control.clone(),
            trading.clone(),
        ));
        let sell: Arc<dyn Worker> = Arc::new(SellWorker::new(
            self.exchange.clone(),
            self.registry.clone(),
            trading.clone(),
        ));
        let profit: Arc<dyn Worker> = Arc::new(ProfitWorker::new(
            self.exchange.clone(),
            self.profit.clone(),
            trading.profit_percent,
        ));

        let scheduled = [
            (buy, periods.buy_period_secs),
            (sell, periods.sell_period_secs),
            (profit, periods.profit_period_secs),
        ];
        let mut workers = Vec::with_capacity(scheduled.len());
        for (worker, period_secs) in scheduled {
            match spawn_worker(worker, Duration::from_secs(period_secs), shutdown.clone()) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Tear down what already started before reporting
                    shutdown.cancel();
                    return Err(e);
                }
            }
        }

        tracing::info!(
            symbol = %trading.symbol,
            order_size = trading.order_size,
            profit_percent = trading.profit_percent,
            "✅ All tasks started"
        );

        Ok(RunningBot {
            shutdown,
            stream,
            listener,
            workers,
        })
    }
}

/// Handles of a started bot
pub struct RunningBot {
    shutdown: CancellationToken,
    stream: JoinHandle<()>,
    listener: ListenerHandle,
    workers: Vec<JoinHandle<()>>,
}

impl RunningBot {
    /// Cancel all tasks and wait up to `deadline` for them to finish.
    /// Stragglers are aborted.
    pub async fn stop(self, deadline: Duration) {
        let RunningBot {
            shutdown,
            stream,
            listener,
            workers,
        } = self;
        shutdown.cancel();

        let mut aborts: Vec<_> = workers.iter().map(|h| h.abort_handle()).collect();
        aborts.push(stream.abort_handle());
        aborts.push(listener.abort_handle());

        let joined = tokio::time::timeout(deadline, async move {
            join_all(workers).await;
            let _ = stream.await;
            listener.wait().await;
        })
        .await;

        if joined.is_err() {
            tracing::warn!("Tasks still running after {:?}, aborting", deadline);
            for abort in aborts {
                abort.abort();
            }
        }
    }
}
