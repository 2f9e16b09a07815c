pub mod error;
pub mod klines;
pub mod mexc;
pub mod paper;
pub mod proto;
pub mod signing;
pub mod stream;

pub use error::{ExchangeError, StreamError};
pub use mexc::MexcClient;
pub use paper::PaperExchange;
pub use signing::Signer;
pub use stream::{SessionState, StreamConfig, StreamSession};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{AccountInfo, Kline, Order, OrderAck, OrderRequest, OrderUpdate};

/// Everything the bot needs from a spot venue.
///
/// One production implementation (`MexcClient`) and an in-memory one
/// (`PaperExchange`) for tests and dry runs. All calls are scoped to the
/// symbol the implementation was built for.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_price(&self) -> Result<f64, ExchangeError>;

    async fn get_account(&self) -> Result<AccountInfo, ExchangeError>;

    async fn get_open_orders(&self) -> Result<Vec<Order>, ExchangeError>;

    /// Orders created within `[start_ms, end_ms]`
    async fn get_all_orders(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Order>, ExchangeError>;

    /// Most recent closed candles, oldest first
    async fn get_klines(&self, interval: &str, limit: usize) -> Result<Vec<Kline>, ExchangeError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError>;

    /// Start pushing private order updates into `tx` until `shutdown` fires.
    async fn subscribe_order_updates(
        &self,
        shutdown: CancellationToken,
        tx: mpsc::Sender<OrderUpdate>,
    ) -> Result<JoinHandle<()>, ExchangeError>;
}

/// Issues session tokens for the private stream
#[async_trait]
pub trait ListenKeySource: Send + Sync {
    async fn create_listen_key(&self) -> Result<String, ExchangeError>;
}
