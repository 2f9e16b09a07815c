//! Private order stream session.
//!
//! Owns one WebSocket connection at a time. A fresh listen key is fetched for
//! every connection, and the connection is replaced wholesale on failure or
//! when the renewal timer fires.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::error::StreamError;
use super::proto::decode_order_update;
use super::ListenKeySource;
use crate::models::OrderUpdate;

pub const ORDER_TOPIC: &str = "spot@private.orders.v3.api.pb";
const PING_FRAME: &str = r#"{"method":"PING"}"#;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const NOT_CONNECTED_PAUSE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ping_interval: Duration,
    pub write_deadline: Duration,
    pub renew_interval: Duration,
    pub read_deadline: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            write_deadline: Duration::from_secs(10),
            renew_interval: Duration::from_secs(15 * 60),
            read_deadline: Duration::from_secs(60),
            max_reconnect_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    Closed,
}

struct Connection {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
}

struct SessionInner {
    keys: Arc<dyn ListenKeySource>,
    ws_url: String,
    config: StreamConfig,
    connection: RwLock<Option<Connection>>,
    reconnect_tx: mpsc::Sender<()>,
    state: watch::Sender<SessionState>,
}

pub struct StreamSession {
    inner: Arc<SessionInner>,
    reconnect_rx: mpsc::Receiver<()>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionAck {
    code: Option<i64>,
    msg: Option<String>,
}

impl StreamSession {
    pub fn new(keys: Arc<dyn ListenKeySource>, ws_url: &str, config: StreamConfig) -> Self {
        // A single pending signal is enough; extra ones are dropped
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (state, _) = watch::channel(SessionState::Disconnected);

        Self {
            inner: Arc::new(SessionInner {
                keys,
                ws_url: ws_url.to_string(),
                config,
                connection: RwLock::new(None),
                reconnect_tx,
                state,
            }),
            reconnect_rx,
        }
    }

    /// Observe connection state transitions
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Run the session until `shutdown` fires or the output channel closes.
    pub fn spawn(self, shutdown: CancellationToken, tx: mpsc::Sender<OrderUpdate>) -> JoinHandle<()> {
        tokio::spawn(run(self.inner, self.reconnect_rx, shutdown, tx))
    }
}

async fn run(
    inner: Arc<SessionInner>,
    mut reconnect_rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
    tx: mpsc::Sender<OrderUpdate>,
) {
    if !inner.connect_with_retry(&shutdown).await && shutdown.is_cancelled() {
        inner.state.send_replace(SessionState::Closed);
        return;
    }

    let keepalive_token = shutdown.child_token();
    let keepalive = tokio::spawn(keepalive(inner.clone(), keepalive_token.clone()));

    let renew_every = inner.config.renew_interval;
    let mut renew = interval_at(Instant::now() + renew_every, renew_every);
    renew.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            Some(()) = reconnect_rx.recv() => {
                inner.reconnect(&shutdown).await;
                // Signals raised against the old connection are stale now
                while reconnect_rx.try_recv().is_ok() {}
            }

            _ = renew.tick() => {
                tracing::info!("Renewing stream session ahead of listen key expiry");
                inner.request_reconnect();
            }

            frame = inner.read_frame() => match frame {
                Ok(Some(update)) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        sent = tx.send(update) => {
                            if sent.is_err() {
                                tracing::info!("Order update consumer gone, stopping stream");
                                break;
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(StreamError::NotConnected) => {
                    inner.request_reconnect();
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(NOT_CONNECTED_PAUSE) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Stream read failed: {}", e);
                    inner.request_reconnect();
                }
            },
        }
    }

    keepalive_token.cancel();
    let _ = keepalive.await;
    inner.disconnect().await;
    inner.state.send_replace(SessionState::Closed);
    tracing::info!("Stream session closed");
}

async fn keepalive(inner: Arc<SessionInner>, token: CancellationToken) {
    let every = inner.config.ping_interval;
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = inner.ping().await {
                    tracing::warn!("Stream ping failed: {}", e);
                    inner.request_reconnect();
                }
            }
        }
    }
}

impl SessionInner {
    fn request_reconnect(&self) {
        match self.reconnect_tx.try_send(()) {
            Ok(()) => tracing::debug!("Reconnect requested"),
            Err(TrySendError::Full(())) => tracing::debug!("Reconnect already pending"),
            Err(TrySendError::Closed(())) => {}
        }
    }

    async fn reconnect(&self, shutdown: &CancellationToken) {
        self.disconnect().await;
        self.connect_with_retry(shutdown).await;
    }

    /// Bounded attempt loop with linear backoff. Gives up until the next trigger
    /// once the attempts run out.
    async fn connect_with_retry(&self, shutdown: &CancellationToken) -> bool {
        let attempts = self.config.max_reconnect_attempts.max(1);

        for attempt in 0..attempts {
            self.state.send_replace(SessionState::Connecting);

            let result = tokio::select! {
                _ = shutdown.cancelled() => return false,
                result = self.connect() => result,
            };

            match result {
                Ok(connection) => {
                    *self.connection.write().await = Some(connection);
                    self.state.send_replace(SessionState::Subscribed);
                    tracing::info!("📡 Subscribed to {}", ORDER_TOPIC);
                    return true;
                }
                Err(e) => {
                    let backoff = Duration::from_secs(u64::from(attempt) + 1);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        "Stream connect failed: {}, retrying in {:?}",
                        e,
                        backoff
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return false,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        tracing::error!("Stream reconnect exhausted after {} attempts", attempts);
        self.state.send_replace(SessionState::Disconnected);
        false
    }

    async fn connect(&self) -> Result<Connection, StreamError> {
        let listen_key = self.keys.create_listen_key().await?;
        let url = format!("{}?listenKey={}", self.ws_url, listen_key);

        let (ws_stream, _response) = timeout(HANDSHAKE_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| StreamError::Timeout("handshake"))??;
        let (mut writer, mut reader) = ws_stream.split();

        let request = serde_json::to_string(&serde_json::json!({
            "method": "SUBSCRIPTION",
            "params": [ORDER_TOPIC],
        }))?;
        timeout(self.config.write_deadline, writer.send(Message::Text(request.into())))
            .await
            .map_err(|_| StreamError::Timeout("subscription request"))??;

        let ack = timeout(HANDSHAKE_TIMEOUT, next_text(&mut reader))
            .await
            .map_err(|_| StreamError::Timeout("subscription ack"))??;
        validate_ack(&ack)?;

        Ok(Connection {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    async fn disconnect(&self) {
        let previous = self.connection.write().await.take();
        if let Some(connection) = previous {
            let mut writer = connection.writer.into_inner();
            let _ = timeout(self.config.write_deadline, writer.close()).await;
        }
        self.state.send_replace(SessionState::Disconnected);
    }

    async fn ping(&self) -> Result<(), StreamError> {
        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or(StreamError::NotConnected)?;
        let mut writer = connection.writer.lock().await;

        timeout(self.config.write_deadline, writer.send(Message::Text(PING_FRAME.into())))
            .await
            .map_err(|_| StreamError::Timeout("ping"))??;
        Ok(())
    }

    /// Read one frame. The read lock is held only for this single bounded read.
    async fn read_frame(&self) -> Result<Option<OrderUpdate>, StreamError> {
        let guard = self.connection.read().await;
        let Some(connection) = guard.as_ref() else {
            return Err(StreamError::NotConnected);
        };
        let mut reader = connection.reader.lock().await;

        let message = match timeout(self.config.read_deadline, reader.next()).await {
            Err(_) => return Err(StreamError::ReadTimeout),
            Ok(None) => return Err(StreamError::Closed),
            Ok(Some(message)) => message?,
        };

        match message {
            Message::Binary(bytes) => match decode_order_update(&bytes) {
                Ok(update) => Ok(update),
                Err(e) => {
                    tracing::warn!("Skipping undecodable stream frame ({} bytes): {}", bytes.len(), e);
                    Ok(None)
                }
            },
            Message::Text(text) => {
                tracing::debug!("Stream text frame: {}", text.as_str());
                Ok(None)
            }
            Message::Close(frame) => {
                tracing::info!("Stream closed by venue: {:?}", frame);
                Err(StreamError::Closed)
            }
            _ => Ok(None),
        }
    }
}

async fn next_text(reader: &mut SplitStream<WsStream>) -> Result<String, StreamError> {
    while let Some(message) = reader.next().await {
        match message? {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Close(_) => return Err(StreamError::Closed),
            _ => continue,
        }
    }
    Err(StreamError::Closed)
}

fn validate_ack(raw: &str) -> Result<(), StreamError> {
    let ack: SubscriptionAck = serde_json::from_str(raw)
        .map_err(|_| StreamError::Subscription(format!("unreadable ack: {}", raw)))?;

    if let Some(code) = ack.code {
        if code != 0 || ack.msg.as_deref() != Some(ORDER_TOPIC) {
            return Err(StreamError::Subscription(raw.to_string()));
        }
    }
    Ok(())
}
