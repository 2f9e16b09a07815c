use thiserror::Error;

/// Failures at the REST boundary of the venue
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("venue returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid signing key")]
    InvalidKey,

    #[error("malformed kline row {row}: {reason}")]
    Kline { row: usize, reason: String },

    #[error("order {0} not found")]
    UnknownOrder(String),
}

/// Failures inside the streaming session. Never fatal to the process;
/// each one ends in a reconnect.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("listen key request failed: {0}")]
    ListenKey(#[from] ExchangeError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("subscription rejected: {0}")]
    Subscription(String),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed by venue")]
    Closed,

    #[error("no active connection")]
    NotConnected,

    #[error("no frame within read deadline")]
    ReadTimeout,
}
