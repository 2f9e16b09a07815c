use serde::{Deserialize, Deserializer};

/// Side of an order on the venue
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type. Only `Limit` and `Market` are ever placed by the bot,
/// the rest can show up in order history.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    LimitMaker,
    ImmediateOrCancel,
    FillOrKill,
    #[serde(other)]
    Other,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::LimitMaker => "LIMIT_MAKER",
            OrderType::ImmediateOrCancel => "IMMEDIATE_OR_CANCEL",
            OrderType::FillOrKill => "FILL_OR_KILL",
            OrderType::Other => "OTHER",
        }
    }
}

/// Venue-reported order status (REST view)
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PartiallyCanceled,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Still resting on the book
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

/// An order as the venue reports it. This is the ground truth for reconciliation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub symbol: String,
    #[serde(deserialize_with = "de_string")]
    pub order_id: String,
    #[serde(deserialize_with = "de_f64")]
    pub price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub orig_qty: f64,
    #[serde(deserialize_with = "de_f64")]
    pub executed_qty: f64,
    pub status: OrderStatus,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    /// Creation time (ms since epoch)
    #[serde(rename = "time")]
    pub created_at: i64,
    #[serde(default)]
    pub update_time: Option<i64>,
}

impl Order {
    /// Last-update time, falling back to creation time when the venue omits it
    pub fn last_update(&self) -> i64 {
        self.update_time.unwrap_or(self.created_at)
    }

    /// Notional of the executed part (quote units)
    pub fn executed_notional(&self) -> f64 {
        self.executed_qty * self.price
    }
}

/// Open buy/sell counts over an order snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOrderCounts {
    pub buys: usize,
    pub sells: usize,
}

impl OpenOrderCounts {
    pub fn from_orders(orders: &[Order]) -> Self {
        orders
            .iter()
            .filter(|o| o.status.is_open())
            .fold(Self::default(), |mut counts, order| {
                match order.side {
                    OrderSide::Buy => counts.buys += 1,
                    OrderSide::Sell => counts.sells += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.buys + self.sells
    }
}

/// Free/locked balance of one asset
#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub asset: String,
    #[serde(deserialize_with = "de_f64")]
    pub free: f64,
    #[serde(deserialize_with = "de_f64")]
    pub locked: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<Balance>,
}

impl AccountInfo {
    /// Free balance for an asset. Assets the account never held read as zero.
    pub fn free_balance(&self, asset: &str) -> f64 {
        self.balances
            .iter()
            .find(|b| b.asset == asset)
            .map(|b| b.free)
            .unwrap_or(0.0)
    }
}

/// A closed candle
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

impl Kline {
    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }
}

/// Order status as carried by stream frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrderStatus {
    NotTraded,
    FullyTraded,
    PartiallyTraded,
    Canceled,
    PartiallyCanceled,
    Unknown(i32),
}

impl From<i32> for StreamOrderStatus {
    fn from(code: i32) -> Self {
        match code {
            1 => StreamOrderStatus::NotTraded,
            2 => StreamOrderStatus::FullyTraded,
            3 => StreamOrderStatus::PartiallyTraded,
            4 => StreamOrderStatus::Canceled,
            5 => StreamOrderStatus::PartiallyCanceled,
            other => StreamOrderStatus::Unknown(other),
        }
    }
}

/// Snapshot pushed by the private order stream.
///
/// Price and quantity stay as the venue's decimal strings; consumers parse them
/// and treat a parse failure as a dropped update.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order_id: String,
    pub price: String,
    /// Cumulative executed base quantity
    pub quantity: String,
    pub status: StreamOrderStatus,
    pub created_at: i64,
}

/// New order parameters. The symbol is fixed by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn limit_buy(quantity: f64, price: f64) -> Self {
        Self {
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }

    pub fn limit_sell(quantity: f64, price: f64) -> Self {
        Self {
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }

    pub fn market_sell(quantity: f64) -> Self {
        Self {
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }
}

/// Venue acknowledgement for a placed order
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub symbol: String,
    #[serde(deserialize_with = "de_string")]
    pub order_id: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub orig_qty: Option<f64>,
    pub side: OrderSide,
    #[serde(default)]
    pub transact_time: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

pub(crate) fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::String(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::String(s)) => {
            s.trim().parse().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

fn de_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        String(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::String(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
