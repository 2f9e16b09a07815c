use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::api::StreamConfig;

const ENV_PREFIX: &str = "SCALPBOT";
const DEFAULT_CONFIG_FILE: &str = "config";

/// API credentials. The secret is only ever used to sign requests.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub base_url: String,
    pub ws_url: String,
    pub request_timeout_ms: u64,
    pub mutation_delay_ms: u64,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            base_url: "https://api.mexc.com".to_string(),
            ws_url: "wss://wbs-api.mexc.com/ws".to_string(),
            request_timeout_ms: 3_000,
            mutation_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Take-profit margin in percent
    pub profit_percent: f64,
    /// Buy size in base units
    pub order_size: f64,
    pub base_buy_timeout_secs: u64,
    /// Smallest executed notional worth reselling (quote units)
    pub min_notional: f64,
    pub max_open_orders: usize,
    pub buy_enabled_on_start: bool,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            symbol: "KASUSDT".to_string(),
            base_asset: "KAS".to_string(),
            quote_asset: "USDT".to_string(),
            profit_percent: 0.3,
            order_size: 40.0,
            base_buy_timeout_secs: 10,
            min_notional: 1.0,
            max_open_orders: 500,
            buy_enabled_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub buy_period_secs: u64,
    pub sell_period_secs: u64,
    pub profit_period_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            buy_period_secs: 5,
            sell_period_secs: 60,
            profit_period_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub channel_capacity: usize,
    pub ping_interval_secs: u64,
    pub renew_interval_secs: u64,
    pub read_deadline_secs: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            ping_interval_secs: 15,
            renew_interval_secs: 15 * 60,
            read_deadline_secs: 60,
            max_reconnect_attempts: 5,
        }
    }
}

impl StreamSettings {
    pub fn to_stream_config(&self) -> StreamConfig {
        StreamConfig {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            renew_interval: Duration::from_secs(self.renew_interval_secs),
            read_deadline: Duration::from_secs(self.read_deadline_secs),
            max_reconnect_attempts: self.max_reconnect_attempts,
            ..StreamConfig::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub trading: TradingSettings,
    pub workers: WorkerSettings,
    pub stream: StreamSettings,
}

impl Settings {
    /// Load defaults, then the config file, then `SCALPBOT__*` environment variables.
    ///
    /// Without an explicit path an optional `config.{yaml,toml,json}` in the
    /// working directory is used.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        validate_trading(&self.trading)
    }

    /// Signed endpoints need both halves of the key pair
    pub fn require_credentials(&self) -> anyhow::Result<&Credentials> {
        let credentials = &self.exchange.credentials;
        if credentials.api_key.trim().is_empty() || credentials.secret_key.trim().is_empty() {
            bail!("exchange.api_key and exchange.secret_key must be set");
        }
        Ok(credentials)
    }
}

pub fn validate_trading(trading: &TradingSettings) -> anyhow::Result<()> {
    if !(trading.profit_percent > 0.0 && trading.profit_percent <= 10.0) {
        bail!(
            "trading.profit_percent must be in (0, 10], got {}",
            trading.profit_percent
        );
    }
    if !(trading.order_size > 0.0) {
        bail!("trading.order_size must be positive, got {}", trading.order_size);
    }
    validate_symbol(&trading.symbol)?;
    if trading.base_asset.is_empty() || trading.quote_asset.is_empty() {
        bail!("trading.base_asset and trading.quote_asset must be set");
    }
    if trading.min_notional < 0.0 {
        bail!("trading.min_notional must not be negative");
    }
    Ok(())
}

/// Symbols are non-empty, uppercase ASCII letters and digits (e.g. `KASUSDT`)
pub fn validate_symbol(symbol: &str) -> anyhow::Result<()> {
    let valid = !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if !valid {
        bail!("invalid symbol {:?}: expected uppercase letters and digits", symbol);
    }
    Ok(())
}
