// Core modules
pub mod api;
pub mod bot;
pub mod config;
pub mod execution;
pub mod models;
pub mod state;
pub mod strategy;
pub mod workers;

// Re-export commonly used types
pub use api::{Exchange, ExchangeError, MexcClient, PaperExchange};
pub use bot::{Bot, BotStatus, RunningBot};
pub use crate::config::Settings;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
