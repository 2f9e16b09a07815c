// Order tracking and stream-driven execution
pub mod listener;
pub mod pricing;
pub mod registry;

pub use listener::{ListenerHandle, OrderListener};
pub use pricing::{realized_profit, take_profit_price};
pub use registry::{OrderClaim, OrderRegistry};
