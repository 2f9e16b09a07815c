/// Paired take-profit price for a filled buy
pub fn take_profit_price(fill_price: f64, profit_percent: f64) -> f64 {
    fill_price * (1.0 + profit_percent / 100.0)
}

/// Profit earned on sold notional at the configured margin
pub fn realized_profit(sold_notional: f64, profit_percent: f64) -> f64 {
    sold_notional * profit_percent / 100.0
}
