use serde_json::Value;

use super::error::ExchangeError;
use crate::models::Kline;

const MIN_ROW_FIELDS: usize = 7;

/// Decode raw kline rows into closed candles.
///
/// Rows whose close time is at or after `now_ms` belong to the still-forming
/// candle and are dropped. The result keeps the newest `limit` rows, oldest first.
pub fn decode_klines(
    rows: Vec<Vec<Value>>,
    limit: usize,
    now_ms: i64,
) -> Result<Vec<Kline>, ExchangeError> {
    let mut klines = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        if row.len() < MIN_ROW_FIELDS {
            return Err(ExchangeError::Kline {
                row: index,
                reason: format!("expected at least {} fields, got {}", MIN_ROW_FIELDS, row.len()),
            });
        }

        let kline = Kline {
            open_time: int_field(&row[0], index, "open time")?,
            open: float_field(&row[1], index, "open")?,
            high: float_field(&row[2], index, "high")?,
            low: float_field(&row[3], index, "low")?,
            close: float_field(&row[4], index, "close")?,
            volume: float_field(&row[5], index, "volume")?,
            close_time: int_field(&row[6], index, "close time")?,
        };

        if kline.close_time >= now_ms {
            continue;
        }
        klines.push(kline);
    }

    if klines.len() > limit {
        klines.drain(..klines.len() - limit);
    }

    Ok(klines)
}

fn float_field(value: &Value, row: usize, name: &str) -> Result<f64, ExchangeError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::Kline {
        row,
        reason: format!("{} is not a number: {}", name, value),
    })
}

fn int_field(value: &Value, row: usize, name: &str) -> Result<i64, ExchangeError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ExchangeError::Kline {
        row,
        reason: format!("{} is not an integer: {}", name, value),
    })
}
