use crate::models::Kline;

/// Trailing color run over the newest candles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrendRun {
    pub red: usize,
    pub green: usize,
}

/// Count the contiguous run of same-colored candles ending at the newest one.
///
/// A flat candle extends the run only while one color strictly leads;
/// otherwise it ends the run.
pub fn trailing_run(klines: &[Kline]) -> TrendRun {
    let mut run = TrendRun::default();

    for kline in klines.iter().rev() {
        if kline.is_red() {
            if run.green > 0 {
                break;
            }
            run.red += 1;
        } else if kline.is_green() {
            if run.red > 0 {
                break;
            }
            run.green += 1;
        } else if run.red > run.green {
            run.red += 1;
        } else if run.green > run.red {
            run.green += 1;
        } else {
            break;
        }
    }

    run
}

/// Buy delay in seconds derived from the recent trend.
///
/// A falling market (trailing red run longer than one candle) shortens the
/// delay by the green count, with the divisor floored at 1. Anything else keeps
/// the base delay.
///
/// # Example
/// ```
/// use scalpbot::models::Kline;
/// use scalpbot::strategy::trend::adjust_timeout;
///
/// let candle = |open: f64, close: f64| Kline {
///     open_time: 0, open, high: open.max(close), low: open.min(close),
///     close, volume: 1.0, close_time: 59_999,
/// };
/// let falling = vec![candle(1.0, 0.9), candle(0.9, 0.8), candle(0.8, 0.7)];
/// assert_eq!(adjust_timeout(10, &falling), 10);
/// ```
pub fn adjust_timeout(base_secs: u64, klines: &[Kline]) -> u64 {
    if klines.is_empty() || base_secs == 0 {
        return base_secs;
    }

    let run = trailing_run(klines);
    tracing::debug!(red = run.red, green = run.green, "Trailing candle run");

    if run.red > 1 {
        let divisor = run.green.max(1) as f64;
        return (base_secs as f64 / divisor).round() as u64;
    }

    base_secs
}
