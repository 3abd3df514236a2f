use super::moving_average::{ema_series, sma_series};
use crate::models::PriceBar;

/// Neutral stochastic reading for a window with no high/low range
pub const NEUTRAL_STOCHASTIC: f64 = 50.0;

/// MACD line, signal line and histogram at every index
#[derive(Debug, Clone, Default)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let fast_ema = ema_series(closes, fast);
    let slow_ema = ema_series(closes, slow);
    let macd: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd, signal);
    let histogram = macd
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    MacdSeries {
        macd,
        signal: signal_line,
        histogram,
    }
}

/// Stochastic %K over `k_period` bars and %D as the `d_period` SMA of %K
pub fn stochastic_series(bars: &[PriceBar], k_period: usize, d_period: usize) -> (Vec<f64>, Vec<f64>) {
    let k_period = k_period.max(1);
    let k: Vec<f64> = (0..bars.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(k_period);
            let window = &bars[start..=i];
            let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let range = highest - lowest;
            if range <= 0.0 {
                NEUTRAL_STOCHASTIC
            } else {
                ((bars[i].close - lowest) / range * 100.0).clamp(0.0, 100.0)
            }
        })
        .collect();
    let d = sma_series(&k, d_period);
    (k, d)
}
