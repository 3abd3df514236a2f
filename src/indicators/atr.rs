/// Average True Range (ATR) indicator
///
/// Measures market volatility by averaging true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The first bar has no previous close, so its true range is high - low.
use super::moving_average::shifted_mean;
use crate::models::PriceBar;

/// True range of every bar
pub fn true_range_series(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let range = bar.high - bar.low;
            if i == 0 {
                return range;
            }
            let prev_close = bars[i - 1].close;
            range
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect()
}

/// Rolling-mean ATR at every index (partial window at the start)
pub fn atr_series(bars: &[PriceBar], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let tr = true_range_series(bars);
    (0..tr.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(period);
            shifted_mean(&tr[start..=i]).max(0.0)
        })
        .collect()
}

/// Current ATR, or None if there are fewer than `period + 1` bars
pub fn calculate_atr(bars: &[PriceBar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    atr_series(bars, period).last().copied()
}

/// Mean true range of the last `period` bars over the mean of the bars
/// before them. None until there are `2 * period + 1` bars or while the
/// baseline range is zero.
pub fn volatility_ratio(bars: &[PriceBar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }
    let tr = true_range_series(bars);
    let split = tr.len() - period;
    // The first bar has no previous close
    let baseline = shifted_mean(&tr[1..split]);
    let current = shifted_mean(&tr[split..]);
    (baseline > 0.0).then(|| current / baseline)
}
