/// Calculate Simple Moving Average (SMA) of the last `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    Some(shifted_mean(&values[values.len() - period..]))
}

/// Mean computed as offsets from the first element.
///
/// A constant window returns its value exactly, so strict comparisons
/// against a flat series never fire on rounding noise.
pub(crate) fn shifted_mean(window: &[f64]) -> f64 {
    match window.first() {
        None => 0.0,
        Some(&anchor) => {
            let offset: f64 = window.iter().map(|v| v - anchor).sum();
            anchor + offset / window.len() as f64
        }
    }
}

/// SMA at every index, using a partial window until `period` values exist
pub fn sma_series(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(period);
            shifted_mean(&values[start..=i])
        })
        .collect()
}

/// EMA at every index, seeded with the first value
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let multiplier = 2.0 / (period.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = match values.first() {
        Some(&v) => v,
        None => return out,
    };

    for &value in values {
        ema = (value - ema) * multiplier + ema;
        out.push(ema);
    }

    out
}

/// Linearly weighted moving average, newest value weighted `period`
pub fn wma_series(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(period);
            let window = &values[start..=i];
            let anchor = window[0];
            let mut weighted = 0.0;
            let mut total_weight = 0.0;
            for (k, v) in window.iter().enumerate() {
                let w = (k + 1) as f64;
                weighted += w * (v - anchor);
                total_weight += w;
            }
            anchor + weighted / total_weight
        })
        .collect()
}
