use super::moving_average::shifted_mean;

/// Bollinger Bands at every index
#[derive(Debug, Clone, Default)]
pub struct BollingerSeries {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    /// (upper - lower) / middle
    pub width: Vec<f64>,
}

/// Middle band is the `period` SMA, outer bands sit `std_dev` sample
/// deviations away. Partial windows at the start.
pub fn bollinger_series(closes: &[f64], period: usize, std_dev: f64) -> BollingerSeries {
    let period = period.max(1);
    let mut out = BollingerSeries {
        upper: Vec::with_capacity(closes.len()),
        middle: Vec::with_capacity(closes.len()),
        lower: Vec::with_capacity(closes.len()),
        width: Vec::with_capacity(closes.len()),
    };

    for i in 0..closes.len() {
        let start = (i + 1).saturating_sub(period);
        let window = &closes[start..=i];
        let mean = shifted_mean(window);
        let sd = if window.len() > 1 {
            let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (window.len() - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        let upper = mean + std_dev * sd;
        let lower = mean - std_dev * sd;
        out.upper.push(upper);
        out.middle.push(mean);
        out.lower.push(lower);
        out.width.push(if mean != 0.0 { (upper - lower) / mean } else { 0.0 });
    }

    out
}
