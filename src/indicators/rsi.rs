/// Neutral RSI emitted when there is not enough history or no movement
pub const NEUTRAL_RSI: f64 = 50.0;

/// Relative Strength Index (RSI) at every index
///
/// Uses a rolling mean of gains and losses over `period` price changes.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Indexes with fewer than `period` changes, and windows with no movement,
/// read as 50.
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(prices.len());

    for i in 0..prices.len() {
        if i < period {
            out.push(NEUTRAL_RSI);
            continue;
        }

        let mut gain_sum = 0.0;
        let mut loss_sum = 0.0;
        for j in (i + 1 - period)..=i {
            let change = prices[j] - prices[j - 1];
            if change > 0.0 {
                gain_sum += change;
            } else {
                loss_sum += -change;
            }
        }

        let avg_gain = gain_sum / period as f64;
        let avg_loss = loss_sum / period as f64;

        let rsi = if avg_gain == 0.0 && avg_loss == 0.0 {
            NEUTRAL_RSI
        } else if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        };
        out.push(rsi);
    }

    out
}
