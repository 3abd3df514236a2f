// Strategy signal generators
pub mod arbitrage;
pub mod hft;
pub mod intraday;
pub mod scalping;
pub mod signals;

use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorFrame;
use crate::models::{Quote, Signal, StrategyKind};

pub use arbitrage::{ArbitrageParams, ArbitrageStrategy};
pub use hft::{HftParams, HftStrategy};
pub use intraday::{IntradayParams, IntradayStrategy};
pub use scalping::{ScalpingParams, ScalpingStrategy};
pub use signals::{TieBreak, VotePolicy, VoteTally};

/// Fewest bars any generator looks back over
pub const MIN_LOOKBACK_BARS: usize = 6;

/// Base trait for all signal generators
///
/// Generators are pure: no state survives between calls, and a bad
/// frame or quote produces a `NONE` signal with a reason instead of an error.
pub trait Strategy: Send + Sync {
    /// Vote on the latest bar of `frame` using the live `quote`
    fn generate(&self, frame: &IndicatorFrame, quote: &Quote) -> Signal;

    fn kind(&self) -> StrategyKind;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum bars required in the frame
    fn min_candles_required(&self) -> usize;
}

/// Per-strategy parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    pub min_frame_bars: usize,
    pub scalping: ScalpingParams,
    pub intraday: IntradayParams,
    pub arbitrage: ArbitrageParams,
    pub hft: HftParams,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_frame_bars: 50,
            scalping: ScalpingParams::default(),
            intraday: IntradayParams::default(),
            arbitrage: ArbitrageParams::default(),
            hft: HftParams::default(),
        }
    }
}

impl StrategyConfig {
    pub fn policy(&self, kind: StrategyKind) -> VotePolicy {
        match kind {
            StrategyKind::Scalping => self.scalping.policy,
            StrategyKind::Intraday => self.intraday.policy,
            StrategyKind::Arbitrage => self.arbitrage.policy,
            StrategyKind::Hft => self.hft.policy,
        }
    }
}

/// Build the generator for `kind`
pub fn build_strategy(kind: StrategyKind, config: &StrategyConfig) -> Box<dyn Strategy> {
    let min_bars = config.min_frame_bars.max(MIN_LOOKBACK_BARS);
    match kind {
        StrategyKind::Scalping => {
            Box::new(ScalpingStrategy::new(config.scalping.clone(), min_bars))
        }
        StrategyKind::Intraday => {
            Box::new(IntradayStrategy::new(config.intraday.clone(), min_bars))
        }
        StrategyKind::Arbitrage => {
            Box::new(ArbitrageStrategy::new(config.arbitrage.clone(), min_bars))
        }
        StrategyKind::Hft => Box::new(HftStrategy::new(config.hft.clone(), min_bars)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use crate::indicators::{compute, IndicatorConfig, IndicatorFrame};
    use crate::models::{PriceBar, Quote};

    /// Bars from a list of closes with a small symmetric wick
    pub fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                PriceBar {
                    timestamp: start + chrono::Duration::minutes(i as i64),
                    open,
                    high: open.max(close) + 0.0002,
                    low: open.min(close) - 0.0002,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    pub fn frame_from_closes(closes: &[f64]) -> IndicatorFrame {
        compute(&bars_from_closes(closes), &IndicatorConfig::default()).unwrap()
    }

    pub fn quote_at(price: f64) -> Quote {
        Quote {
            symbol: "EURUSD".to_string(),
            bid: price,
            ask: price + 0.0001,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap(),
        }
    }

    pub fn flat_frame(price: f64, n: usize) -> IndicatorFrame {
        let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
        let bars: Vec<PriceBar> = (0..n)
            .map(|i| PriceBar {
                timestamp: start + chrono::Duration::minutes(i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1000.0,
            })
            .collect();
        compute(&bars, &IndicatorConfig::default()).unwrap()
    }
}
