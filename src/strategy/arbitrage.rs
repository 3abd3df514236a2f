use serde::{Deserialize, Serialize};

use super::signals::{pct_change, precheck, TieBreak, VotePolicy, VoteTally};
use super::Strategy;
use crate::indicators::IndicatorFrame;
use crate::models::{Quote, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArbitrageParams {
    pub policy: VotePolicy,
    /// How far outside a Bollinger band the quote must trade, percent
    pub band_breach_pct: f64,
    pub rsi_extreme_high: f64,
    pub rsi_extreme_low: f64,
    /// Deviation from EMA20 treated as stretched, percent
    pub ema_deviation_pct: f64,
    pub stoch_high: f64,
    pub stoch_low: f64,
}

impl Default for ArbitrageParams {
    fn default() -> Self {
        Self {
            policy: VotePolicy {
                min_score: 2,
                margin: 1,
            },
            band_breach_pct: 1.0,
            rsi_extreme_high: 80.0,
            rsi_extreme_low: 20.0,
            ema_deviation_pct: 2.0,
            stoch_high: 90.0,
            stoch_low: 10.0,
        }
    }
}

/// Mean-reversion strategy: fades stretched prices back toward the mean.
///
/// Band tests use the executable side of the quote (ask for buys, bid for sells).
#[derive(Debug, Clone)]
pub struct ArbitrageStrategy {
    params: ArbitrageParams,
    min_bars: usize,
}

impl ArbitrageStrategy {
    pub fn new(params: ArbitrageParams, min_bars: usize) -> Self {
        Self { params, min_bars }
    }
}

impl Default for ArbitrageStrategy {
    fn default() -> Self {
        Self::new(ArbitrageParams::default(), 50)
    }
}

impl Strategy for ArbitrageStrategy {
    fn generate(&self, frame: &IndicatorFrame, quote: &Quote) -> Signal {
        if let Some(none) = precheck(self.kind(), frame, quote, self.min_candles_required()) {
            return none;
        }

        let params = &self.params;
        let c = &frame.rows()[frame.len() - 1];
        let close = frame.bars()[frame.len() - 1].close;
        let breach = params.band_breach_pct / 100.0;
        let mut tally = VoteTally::new();

        if quote.bid > c.bb_upper * (1.0 + breach) {
            tally.sell(2, format!("bid {:.5} stretched above upper band", quote.bid));
        } else if quote.ask < c.bb_lower * (1.0 - breach) {
            tally.buy(2, format!("ask {:.5} stretched below lower band", quote.ask));
        }

        if c.rsi > params.rsi_extreme_high {
            tally.sell(1, format!("RSI {:.1} extreme high", c.rsi));
        } else if c.rsi < params.rsi_extreme_low {
            tally.buy(1, format!("RSI {:.1} extreme low", c.rsi));
        }

        let deviation = pct_change(c.ema_20, close);
        if deviation > params.ema_deviation_pct {
            tally.sell(1, format!("{:.2}% above EMA20", deviation));
        } else if deviation < -params.ema_deviation_pct {
            tally.buy(1, format!("{:.2}% below EMA20", -deviation));
        }

        if c.stoch_k > params.stoch_high && c.stoch_d > params.stoch_high {
            tally.sell(1, "stochastic overbought");
        } else if c.stoch_k < params.stoch_low && c.stoch_d < params.stoch_low {
            tally.buy(1, "stochastic oversold");
        }

        tally.decide(self.kind(), &params.policy, TieBreak::from_frame(frame))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Arbitrage
    }

    fn name(&self) -> &str {
        "ArbitrageStrategy"
    }

    fn min_candles_required(&self) -> usize {
        self.min_bars.max(super::MIN_LOOKBACK_BARS)
    }
}
