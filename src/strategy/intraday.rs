use serde::{Deserialize, Serialize};

use super::signals::{pct_change, precheck, TieBreak, VotePolicy, VoteTally};
use super::Strategy;
use crate::indicators::IndicatorFrame;
use crate::models::{Quote, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntradayParams {
    pub policy: VotePolicy,
    /// Max distance from support/resistance, percent of price
    pub sr_proximity_pct: f64,
}

impl Default for IntradayParams {
    fn default() -> Self {
        Self {
            policy: VotePolicy {
                min_score: 3,
                margin: 1,
            },
            sr_proximity_pct: 1.0,
        }
    }
}

/// Trend-aligned intraday strategy: stacked EMAs, RSI side, MACD expansion
/// and proximity to the 20-bar support or resistance.
#[derive(Debug, Clone)]
pub struct IntradayStrategy {
    params: IntradayParams,
    min_bars: usize,
}

impl IntradayStrategy {
    pub fn new(params: IntradayParams, min_bars: usize) -> Self {
        Self { params, min_bars }
    }
}

impl Default for IntradayStrategy {
    fn default() -> Self {
        Self::new(IntradayParams::default(), 50)
    }
}

impl Strategy for IntradayStrategy {
    fn generate(&self, frame: &IndicatorFrame, quote: &Quote) -> Signal {
        if let Some(none) = precheck(self.kind(), frame, quote, self.min_candles_required()) {
            return none;
        }

        let rows = frame.rows();
        let n = rows.len();
        let (c, p) = (&rows[n - 1], &rows[n - 2]);
        let close = frame.bars()[n - 1].close;
        let mut tally = VoteTally::new();

        if c.ema_20 > c.ema_50 && c.ema_50 > c.ema_200 && close > c.ema_20 {
            tally.buy(2, "EMA20 > EMA50 > EMA200 with price above EMA20");
        } else if c.ema_20 < c.ema_50 && c.ema_50 < c.ema_200 && close < c.ema_20 {
            tally.sell(2, "EMA20 < EMA50 < EMA200 with price below EMA20");
        }

        if c.rsi > 30.0 && c.rsi < 70.0 {
            if c.rsi > 50.0 {
                tally.buy(1, format!("RSI {:.1} above 50", c.rsi));
            } else if c.rsi < 50.0 {
                tally.sell(1, format!("RSI {:.1} below 50", c.rsi));
            }
        }

        if c.macd > c.macd_signal && c.macd_hist > p.macd_hist {
            tally.buy(1, "MACD above signal and histogram expanding");
        } else if c.macd < c.macd_signal && c.macd_hist < p.macd_hist {
            tally.sell(1, "MACD below signal and histogram falling");
        }

        // Whichever level is closer, if within range
        let to_support = close - c.support;
        let to_resistance = c.resistance - close;
        if to_support > 0.0
            && to_support < to_resistance
            && pct_change(c.support, close) < self.params.sr_proximity_pct
        {
            tally.buy(1, format!("price near support {:.5}", c.support));
        } else if to_resistance > 0.0
            && to_resistance < to_support
            && pct_change(close, c.resistance) < self.params.sr_proximity_pct
        {
            tally.sell(1, format!("price near resistance {:.5}", c.resistance));
        }

        tally.decide(self.kind(), &self.params.policy, TieBreak::from_frame(frame))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Intraday
    }

    fn name(&self) -> &str {
        "IntradayStrategy"
    }

    fn min_candles_required(&self) -> usize {
        self.min_bars.max(super::MIN_LOOKBACK_BARS)
    }
}
