use serde::{Deserialize, Serialize};

use super::signals::{precheck, TieBreak, VotePolicy, VoteTally};
use super::Strategy;
use crate::indicators::IndicatorFrame;
use crate::models::{Quote, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalpingParams {
    pub policy: VotePolicy,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for ScalpingParams {
    fn default() -> Self {
        Self {
            policy: VotePolicy {
                min_score: 3,
                margin: 1,
            },
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
        }
    }
}

/// Fast trend-following scalper
///
/// Votes on:
/// - EMA8/EMA20 alignment and fast EMA slope
/// - short momentum and its acceleration
/// - reversal candles
/// - RSI zones, MACD and the Bollinger middle band
#[derive(Debug, Clone)]
pub struct ScalpingStrategy {
    params: ScalpingParams,
    min_bars: usize,
}

impl ScalpingStrategy {
    pub fn new(params: ScalpingParams, min_bars: usize) -> Self {
        Self { params, min_bars }
    }
}

impl Default for ScalpingStrategy {
    fn default() -> Self {
        Self::new(ScalpingParams::default(), 50)
    }
}

impl Strategy for ScalpingStrategy {
    fn generate(&self, frame: &IndicatorFrame, quote: &Quote) -> Signal {
        if let Some(none) = precheck(self.kind(), frame, quote, self.min_candles_required()) {
            return none;
        }

        let bars = frame.bars();
        let rows = frame.rows();
        let n = bars.len();
        let (c, p) = (&rows[n - 1], &rows[n - 2]);
        let (last, prev) = (&bars[n - 1], &bars[n - 2]);
        let close = last.close;
        let mut tally = VoteTally::new();

        // Trend
        if c.ema_8 > c.ema_20 {
            tally.buy(1, "EMA8 above EMA20");
            if c.ema_8 > p.ema_8 {
                tally.buy(1, "EMA8 rising");
            }
        } else if c.ema_8 < c.ema_20 {
            tally.sell(1, "EMA8 below EMA20");
            if c.ema_8 < p.ema_8 {
                tally.sell(1, "EMA8 falling");
            }
        }

        if close > c.ema_8 {
            tally.buy(1, "close above EMA8");
        } else if close < c.ema_8 {
            tally.sell(1, "close below EMA8");
        }

        // Momentum over 3 bars, compared with the previous 3-bar window
        let momentum = close - bars[n - 4].close;
        let prev_momentum = prev.close - bars[n - 5].close;
        if momentum > 0.0 {
            tally.buy(1, "3-bar momentum up");
            if prev_momentum > 0.0 && momentum > prev_momentum {
                tally.buy(2, "upside momentum accelerating");
            }
        } else if momentum < 0.0 {
            tally.sell(1, "3-bar momentum down");
            if prev_momentum < 0.0 && momentum < prev_momentum {
                tally.sell(1, "downside momentum accelerating");
            }
        }

        // Price action
        if prev.is_bearish() && last.is_bullish() && last.close > prev.open {
            tally.buy(1, "bullish reversal candle");
        } else if prev.is_bullish() && last.is_bearish() && last.close < prev.open {
            tally.sell(1, "bearish reversal candle");
        }

        // RSI zones
        if c.rsi < self.params.rsi_oversold && c.rsi > p.rsi {
            tally.buy(2, format!("RSI {:.1} oversold and turning up", c.rsi));
        } else if c.rsi > self.params.rsi_overbought && c.rsi < p.rsi {
            tally.sell(2, format!("RSI {:.1} overbought and turning down", c.rsi));
        } else if c.rsi > 50.0 && c.rsi < self.params.rsi_overbought {
            tally.buy(1, format!("RSI {:.1} bullish zone", c.rsi));
        } else if c.rsi < 50.0 && c.rsi > self.params.rsi_oversold {
            tally.sell(1, format!("RSI {:.1} bearish zone", c.rsi));
        }

        if c.macd > c.macd_signal && c.macd_hist > 0.0 {
            tally.buy(1, "MACD above signal");
        } else if c.macd < c.macd_signal && c.macd_hist < 0.0 {
            tally.sell(1, "MACD below signal");
        }

        if close > c.bb_middle && close < c.bb_upper {
            tally.buy(1, "close between BB middle and upper band");
        } else if close < c.bb_middle && close > c.bb_lower {
            tally.sell(1, "close between BB middle and lower band");
        }

        tally.decide(self.kind(), &self.params.policy, TieBreak::from_frame(frame))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Scalping
    }

    fn name(&self) -> &str {
        "ScalpingStrategy"
    }

    fn min_candles_required(&self) -> usize {
        self.min_bars.max(super::MIN_LOOKBACK_BARS)
    }
}
