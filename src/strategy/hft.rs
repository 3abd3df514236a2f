use serde::{Deserialize, Serialize};

use super::signals::{pct_change, precheck, TieBreak, VotePolicy, VoteTally};
use super::Strategy;
use crate::indicators::IndicatorFrame;
use crate::models::{Quote, Signal, StrategyKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HftParams {
    pub policy: VotePolicy,
    /// One-bar move that counts as an impulse, percent
    pub move_pct: f64,
    /// Fast RSI change that counts as a burst, RSI points
    pub rsi_jump: f64,
    /// Distance from the 5-bar extreme that counts as "at" it, percent
    pub proximity_pct: f64,
    pub range_bars: usize,
}

impl Default for HftParams {
    fn default() -> Self {
        Self {
            policy: VotePolicy {
                min_score: 3,
                margin: 1,
            },
            move_pct: 0.1,
            rsi_jump: 5.0,
            proximity_pct: 0.1,
            range_bars: 5,
        }
    }
}

/// Ultra-short-term impulse strategy on the last few bars
#[derive(Debug, Clone)]
pub struct HftStrategy {
    params: HftParams,
    min_bars: usize,
}

impl HftStrategy {
    pub fn new(params: HftParams, min_bars: usize) -> Self {
        Self { params, min_bars }
    }
}

impl Default for HftStrategy {
    fn default() -> Self {
        Self::new(HftParams::default(), 50)
    }
}

impl Strategy for HftStrategy {
    fn generate(&self, frame: &IndicatorFrame, quote: &Quote) -> Signal {
        if let Some(none) = precheck(self.kind(), frame, quote, self.min_candles_required()) {
            return none;
        }

        let params = &self.params;
        let bars = frame.bars();
        let rows = frame.rows();
        let n = bars.len();
        let (c, p) = (&rows[n - 1], &rows[n - 2]);
        let ema = |back: usize| rows[n - 1 - back].ema_8;
        let mut tally = VoteTally::new();

        if ema(0) > ema(1) && ema(1) > ema(2) && ema(2) > ema(3) {
            tally.buy(1, "EMA8 rising three bars");
        } else if ema(0) < ema(1) && ema(1) < ema(2) && ema(2) < ema(3) {
            tally.sell(1, "EMA8 falling three bars");
        }

        let one_bar = pct_change(bars[n - 2].close, bars[n - 1].close);
        if one_bar > params.move_pct {
            tally.buy(1, format!("impulse +{:.3}%", one_bar));
        } else if one_bar < -params.move_pct {
            tally.sell(1, format!("impulse {:.3}%", one_bar));
        }

        let rsi_change = c.rsi_fast - p.rsi_fast;
        if rsi_change > params.rsi_jump && c.rsi_fast > 50.0 {
            tally.buy(1, format!("fast RSI jumped {:.1} to {:.1}", rsi_change, c.rsi_fast));
        } else if rsi_change < -params.rsi_jump && c.rsi_fast < 50.0 {
            tally.sell(1, format!("fast RSI dropped {:.1} to {:.1}", -rsi_change, c.rsi_fast));
        }

        if c.macd_hist > p.macd_hist && c.macd_hist > 0.0 {
            tally.buy(1, "MACD histogram expanding up");
        } else if c.macd_hist < p.macd_hist && c.macd_hist < 0.0 {
            tally.sell(1, "MACD histogram expanding down");
        }

        let window = &bars[n.saturating_sub(params.range_bars.max(1))..];
        let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let mid = quote.mid();
        if high > low && mid > 0.0 {
            if (high - mid).abs() / mid * 100.0 <= params.proximity_pct {
                tally.buy(1, "quote pressing the 5-bar high");
            } else if (mid - low).abs() / mid * 100.0 <= params.proximity_pct {
                tally.sell(1, "quote pressing the 5-bar low");
            }
        }

        tally.decide(self.kind(), &params.policy, TieBreak::from_frame(frame))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Hft
    }

    fn name(&self) -> &str {
        "HftStrategy"
    }

    fn min_candles_required(&self) -> usize {
        self.min_bars.max(super::MIN_LOOKBACK_BARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use crate::strategy::test_support::*;

    fn ranging_then(impulse: &[f64]) -> Vec<f64> {
        let mut closes: Vec<f64> = (0..60)
            .map(|i| 1.1000 + if i % 2 == 0 { 0.0002 } else { -0.0002 })
            .collect();
        closes.extend_from_slice(impulse);
        closes
    }

    #[test]
    fn test_upside_burst_buys() {
        let closes = ranging_then(&[1.1006, 1.1012, 1.1018, 1.1035]);
        let frame = frame_from_closes(&closes);
        let signal = HftStrategy::default().generate(&frame, &quote_at(1.1035));

        assert_eq!(signal.direction, Direction::Buy);
        assert!(signal.buy_score >= 3);
    }

    #[test]
    fn test_downside_burst_sells() {
        let closes = ranging_then(&[1.0994, 1.0988, 1.0982, 1.0965]);
        let frame = frame_from_closes(&closes);
        let signal = HftStrategy::default().generate(&frame, &quote_at(1.0964));

        assert_eq!(signal.direction, Direction::Sell);
    }
}
