use serde::{Deserialize, Serialize};

use crate::indicators::IndicatorFrame;
use crate::models::{Direction, Quote, Signal, StrategyKind};

/// Thresholds for the shared weighted-vote decision rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VotePolicy {
    /// Score a side must reach before it can be emitted
    pub min_score: u32,
    /// Lead over the other side required to emit without a tie-break
    pub margin: u32,
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self {
            min_score: 3,
            margin: 1,
        }
    }
}

/// Inputs for breaking an exact tie, in priority order
#[derive(Debug, Clone, Copy, Default)]
pub struct TieBreak {
    /// Close of the last bar minus close of the one before
    pub last_bar_change: f64,
    /// Fast EMA now minus fast EMA one bar ago
    pub fast_slope: f64,
}

impl TieBreak {
    pub fn from_frame(frame: &IndicatorFrame) -> Self {
        let (Some(last), Some(prev)) = (frame.bar_back(0), frame.bar_back(1)) else {
            return Self::default();
        };
        let (Some(row), Some(prev_row)) = (frame.row_back(0), frame.row_back(1)) else {
            return Self::default();
        };
        Self {
            last_bar_change: last.close - prev.close,
            fast_slope: row.ema_8 - prev_row.ema_8,
        }
    }

    fn resolve(&self) -> Option<(Direction, &'static str)> {
        if self.last_bar_change > 0.0 {
            Some((Direction::Buy, "tie broken by rising last bar"))
        } else if self.last_bar_change < 0.0 {
            Some((Direction::Sell, "tie broken by falling last bar"))
        } else if self.fast_slope > 0.0 {
            Some((Direction::Buy, "tie broken by rising fast EMA"))
        } else if self.fast_slope < 0.0 {
            Some((Direction::Sell, "tie broken by falling fast EMA"))
        } else {
            None
        }
    }
}

/// Running buy/sell score for one strategy evaluation
#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    buy: u32,
    sell: u32,
    reasons: Vec<String>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buy(&mut self, weight: u32, reason: impl Into<String>) {
        self.buy += weight;
        self.reasons.push(format!("+{} buy: {}", weight, reason.into()));
    }

    pub fn sell(&mut self, weight: u32, reason: impl Into<String>) {
        self.sell += weight;
        self.reasons.push(format!("+{} sell: {}", weight, reason.into()));
    }

    pub fn buy_score(&self) -> u32 {
        self.buy
    }

    pub fn sell_score(&self) -> u32 {
        self.sell
    }

    /// Apply the decision rule common to every strategy
    pub fn decide(self, strategy: StrategyKind, policy: &VotePolicy, tie: TieBreak) -> Signal {
        let VoteTally {
            buy,
            sell,
            mut reasons,
        } = self;
        let total = buy + sell;

        let mut finish = |direction: Direction, confidence: f64, why: String| {
            reasons.push(why);
            Signal {
                strategy,
                direction,
                reasons: std::mem::take(&mut reasons),
                raw_confidence: confidence,
                buy_score: buy,
                sell_score: sell,
            }
        };

        if buy.max(sell) < policy.min_score {
            return finish(
                Direction::None,
                0.0,
                format!(
                    "no side reached minimum score {} (buy {}, sell {})",
                    policy.min_score, buy, sell
                ),
            );
        }

        if buy == sell {
            return match tie.resolve() {
                Some((direction, why)) => finish(direction, 0.5, why.to_string()),
                None => finish(
                    Direction::None,
                    0.0,
                    format!("tie at {} unresolved by tie-breakers", buy),
                ),
            };
        }

        let (direction, winner) = if buy > sell {
            (Direction::Buy, buy)
        } else {
            (Direction::Sell, sell)
        };
        let lead = buy.abs_diff(sell);
        if lead < policy.margin {
            return finish(
                Direction::None,
                0.0,
                format!("lead {} below margin {}", lead, policy.margin),
            );
        }

        finish(
            direction,
            winner as f64 / total as f64,
            format!("{} wins {} to {}", direction, winner, total - winner),
        )
    }
}

/// Common guard for every generator: frame length and quote sanity
pub fn precheck(
    strategy: StrategyKind,
    frame: &IndicatorFrame,
    quote: &Quote,
    min_bars: usize,
) -> Option<Signal> {
    if frame.len() < min_bars {
        return Some(Signal::none(
            strategy,
            format!("frame has {} bars, need {}", frame.len(), min_bars),
        ));
    }
    if !quote.is_valid() {
        return Some(Signal::none(
            strategy,
            format!("invalid quote bid {} ask {}", quote.bid, quote.ask),
        ));
    }
    None
}

/// Percent change from `from` to `to`
pub fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        (to - from) / from * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tie(change: f64, slope: f64) -> TieBreak {
        TieBreak {
            last_bar_change: change,
            fast_slope: slope,
        }
    }

    #[test]
    fn test_below_minimum_is_none() {
        let mut tally = VoteTally::new();
        tally.buy(2, "ema");
        let signal = tally.decide(StrategyKind::Scalping, &VotePolicy::default(), tie(1.0, 1.0));
        assert_eq!(signal.direction, Direction::None);
        assert!(signal.reasons.last().unwrap().contains("minimum score"));
    }

    #[test]
    fn test_clear_winner() {
        let mut tally = VoteTally::new();
        tally.buy(2, "trend");
        tally.buy(2, "rsi");
        tally.sell(1, "band");
        let signal = tally.decide(StrategyKind::Intraday, &VotePolicy::default(), tie(0.0, 0.0));
        assert_eq!(signal.direction, Direction::Buy);
        assert!((signal.raw_confidence - 0.8).abs() < 1e-12);
        assert_eq!(signal.buy_score, 4);
        assert_eq!(signal.reasons.len(), 4);
    }

    #[test]
    fn test_margin_not_met() {
        let mut tally = VoteTally::new();
        tally.buy(4, "a");
        tally.sell(3, "b");
        let policy = VotePolicy {
            min_score: 3,
            margin: 2,
        };
        let signal = tally.decide(StrategyKind::Scalping, &policy, tie(1.0, 1.0));
        assert_eq!(signal.direction, Direction::None);
    }

    #[test]
    fn test_tie_break_order() {
        let mut tally = VoteTally::new();
        tally.buy(3, "a");
        tally.sell(3, "b");
        // last bar falls even though the fast EMA still rises
        let signal = tally
            .clone()
            .decide(StrategyKind::Hft, &VotePolicy::default(), tie(-0.1, 0.2));
        assert_eq!(signal.direction, Direction::Sell);

        let signal = tally
            .clone()
            .decide(StrategyKind::Hft, &VotePolicy::default(), tie(0.0, 0.2));
        assert_eq!(signal.direction, Direction::Buy);

        let signal = tally.decide(StrategyKind::Hft, &VotePolicy::default(), tie(0.0, 0.0));
        assert_eq!(signal.direction, Direction::None);
    }
}
