use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::indicators::IndicatorFrame;
use crate::models::{Direction, Timeframe};

/// Trend bias of one timeframe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    fn agrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Bias::Bullish, Direction::Buy) | (Bias::Bearish, Direction::Sell)
        )
    }

    fn disagrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Bias::Bullish, Direction::Sell) | (Bias::Bearish, Direction::Buy)
        )
    }
}

/// Condensed trend read of one timeframe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeframeReading {
    pub bias: Bias,
    /// 0..=10
    pub strength: f64,
    pub trend_score: i32,
}

impl TimeframeReading {
    pub fn new(bias: Bias, strength: f64) -> Self {
        Self {
            bias,
            strength: strength.clamp(0.0, 10.0),
            trend_score: 0,
        }
    }
}

/// Result of analysing one timeframe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TimeframeOutcome {
    Reading(TimeframeReading),
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeframeEntry {
    pub weight: f64,
    pub outcome: TimeframeOutcome,
}

/// Output of the confluence gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfluenceReport {
    pub direction: Direction,
    pub allowed: bool,
    /// 0..=100
    pub score: f64,
    pub min_score: f64,
    pub per_timeframe: BTreeMap<Timeframe, TimeframeEntry>,
    pub reasons: Vec<String>,
}

impl ConfluenceReport {
    /// True when every analysed timeframe agrees with the direction
    pub fn fully_aligned(&self) -> bool {
        let mut readings = self
            .per_timeframe
            .values()
            .filter_map(|entry| match &entry.outcome {
                TimeframeOutcome::Reading(r) => Some(r),
                TimeframeOutcome::Skipped { .. } => None,
            })
            .peekable();
        readings.peek().is_some() && readings.all(|r| r.bias.agrees_with(self.direction))
    }
}

/// Score a trend on the last bar of `frame`, in -6..=6.
pub fn trend_score(frame: &IndicatorFrame) -> i32 {
    let bars = frame.bars();
    let rows = frame.rows();
    let n = rows.len();
    if n < 6 {
        return 0;
    }
    let c = &rows[n - 1];
    let close = bars[n - 1].close;
    let mut score = 0;

    if close > c.ema_20 && c.ema_20 > c.ema_50 {
        score += 2;
    } else if close < c.ema_20 && c.ema_20 < c.ema_50 {
        score -= 2;
    }

    let ema_then = rows[n - 6].ema_20;
    if c.ema_20 > ema_then {
        score += 1;
    } else if c.ema_20 < ema_then {
        score -= 1;
    }

    if c.rsi > 50.0 && c.rsi < 70.0 {
        score += 1;
    } else if c.rsi > 30.0 && c.rsi < 50.0 {
        score -= 1;
    }

    if c.macd > c.macd_signal && c.macd_hist > 0.0 {
        score += 1;
    } else if c.macd < c.macd_signal && c.macd_hist < 0.0 {
        score -= 1;
    }

    // Position inside the 10-bar range
    let window = &bars[n.saturating_sub(10)..];
    let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if high > low {
        let position = (close - low) / (high - low);
        if position > 0.8 {
            score += 1;
        } else if position < 0.2 {
            score -= 1;
        }
    }

    score
}

/// Turn a trend score into a bias and 0..=10 strength
pub fn read_trend(frame: &IndicatorFrame, bias_threshold: i32) -> TimeframeReading {
    let score = trend_score(frame);
    let bias = if score >= bias_threshold {
        Bias::Bullish
    } else if score <= -bias_threshold {
        Bias::Bearish
    } else {
        Bias::Neutral
    };
    let strength = match bias {
        Bias::Neutral => 5.0,
        _ => (5.0 + score.abs() as f64).min(10.0),
    };

    TimeframeReading {
        bias,
        strength,
        trend_score: score,
    }
}

/// Weighted confluence of per-timeframe readings against `direction`.
///
/// Agreeing timeframes add `weight * strength` to both sides of the ratio.
/// Disagreeing ones subtract half of it from the numerator, and they and
/// neutral ones add `weight * 10` to the denominator. Skipped timeframes
/// are left out entirely.
///
/// An extra agreeing timeframe never lowers the score and an extra
/// disagreeing one never raises it.
pub fn aggregate(
    direction: Direction,
    per_timeframe: BTreeMap<Timeframe, TimeframeEntry>,
    min_score: f64,
) -> ConfluenceReport {
    let mut reasons = Vec::new();
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut analysed = 0usize;
    let mut disagreements = Vec::new();

    for (timeframe, entry) in &per_timeframe {
        match &entry.outcome {
            TimeframeOutcome::Skipped { reason } => {
                reasons.push(format!("{} skipped: {}", timeframe, reason));
            }
            TimeframeOutcome::Reading(reading) => {
                analysed += 1;
                let weighted = entry.weight * reading.strength;
                if reading.bias.agrees_with(direction) {
                    numerator += weighted;
                    denominator += weighted;
                    continue;
                }
                denominator += entry.weight * 10.0;
                if reading.bias.disagrees_with(direction) {
                    numerator -= 0.5 * weighted;
                    disagreements.push(format!(
                        "{} {:?} disagrees with {} (strength {:.0})",
                        timeframe, reading.bias, direction, reading.strength
                    ));
                }
            }
        }
    }

    let mut report = ConfluenceReport {
        direction,
        allowed: false,
        score: 0.0,
        min_score,
        per_timeframe,
        reasons,
    };

    if direction == Direction::None {
        report.reasons.push("no candidate direction".to_string());
        return report;
    }
    if analysed == 0 {
        report
            .reasons
            .push("NoData: no timeframe could be analysed".to_string());
        return report;
    }

    report.score = if denominator > 0.0 {
        (numerator / denominator * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };
    report.allowed = report.score >= min_score;
    if !report.allowed {
        report.reasons.push(format!(
            "confluence {:.1} below minimum {:.1}",
            report.score, min_score
        ));
    }
    report.reasons.extend(disagreements);
    report
}
