// Sub-factor scores, each in 0..=1
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::tables::{FactorWeights, Session, SessionTable};
use crate::error::{PipelineError, Result};
use crate::indicators::IndicatorFrame;
use crate::models::{leg_exposure, legs, Direction, OpenPosition, Signal};
use crate::risk::RiskLevel;
use crate::strategy::signals::pct_change;

pub const STRUCTURE_BREAK: f64 = 0.85;
const STRUCTURE_FAVOURABLE: f64 = 0.5;
const STRUCTURE_UNFAVOURABLE: f64 = 0.4;
const STRUCTURE_BROKEN_AGAINST: f64 = 0.3;
const BREAK_BUFFER: f64 = 0.001;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FactorScores {
    pub technical: f64,
    pub volume: f64,
    pub structure: f64,
    pub momentum: f64,
    pub session: f64,
    pub correlation: f64,
    pub risk: f64,
}

impl FactorScores {
    pub fn weighted(&self, weights: &FactorWeights) -> f64 {
        self.technical * weights.technical
            + self.volume * weights.volume
            + self.structure * weights.structure
            + self.momentum * weights.momentum
            + self.session * weights.session
            + self.correlation * weights.correlation
            + self.risk * weights.risk
    }
}

fn require(frame: &IndicatorFrame, needed: usize) -> Result<()> {
    if frame.len() < needed {
        return Err(PipelineError::InsufficientData {
            needed,
            got: frame.len(),
        });
    }
    Ok(())
}

/// Raw vote confidence blended with the confluence score
pub fn technical(signal: &Signal, confluence_score: f64) -> Result<f64> {
    if !signal.raw_confidence.is_finite() || !confluence_score.is_finite() {
        return Err(PipelineError::MalformedInput(
            "non-finite confidence input".to_string(),
        ));
    }
    Ok((0.5 * signal.raw_confidence.clamp(0.0, 1.0)
        + 0.5 * (confluence_score / 100.0).clamp(0.0, 1.0))
    .clamp(0.0, 1.0))
}

/// Recent volume (5 bars) against the 20-bar average
pub fn volume_ratio(frame: &IndicatorFrame) -> Result<f64> {
    require(frame, 20)?;
    let volumes = frame.volumes();
    let n = volumes.len();
    let recent = volumes[n - 5..].iter().sum::<f64>() / 5.0;
    let average = volumes[n - 20..].iter().sum::<f64>() / 20.0;
    if average <= 0.0 {
        return Err(PipelineError::MalformedInput(
            "zero average volume".to_string(),
        ));
    }
    Ok(recent / average)
}

pub fn volume(frame: &IndicatorFrame) -> Result<f64> {
    let ratio = volume_ratio(frame)?;
    Ok(if ratio > 2.0 {
        0.9
    } else if ratio > 1.5 {
        0.7
    } else if ratio > 1.2 {
        0.6
    } else {
        0.4
    })
}

/// Close against the swing range of the five bars before it
pub fn structure(frame: &IndicatorFrame, direction: Direction) -> Result<f64> {
    require(frame, 6)?;
    let bars = frame.bars();
    let n = bars.len();
    let swing = &bars[n - 6..n - 1];
    let high = swing.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = swing.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let close = bars[n - 1].close;

    let broke_up = close > high * (1.0 + BREAK_BUFFER);
    let broke_down = close < low * (1.0 - BREAK_BUFFER);
    let position = if high > low {
        (close - low) / (high - low)
    } else {
        0.5
    };

    let score = match direction {
        Direction::Buy if broke_up => STRUCTURE_BREAK,
        Direction::Buy if broke_down => STRUCTURE_BROKEN_AGAINST,
        Direction::Buy if position >= 0.5 => STRUCTURE_FAVOURABLE,
        Direction::Sell if broke_down => STRUCTURE_BREAK,
        Direction::Sell if broke_up => STRUCTURE_BROKEN_AGAINST,
        Direction::Sell if position <= 0.5 => STRUCTURE_FAVOURABLE,
        Direction::None => {
            return Err(PipelineError::MalformedInput(
                "structure needs a direction".to_string(),
            ))
        }
        _ => STRUCTURE_UNFAVOURABLE,
    };
    Ok(score)
}

/// RSI zone, MACD, stochastic and 10-bar drift agreeing with the direction
pub fn momentum(frame: &IndicatorFrame, direction: Direction) -> Result<f64> {
    require(frame, 11)?;
    let row = frame.row_back(0).ok_or(PipelineError::InsufficientData {
        needed: 11,
        got: 0,
    })?;
    let closes = frame.closes();
    let n = closes.len();
    let drift = pct_change(closes[n - 11], closes[n - 1]);

    let sign = match direction {
        Direction::Buy => 1.0,
        Direction::Sell => -1.0,
        Direction::None => {
            return Err(PipelineError::MalformedInput(
                "momentum needs a direction".to_string(),
            ))
        }
    };

    let mut points = 0u32;
    let rsi_in_zone = match direction {
        Direction::Buy => (60.0..=80.0).contains(&row.rsi),
        _ => (20.0..=40.0).contains(&row.rsi),
    };
    if rsi_in_zone {
        points += 3;
    }
    if (row.macd - row.macd_signal) * sign > 0.0 {
        points += 2;
    }
    if (row.stoch_k - row.stoch_d) * sign > 0.0 {
        points += 2;
    }
    if drift * sign > 0.2 {
        points += 1;
    }

    Ok(points as f64 / 10.0)
}

/// Symbol's preference for the sessions open at `now`; overlaps take the best
pub fn session(symbol: &str, now: DateTime<Utc>, table: &SessionTable) -> f64 {
    let scores = table.scores_for(symbol);
    Session::active(now.hour())
        .into_iter()
        .map(|s| scores.score(s))
        .fold(0.0, f64::max)
}

/// Share of related open positions whose currency exposure matches the candidate
pub fn correlation(symbol: &str, direction: Direction, positions: &[OpenPosition]) -> f64 {
    let Some(side) = direction.side() else {
        return 0.6;
    };

    let mut related = 0usize;
    let mut aligned = 0usize;
    for position in positions {
        let shared = legs(symbol)
            .into_iter()
            .find(|leg| leg_exposure(&position.symbol, position.side, leg).is_some());
        let Some(leg) = shared else { continue };

        related += 1;
        if leg_exposure(symbol, side, &leg) == leg_exposure(&position.symbol, position.side, &leg)
        {
            aligned += 1;
        }
    }

    if related == 0 {
        0.6
    } else {
        0.4 + 0.5 * aligned as f64 / related as f64
    }
}

/// Spread headroom averaged with the drawdown risk-level factor
pub fn risk(spread_pips: f64, limit_pips: f64, level: RiskLevel) -> Result<f64> {
    if limit_pips <= 0.0 || !spread_pips.is_finite() {
        return Err(PipelineError::MalformedInput(format!(
            "spread {} pips against limit {}",
            spread_pips, limit_pips
        )));
    }
    let headroom = (1.0 - spread_pips / limit_pips).clamp(0.0, 1.0);
    Ok((headroom + level.factor()) / 2.0)
}
