use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{normalize_symbol, StrategyKind, SymbolClass};

/// Weights of the sub-factors; must sum to 1.0
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactorWeights {
    pub technical: f64,
    pub volume: f64,
    pub structure: f64,
    pub momentum: f64,
    pub session: f64,
    pub correlation: f64,
    pub risk: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            technical: 0.25,
            volume: 0.15,
            structure: 0.15,
            momentum: 0.15,
            session: 0.10,
            correlation: 0.10,
            risk: 0.10,
        }
    }
}

impl FactorWeights {
    pub fn sum(&self) -> f64 {
        self.technical
            + self.volume
            + self.structure
            + self.momentum
            + self.session
            + self.correlation
            + self.risk
    }
}

/// Letter grade of a calibrated decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    F,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::C => "C",
            Grade::F => "F",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GradeMultipliers {
    pub position: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

const fn gm(position: f64, take_profit: f64, stop_loss: f64) -> GradeMultipliers {
    GradeMultipliers {
        position,
        take_profit,
        stop_loss,
    }
}

/// Position / TP / SL multipliers per grade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradeTable {
    pub a_plus: GradeMultipliers,
    pub a: GradeMultipliers,
    pub b_plus: GradeMultipliers,
    pub b: GradeMultipliers,
    pub c: GradeMultipliers,
    pub f: GradeMultipliers,
}

impl Default for GradeTable {
    fn default() -> Self {
        Self {
            a_plus: gm(2.5, 3.0, 0.7),
            a: gm(2.0, 2.5, 0.8),
            b_plus: gm(1.5, 2.0, 0.9),
            b: gm(1.0, 1.5, 1.0),
            c: gm(0.5, 1.0, 1.2),
            f: gm(0.0, 1.0, 1.0),
        }
    }
}

impl GradeTable {
    pub fn get(&self, grade: Grade) -> GradeMultipliers {
        match grade {
            Grade::APlus => self.a_plus,
            Grade::A => self.a,
            Grade::BPlus => self.b_plus,
            Grade::B => self.b,
            Grade::C => self.c,
            Grade::F => self.f,
        }
    }
}

/// Confidence cut-offs for A+ / A / B+ / B / C
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GradeThresholds {
    pub ultra_high: f64,
    pub very_high: f64,
    pub high: f64,
    pub moderate: f64,
    pub minimum: f64,
}

const fn gt(ultra_high: f64, very_high: f64, high: f64, moderate: f64, minimum: f64) -> GradeThresholds {
    GradeThresholds {
        ultra_high,
        very_high,
        high,
        moderate,
        minimum,
    }
}

impl GradeThresholds {
    /// Grade `confidence` with every cut-off raised by `boost`
    pub fn grade(&self, confidence: f64, boost: f64) -> Grade {
        if confidence >= self.ultra_high + boost {
            Grade::APlus
        } else if confidence >= self.very_high + boost {
            Grade::A
        } else if confidence >= self.high + boost {
            Grade::BPlus
        } else if confidence >= self.moderate + boost {
            Grade::B
        } else if confidence >= self.minimum + boost {
            Grade::C
        } else {
            Grade::F
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.minimum < self.moderate
            && self.moderate < self.high
            && self.high < self.very_high
            && self.very_high < self.ultra_high
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdTable {
    pub scalping: GradeThresholds,
    pub intraday: GradeThresholds,
    pub arbitrage: GradeThresholds,
    pub hft: GradeThresholds,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            scalping: gt(0.92, 0.87, 0.82, 0.75, 0.68),
            intraday: gt(0.90, 0.85, 0.80, 0.72, 0.65),
            arbitrage: gt(0.90, 0.85, 0.80, 0.72, 0.65),
            hft: gt(0.95, 0.90, 0.85, 0.78, 0.72),
        }
    }
}

impl ThresholdTable {
    pub fn get(&self, strategy: StrategyKind) -> &GradeThresholds {
        match strategy {
            StrategyKind::Scalping => &self.scalping,
            StrategyKind::Intraday => &self.intraday,
            StrategyKind::Arbitrage => &self.arbitrage,
            StrategyKind::Hft => &self.hft,
        }
    }
}

/// Widest acceptable spread per instrument class, in pips
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpreadLimits {
    pub forex_major: f64,
    pub jpy_cross: f64,
    pub gbp_cross: f64,
    pub exotic: f64,
    pub metal: f64,
    pub crypto: f64,
    pub energy: f64,
    pub index: f64,
}

impl Default for SpreadLimits {
    fn default() -> Self {
        Self {
            forex_major: 2.0,
            jpy_cross: 3.0,
            gbp_cross: 3.0,
            exotic: 5.0,
            metal: 150.0,
            crypto: 800.0,
            energy: 30.0,
            index: 8.0,
        }
    }
}

impl SpreadLimits {
    pub fn limit_pips(&self, class: SymbolClass) -> f64 {
        match class {
            SymbolClass::ForexMajor => self.forex_major,
            SymbolClass::JpyCross => self.jpy_cross,
            SymbolClass::GbpCross => self.gbp_cross,
            SymbolClass::Exotic => self.exotic,
            SymbolClass::Metal => self.metal,
            SymbolClass::Crypto => self.crypto,
            SymbolClass::Energy => self.energy,
            SymbolClass::Index => self.index,
        }
    }
}

/// Trading session by UTC hour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Session {
    London,
    NewYork,
    Asian,
}

impl Session {
    /// Sessions open at `hour`; London and New York overlap 13:00-16:00
    pub fn active(hour: u32) -> Vec<Session> {
        let mut sessions = Vec::with_capacity(2);
        if (8..16).contains(&hour) {
            sessions.push(Session::London);
        }
        if (13..21).contains(&hour) {
            sessions.push(Session::NewYork);
        }
        if sessions.is_empty() {
            sessions.push(Session::Asian);
        }
        sessions
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SessionScores {
    pub london: f64,
    pub new_york: f64,
    pub asian: f64,
}

impl SessionScores {
    pub fn score(&self, session: Session) -> f64 {
        match session {
            Session::London => self.london,
            Session::NewYork => self.new_york,
            Session::Asian => self.asian,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionPreference {
    pub symbol: String,
    pub scores: SessionScores,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionTable {
    pub symbols: Vec<SessionPreference>,
    pub default: SessionScores,
}

fn pref(symbol: &str, london: f64, new_york: f64, asian: f64) -> SessionPreference {
    SessionPreference {
        symbol: symbol.to_string(),
        scores: SessionScores {
            london,
            new_york,
            asian,
        },
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self {
            symbols: vec![
                pref("EURUSD", 0.9, 0.7, 0.3),
                pref("GBPUSD", 0.9, 0.8, 0.3),
                pref("USDJPY", 0.6, 0.8, 0.7),
                pref("XAUUSD", 0.8, 0.9, 0.4),
            ],
            default: SessionScores {
                london: 0.7,
                new_york: 0.7,
                asian: 0.5,
            },
        }
    }
}

impl SessionTable {
    pub fn scores_for(&self, symbol: &str) -> SessionScores {
        let normalized = normalize_symbol(symbol);
        self.symbols
            .iter()
            .find(|p| p.symbol == normalized)
            .map(|p| p.scores)
            .unwrap_or(self.default)
    }
}

/// Thresholds of the pass/fail quality gates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityGates {
    /// 20-bar mean volume
    pub min_volume: f64,
    /// Current ATR over its 20-bar mean
    pub min_volatility_ratio: f64,
    pub session_start_hour: u32,
    pub session_end_hour: u32,
    pub min_confluence: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_volume: 500.0,
            min_volatility_ratio: 0.3,
            session_start_hour: 8,
            session_end_hour: 21,
            min_confluence: 50.0,
        }
    }
}

/// Additive bonus on top of the weighted factors, capped at `max_bonus`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BonusConfig {
    pub volume_accumulation: f64,
    pub structure_break: f64,
    pub full_alignment: f64,
    pub max_bonus: f64,
}

impl Default for BonusConfig {
    fn default() -> Self {
        Self {
            volume_accumulation: 0.10,
            structure_break: 0.12,
            full_alignment: 0.15,
            max_bonus: 0.10,
        }
    }
}
