// Signal optimizer: calibrated confidence, quality gates and grading
pub mod factors;
pub mod gates;
pub mod tables;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confluence::ConfluenceReport;
use crate::error::PipelineError;
use crate::indicators::IndicatorFrame;
use crate::models::{Direction, OpenPosition, Quote, Signal, StrategyKind, SymbolSpec};
use crate::risk::DrawdownSnapshot;

pub use factors::FactorScores;
pub use gates::GateResult;
pub use tables::{
    BonusConfig, FactorWeights, Grade, GradeMultipliers, GradeTable, GradeThresholds,
    QualityGates, Session, SessionTable, SpreadLimits, ThresholdTable,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    pub weights: FactorWeights,
    pub thresholds: ThresholdTable,
    pub grades: GradeTable,
    pub gates: QualityGates,
    pub spread_limits: SpreadLimits,
    pub sessions: SessionTable,
    pub bonus: BonusConfig,
    pub confidence_cap: f64,
    /// Score used for a sub-factor that could not be computed
    pub factor_fallback: f64,
    /// Added to every grade cut-off in recovery mode
    pub recovery_threshold_boost: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            thresholds: ThresholdTable::default(),
            grades: GradeTable::default(),
            gates: QualityGates::default(),
            spread_limits: SpreadLimits::default(),
            sessions: SessionTable::default(),
            bonus: BonusConfig::default(),
            confidence_cap: 0.95,
            factor_fallback: 0.3,
            recovery_threshold_boost: 0.03,
        }
    }
}

/// Everything the calibrator reads besides the signal
#[derive(Debug, Clone, Copy)]
pub struct CalibrationContext<'a> {
    pub frame: &'a IndicatorFrame,
    pub quote: &'a Quote,
    pub confluence: &'a ConfluenceReport,
    pub spec: &'a SymbolSpec,
    pub drawdown: &'a DrawdownSnapshot,
    pub open_positions: &'a [OpenPosition],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibratedDecision {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub direction: Direction,
    pub calibrated_confidence: f64,
    pub grade: Grade,
    pub position_multiplier: f64,
    pub tp_multiplier: f64,
    pub sl_multiplier: f64,
    pub rejection_reasons: Vec<String>,
    pub factors: FactorScores,
    pub bonus: f64,
    pub failed_gates: Vec<String>,
    /// Sub-factors that fell back, with the cause
    pub degraded: Vec<String>,
}

impl CalibratedDecision {
    pub fn is_tradeable(&self) -> bool {
        self.direction != Direction::None && self.grade != Grade::F
    }
}

/// Turns a raw strategy vote into a graded, sized-for-risk decision.
///
/// Never fails: any problem degrades a factor or yields grade F.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn calibrate(
        &self,
        symbol: &str,
        signal: &Signal,
        ctx: &CalibrationContext<'_>,
    ) -> CalibratedDecision {
        let config = &self.config;
        let strategy = signal.strategy;
        let direction = signal.direction;
        let f_multipliers = config.grades.get(Grade::F);

        let mut decision = CalibratedDecision {
            symbol: symbol.to_string(),
            strategy,
            direction: Direction::None,
            calibrated_confidence: 0.0,
            grade: Grade::F,
            position_multiplier: f_multipliers.position,
            tp_multiplier: f_multipliers.take_profit,
            sl_multiplier: f_multipliers.stop_loss,
            rejection_reasons: Vec::new(),
            factors: FactorScores::default(),
            bonus: 0.0,
            failed_gates: Vec::new(),
            degraded: Vec::new(),
        };

        if direction == Direction::None {
            decision.rejection_reasons.push("no signal".to_string());
            decision
                .rejection_reasons
                .extend(signal.reasons.iter().cloned());
            return decision;
        }

        // ============================================================
        // Sub-factors
        // ============================================================
        let spread_pips = ctx.spec.to_pips(ctx.quote.spread());
        let spread_limit = config.spread_limits.limit_pips(ctx.spec.class());
        let mut degraded = Vec::new();
        let mut settle = |name: &str, result: crate::error::Result<f64>| match result {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("{} factor fell back: {}", name, e);
                degraded.push(format!("{}: {}", name, e));
                config.factor_fallback
            }
        };

        let scores = FactorScores {
            technical: settle("technical", factors::technical(signal, ctx.confluence.score)),
            volume: settle("volume", factors::volume(ctx.frame)),
            structure: settle("structure", factors::structure(ctx.frame, direction)),
            momentum: settle("momentum", factors::momentum(ctx.frame, direction)),
            session: factors::session(symbol, ctx.now, &config.sessions),
            correlation: factors::correlation(symbol, direction, ctx.open_positions),
            risk: settle(
                "risk",
                factors::risk(spread_pips, spread_limit, ctx.drawdown.risk_level),
            ),
        };
        decision.degraded = degraded;
        decision.factors = scores;

        // ============================================================
        // Bonus and cap
        // ============================================================
        let bonus_cfg = &config.bonus;
        let mut bonus = 0.0;
        if factors::volume_ratio(ctx.frame).is_ok_and(|r| r > 1.5) {
            bonus += bonus_cfg.volume_accumulation;
        }
        if scores.structure >= factors::STRUCTURE_BREAK {
            bonus += bonus_cfg.structure_break;
        }
        if ctx.confluence.fully_aligned() {
            bonus += bonus_cfg.full_alignment;
        }
        decision.bonus = bonus.min(bonus_cfg.max_bonus);

        let confidence = (scores.weighted(&config.weights) + decision.bonus)
            .min(config.confidence_cap)
            .clamp(0.0, 1.0);
        decision.calibrated_confidence = confidence;

        // ============================================================
        // Quality gates
        // ============================================================
        let results = gates::evaluate(
            ctx.frame,
            ctx.quote,
            ctx.spec,
            ctx.confluence.score,
            ctx.now,
            &config.gates,
            &config.spread_limits,
        );
        let failed: Vec<&GateResult> = results.iter().filter(|r| !r.passed).collect();
        if !failed.is_empty() {
            decision.failed_gates = failed.iter().map(|r| r.name.to_string()).collect();
            decision
                .rejection_reasons
                .push(PipelineError::QualityGateFailed(decision.failed_gates.clone()).to_string());
            decision
                .rejection_reasons
                .extend(failed.iter().map(|r| format!("{}: {}", r.name, r.detail)));
            return decision;
        }

        // ============================================================
        // Grading
        // ============================================================
        let boost = if ctx.drawdown.recovery_mode {
            config.recovery_threshold_boost
        } else {
            0.0
        };
        let thresholds = config.thresholds.get(strategy);
        let grade = thresholds.grade(confidence, boost);
        if grade == Grade::F {
            decision.rejection_reasons.push(
                PipelineError::ThresholdNotMet {
                    confidence,
                    minimum: thresholds.minimum + boost,
                }
                .to_string(),
            );
            return decision;
        }

        let multipliers = config.grades.get(grade);
        decision.direction = direction;
        decision.grade = grade;
        decision.position_multiplier = multipliers.position;
        decision.tp_multiplier = multipliers.take_profit;
        decision.sl_multiplier = multipliers.stop_loss;
        decision
    }
}
