// Adaptive position sizing
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::{shares_currency, OpenPosition, StrategyKind, SymbolClass, SymbolSpec};
use crate::risk::DrawdownSnapshot;

/// Risk budget of one strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StrategyLimits {
    /// Equity risked per trade, percent
    pub max_risk_pct: f64,
    /// Total risk allowed across correlated positions, percent of equity
    pub max_correlation_exposure_pct: f64,
    pub multiplier: f64,
}

const fn limits(max_risk_pct: f64, max_correlation_exposure_pct: f64, multiplier: f64) -> StrategyLimits {
    StrategyLimits {
        max_risk_pct,
        max_correlation_exposure_pct,
        multiplier,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SymbolMultipliers {
    pub forex_major: f64,
    pub jpy_cross: f64,
    pub gbp_cross: f64,
    pub metal: f64,
    pub exotic: f64,
    pub crypto: f64,
    pub energy: f64,
    pub index: f64,
}

impl Default for SymbolMultipliers {
    fn default() -> Self {
        Self {
            forex_major: 1.0,
            jpy_cross: 0.85,
            gbp_cross: 0.8,
            metal: 0.6,
            exotic: 0.75,
            crypto: 0.5,
            energy: 0.7,
            index: 0.8,
        }
    }
}

impl SymbolMultipliers {
    pub fn get(&self, class: SymbolClass) -> f64 {
        match class {
            SymbolClass::ForexMajor => self.forex_major,
            SymbolClass::JpyCross => self.jpy_cross,
            SymbolClass::GbpCross => self.gbp_cross,
            SymbolClass::Metal => self.metal,
            SymbolClass::Exotic => self.exotic,
            SymbolClass::Crypto => self.crypto,
            SymbolClass::Energy => self.energy,
            SymbolClass::Index => self.index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SizingConfig {
    pub scalping: StrategyLimits,
    pub intraday: StrategyLimits,
    pub arbitrage: StrategyLimits,
    pub hft: StrategyLimits,
    pub symbol_multipliers: SymbolMultipliers,
    /// Share of the equity-risk size in the blend; the ATR size gets the rest
    pub equity_weight: f64,
    /// ATR/price at or above which size is halved, percent
    pub high_volatility_pct: f64,
    /// ATR/price at or above which size is cut to 75%, percent
    pub elevated_volatility_pct: f64,
    /// Size reduction at the danger drawdown while recovering
    pub max_recovery_reduction: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            scalping: limits(1.0, 3.0, 0.9),
            intraday: limits(1.5, 4.0, 1.0),
            arbitrage: limits(2.0, 5.0, 1.0),
            hft: limits(0.5, 2.0, 0.75),
            symbol_multipliers: SymbolMultipliers::default(),
            equity_weight: 0.6,
            high_volatility_pct: 1.0,
            elevated_volatility_pct: 0.5,
            max_recovery_reduction: 0.5,
        }
    }
}

impl SizingConfig {
    pub fn limits(&self, strategy: StrategyKind) -> &StrategyLimits {
        match strategy {
            StrategyKind::Scalping => &self.scalping,
            StrategyKind::Intraday => &self.intraday,
            StrategyKind::Arbitrage => &self.arbitrage,
            StrategyKind::Hft => &self.hft,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SizingMethod {
    Adaptive,
    Fallback,
    Halted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SizingResult {
    pub lots: f64,
    pub bounded_by: (f64, f64),
    pub method: SizingMethod,
    pub risk_percent_realized: f64,
    pub correlation_capped: bool,
    pub reasons: Vec<String>,
}

/// Inputs for one sizing decision
#[derive(Debug, Clone, Copy)]
pub struct SizingRequest<'a> {
    pub symbol: &'a str,
    pub strategy: StrategyKind,
    pub entry: f64,
    pub stop: f64,
    pub confidence: f64,
    /// Grade position multiplier from the calibrator
    pub position_multiplier: f64,
    pub atr: f64,
    pub equity: f64,
    pub spec: &'a SymbolSpec,
    pub open_positions: &'a [OpenPosition],
    pub drawdown: &'a DrawdownSnapshot,
}

/// Round down to a multiple of `step`
fn quantize_down(lots: f64, step: f64) -> f64 {
    let steps = (lots / step + 1e-6).floor();
    ((steps * step) * 1e8).round() / 1e8
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Size a new position. Never fails: an emergency halt gives 0 lots,
    /// any other problem gives the minimum lot.
    pub fn size(&self, req: &SizingRequest<'_>) -> SizingResult {
        let spec = req.spec;
        let bounds = (spec.min_lot, spec.max_lot);

        if let Some(halt) = req.drawdown.halt_error() {
            return SizingResult {
                lots: 0.0,
                bounded_by: bounds,
                method: SizingMethod::Halted,
                risk_percent_realized: 0.0,
                correlation_capped: false,
                reasons: vec![halt.to_string()],
            };
        }

        match self.try_size(req) {
            Ok(result) => result,
            Err(e) => {
                let reason = PipelineError::SizingFallback(e.to_string());
                tracing::warn!("{} {}: {}", req.symbol, req.strategy, reason);
                let lots = spec.min_lot;
                let stop_pips = spec.to_pips((req.entry - req.stop).abs());
                let realized = if req.equity > 0.0 && stop_pips.is_finite() {
                    lots * stop_pips * spec.pip_value_per_lot / req.equity * 100.0
                } else {
                    0.0
                };
                SizingResult {
                    lots,
                    bounded_by: bounds,
                    method: SizingMethod::Fallback,
                    risk_percent_realized: realized,
                    correlation_capped: false,
                    reasons: vec![reason.to_string()],
                }
            }
        }
    }

    pub fn try_size(&self, req: &SizingRequest<'_>) -> Result<SizingResult> {
        let spec = req.spec;
        let limits = self.config.limits(req.strategy);
        let mut reasons = Vec::new();

        if !(req.equity.is_finite() && req.equity > 0.0) {
            return Err(PipelineError::MalformedInput(format!(
                "equity {} is not positive",
                req.equity
            )));
        }
        if spec.pip_value_per_lot <= 0.0 || spec.pip_size <= 0.0 || spec.lot_step <= 0.0 {
            return Err(PipelineError::MalformedInput(format!(
                "{} contract spec is incomplete",
                spec.symbol
            )));
        }
        let stop_pips = spec.to_pips((req.entry - req.stop).abs());
        if !(stop_pips.is_finite() && stop_pips > 0.0) {
            return Err(PipelineError::MalformedInput(format!(
                "stop distance {} pips",
                stop_pips
            )));
        }
        let risk_per_lot = stop_pips * spec.pip_value_per_lot;

        // 1. Equity risk
        let equity_lots =
            equity_risk_lots(req.equity, limits.max_risk_pct, stop_pips, spec.pip_value_per_lot);

        // 2. Volatility bucket
        if !req.atr.is_finite() || req.atr < 0.0 || req.entry <= 0.0 {
            return Err(PipelineError::MalformedInput(format!(
                "ATR {} at price {}",
                req.atr, req.entry
            )));
        }
        let atr_pct = req.atr / req.entry * 100.0;
        let bucket = if atr_pct >= self.config.high_volatility_pct {
            0.5
        } else if atr_pct >= self.config.elevated_volatility_pct {
            0.75
        } else {
            1.0
        };
        let atr_lots = equity_lots * bucket;

        // 3. Blend
        let weight = self.config.equity_weight.clamp(0.0, 1.0);
        let mut lots = weight * equity_lots + (1.0 - weight) * atr_lots;

        // 4. Confidence and grade
        lots *= req.confidence.clamp(0.0, 1.0) * req.position_multiplier.max(0.0);

        // 5. Strategy and symbol class
        lots *= limits.multiplier * self.config.symbol_multipliers.get(spec.class());

        // 6. Correlated exposure
        let mut correlation_capped = false;
        let existing: f64 = req
            .open_positions
            .iter()
            .filter(|p| shares_currency(&p.symbol, req.symbol))
            .map(|p| p.risk_amount.max(0.0))
            .sum();
        let cap = limits.max_correlation_exposure_pct / 100.0 * req.equity;
        let new_risk = lots * risk_per_lot;
        if new_risk > 0.0 && existing + new_risk > cap {
            let headroom = (cap - existing).max(0.0);
            lots *= headroom / new_risk;
            correlation_capped = true;
            reasons.push(format!(
                "correlation_capped: existing risk {:.2} + new {:.2} over cap {:.2}",
                existing, new_risk, cap
            ));
        }

        // 7. Recovery
        let dd = req.drawdown;
        if dd.recovery_mode && dd.danger_threshold_pct > 0.0 {
            let depth = (dd.current_drawdown_pct / dd.danger_threshold_pct).clamp(0.0, 1.0);
            let factor = 1.0 - self.config.max_recovery_reduction.clamp(0.0, 1.0) * depth;
            lots *= factor;
            reasons.push(format!("recovery mode: size x{:.2}", factor));
        }

        // 8. Broker lot rules
        let mut lots = quantize_down(lots, spec.lot_step);
        if lots < spec.min_lot {
            if correlation_capped {
                reasons.push("correlation cap below minimum lot, using minimum".to_string());
            }
            lots = spec.min_lot;
        }
        let lots = lots.min(spec.max_lot);

        Ok(SizingResult {
            lots,
            bounded_by: (spec.min_lot, spec.max_lot),
            method: SizingMethod::Adaptive,
            risk_percent_realized: lots * risk_per_lot / req.equity * 100.0,
            correlation_capped,
            reasons,
        })
    }
}

/// Lots that risk `max_risk_pct` of `equity` over `stop_pips`, before any adjustment
pub fn equity_risk_lots(equity: f64, max_risk_pct: f64, stop_pips: f64, pip_value: f64) -> f64 {
    if stop_pips <= 0.0 || pip_value <= 0.0 {
        return 0.0;
    }
    equity * max_risk_pct / 100.0 / (stop_pips * pip_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeSide;
    use chrono::Utc;

    fn spec() -> SymbolSpec {
        SymbolSpec {
            max_lot: 10.0,
            ..SymbolSpec::default_for("EURUSD")
        }
    }

    fn request<'a>(
        spec: &'a SymbolSpec,
        positions: &'a [OpenPosition],
        drawdown: &'a DrawdownSnapshot,
    ) -> SizingRequest<'a> {
        SizingRequest {
            symbol: "EURUSD",
            strategy: StrategyKind::Intraday,
            entry: 1.1000,
            stop: 1.0990,
            confidence: 1.0,
            position_multiplier: 1.0,
            atr: 0.0002,
            equity: 10_000.0,
            spec,
            open_positions: positions,
            drawdown,
        }
    }

    #[test]
    fn test_equity_risk_reference_size() {
        // 10,000 equity, 1% risk, 10 pip stop, $10/pip
        assert!((equity_risk_lots(10_000.0, 1.0, 10.0, 10.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_intraday_full_confidence() {
        let spec = spec();
        let dd = DrawdownSnapshot::flat(10_000.0);
        let result = PositionSizer::default().size(&request(&spec, &[], &dd));

        // 10 pips, 1.5% of 10k = 150 => 1.5 lots, calm ATR, multipliers 1.0
        assert_eq!(result.method, SizingMethod::Adaptive);
        assert!((result.lots - 1.5).abs() < 1e-9);
        assert!((result.risk_percent_realized - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_high_volatility_shrinks() {
        let spec = spec();
        let dd = DrawdownSnapshot::flat(10_000.0);
        let mut req = request(&spec, &[], &dd);
        req.atr = 0.0120;
        let result = PositionSizer::default().size(&req);
        // 0.6 * 1.5 + 0.4 * 0.75 = 1.2
        assert!((result.lots - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_cap_shrinks_to_headroom() {
        let spec = spec();
        let dd = DrawdownSnapshot::flat(10_000.0);
        let positions = [OpenPosition {
            ticket: 7,
            symbol: "USDJPY".to_string(),
            side: TradeSide::Buy,
            lots: 1.0,
            open_price: 150.0,
            stop_loss: Some(149.5),
            take_profit: None,
            risk_amount: 300.0,
            opened_at: Utc::now(),
            comment: String::new(),
        }];
        let result = PositionSizer::default().size(&request(&spec, &positions, &dd));

        // Cap 4% = 400, existing 300, headroom 100 => 1.0 lot
        assert!(result.correlation_capped);
        assert!((result.lots - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_recovery_depth_never_increases_size() {
        let spec = spec();
        let mut shallow = DrawdownSnapshot::flat(10_000.0);
        shallow.recovery_mode = true;
        shallow.current_drawdown_pct = 5.0;
        let mut deep = shallow.clone();
        deep.current_drawdown_pct = 15.0;

        let sizer = PositionSizer::default();
        let a = sizer.size(&request(&spec, &[], &shallow));
        let b = sizer.size(&request(&spec, &[], &deep));
        assert!(b.lots <= a.lots);
        assert!((b.lots - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_halt_is_zero_lots() {
        let spec = spec();
        let mut dd = DrawdownSnapshot::flat(10_000.0);
        dd.emergency_halt = true;
        let result = PositionSizer::default().size(&request(&spec, &[], &dd));
        assert_eq!(result.lots, 0.0);
        assert_eq!(result.method, SizingMethod::Halted);
    }

    #[test]
    fn test_bad_stop_falls_back_to_min_lot() {
        let spec = spec();
        let dd = DrawdownSnapshot::flat(10_000.0);
        let mut req = request(&spec, &[], &dd);
        req.stop = req.entry;
        let result = PositionSizer::default().size(&req);
        assert_eq!(result.method, SizingMethod::Fallback);
        assert_eq!(result.lots, spec.min_lot);
        assert!(result.reasons[0].contains("sizing fell back"));
    }

    #[test]
    fn test_quantize_rounds_down() {
        assert_eq!(quantize_down(0.129, 0.01), 0.12);
        assert_eq!(quantize_down(0.3, 0.1), 0.3);
    }
}
