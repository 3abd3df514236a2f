use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

use super::tables::{QualityGates, SpreadLimits};
use crate::indicators::IndicatorFrame;
use crate::models::{Quote, SymbolSpec};

/// Outcome of one pass/fail gate
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GateResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl GateResult {
    fn check(name: &'static str, passed: bool, detail: String) -> Self {
        Self {
            name,
            passed,
            detail,
        }
    }
}

/// Current ATR over the mean of the last `window` ATR values
pub fn volatility_ratio(frame: &IndicatorFrame, window: usize) -> Option<f64> {
    let rows = frame.rows();
    let n = rows.len();
    if n == 0 || window == 0 {
        return None;
    }
    let recent = &rows[n.saturating_sub(window)..];
    let mean = recent.iter().map(|r| r.atr).sum::<f64>() / recent.len() as f64;
    if mean > 0.0 {
        Some(rows[n - 1].atr / mean)
    } else {
        None
    }
}

/// Evaluate every gate, in order: volume, spread, volatility, session, confluence
pub fn evaluate(
    frame: &IndicatorFrame,
    quote: &Quote,
    spec: &SymbolSpec,
    confluence_score: f64,
    now: DateTime<Utc>,
    gates: &QualityGates,
    spread_limits: &SpreadLimits,
) -> Vec<GateResult> {
    let mut results = Vec::with_capacity(5);

    let volume_ma = frame.row_back(0).map(|r| r.volume_ma).unwrap_or(0.0);
    results.push(GateResult::check(
        "volume",
        volume_ma >= gates.min_volume,
        format!("average volume {:.0} (min {:.0})", volume_ma, gates.min_volume),
    ));

    let spread_pips = spec.to_pips(quote.spread());
    let limit = spread_limits.limit_pips(spec.class());
    results.push(GateResult::check(
        "spread",
        quote.is_valid() && spread_pips <= limit,
        format!("spread {:.1} pips (max {:.1})", spread_pips, limit),
    ));

    let ratio = volatility_ratio(frame, 20);
    results.push(GateResult::check(
        "volatility",
        ratio.is_some_and(|r| r >= gates.min_volatility_ratio),
        match ratio {
            Some(r) => format!("ATR ratio {:.2} (min {:.2})", r, gates.min_volatility_ratio),
            None => "no measurable volatility".to_string(),
        },
    ));

    let hour = now.hour();
    results.push(GateResult::check(
        "session",
        gates.session_start_hour <= hour && hour < gates.session_end_hour,
        format!(
            "{:02}:00 UTC (window {:02}:00-{:02}:00)",
            hour, gates.session_start_hour, gates.session_end_hour
        ),
    ));

    results.push(GateResult::check(
        "confluence",
        confluence_score >= gates.min_confluence,
        format!(
            "confluence {:.1} (min {:.1})",
            confluence_score, gates.min_confluence
        ),
    ));

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::*;
    use chrono::TimeZone;

    fn zigzag(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 1.1000 + if i % 2 == 0 { 0.0004 } else { -0.0004 })
            .collect()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_all_gates_pass_in_session() {
        let frame = frame_from_closes(&zigzag(60));
        let spec = SymbolSpec::default_for("EURUSD");
        let results = evaluate(
            &frame,
            &quote_at(1.1),
            &spec,
            70.0,
            at(10),
            &QualityGates::default(),
            &SpreadLimits::default(),
        );

        let names: Vec<_> = results.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["volume", "spread", "volatility", "session", "confluence"]
        );
        assert!(results.iter().all(|r| r.passed), "{:?}", results);
    }

    #[test]
    fn test_flat_market_fails_volatility() {
        let frame = flat_frame(1.1, 60);
        let spec = SymbolSpec::default_for("EURUSD");
        let results = evaluate(
            &frame,
            &quote_at(1.1),
            &spec,
            70.0,
            at(22),
            &QualityGates::default(),
            &SpreadLimits::default(),
        );

        let failed: Vec<_> = results.iter().filter(|r| !r.passed).map(|r| r.name).collect();
        assert_eq!(failed, vec!["volatility", "session"]);
    }

    #[test]
    fn test_wide_spread_fails() {
        let frame = frame_from_closes(&zigzag(60));
        let spec = SymbolSpec::default_for("EURUSD");
        let mut quote = quote_at(1.1);
        quote.ask = quote.bid + 0.0005;
        let results = evaluate(
            &frame,
            &quote,
            &spec,
            70.0,
            at(10),
            &QualityGates::default(),
            &SpreadLimits::default(),
        );
        assert!(!results[1].passed);
    }
}
