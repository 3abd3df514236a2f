// Multi-timeframe confluence gate
pub mod score;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::execution::gateway::{fetch_with_retry, Gateway, RetryPolicy};
use crate::indicators::{compute, IndicatorConfig};
use crate::models::{Direction, StrategyKind, Timeframe};

pub use score::{
    aggregate, read_trend, trend_score, Bias, ConfluenceReport, TimeframeEntry, TimeframeOutcome,
    TimeframeReading,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeframeWeight {
    pub timeframe: Timeframe,
    pub weight: f64,
}

const fn tw(timeframe: Timeframe, weight: f64) -> TimeframeWeight {
    TimeframeWeight { timeframe, weight }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub min_score: f64,
    pub bars_per_timeframe: usize,
    /// |trend score| needed for a directional bias
    pub bias_threshold: i32,
    pub scalping: Vec<TimeframeWeight>,
    pub intraday: Vec<TimeframeWeight>,
    pub arbitrage: Vec<TimeframeWeight>,
    pub hft: Vec<TimeframeWeight>,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            min_score: 65.0,
            bars_per_timeframe: 100,
            bias_threshold: 3,
            // Longer timeframe, higher weight
            scalping: vec![
                tw(Timeframe::M1, 1.0),
                tw(Timeframe::M5, 2.0),
                tw(Timeframe::M15, 3.0),
            ],
            intraday: vec![
                tw(Timeframe::M5, 1.5),
                tw(Timeframe::M15, 2.5),
                tw(Timeframe::H1, 3.0),
            ],
            arbitrage: vec![tw(Timeframe::M1, 2.0), tw(Timeframe::M5, 3.0)],
            hft: vec![tw(Timeframe::M1, 3.0)],
        }
    }
}

impl ConfluenceConfig {
    pub fn timeframes(&self, strategy: StrategyKind) -> &[TimeframeWeight] {
        match strategy {
            StrategyKind::Scalping => &self.scalping,
            StrategyKind::Intraday => &self.intraday,
            StrategyKind::Arbitrage => &self.arbitrage,
            StrategyKind::Hft => &self.hft,
        }
    }
}

/// Fetches each configured timeframe and scores agreement with a candidate direction
#[derive(Debug, Clone)]
pub struct ConfluenceGate {
    config: ConfluenceConfig,
    indicators: IndicatorConfig,
    retry: RetryPolicy,
}

impl ConfluenceGate {
    pub fn new(config: ConfluenceConfig, indicators: IndicatorConfig, retry: RetryPolicy) -> Self {
        Self {
            config,
            indicators,
            retry,
        }
    }

    pub fn config(&self) -> &ConfluenceConfig {
        &self.config
    }

    /// Never fails: a timeframe that cannot be analysed is skipped, and if
    /// none can be the report is rejected with `NoData`.
    pub async fn evaluate(
        &self,
        gateway: &dyn Gateway,
        symbol: &str,
        strategy: StrategyKind,
        direction: Direction,
    ) -> ConfluenceReport {
        let mut per_timeframe = BTreeMap::new();

        for &TimeframeWeight { timeframe, weight } in self.config.timeframes(strategy) {
            let outcome = self.analyse(gateway, symbol, timeframe).await;
            if let TimeframeOutcome::Skipped { reason } = &outcome {
                tracing::debug!("{} {} confluence skipped: {}", symbol, timeframe, reason);
            }
            per_timeframe.insert(timeframe, TimeframeEntry { weight, outcome });
        }

        let report = aggregate(direction, per_timeframe, self.config.min_score);
        tracing::debug!(
            "{} {} confluence {:.1} (allowed: {})",
            symbol,
            strategy,
            report.score,
            report.allowed
        );
        report
    }

    async fn analyse(
        &self,
        gateway: &dyn Gateway,
        symbol: &str,
        timeframe: Timeframe,
    ) -> TimeframeOutcome {
        let count = self.config.bars_per_timeframe;
        let bars = match fetch_with_retry(&self.retry, "confluence bars", move || {
            gateway.bars(symbol, timeframe, count)
        })
        .await
        {
            Ok(bars) => bars,
            Err(e) => {
                return TimeframeOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        match compute(&bars, &self.indicators) {
            Ok(frame) => {
                TimeframeOutcome::Reading(read_trend(&frame, self.config.bias_threshold))
            }
            Err(e) => TimeframeOutcome::Skipped {
                reason: e.to_string(),
            },
        }
    }
}
