use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::calibration::{CalibratedDecision, CalibrationContext, Calibrator};
use crate::config::Settings;
use crate::confluence::{ConfluenceGate, ConfluenceReport};
use crate::error::Result;
use crate::execution::{
    fetch_with_retry, ExecutionAction, ExecutionReport, Executor, Gateway, OrderPlan,
    RetryPolicy, TrailingHandle,
};
use crate::indicators::{compute, volatility_ratio, IndicatorConfig};
use crate::models::{normalize_symbol, Signal, StrategyKind};
use crate::risk::SharedDrawdown;
use crate::sizing::{PositionSizer, SizingRequest, SizingResult};
use crate::strategy::{build_strategy, StrategyConfig};

/// Source of the news-window pause flag
pub trait NewsFilter: Send + Sync {
    fn should_pause(&self, symbol: &str, now: DateTime<Utc>) -> bool;
}

/// Never pauses
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNewsFilter;

impl NewsFilter for NoNewsFilter {
    fn should_pause(&self, _symbol: &str, _now: DateTime<Utc>) -> bool {
        false
    }
}

impl<F> NewsFilter for F
where
    F: Fn(&str, DateTime<Utc>) -> bool + Send + Sync,
{
    fn should_pause(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self(symbol, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// Order filled
    Executed,
    /// Some stage said no
    Rejected,
    /// News window
    Paused,
    /// Symbol already has an open position
    Skipped,
}

/// Report of one decision cycle, for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub cycle_id: Uuid,
    pub symbol: String,
    pub strategy: StrategyKind,
    pub started_at: DateTime<Utc>,
    pub status: CycleStatus,
    pub signal: Option<Signal>,
    pub confluence: Option<ConfluenceReport>,
    pub decision: Option<CalibratedDecision>,
    pub plan: Option<OrderPlan>,
    pub sizing: Option<SizingResult>,
    pub execution: Option<ExecutionReport>,
    pub reasons: Vec<String>,
}

impl CycleOutcome {
    fn new(symbol: &str, strategy: StrategyKind, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            strategy,
            started_at,
            status: CycleStatus::Rejected,
            signal: None,
            confluence: None,
            decision: None,
            plan: None,
            sizing: None,
            execution: None,
            reasons: Vec::new(),
        }
    }

    fn finish(mut self, status: CycleStatus, reasons: Vec<String>, fallback: &str) -> Self {
        self.status = status;
        self.reasons = reasons;
        if self.reasons.is_empty() {
            self.reasons.push(fallback.to_string());
        }
        self
    }

    fn reject(self, reasons: Vec<String>, fallback: &str) -> Self {
        self.finish(CycleStatus::Rejected, reasons, fallback)
    }

    pub fn is_executed(&self) -> bool {
        self.status == CycleStatus::Executed
    }
}

/// One decision cycle: bars to indicators to signal to confluence to
/// calibration to sizing to order routing.
pub struct Pipeline {
    gateway: Arc<dyn Gateway>,
    retry: RetryPolicy,
    indicators: IndicatorConfig,
    strategies: StrategyConfig,
    confluence: ConfluenceGate,
    calibrator: Calibrator,
    sizer: PositionSizer,
    drawdown: SharedDrawdown,
    executor: Executor,
    news: Arc<dyn NewsFilter>,
}

impl Pipeline {
    pub fn new(gateway: Arc<dyn Gateway>, settings: &Settings, drawdown: SharedDrawdown) -> Self {
        Self {
            gateway: gateway.clone(),
            retry: settings.retry.clone(),
            indicators: settings.indicators.clone(),
            strategies: settings.strategy.clone(),
            confluence: ConfluenceGate::new(
                settings.confluence.clone(),
                settings.indicators.clone(),
                settings.retry.clone(),
            ),
            calibrator: Calibrator::new(settings.calibration.clone()),
            sizer: PositionSizer::new(settings.sizing.clone()),
            drawdown,
            executor: Executor::new(gateway, settings.retry.clone()),
            news: Arc::new(NoNewsFilter),
        }
    }

    /// Hand every fill to the trailing supervisor behind `handle`
    pub fn with_trailing(mut self, handle: TrailingHandle, settings: &Settings) -> Self {
        self.executor = self.executor.with_trailing(handle, settings.trailing.clone());
        self
    }

    pub fn with_news_filter(mut self, news: Arc<dyn NewsFilter>) -> Self {
        self.news = news;
        self
    }

    /// Run one cycle for `symbol` with `strategy`.
    ///
    /// Only an exhausted gateway and an emergency halt come back as `Err`;
    /// every other outcome is an `Ok` report with its reasons.
    pub async fn run_cycle(&self, symbol: &str, strategy: StrategyKind) -> Result<CycleOutcome> {
        let now = Utc::now();
        let mut outcome = CycleOutcome::new(symbol, strategy, now);
        let cycle_id = outcome.cycle_id.to_string();

        // Emergency latch first, before touching the gateway
        let drawdown = self.drawdown.read().await.snapshot();
        if let Some(halt) = drawdown.halt_error() {
            tracing::error!("🛑 [{}] {} {}: {}", cycle_id, symbol, strategy, halt);
            return Err(halt);
        }

        if self.news.should_pause(symbol, now) {
            tracing::info!("📰 [{}] {} paused for news", cycle_id, symbol);
            return Ok(outcome.finish(
                CycleStatus::Paused,
                vec!["news window: new entries paused".to_string()],
                "news window",
            ));
        }

        let gateway = self.gateway.as_ref();
        let retry = &self.retry;

        let positions =
            fetch_with_retry(retry, "open_positions", move || gateway.open_positions()).await?;
        let wanted = normalize_symbol(symbol);
        if let Some(open) = positions
            .iter()
            .find(|p| normalize_symbol(&p.symbol) == wanted)
        {
            return Ok(outcome.finish(
                CycleStatus::Skipped,
                vec![format!("position {} already open on {}", open.ticket, symbol)],
                "position already open",
            ));
        }

        // ====================================================================
        // Market data
        // ====================================================================

        let timeframe = strategy.primary_timeframe();
        let count = self.confluence.config().bars_per_timeframe;
        let bars =
            fetch_with_retry(retry, "bars", move || gateway.bars(symbol, timeframe, count)).await?;
        let quote = fetch_with_retry(retry, "quote", move || gateway.quote(symbol)).await?;
        let spec = fetch_with_retry(retry, "symbol_spec", move || gateway.symbol_spec(symbol)).await?;
        let account = fetch_with_retry(retry, "account", move || gateway.account()).await?;

        // Strategy drawdown limits, loss streak and volatility spike
        let spike = volatility_ratio(&bars, self.indicators.atr_period);
        let entry_multiplier = match self
            .drawdown
            .read()
            .await
            .check_trading_allowed(strategy, spike)
        {
            Ok(multiplier) => multiplier,
            Err(block) => {
                tracing::warn!("🛡️  [{}] {} {} blocked: {}", cycle_id, symbol, strategy, block);
                return Ok(outcome.reject(vec![block.to_string()], "drawdown check blocked"));
            }
        };

        let frame = match compute(&bars, &self.indicators) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("[{}] {} {} frame: {}", cycle_id, symbol, timeframe, e);
                return Ok(outcome.reject(vec![e.to_string()], "indicator frame unavailable"));
            }
        };

        // ====================================================================
        // Signal, confluence, calibration
        // ====================================================================

        let signal = build_strategy(strategy, &self.strategies).generate(&frame, &quote);
        outcome.signal = Some(signal.clone());
        if !signal.is_actionable() {
            return Ok(outcome.reject(signal.reasons, "no signal"));
        }

        let confluence = self
            .confluence
            .evaluate(gateway, symbol, strategy, signal.direction)
            .await;
        outcome.confluence = Some(confluence.clone());
        if !confluence.allowed {
            tracing::info!(
                "🚫 [{}] {} {} {} vetoed by confluence ({:.1} < {:.1})",
                cycle_id,
                symbol,
                strategy,
                signal.direction,
                confluence.score,
                confluence.min_score
            );
            return Ok(outcome.reject(confluence.reasons, "confluence below minimum"));
        }

        let ctx = CalibrationContext {
            frame: &frame,
            quote: &quote,
            confluence: &confluence,
            spec: &spec,
            drawdown: &drawdown,
            open_positions: &positions,
            now,
        };
        let decision = self.calibrator.calibrate(symbol, &signal, &ctx);
        outcome.decision = Some(decision.clone());
        let side = match decision.direction.side() {
            Some(side) if decision.is_tradeable() => side,
            _ => return Ok(outcome.reject(decision.rejection_reasons, "calibration rejected")),
        };

        // ====================================================================
        // Sizing and routing
        // ====================================================================

        let plan = OrderPlan::build(
            strategy,
            side,
            &quote,
            &spec,
            decision.tp_multiplier,
            decision.sl_multiplier,
        );
        let atr = frame.row_back(0).map(|row| row.atr).unwrap_or(0.0);
        let sizing = self.sizer.size(&SizingRequest {
            symbol,
            strategy,
            entry: plan.entry,
            stop: plan.stop_loss,
            confidence: decision.calibrated_confidence,
            position_multiplier: decision.position_multiplier * entry_multiplier,
            atr,
            equity: account.equity,
            spec: &spec,
            open_positions: &positions,
            drawdown: &drawdown,
        });
        outcome.plan = Some(plan.clone());
        outcome.sizing = Some(sizing.clone());

        let execution = self.executor.decide(&sizing);
        let lots = match execution.action {
            ExecutionAction::Execute { lots } => lots,
            ExecutionAction::Skip => {
                return Ok(outcome.reject(vec![execution.reason], "sizing returned no lots"))
            }
        };

        tracing::info!(
            "📈 [{}] {} {} {} grade {} conf {:.3}: {}",
            cycle_id,
            symbol,
            strategy,
            signal.direction,
            decision.grade,
            decision.calibrated_confidence,
            execution.reason
        );

        let report = self.executor.execute(&plan, lots, &spec, &cycle_id).await?;
        outcome.execution = Some(report.clone());
        match report {
            ExecutionReport::Filled { notes, .. } => {
                for note in &notes {
                    tracing::warn!("⚠️  [{}] {}: {}", cycle_id, symbol, note);
                }
                let mut reasons = sizing.reasons;
                if entry_multiplier < 1.0 {
                    reasons.push(format!("loss streak: lots scaled by {:.2}", entry_multiplier));
                }
                reasons.extend(notes);
                Ok(outcome.finish(CycleStatus::Executed, reasons, "filled"))
            }
            ExecutionReport::Rejected { reason } => {
                Ok(outcome.reject(vec![reason], "order rejected"))
            }
        }
    }

    /// Whether the drawdown latch currently blocks new entries
    pub async fn is_halted(&self) -> bool {
        self.drawdown.read().await.is_halted()
    }
}
