use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PipelineError;
use crate::models::StrategyKind;

/// Drawdown severity, from peak-to-current equity loss
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Normal,
    Warning,
    Caution,
    Danger,
    Emergency,
}

impl RiskLevel {
    /// Contribution of the risk level to the calibrator's risk factor
    pub fn factor(&self) -> f64 {
        match self {
            RiskLevel::Normal => 1.0,
            RiskLevel::Warning => 0.8,
            RiskLevel::Caution => 0.6,
            RiskLevel::Danger => 0.4,
            RiskLevel::Emergency => 0.0,
        }
    }
}

/// Drawdown percentages at which each risk level starts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DrawdownThresholds {
    pub warning: f64,
    pub caution: f64,
    pub danger: f64,
    pub emergency: f64,
}

impl Default for DrawdownThresholds {
    fn default() -> Self {
        Self {
            warning: 5.0,    // 5% below peak
            caution: 10.0,   // enters recovery mode
            danger: 15.0,    // recovery size reduction maxes out
            emergency: 20.0, // halts new entries until reset
        }
    }
}

impl DrawdownThresholds {
    pub fn is_ordered(&self) -> bool {
        0.0 < self.warning
            && self.warning < self.caution
            && self.caution < self.danger
            && self.danger < self.emergency
    }
}

/// Per-strategy entry limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyLimits {
    /// Loss from the day's opening equity that blocks entries, percent
    pub daily_limit_pct: f64,
    /// Loss from the week's opening equity that blocks entries, percent
    pub weekly_limit_pct: f64,
    pub max_consecutive_losses: u32,
    /// Lots are divided by this while a loss streak is running
    pub recovery_multiplier: f64,
}

impl StrategyLimits {
    fn new(daily: f64, weekly: f64, losses: u32, multiplier: f64) -> Self {
        Self {
            daily_limit_pct: daily,
            weekly_limit_pct: weekly,
            max_consecutive_losses: losses,
            recovery_multiplier: multiplier,
        }
    }

    pub fn is_valid(&self) -> bool {
        0.0 < self.daily_limit_pct
            && self.daily_limit_pct <= self.weekly_limit_pct
            && self.max_consecutive_losses > 0
            && self.recovery_multiplier >= 1.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyLimitTable {
    pub scalping: StrategyLimits,
    pub intraday: StrategyLimits,
    pub arbitrage: StrategyLimits,
    pub hft: StrategyLimits,
}

impl Default for StrategyLimitTable {
    fn default() -> Self {
        Self {
            scalping: StrategyLimits::new(5.0, 10.0, 5, 1.5),
            intraday: StrategyLimits::new(8.0, 15.0, 4, 1.3),
            arbitrage: StrategyLimits::new(10.0, 20.0, 3, 1.2),
            // Many small trades: tight loss limits, long streak allowance
            hft: StrategyLimits::new(3.0, 6.0, 8, 2.0),
        }
    }
}

impl StrategyLimitTable {
    pub fn get(&self, kind: StrategyKind) -> &StrategyLimits {
        match kind {
            StrategyKind::Scalping => &self.scalping,
            StrategyKind::Intraday => &self.intraday,
            StrategyKind::Arbitrage => &self.arbitrage,
            StrategyKind::Hft => &self.hft,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub thresholds: DrawdownThresholds,
    /// Gain over recovery start equity that ends recovery, percent
    pub recovery_target_pct: f64,
    pub max_recovery_days: i64,
    pub strategy_limits: StrategyLimitTable,
    /// Recent ATR over baseline ATR at which entries stop
    pub volatility_spike_multiplier: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            thresholds: DrawdownThresholds::default(),
            recovery_target_pct: 5.0,
            max_recovery_days: 7,
            strategy_limits: StrategyLimitTable::default(),
            volatility_spike_multiplier: 3.0,
        }
    }
}

/// Why [`DrawdownManager::check_trading_allowed`] refused a new entry
#[derive(Debug, Clone, Error, Serialize, PartialEq)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum TradingBlock {
    #[error("daily drawdown {drawdown_pct:.2}% reached the {limit_pct:.2}% {strategy} limit")]
    DailyLimit {
        strategy: StrategyKind,
        drawdown_pct: f64,
        limit_pct: f64,
    },

    #[error("weekly drawdown {drawdown_pct:.2}% reached the {limit_pct:.2}% {strategy} limit")]
    WeeklyLimit {
        strategy: StrategyKind,
        drawdown_pct: f64,
        limit_pct: f64,
    },

    #[error("{losses} consecutive losses reached the {strategy} limit of {limit}")]
    LossStreak {
        strategy: StrategyKind,
        losses: u32,
        limit: u32,
    },

    #[error("volatility spike: recent ATR is {ratio:.1}x normal (limit {limit:.1}x)")]
    VolatilitySpike { ratio: f64, limit: f64 },
}

/// Classify a drawdown percentage
pub fn risk_level(drawdown_pct: f64, thresholds: &DrawdownThresholds) -> RiskLevel {
    if drawdown_pct >= thresholds.emergency {
        RiskLevel::Emergency
    } else if drawdown_pct >= thresholds.danger {
        RiskLevel::Danger
    } else if drawdown_pct >= thresholds.caution {
        RiskLevel::Caution
    } else if drawdown_pct >= thresholds.warning {
        RiskLevel::Warning
    } else {
        RiskLevel::Normal
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecoveryState {
    Normal,
    Recovery,
}

/// State transitions reported by [`DrawdownManager::update_equity`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DrawdownEvent {
    RiskLevelChanged { from: RiskLevel, to: RiskLevel },
    RecoveryStarted { drawdown_pct: f64, start_equity: f64 },
    RecoveryCompleted { equity: f64, gain_pct: f64 },
    RecoveryForcedExit { days: i64 },
    EmergencyHalt { drawdown_pct: f64 },
}

impl DrawdownEvent {
    /// The error form of events that callers must surface distinctly
    pub fn as_error(&self, thresholds: &DrawdownThresholds) -> Option<PipelineError> {
        match self {
            DrawdownEvent::RecoveryForcedExit { days } => {
                Some(PipelineError::RecoveryForcedExit { days: *days })
            }
            DrawdownEvent::EmergencyHalt { drawdown_pct } => Some(PipelineError::EmergencyHalt {
                drawdown_pct: *drawdown_pct,
                threshold_pct: thresholds.emergency,
            }),
            _ => None,
        }
    }
}

/// Read-only view handed to the sizer and calibrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawdownSnapshot {
    pub peak_equity: f64,
    pub current_equity: f64,
    pub current_drawdown_pct: f64,
    pub recovery_mode: bool,
    pub recovery_start_equity: Option<f64>,
    pub recovery_start_time: Option<DateTime<Utc>>,
    pub emergency_halt: bool,
    /// Drawdown at which recovery size reduction is at its maximum
    pub danger_threshold_pct: f64,
    pub emergency_threshold_pct: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub daily_drawdown_pct: f64,
    #[serde(default)]
    pub weekly_drawdown_pct: f64,
    #[serde(default)]
    pub loss_streak: u32,
}

impl DrawdownSnapshot {
    /// Snapshot of a fresh account with no drawdown
    pub fn flat(equity: f64) -> Self {
        Self {
            peak_equity: equity,
            current_equity: equity,
            current_drawdown_pct: 0.0,
            recovery_mode: false,
            recovery_start_equity: None,
            recovery_start_time: None,
            emergency_halt: false,
            danger_threshold_pct: DrawdownThresholds::default().danger,
            emergency_threshold_pct: DrawdownThresholds::default().emergency,
            risk_level: RiskLevel::Normal,
            daily_drawdown_pct: 0.0,
            weekly_drawdown_pct: 0.0,
            loss_streak: 0,
        }
    }

    pub fn halt_error(&self) -> Option<PipelineError> {
        self.emergency_halt.then(|| PipelineError::EmergencyHalt {
            drawdown_pct: self.current_drawdown_pct,
            threshold_pct: self.emergency_threshold_pct,
        })
    }
}

/// Tracks equity against its running peak and drives recovery mode.
///
/// The only writer of drawdown state. Share it as `Arc<RwLock<_>>` and hand
/// readers a [`DrawdownSnapshot`].
#[derive(Debug, Clone)]
pub struct DrawdownManager {
    config: RecoveryConfig,
    peak_equity: f64,
    current_equity: f64,
    drawdown_pct: f64,
    state: RecoveryState,
    recovery_start_equity: Option<f64>,
    recovery_start_time: Option<DateTime<Utc>>,
    emergency_halt: bool,
    risk_level: RiskLevel,
    // Set by a forced exit, cleared once drawdown drops below caution
    rearm_pending: bool,
    // Equity at the first sample of the current UTC day and ISO week
    day_open: Option<(NaiveDate, f64)>,
    week_open: Option<((i32, u32), f64)>,
    loss_streak: u32,
    last_balance: Option<f64>,
}

fn loss_from(open: f64, equity: f64) -> f64 {
    if open > 0.0 {
        ((open - equity) / open * 100.0).max(0.0)
    } else {
        0.0
    }
}

impl DrawdownManager {
    pub fn new(config: RecoveryConfig, initial_equity: f64) -> Self {
        Self {
            config,
            peak_equity: initial_equity,
            current_equity: initial_equity,
            drawdown_pct: 0.0,
            state: RecoveryState::Normal,
            recovery_start_equity: None,
            recovery_start_time: None,
            emergency_halt: false,
            risk_level: RiskLevel::Normal,
            rearm_pending: false,
            day_open: None,
            week_open: None,
            loss_streak: 0,
            last_balance: None,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.emergency_halt
    }

    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }

    /// Loss from the day's opening equity, percent
    pub fn daily_drawdown_pct(&self) -> f64 {
        self.day_open
            .map_or(0.0, |(_, open)| loss_from(open, self.current_equity))
    }

    /// Loss from the week's opening equity, percent
    pub fn weekly_drawdown_pct(&self) -> f64 {
        self.week_open
            .map_or(0.0, |(_, open)| loss_from(open, self.current_equity))
    }

    /// Count a closed trade toward the loss streak. Breakeven ends a streak.
    pub fn record_trade_result(&mut self, pnl: f64) {
        if !pnl.is_finite() {
            return;
        }
        if pnl < 0.0 {
            self.loss_streak += 1;
            tracing::info!("📉 Loss recorded: {:.2} (streak {})", pnl, self.loss_streak);
        } else {
            if self.loss_streak > 0 {
                tracing::info!("🔄 Loss streak broken after {} losses", self.loss_streak);
            }
            self.loss_streak = 0;
            tracing::debug!("📈 Profit recorded: {:.2}", pnl);
        }
    }

    /// Feed the account balance. Realized P&L shows up as a balance change,
    /// which is recorded as one trade result.
    pub fn update_balance(&mut self, balance: f64) {
        if !balance.is_finite() {
            return;
        }
        if let Some(last) = self.last_balance {
            let pnl = balance - last;
            if pnl.abs() > 1e-9 {
                self.record_trade_result(pnl);
            }
        }
        self.last_balance = Some(balance);
    }

    /// Whether `strategy` may open a position now.
    ///
    /// `volatility_ratio` is recent over baseline ATR for the symbol, when
    /// known. `Ok` carries the lot multiplier, below 1 during a loss streak.
    pub fn check_trading_allowed(
        &self,
        strategy: StrategyKind,
        volatility_ratio: Option<f64>,
    ) -> Result<f64, TradingBlock> {
        let limits = self.config.strategy_limits.get(strategy);

        let daily = self.daily_drawdown_pct();
        if daily >= limits.daily_limit_pct {
            return Err(TradingBlock::DailyLimit {
                strategy,
                drawdown_pct: daily,
                limit_pct: limits.daily_limit_pct,
            });
        }

        let weekly = self.weekly_drawdown_pct();
        if weekly >= limits.weekly_limit_pct {
            return Err(TradingBlock::WeeklyLimit {
                strategy,
                drawdown_pct: weekly,
                limit_pct: limits.weekly_limit_pct,
            });
        }

        if self.loss_streak >= limits.max_consecutive_losses {
            return Err(TradingBlock::LossStreak {
                strategy,
                losses: self.loss_streak,
                limit: limits.max_consecutive_losses,
            });
        }

        let spike = self.config.volatility_spike_multiplier;
        if let Some(ratio) = volatility_ratio.filter(|r| r.is_finite()) {
            if ratio >= spike {
                return Err(TradingBlock::VolatilitySpike { ratio, limit: spike });
            }
        }

        if self.loss_streak > 0 {
            Ok(1.0 / limits.recovery_multiplier.max(1.0))
        } else {
            Ok(1.0)
        }
    }

    /// Feed a new equity sample and advance the state machine
    pub fn update_equity(&mut self, equity: f64, now: DateTime<Utc>) -> Vec<DrawdownEvent> {
        let mut events = Vec::new();
        if !equity.is_finite() || equity < 0.0 {
            tracing::warn!("Ignoring invalid equity sample {}", equity);
            return events;
        }

        // A new day or week opens at the last equity seen before it
        let today = now.date_naive();
        if self.day_open.map_or(true, |(day, _)| day != today) {
            self.day_open = Some((today, self.current_equity));
        }
        let iso = now.iso_week();
        let week = (iso.year(), iso.week());
        if self.week_open.map_or(true, |(w, _)| w != week) {
            self.week_open = Some((week, self.current_equity));
        }

        if self.peak_equity <= 0.0 {
            self.peak_equity = equity;
        }
        self.drawdown_pct = ((self.peak_equity - equity) / self.peak_equity * 100.0).max(0.0);
        self.peak_equity = self.peak_equity.max(equity);
        self.current_equity = equity;

        let thresholds = &self.config.thresholds;
        let level = risk_level(self.drawdown_pct, thresholds);
        if level != self.risk_level {
            events.push(DrawdownEvent::RiskLevelChanged {
                from: self.risk_level,
                to: level,
            });
            self.risk_level = level;
        }

        if self.drawdown_pct >= thresholds.emergency && !self.emergency_halt {
            self.emergency_halt = true;
            tracing::error!(
                "🚨 EMERGENCY: drawdown {:.2}% reached {:.2}%, new entries halted",
                self.drawdown_pct,
                thresholds.emergency
            );
            events.push(DrawdownEvent::EmergencyHalt {
                drawdown_pct: self.drawdown_pct,
            });
        }

        match self.state {
            RecoveryState::Normal => {
                if self.rearm_pending && self.drawdown_pct < thresholds.caution {
                    self.rearm_pending = false;
                }
                if !self.rearm_pending && self.drawdown_pct >= thresholds.caution {
                    self.state = RecoveryState::Recovery;
                    self.recovery_start_equity = Some(equity);
                    self.recovery_start_time = Some(now);
                    tracing::warn!(
                        "⚠️  Entering recovery mode at {:.2}% drawdown (equity {:.2})",
                        self.drawdown_pct,
                        equity
                    );
                    events.push(DrawdownEvent::RecoveryStarted {
                        drawdown_pct: self.drawdown_pct,
                        start_equity: equity,
                    });
                }
            }
            RecoveryState::Recovery => {
                let start_equity = self.recovery_start_equity.unwrap_or(equity);
                let start_time = self.recovery_start_time.unwrap_or(now);
                let target = start_equity * (1.0 + self.config.recovery_target_pct / 100.0);

                if equity >= target {
                    let gain_pct = if start_equity > 0.0 {
                        (equity / start_equity - 1.0) * 100.0
                    } else {
                        0.0
                    };
                    tracing::info!(
                        "✅ Recovery completed: equity {:.2} is {:.2}% over start",
                        equity,
                        gain_pct
                    );
                    self.leave_recovery();
                    events.push(DrawdownEvent::RecoveryCompleted { equity, gain_pct });
                } else if now - start_time >= Duration::days(self.config.max_recovery_days) {
                    let days = (now - start_time).num_days();
                    tracing::warn!(
                        "⏱️  Recovery force-exited after {} days without reaching target",
                        days
                    );
                    self.leave_recovery();
                    self.rearm_pending = true;
                    events.push(DrawdownEvent::RecoveryForcedExit { days });
                }
            }
        }

        events
    }

    fn leave_recovery(&mut self) {
        self.state = RecoveryState::Normal;
        self.recovery_start_equity = None;
        self.recovery_start_time = None;
    }

    /// Explicit operator reset: new peak, emergency latch cleared
    pub fn reset(&mut self, equity: f64) {
        tracing::info!("Drawdown state reset at equity {:.2}", equity);
        *self = Self::new(self.config.clone(), equity);
    }

    pub fn snapshot(&self) -> DrawdownSnapshot {
        DrawdownSnapshot {
            peak_equity: self.peak_equity,
            current_equity: self.current_equity,
            current_drawdown_pct: self.drawdown_pct,
            recovery_mode: self.state == RecoveryState::Recovery,
            recovery_start_equity: self.recovery_start_equity,
            recovery_start_time: self.recovery_start_time,
            emergency_halt: self.emergency_halt,
            danger_threshold_pct: self.config.thresholds.danger,
            emergency_threshold_pct: self.config.thresholds.emergency,
            risk_level: self.risk_level,
            daily_drawdown_pct: self.daily_drawdown_pct(),
            weekly_drawdown_pct: self.weekly_drawdown_pct(),
            loss_streak: self.loss_streak,
        }
    }
}
