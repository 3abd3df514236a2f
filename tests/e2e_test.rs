use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use fxsentinel::calibration::{Grade, GradeThresholds};
use fxsentinel::confluence::{
    aggregate, Bias, ConfluenceGate, TimeframeEntry, TimeframeOutcome, TimeframeReading,
};
use fxsentinel::execution::{
    ExecutionReport, Gateway, PaperConfig, PaperGateway, RetryPolicy, TrailInfo, TrailingConfig,
    TrailingSupervisor,
};
use fxsentinel::risk::{self, DrawdownEvent, DrawdownManager, RecoveryConfig, RecoveryState};
use fxsentinel::sizing::{equity_risk_lots, PositionSizer, SizingConfig, SizingMethod, SizingRequest};
use fxsentinel::*;
use tokio::sync::watch;

// ============================================================================
// Fixtures
// ============================================================================

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        backoff_ms: 1,
        timeout_ms: 1_000,
    }
}

/// Defaults with the session gate opened all day and a lower grade floor,
/// so a cycle can complete whatever the wall clock says.
fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.retry = quick_retry();
    settings.calibration.gates.session_start_hour = 0;
    settings.calibration.gates.session_end_hour = 24;
    settings.calibration.thresholds.scalping = GradeThresholds {
        ultra_high: 0.95,
        very_high: 0.90,
        high: 0.85,
        moderate: 0.80,
        minimum: 0.40,
    };
    settings
}

fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
    let start = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            PriceBar {
                timestamp: start + chrono::Duration::minutes(i as i64),
                open,
                high: open.max(close) + 0.0002,
                low: open.min(close) - 0.0002,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// Slow drift up, then an accelerating leg
fn accelerating_uptrend() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..60).map(|i| 1.1000 + i as f64 * 0.0001).collect();
    let mut price = 1.1059;
    for step in 1..=5 {
        price += 0.0002 * step as f64;
        closes.push(price);
    }
    closes
}

async fn trending_gateway(timeframes: &[Timeframe]) -> Arc<PaperGateway> {
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    let bars = bars_from_closes(&accelerating_uptrend());
    for &timeframe in timeframes {
        gateway.script_bars("EURUSD", timeframe, bars.clone()).await;
    }
    gateway
}

fn entry(weight: f64, bias: Bias, strength: f64) -> TimeframeEntry {
    TimeframeEntry {
        weight,
        outcome: TimeframeOutcome::Reading(TimeframeReading::new(bias, strength)),
    }
}

// ============================================================================
// Full cycle
// ============================================================================

#[tokio::test]
async fn test_e2e_paper_cycle_executes_and_registers_trailing() {
    let _ = tracing_subscriber::fmt::try_init();

    let settings = test_settings();
    let gateway = trending_gateway(&[Timeframe::M1, Timeframe::M5, Timeframe::M15]).await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mut supervisor, trailing) = TrailingSupervisor::new(
        gateway.clone(),
        settings.trailing.clone(),
        settings.retry.clone(),
        shutdown_rx,
    );
    let pipeline = Pipeline::new(gateway.clone(), &settings, drawdown)
        .with_trailing(trailing.clone(), &settings);

    let outcome = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap();
    println!("{}", serde_json::to_string_pretty(&outcome).unwrap());

    assert_eq!(
        outcome.status,
        CycleStatus::Executed,
        "reasons: {:?}",
        outcome.reasons
    );
    assert_eq!(outcome.signal.as_ref().unwrap().direction, Direction::Buy);

    let confluence = outcome.confluence.as_ref().unwrap();
    assert!(confluence.allowed);
    assert!(confluence.fully_aligned());

    let decision = outcome.decision.as_ref().unwrap();
    assert_ne!(decision.grade, Grade::F);
    assert!(decision.failed_gates.is_empty());
    assert!(decision.calibrated_confidence <= settings.calibration.confidence_cap);

    let sizing = outcome.sizing.as_ref().unwrap();
    assert_eq!(sizing.method, SizingMethod::Adaptive);
    assert!(sizing.lots >= 0.01 && sizing.lots <= 1.0);
    assert!(((sizing.lots * 100.0).round() - sizing.lots * 100.0).abs() < 1e-6);

    let fill = match &outcome.execution {
        Some(ExecutionReport::Filled {
            fill,
            trailing,
            notes,
        }) => {
            assert!(*trailing);
            assert!(notes.is_empty());
            fill.clone()
        }
        other => panic!("expected a fill, got {:?}", other),
    };
    let plan = outcome.plan.as_ref().unwrap();
    assert!(plan.stop_loss < fill.price && fill.price < plan.take_profit);
    assert_eq!(gateway.open_positions().await.unwrap().len(), 1);

    // Registration is applied on the next supervisor pass
    supervisor.tick().await;
    let tracked = trailing.snapshot().await;
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].ticket, fill.ticket);

    // One position per symbol
    let again = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap();
    assert_eq!(again.status, CycleStatus::Skipped);
    assert!(!again.reasons.is_empty());
}

#[tokio::test]
async fn test_untrailed_fill_reports_reason() {
    let settings = test_settings();
    let gateway = trending_gateway(&[Timeframe::M1, Timeframe::M5, Timeframe::M15]).await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (supervisor, trailing) = TrailingSupervisor::new(
        gateway.clone(),
        settings.trailing.clone(),
        settings.retry.clone(),
        shutdown_rx,
    );
    drop(supervisor);
    let pipeline =
        Pipeline::new(gateway.clone(), &settings, drawdown).with_trailing(trailing, &settings);

    let outcome = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap();

    assert_eq!(outcome.status, CycleStatus::Executed);
    assert!(matches!(
        outcome.execution,
        Some(ExecutionReport::Filled { trailing: false, .. })
    ));
    assert!(outcome.reasons.iter().any(|r| r.contains("not trailed")));
}

#[tokio::test]
async fn test_flat_market_is_rejected_with_reasons() {
    let settings = test_settings();
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    let flat: Vec<f64> = vec![1.2650; 80];
    gateway
        .script_bars("GBPUSD", Timeframe::M1, bars_from_closes(&flat))
        .await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let pipeline = Pipeline::new(gateway.clone(), &settings, drawdown);

    let outcome = pipeline
        .run_cycle("GBPUSD", StrategyKind::Scalping)
        .await
        .unwrap();

    assert_eq!(outcome.status, CycleStatus::Rejected);
    assert_eq!(outcome.signal.unwrap().direction, Direction::None);
    assert!(!outcome.reasons.is_empty());
    assert!(outcome.execution.is_none());
    assert!(gateway.open_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_short_history_is_rejected_not_raised() {
    let settings = test_settings();
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    gateway
        .script_bars("EURUSD", Timeframe::M1, bars_from_closes(&[1.1, 1.1001, 1.1002]))
        .await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let pipeline = Pipeline::new(gateway, &settings, drawdown);

    let outcome = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap();
    assert_eq!(outcome.status, CycleStatus::Rejected);
    assert!(outcome.reasons[0].contains("insufficient data"));
}

#[tokio::test]
async fn test_news_window_pauses_entries() {
    let settings = test_settings();
    let gateway = trending_gateway(&[Timeframe::M1, Timeframe::M5, Timeframe::M15]).await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let pipeline = Pipeline::new(gateway.clone(), &settings, drawdown).with_news_filter(Arc::new(
        |symbol: &str, _now: DateTime<Utc>| symbol.contains("USD"),
    ));

    let outcome = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap();
    assert_eq!(outcome.status, CycleStatus::Paused);
    assert!(outcome.reasons[0].contains("news"));
    assert!(gateway.open_positions().await.unwrap().is_empty());
}

// ============================================================================
// Interrupting errors
// ============================================================================

#[tokio::test]
async fn test_unavailable_gateway_interrupts_cycle() {
    let settings = test_settings();
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    gateway.set_unavailable(true).await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let pipeline = Pipeline::new(gateway, &settings, drawdown);

    let err = pipeline
        .run_cycle("EURUSD", StrategyKind::Intraday)
        .await
        .unwrap_err();
    match err {
        PipelineError::GatewayUnavailable { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_emergency_halt_blocks_until_reset() {
    let settings = test_settings();
    let gateway = trending_gateway(&[Timeframe::M1, Timeframe::M5, Timeframe::M15]).await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let pipeline = Pipeline::new(gateway.clone(), &settings, drawdown.clone());

    // 21% below peak
    gateway.adjust_balance(-2_100.0).await;
    let events = risk::sample_once(gateway.as_ref(), &drawdown, &settings.retry).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, DrawdownEvent::EmergencyHalt { .. })));
    assert!(pipeline.is_halted().await);

    let err = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmergencyHalt { .. }));
    assert!(err.is_interrupting());

    // Sizing agrees: no lots while latched
    let snapshot = drawdown.read().await.snapshot();
    let spec = SymbolSpec::default_for("EURUSD");
    let sized = PositionSizer::default().size(&SizingRequest {
        symbol: "EURUSD",
        strategy: StrategyKind::Scalping,
        entry: 1.1000,
        stop: 1.0990,
        confidence: 0.9,
        position_multiplier: 2.5,
        atr: 0.0008,
        equity: 7_900.0,
        spec: &spec,
        open_positions: &[],
        drawdown: &snapshot,
    });
    assert_eq!(sized.lots, 0.0);
    assert_eq!(sized.method, SizingMethod::Halted);

    // Still latched after equity recovers, until an explicit reset
    gateway.adjust_balance(2_100.0).await;
    risk::sample_once(gateway.as_ref(), &drawdown, &settings.retry).await;
    assert!(pipeline.is_halted().await);

    drawdown.write().await.reset(10_000.0);
    assert!(pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_loss_streak_blocks_strategy_cycle() {
    let settings = test_settings();
    let gateway = trending_gateway(&[Timeframe::M1, Timeframe::M5, Timeframe::M15]).await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let pipeline = Pipeline::new(gateway.clone(), &settings, drawdown.clone());

    // Five realized losses, seen by the sampler as balance drops
    risk::sample_once(gateway.as_ref(), &drawdown, &settings.retry).await;
    for _ in 0..5 {
        gateway.adjust_balance(-20.0).await;
        risk::sample_once(gateway.as_ref(), &drawdown, &settings.retry).await;
    }
    assert_eq!(drawdown.read().await.loss_streak(), 5);

    let outcome = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap();
    assert_eq!(outcome.status, CycleStatus::Rejected);
    assert!(outcome.signal.is_none());
    assert!(outcome.reasons[0].contains("consecutive losses"));
    assert!(gateway.open_positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_volatility_spike_blocks_cycle() {
    let settings = test_settings();
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    // Quiet two-pip bars, then a burst of wide ones
    let mut closes = vec![1.1000; 50];
    for i in 0..15 {
        closes.push(if i % 2 == 0 { 1.1030 } else { 1.1000 });
    }
    gateway
        .script_bars("EURUSD", Timeframe::M1, bars_from_closes(&closes))
        .await;
    let drawdown = risk::shared(DrawdownManager::new(settings.recovery.clone(), 10_000.0));
    let pipeline = Pipeline::new(gateway.clone(), &settings, drawdown);

    let outcome = pipeline
        .run_cycle("EURUSD", StrategyKind::Scalping)
        .await
        .unwrap();
    assert_eq!(outcome.status, CycleStatus::Rejected);
    assert!(
        outcome.reasons[0].contains("volatility spike"),
        "reasons: {:?}",
        outcome.reasons
    );
}

// ============================================================================
// Reference scenarios
// ============================================================================

#[test]
fn test_scenario_equity_risk_size() {
    // 10,000 equity, Scalping 1% risk, 10 pip stop, $10 per pip
    let config = SizingConfig::default();
    let limits = config.limits(StrategyKind::Scalping);
    let spec = SymbolSpec::default_for("EURUSD");
    assert_eq!(limits.max_risk_pct, 1.0);

    let lots = equity_risk_lots(10_000.0, limits.max_risk_pct, 10.0, spec.pip_value_per_lot);
    assert!((lots - 1.0).abs() < 1e-9);
}

#[test]
fn test_scenario_confluence_threshold() {
    // Scalping: M5 w2 and M15 w3 agreeing at 8, M1 w1 disagreeing at 8
    // (16 + 24 - 0.5 * 8) / (16 + 24 + 10) * 100 = 72
    let mut mostly_agreeing = BTreeMap::new();
    mostly_agreeing.insert(Timeframe::M1, entry(1.0, Bias::Bearish, 8.0));
    mostly_agreeing.insert(Timeframe::M5, entry(2.0, Bias::Bullish, 8.0));
    mostly_agreeing.insert(Timeframe::M15, entry(3.0, Bias::Bullish, 8.0));
    let report = aggregate(Direction::Buy, mostly_agreeing, 65.0);
    assert!((report.score - 72.0).abs() < 1e-9);
    assert!(report.allowed);

    // M1 w1 and M15 w3 agreeing at 10, M5 w2 disagreeing at 4
    // (10 + 30 - 0.5 * 8) / (10 + 30 + 20) * 100 = 60
    let mut split = BTreeMap::new();
    split.insert(Timeframe::M1, entry(1.0, Bias::Bullish, 10.0));
    split.insert(Timeframe::M5, entry(2.0, Bias::Bearish, 4.0));
    split.insert(Timeframe::M15, entry(3.0, Bias::Bullish, 10.0));
    let report = aggregate(Direction::Buy, split, 65.0);
    assert!((report.score - 60.0).abs() < 1e-9);
    assert!(!report.allowed);
    assert!(report.reasons.iter().any(|r| r.contains("M5")));
    assert!(!report.reasons.iter().any(|r| r.starts_with("M15")));
    assert!(!report.reasons.iter().any(|r| r.starts_with("M1 ")));
}

#[test]
fn test_scenario_recovery_round_trip() {
    let mut manager = DrawdownManager::new(RecoveryConfig::default(), 10_000.0);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap();

    let events = manager.update_equity(8_800.0, t0);
    assert_eq!(manager.state(), RecoveryState::Recovery);
    assert!(events
        .iter()
        .any(|e| matches!(e, DrawdownEvent::RecoveryStarted { .. })));
    let snapshot = manager.snapshot();
    assert!((snapshot.current_drawdown_pct - 12.0).abs() < 1e-9);
    assert_eq!(snapshot.recovery_start_equity, Some(8_800.0));

    // Just over 5% above the recovery start
    let events = manager.update_equity(9_250.0, t0 + chrono::Duration::days(2));
    assert_eq!(manager.state(), RecoveryState::Normal);
    assert!(events
        .iter()
        .any(|e| matches!(e, DrawdownEvent::RecoveryCompleted { .. })));
    assert_eq!(manager.snapshot().peak_equity, 10_000.0);
}

// ============================================================================
// Confluence against the gateway
// ============================================================================

#[tokio::test]
async fn test_confluence_skips_failed_timeframe() {
    let settings = test_settings();
    let gateway = trending_gateway(&[Timeframe::M1, Timeframe::M5]).await;
    gateway.fail_timeframe(Timeframe::M15).await;
    let gate = ConfluenceGate::new(
        settings.confluence.clone(),
        settings.indicators.clone(),
        quick_retry(),
    );

    let report = gate
        .evaluate(gateway.as_ref(), "EURUSD", StrategyKind::Scalping, Direction::Buy)
        .await;

    assert!(matches!(
        report.per_timeframe[&Timeframe::M15].outcome,
        TimeframeOutcome::Skipped { .. }
    ));
    assert!(report.reasons.iter().any(|r| r.starts_with("M15 skipped")));
    // Both remaining timeframes trend up with strength of at least 8
    assert!(report.allowed);
    assert!(report.score >= 80.0);
    assert!(report.fully_aligned());
}

#[tokio::test]
async fn test_confluence_without_any_timeframe_is_no_data() {
    let settings = test_settings();
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    for timeframe in [Timeframe::M1, Timeframe::M5, Timeframe::M15] {
        gateway.fail_timeframe(timeframe).await;
    }
    let gate = ConfluenceGate::new(settings.confluence, settings.indicators, quick_retry());

    let report = gate
        .evaluate(gateway.as_ref(), "EURUSD", StrategyKind::Scalping, Direction::Sell)
        .await;
    assert!(!report.allowed);
    assert_eq!(report.score, 0.0);
    assert!(report.reasons.iter().any(|r| r.contains("NoData")));
}

// ============================================================================
// Trailing supervisor
// ============================================================================

#[tokio::test]
async fn test_supervisor_trails_retries_and_prunes() {
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    gateway.set_price("EURUSD", 1.1000).await;
    let fill = gateway
        .submit_order(&OrderRequest {
            symbol: "EURUSD".to_string(),
            side: TradeSide::Buy,
            lots: 0.1,
            stop_loss: 1.0980,
            take_profit: 1.1200,
            comment: "trail test".to_string(),
        })
        .await
        .unwrap();

    let config = TrailingConfig {
        dynamic_distance: false,
        ..TrailingConfig::default()
    };
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mut supervisor, handle) =
        TrailingSupervisor::new(gateway.clone(), config.clone(), quick_retry(), shutdown_rx);
    let spec = SymbolSpec::default_for("EURUSD");
    assert!(handle.register(TrailInfo::from_fill(&fill, &spec, &config)).await);

    // 49 pips in profit, but the venue refuses the first move
    gateway.set_price("EURUSD", 1.1050).await;
    gateway.reject_stop_modifications(1).await;
    supervisor.tick().await;
    let positions = gateway.open_positions().await.unwrap();
    assert_eq!(positions[0].stop_loss, Some(1.0980));
    assert_eq!(handle.snapshot().await[0].current_stop, Some(1.0980));

    // Retried on the next pass: 20 pips behind the best bid
    supervisor.tick().await;
    let stop = gateway.open_positions().await.unwrap()[0].stop_loss.unwrap();
    assert!((stop - 1.1030).abs() < 1e-9);
    assert!((handle.snapshot().await[0].current_stop.unwrap() - 1.1030).abs() < 1e-9);

    // Pullback never loosens
    gateway.set_price("EURUSD", 1.1040).await;
    supervisor.tick().await;
    let stop = gateway.open_positions().await.unwrap()[0].stop_loss.unwrap();
    assert!((stop - 1.1030).abs() < 1e-9);

    // Stopped out, then dropped from the registry
    gateway.set_price("EURUSD", 1.1020).await;
    supervisor.tick().await;
    supervisor.tick().await;
    assert!(gateway.open_positions().await.unwrap().is_empty());
    assert!(handle.snapshot().await.is_empty());

    let account = gateway.account().await.unwrap();
    // 29 pips locked in on 0.1 lot
    assert!((account.balance - 10_029.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_supervisor_stops_on_shutdown() {
    let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (supervisor, _handle) = TrailingSupervisor::new(
        gateway.clone(),
        TrailingConfig::default(),
        quick_retry(),
        shutdown_rx.clone(),
    );
    let drawdown = risk::shared(DrawdownManager::new(RecoveryConfig::default(), 10_000.0));

    let supervisor_task = tokio::spawn(supervisor.run());
    let sampler_task = tokio::spawn(risk::run_equity_sampler(
        gateway,
        drawdown,
        Duration::from_millis(20),
        quick_retry(),
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    assert!(tokio::time::timeout(Duration::from_secs(3), supervisor_task)
        .await
        .is_ok());
    assert!(tokio::time::timeout(Duration::from_secs(3), sampler_task)
        .await
        .is_ok());
}
