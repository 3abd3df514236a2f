use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};

use super::gateway::{fetch_with_retry, unless_shutdown, with_retry, Gateway, RetryPolicy};
use crate::indicators::calculate_atr;
use crate::models::{OrderFill, SymbolSpec, Timeframe, TradeSide};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrailingConfig {
    pub check_interval_ms: u64,
    pub trail_distance_pips: f64,
    /// Smallest stop improvement worth a modification
    pub trail_step_pips: f64,
    pub min_profit_to_arm_pips: f64,
    /// Derive the trail distance from ATR instead of the fixed pips
    pub dynamic_distance: bool,
    pub atr_multiplier: f64,
    pub atr_timeframe: Timeframe,
    pub atr_period: usize,
    pub min_distance_pips: f64,
    pub max_distance_pips: f64,
    /// ATR is refreshed once every this many ticks
    pub atr_refresh_ticks: u64,
    pub command_buffer: usize,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 2_000,
            trail_distance_pips: 20.0,
            trail_step_pips: 5.0,
            min_profit_to_arm_pips: 15.0,
            dynamic_distance: true,
            atr_multiplier: 2.0,
            atr_timeframe: Timeframe::M5,
            atr_period: 14,
            min_distance_pips: 5.0,
            max_distance_pips: 100.0,
            atr_refresh_ticks: 30,
            command_buffer: 64,
        }
    }
}

/// Trailing state of one open position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrailInfo {
    pub ticket: u64,
    pub symbol: String,
    pub side: TradeSide,
    pub open_price: f64,
    pub current_stop: Option<f64>,
    /// Best exit-side price seen since registration
    pub max_favorable_price: f64,
    pub trail_distance: f64,
    pub trail_step: f64,
    pub min_profit_to_arm: f64,
    pub pip_size: f64,
    pub min_stop_distance: f64,
}

impl TrailInfo {
    pub fn from_fill(fill: &OrderFill, spec: &SymbolSpec, config: &TrailingConfig) -> Self {
        let stop = (fill.stop_loss > 0.0).then_some(fill.stop_loss);
        Self {
            ticket: fill.ticket,
            symbol: fill.symbol.clone(),
            side: fill.side,
            open_price: fill.price,
            current_stop: stop,
            max_favorable_price: fill.price,
            trail_distance: spec.from_pips(config.trail_distance_pips),
            trail_step: spec.from_pips(config.trail_step_pips),
            min_profit_to_arm: spec.from_pips(config.min_profit_to_arm_pips),
            pip_size: spec.pip_size,
            min_stop_distance: spec.min_stop_distance,
        }
    }

    /// Track the favourable extreme and return a tighter stop when one is due.
    ///
    /// Does not move `current_stop`; call [`TrailInfo::commit`] once the
    /// venue accepts the new level.
    pub fn evaluate(&mut self, exit_price: f64) -> Option<f64> {
        if !exit_price.is_finite() || exit_price <= 0.0 {
            return None;
        }
        let sign = self.side.sign();

        self.max_favorable_price = match self.side {
            TradeSide::Buy => self.max_favorable_price.max(exit_price),
            TradeSide::Sell => self.max_favorable_price.min(exit_price),
        };

        let profit = (exit_price - self.open_price) * sign;
        if profit < self.min_profit_to_arm {
            return None;
        }

        let mut candidate = self.max_favorable_price - sign * self.trail_distance;
        // Keep the broker's minimum distance from the current price
        candidate = match self.side {
            TradeSide::Buy => candidate.min(exit_price - self.min_stop_distance),
            TradeSide::Sell => candidate.max(exit_price + self.min_stop_distance),
        };

        match self.current_stop {
            Some(stop) if (candidate - stop) * sign < self.trail_step => None,
            _ => Some(candidate),
        }
    }

    /// Record an accepted stop. Never loosens.
    pub fn commit(&mut self, stop: f64) {
        let tighter = match self.current_stop {
            Some(current) => (stop - current) * self.side.sign() > 0.0,
            None => true,
        };
        if tighter {
            self.current_stop = Some(stop);
        }
    }

    /// Replace the trail distance with an ATR-derived one, clamped to `[min, max]` pips
    pub fn apply_atr(&mut self, atr: f64, config: &TrailingConfig) {
        if !atr.is_finite() || atr <= 0.0 || self.pip_size <= 0.0 {
            return;
        }
        let pips = (atr * config.atr_multiplier / self.pip_size)
            .clamp(config.min_distance_pips, config.max_distance_pips);
        self.trail_distance = pips * self.pip_size;
    }
}

#[derive(Debug, Clone)]
pub enum TrailCommand {
    Register(TrailInfo),
    Unregister(u64),
}

type Registry = Arc<RwLock<HashMap<u64, TrailInfo>>>;

/// Sending side of the supervisor, cheap to clone
#[derive(Debug, Clone)]
pub struct TrailingHandle {
    commands: mpsc::Sender<TrailCommand>,
    registry: Registry,
}

impl TrailingHandle {
    pub async fn register(&self, info: TrailInfo) -> bool {
        let ticket = info.ticket;
        match self.commands.send(TrailCommand::Register(info)).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("Trailing supervisor gone, ticket {} not trailed", ticket);
                false
            }
        }
    }

    pub async fn unregister(&self, ticket: u64) -> bool {
        self.commands
            .send(TrailCommand::Unregister(ticket))
            .await
            .is_ok()
    }

    /// Copy of every tracked position, ordered by ticket
    pub async fn snapshot(&self) -> Vec<TrailInfo> {
        let registry = self.registry.read().await;
        let mut infos: Vec<TrailInfo> = registry.values().cloned().collect();
        infos.sort_by_key(|i| i.ticket);
        infos
    }
}

/// Background loop that advances protective stops.
///
/// Only this task writes the registry. Stop moves go through the gateway one
/// at a time; a modification in flight finishes before shutdown is observed.
pub struct TrailingSupervisor {
    gateway: Arc<dyn Gateway>,
    config: TrailingConfig,
    retry: RetryPolicy,
    registry: Registry,
    commands: mpsc::Receiver<TrailCommand>,
    shutdown: watch::Receiver<bool>,
    ticks: u64,
}

impl TrailingSupervisor {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        config: TrailingConfig,
        retry: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, TrailingHandle) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let handle = TrailingHandle {
            commands: tx,
            registry: registry.clone(),
        };
        let supervisor = Self {
            gateway,
            config,
            retry,
            registry,
            commands: rx,
            shutdown,
            ticks: 0,
        };
        (supervisor, handle)
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_millis(self.config.check_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        tracing::info!(
            "Trailing supervisor started (every {} ms)",
            self.config.check_interval_ms
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.apply(command).await,
                        None => commands_open = false,
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Trailing supervisor stopped");
    }

    async fn apply(&mut self, command: TrailCommand) {
        match command {
            TrailCommand::Register(mut info) => {
                // Start from the ATR distance instead of waiting for the next refresh
                if self.config.dynamic_distance {
                    let mut shutdown = self.shutdown.clone();
                    let atr = unless_shutdown(&mut shutdown, self.fetch_atr(&info.symbol))
                        .await
                        .flatten();
                    if let Some(atr) = atr {
                        info.apply_atr(atr, &self.config);
                    }
                }
                tracing::info!(
                    "📌 Trailing ticket {} {} {:?} from {:.5} ({:.1} pips behind)",
                    info.ticket,
                    info.symbol,
                    info.side,
                    info.open_price,
                    info.trail_distance / info.pip_size.max(f64::EPSILON)
                );
                self.registry.write().await.insert(info.ticket, info);
            }
            TrailCommand::Unregister(ticket) => {
                self.registry.write().await.remove(&ticket);
            }
        }
    }

    /// One pass over every tracked position.
    ///
    /// Gateway reads are abandoned as soon as shutdown is signalled; a stop
    /// modification already sent is awaited.
    pub async fn tick(&mut self) {
        // Registrations queued since the last pass
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command).await;
        }
        self.ticks += 1;
        if self.registry.read().await.is_empty() {
            return;
        }

        let mut shutdown = self.shutdown.clone();
        let gateway = self.gateway.as_ref();
        let retry = &self.retry;
        let open = match unless_shutdown(
            &mut shutdown,
            fetch_with_retry(retry, "open_positions", move || gateway.open_positions()),
        )
        .await
        {
            None => return,
            Some(Ok(open)) => open,
            Some(Err(e)) => {
                tracing::warn!("Trailing tick skipped: {}", e);
                return;
            }
        };

        let live: HashSet<u64> = open.iter().map(|p| p.ticket).collect();
        let tracked: Vec<(u64, String)> = {
            let mut registry = self.registry.write().await;
            registry.retain(|ticket, info| {
                let keep = live.contains(ticket);
                if !keep {
                    tracing::info!("Ticket {} {} closed, no longer trailed", ticket, info.symbol);
                }
                keep
            });
            registry
                .values()
                .map(|i| (i.ticket, i.symbol.clone()))
                .collect()
        };

        let refresh_atr = self.config.dynamic_distance
            && (self.ticks - 1) % self.config.atr_refresh_ticks.max(1) == 0;
        let mut atr_cache: HashMap<String, Option<f64>> = HashMap::new();

        for (ticket, symbol) in tracked {
            if *shutdown.borrow() {
                return;
            }

            if refresh_atr && !atr_cache.contains_key(&symbol) {
                let Some(atr) = unless_shutdown(&mut shutdown, self.fetch_atr(&symbol)).await
                else {
                    return;
                };
                atr_cache.insert(symbol.clone(), atr);
            }

            let sym = symbol.as_str();
            let quote = match unless_shutdown(
                &mut shutdown,
                fetch_with_retry(retry, "quote", move || gateway.quote(sym)),
            )
            .await
            {
                None => return,
                Some(Ok(quote)) => quote,
                Some(Err(e)) => {
                    tracing::warn!("No quote for {}: {}", symbol, e);
                    continue;
                }
            };

            let candidate = {
                let mut registry = self.registry.write().await;
                let Some(info) = registry.get_mut(&ticket) else {
                    continue;
                };
                if let Some(Some(atr)) = atr_cache.get(&symbol) {
                    info.apply_atr(*atr, &self.config);
                }
                info.evaluate(quote.exit_price(info.side))
            };
            let Some(stop) = candidate else { continue };

            match with_retry(retry, "modify_stop", move || gateway.modify_stop(ticket, stop)).await
            {
                Ok(()) => {
                    if let Some(info) = self.registry.write().await.get_mut(&ticket) {
                        info.commit(stop);
                    }
                    tracing::info!("🔒 Ticket {} {} stop moved to {:.5}", ticket, symbol, stop);
                }
                Err(e) => {
                    tracing::warn!(
                        "Stop move for ticket {} rejected, retrying next tick: {}",
                        ticket,
                        e
                    );
                }
            }
        }
    }

    async fn fetch_atr(&self, symbol: &str) -> Option<f64> {
        let gateway = self.gateway.as_ref();
        let timeframe = self.config.atr_timeframe;
        let count = self.config.atr_period + 1;
        match fetch_with_retry(&self.retry, "atr bars", move || {
            gateway.bars(symbol, timeframe, count)
        })
        .await
        {
            Ok(bars) => calculate_atr(&bars, self.config.atr_period),
            Err(e) => {
                tracing::debug!("ATR refresh for {} failed: {}", symbol, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::paper::test_support::StallingGateway;
    use crate::execution::paper::{PaperConfig, PaperGateway};
    use crate::models::{OrderRequest, PriceBar};
    use chrono::Utc;

    fn long_at(price: f64) -> TrailInfo {
        let spec = SymbolSpec::default_for("EURUSD");
        let fill = OrderFill {
            ticket: 11,
            symbol: "EURUSD".to_string(),
            side: TradeSide::Buy,
            lots: 0.1,
            price,
            stop_loss: price - 0.0020,
            take_profit: price + 0.0050,
            filled_at: Utc::now(),
        };
        TrailInfo::from_fill(&fill, &spec, &TrailingConfig::default())
    }

    #[test]
    fn test_no_move_before_armed() {
        let mut info = long_at(1.1000);
        assert_eq!(info.evaluate(1.1010), None);
        assert!((info.max_favorable_price - 1.1010).abs() < 1e-12);
    }

    #[test]
    fn test_trails_behind_favourable_extreme() {
        let mut info = long_at(1.1000);
        let stop = info.evaluate(1.1030).unwrap();
        // 1.1030 - 20 pips
        assert!((stop - 1.1010).abs() < 1e-9);
        info.commit(stop);

        // Pullback: no move
        assert_eq!(info.evaluate(1.1020), None);
        // Three more pips is below the 5 pip step
        assert_eq!(info.evaluate(1.1033), None);
        let next = info.evaluate(1.1040).unwrap();
        assert!((next - 1.1020).abs() < 1e-9);
    }

    #[test]
    fn test_short_trails_downward() {
        let spec = SymbolSpec::default_for("EURUSD");
        let fill = OrderFill {
            ticket: 12,
            symbol: "EURUSD".to_string(),
            side: TradeSide::Sell,
            lots: 0.1,
            price: 1.1000,
            stop_loss: 1.1020,
            take_profit: 1.0950,
            filled_at: Utc::now(),
        };
        let mut info = TrailInfo::from_fill(&fill, &spec, &TrailingConfig::default());
        let stop = info.evaluate(1.0970).unwrap();
        assert!((stop - 1.0990).abs() < 1e-9);
    }

    #[test]
    fn test_commit_never_loosens() {
        let mut info = long_at(1.1000);
        info.commit(1.1010);
        info.commit(1.0990);
        assert_eq!(info.current_stop, Some(1.1010));
    }

    #[test]
    fn test_atr_distance_is_clamped() {
        let config = TrailingConfig::default();
        let mut info = long_at(1.1000);
        info.apply_atr(0.0100, &config);
        assert!((info.trail_distance - 0.0100).abs() < 1e-9);
        info.apply_atr(0.000001, &config);
        assert!((info.trail_distance - 0.0005).abs() < 1e-9);
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            backoff_ms: 1,
            timeout_ms: 5_000,
        }
    }

    async fn open_long(gateway: &PaperGateway) -> OrderFill {
        gateway
            .submit_order(&OrderRequest {
                symbol: "EURUSD".to_string(),
                side: TradeSide::Buy,
                lots: 0.1,
                stop_loss: 1.0950,
                take_profit: 1.1200,
                comment: "trailing".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_registration_applies_atr_between_refreshes() {
        let gateway = Arc::new(PaperGateway::new(PaperConfig::default()));
        // Constant 15 pip ranges: ATR 0.0015, trail 2 x 15 = 30 pips
        let t0 = Utc::now() - chrono::Duration::hours(3);
        let bars: Vec<PriceBar> = (0..30)
            .map(|i| PriceBar {
                timestamp: t0 + chrono::Duration::minutes(5 * i),
                open: 1.1000,
                high: 1.10075,
                low: 1.09925,
                close: 1.1000,
                volume: 1_000.0,
            })
            .collect();
        gateway.script_bars("EURUSD", Timeframe::M5, bars).await;
        let fill = open_long(&gateway).await;

        let config = TrailingConfig::default();
        let (_tx, shutdown) = watch::channel(false);
        let (mut supervisor, handle) =
            TrailingSupervisor::new(gateway.clone(), config.clone(), quick_retry(), shutdown);

        // The first pass is the refresh pass; register after it
        supervisor.tick().await;
        let spec = SymbolSpec::default_for("EURUSD");
        assert!(handle.register(TrailInfo::from_fill(&fill, &spec, &config)).await);
        supervisor.tick().await;

        let tracked = handle.snapshot().await;
        assert_eq!(tracked.len(), 1);
        assert!((tracked[0].trail_distance - 0.0030).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_stalled_tick() {
        let paper = PaperGateway::new(PaperConfig::default());
        paper.set_price("EURUSD", 1.1000).await;
        let fill = open_long(&paper).await;
        let gateway = Arc::new(StallingGateway {
            stall_quotes: true,
            ..StallingGateway::new(paper)
        });

        let config = TrailingConfig {
            check_interval_ms: 10,
            dynamic_distance: false,
            ..TrailingConfig::default()
        };
        let (tx, shutdown) = watch::channel(false);
        let (supervisor, handle) =
            TrailingSupervisor::new(gateway, config.clone(), quick_retry(), shutdown);
        let spec = SymbolSpec::default_for("EURUSD");
        assert!(handle.register(TrailInfo::from_fill(&fill, &spec, &config)).await);

        let task = tokio::spawn(supervisor.run());
        // Let a tick block on the quote, well inside its 5 s timeout
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        assert!(tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .is_ok());
    }
}
