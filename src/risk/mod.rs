// Risk management module
pub mod drawdown;

pub use drawdown::{
    risk_level, DrawdownEvent, DrawdownManager, DrawdownSnapshot, DrawdownThresholds,
    RecoveryConfig, RecoveryState, RiskLevel, StrategyLimitTable, StrategyLimits, TradingBlock,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, MissedTickBehavior};

use crate::execution::gateway::{fetch_with_retry, unless_shutdown, Gateway, RetryPolicy};

/// Drawdown manager shared between the sampler (writer) and the pipeline (readers)
pub type SharedDrawdown = Arc<RwLock<DrawdownManager>>;

pub fn shared(manager: DrawdownManager) -> SharedDrawdown {
    Arc::new(RwLock::new(manager))
}

/// Poll account equity every `period` and feed it to the drawdown manager
/// until `shutdown` flips to true. A sample still waiting on the gateway is
/// dropped when shutdown arrives.
pub async fn run_equity_sampler(
    gateway: Arc<dyn Gateway>,
    drawdown: SharedDrawdown,
    period: Duration,
    retry: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut stop = shutdown.clone();
                let sample = sample_once(gateway.as_ref(), &drawdown, &retry);
                if unless_shutdown(&mut stop, sample).await.is_none() {
                    tracing::info!("Equity sampler stopped mid-sample");
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Equity sampler stopped");
                    break;
                }
            }
        }
    }
}

/// One equity sample. Returns the events it produced.
pub async fn sample_once(
    gateway: &dyn Gateway,
    drawdown: &SharedDrawdown,
    retry: &RetryPolicy,
) -> Vec<DrawdownEvent> {
    let account = match fetch_with_retry(retry, "account", move || gateway.account()).await {
        Ok(account) => account,
        Err(e) => {
            tracing::warn!("Equity sample skipped: {}", e);
            return Vec::new();
        }
    };

    let mut manager = drawdown.write().await;
    manager.update_balance(account.balance);
    let events = manager.update_equity(account.equity, Utc::now());
    for event in &events {
        match event.as_error(&manager.config().thresholds) {
            Some(err) => tracing::warn!("Drawdown: {}", err),
            None => tracing::debug!("Drawdown event: {:?}", event),
        }
    }
    events
}
