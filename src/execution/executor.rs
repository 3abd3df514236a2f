use std::sync::Arc;

use serde::Serialize;

use super::gateway::{fetch_with_retry, retry_when, Gateway, RetryPolicy};
use super::trailing::{TrailInfo, TrailingConfig, TrailingHandle};
use crate::error::{GatewayError, PipelineError};
use crate::models::{OrderFill, OrderRequest, Quote, StrategyKind, SymbolSpec, TradeSide};
use crate::sizing::{SizingMethod, SizingResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExecutionAction {
    Execute { lots: f64 },
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

/// Entry, stop and target for a new position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPlan {
    pub symbol: String,
    pub strategy: StrategyKind,
    pub side: TradeSide,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl OrderPlan {
    /// Strategy default TP/SL distances scaled by the grade multipliers.
    /// The stop is never closer than the broker minimum.
    pub fn build(
        strategy: StrategyKind,
        side: TradeSide,
        quote: &Quote,
        spec: &SymbolSpec,
        tp_multiplier: f64,
        sl_multiplier: f64,
    ) -> Self {
        let (tp_pips, sl_pips) = strategy.default_tp_sl_pips();
        let entry = quote.entry_price(side);
        let sign = side.sign();
        let stop_distance = spec
            .from_pips(sl_pips * sl_multiplier)
            .max(spec.min_stop_distance);
        let target_distance = spec
            .from_pips(tp_pips * tp_multiplier)
            .max(spec.min_stop_distance);

        Self {
            symbol: quote.symbol.clone(),
            strategy,
            side,
            entry,
            stop_loss: entry - sign * stop_distance,
            take_profit: entry + sign * target_distance,
        }
    }

    pub fn to_request(&self, lots: f64, cycle_id: &str) -> OrderRequest {
        OrderRequest {
            symbol: self.symbol.clone(),
            side: self.side,
            lots,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            comment: format!("{} {}", self.strategy, cycle_id),
        }
    }
}

/// What happened to a submitted order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionReport {
    Filled {
        fill: OrderFill,
        trailing: bool,
        /// Anything the operator should know about this fill
        notes: Vec<String>,
    },
    Rejected { reason: String },
}

/// Routes sized orders to the gateway and hands fills to the trailing supervisor
pub struct Executor {
    gateway: Arc<dyn Gateway>,
    retry: RetryPolicy,
    trailing: Option<(TrailingHandle, TrailingConfig)>,
}

impl Executor {
    pub fn new(gateway: Arc<dyn Gateway>, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            retry,
            trailing: None,
        }
    }

    pub fn with_trailing(mut self, handle: TrailingHandle, config: TrailingConfig) -> Self {
        self.trailing = Some((handle, config));
        self
    }

    /// Decide whether a sized plan is worth sending
    pub fn decide(&self, sizing: &SizingResult) -> ExecutionDecision {
        if sizing.method == SizingMethod::Halted || sizing.lots <= 0.0 {
            return ExecutionDecision {
                action: ExecutionAction::Skip,
                reason: sizing
                    .reasons
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "zero size".to_string()),
            };
        }

        ExecutionDecision {
            action: ExecutionAction::Execute { lots: sizing.lots },
            reason: format!(
                "{:?} size {:.2} lots ({:.2}% risk)",
                sizing.method, sizing.lots, sizing.risk_percent_realized
            ),
        }
    }

    /// Submit the order. Only a fill is registered for trailing.
    ///
    /// A venue rejection is reported, not raised; exhausted retries are.
    /// A submission that times out is never resent: the venue may have
    /// filled it, so the open positions are searched for its comment instead.
    pub async fn execute(
        &self,
        plan: &OrderPlan,
        lots: f64,
        spec: &SymbolSpec,
        cycle_id: &str,
    ) -> Result<ExecutionReport, PipelineError> {
        let request = plan.to_request(lots, cycle_id);
        let gateway = self.gateway.as_ref();
        let order = &request;

        let submitted = retry_when(
            &self.retry,
            "submit_order",
            GatewayError::is_safe_to_resend,
            move || gateway.submit_order(order),
        )
        .await;

        match submitted {
            Ok(fill) => Ok(self.accept(fill, spec, Vec::new()).await),
            Err(GatewayError::Rejected { code, reason }) => {
                tracing::warn!("❌ Order for {} rejected ({}): {}", plan.symbol, code, reason);
                Ok(ExecutionReport::Rejected {
                    reason: format!("order rejected ({}): {}", code, reason),
                })
            }
            Err(GatewayError::Timeout(ms)) => {
                tracing::warn!(
                    "⏱️  Order for {} timed out after {} ms, reconciling",
                    plan.symbol,
                    ms
                );
                match self.reconcile(&request).await {
                    Some(fill) => {
                        let note = format!(
                            "submission timed out; matched open ticket {} by comment",
                            fill.ticket
                        );
                        Ok(self.accept(fill, spec, vec![note]).await)
                    }
                    None => Err(PipelineError::GatewayUnavailable {
                        operation: "submit_order".to_string(),
                        attempts: 1,
                        reason: format!(
                            "timed out after {} ms with no matching position; not resent",
                            ms
                        ),
                    }),
                }
            }
            Err(e) => Err(PipelineError::GatewayUnavailable {
                operation: "submit_order".to_string(),
                attempts: self.retry.max_attempts.max(1),
                reason: e.to_string(),
            }),
        }
    }

    async fn accept(
        &self,
        fill: OrderFill,
        spec: &SymbolSpec,
        mut notes: Vec<String>,
    ) -> ExecutionReport {
        tracing::info!(
            "✅ Filled ticket {} {} {:?} {:.2} lots @ {:.5} (SL {:.5}, TP {:.5})",
            fill.ticket,
            fill.symbol,
            fill.side,
            fill.lots,
            fill.price,
            fill.stop_loss,
            fill.take_profit
        );
        let trailing = match &self.trailing {
            Some((handle, config)) => {
                let registered = handle
                    .register(TrailInfo::from_fill(&fill, spec, config))
                    .await;
                if !registered {
                    notes.push(format!(
                        "ticket {} is not trailed: trailing supervisor stopped",
                        fill.ticket
                    ));
                }
                registered
            }
            None => false,
        };
        ExecutionReport::Filled {
            fill,
            trailing,
            notes,
        }
    }

    /// Find the position a timed-out order opened, if any
    async fn reconcile(&self, request: &OrderRequest) -> Option<OrderFill> {
        let gateway = self.gateway.as_ref();
        let positions = match fetch_with_retry(&self.retry, "open_positions", move || {
            gateway.open_positions()
        })
        .await
        {
            Ok(positions) => positions,
            Err(e) => {
                tracing::warn!("Could not reconcile {}: {}", request.symbol, e);
                return None;
            }
        };

        positions
            .into_iter()
            .find(|p| p.comment == request.comment)
            .map(|p| OrderFill {
                ticket: p.ticket,
                symbol: p.symbol,
                side: p.side,
                lots: p.lots,
                price: p.open_price,
                stop_loss: p.stop_loss.unwrap_or(request.stop_loss),
                take_profit: p.take_profit.unwrap_or(request.take_profit),
                filled_at: p.opened_at,
            })
    }
}
