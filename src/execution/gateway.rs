use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{GatewayError, PipelineError};
use crate::models::{
    AccountInfo, OpenPosition, OrderFill, OrderRequest, PriceBar, Quote, SymbolSpec, Timeframe,
};

/// Market-data and execution venue
///
/// Every call may be slow or fail; callers wrap them in [`with_retry`].
/// A stop modification is atomic on the venue side.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Most recent `count` closed bars, oldest first
    async fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<PriceBar>, GatewayError>;

    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError>;

    async fn account(&self) -> Result<AccountInfo, GatewayError>;

    async fn open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError>;

    async fn symbol_spec(&self, symbol: &str) -> Result<SymbolSpec, GatewayError>;

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderFill, GatewayError>;

    async fn modify_stop(&self, ticket: u64, stop_loss: f64) -> Result<(), GatewayError>;
}

/// Bounded retry budget for gateway calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff grows linearly: attempt * backoff_ms
    pub backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
            timeout_ms: 5_000,
        }
    }
}

/// Run `call` under a timeout, retrying transient failures.
///
/// Rejections are returned immediately. After the budget is spent the last
/// transient error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    retry_when(policy, operation, GatewayError::is_transient, call).await
}

/// Like [`with_retry`], but only errors accepted by `retryable` are retried.
///
/// Order submission passes [`GatewayError::is_safe_to_resend`]: a timed-out
/// order may already be filled and must not be sent twice.
pub async fn retry_when<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    retryable: P,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
    P: Fn(&GatewayError) -> bool,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = GatewayError::Unavailable(format!("{} never attempted", operation));

    for attempt in 1..=attempts {
        let outcome =
            match tokio::time::timeout(Duration::from_millis(policy.timeout_ms), call()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(policy.timeout_ms)),
            };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation,
                    attempt,
                    attempts,
                    e
                );
                last_error = e;
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(policy.backoff_ms * attempt as u64))
                        .await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error)
}

/// Same as [`with_retry`], but any failure becomes `GatewayUnavailable`.
///
/// Used for reads, where a rejection means the data cannot be had either.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    call: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    with_retry(policy, operation, call)
        .await
        .map_err(|e| PipelineError::GatewayUnavailable {
            operation: operation.to_string(),
            attempts: policy.max_attempts.max(1),
            reason: e.to_string(),
        })
}

/// Resolves once `shutdown` reads true or its sender is gone
pub async fn until_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Await `call` unless shutdown is signalled first
pub async fn unless_shutdown<T, Fut>(shutdown: &mut watch::Receiver<bool>, call: Fut) -> Option<T>
where
    Fut: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = until_shutdown(shutdown) => None,
        out = call => Some(out),
    }
}
