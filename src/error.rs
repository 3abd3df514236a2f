use thiserror::Error;

/// Failure taxonomy shared by every pipeline stage.
///
/// Stages return these as `Err`; the caller decides the safe default
/// (a `NONE` signal, the minimum lot, a grade-F decision). Only
/// `GatewayUnavailable` and `EmergencyHalt` are allowed to interrupt
/// a decision cycle.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("insufficient data: need {needed} bars, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("gateway unavailable during {operation} after {attempts} attempts: {reason}")]
    GatewayUnavailable {
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("quality gates failed: {}", .0.join(", "))]
    QualityGateFailed(Vec<String>),

    #[error("confidence {confidence:.3} below minimum {minimum:.3}")]
    ThresholdNotMet { confidence: f64, minimum: f64 },

    #[error("sizing fell back to minimum lot: {0}")]
    SizingFallback(String),

    #[error("recovery mode force-exited after {days} days")]
    RecoveryForcedExit { days: i64 },

    #[error("emergency halt: drawdown {drawdown_pct:.2}% reached {threshold_pct:.2}%")]
    EmergencyHalt {
        drawdown_pct: f64,
        threshold_pct: f64,
    },
}

impl PipelineError {
    /// Whether this error must stop the cycle instead of becoming a rejection reason.
    pub fn is_interrupting(&self) -> bool {
        matches!(
            self,
            PipelineError::GatewayUnavailable { .. } | PipelineError::EmergencyHalt { .. }
        )
    }
}

/// Errors reported by a market-data/execution gateway.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway call timed out after {0} ms")]
    Timeout(u64),

    #[error("request rejected ({code}): {reason}")]
    Rejected { code: i32, reason: String },
}

impl GatewayError {
    /// Transient failures are retried; rejections are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout(_))
    }

    /// Whether a request can be sent again without risking a duplicate.
    /// A timed-out request may have reached the venue.
    pub fn is_safe_to_resend(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
