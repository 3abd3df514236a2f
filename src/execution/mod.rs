// Broker access, order routing and stop management
pub mod executor;
pub mod gateway;
pub mod paper;
pub mod trailing;

pub use executor::{ExecutionAction, ExecutionDecision, ExecutionReport, Executor, OrderPlan};
pub use gateway::{fetch_with_retry, retry_when, with_retry, Gateway, RetryPolicy};
pub use paper::{PaperConfig, PaperGateway};
pub use trailing::{TrailInfo, TrailingConfig, TrailingHandle, TrailingSupervisor};
