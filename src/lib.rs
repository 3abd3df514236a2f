// Core modules
pub mod calibration;
pub mod config;
pub mod confluence;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod pipeline;
pub mod risk;
pub mod sizing;
pub mod strategy;

// Re-export commonly used types
pub use config::Settings;
pub use error::{ConfigError, GatewayError, PipelineError, Result};
pub use models::*;
pub use pipeline::{CycleOutcome, CycleStatus, NewsFilter, NoNewsFilter, Pipeline};
pub use strategy::Strategy;
