use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationConfig;
use crate::confluence::ConfluenceConfig;
use crate::error::ConfigError;
use crate::execution::{PaperConfig, RetryPolicy, TrailingConfig};
use crate::indicators::IndicatorConfig;
use crate::models::StrategyKind;
use crate::risk::RecoveryConfig;
use crate::sizing::SizingConfig;
use crate::strategy::StrategyConfig;

pub const DEFAULT_CONFIG_FILE: &str = "fxsentinel.toml";
pub const ENV_PREFIX: &str = "FXSENTINEL";

/// Everything the daemon needs, with a working default for every field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub symbols: Vec<String>,
    pub strategies: Vec<StrategyKind>,
    pub cycle_interval_secs: u64,
    pub equity_sample_secs: u64,
    pub retry: RetryPolicy,
    pub indicators: IndicatorConfig,
    pub strategy: StrategyConfig,
    pub confluence: ConfluenceConfig,
    pub calibration: CalibrationConfig,
    pub sizing: SizingConfig,
    pub recovery: RecoveryConfig,
    pub trailing: TrailingConfig,
    pub paper: PaperConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbols: vec![
                "EURUSD".to_string(),
                "GBPUSD".to_string(),
                "USDJPY".to_string(),
                "XAUUSD".to_string(),
            ],
            strategies: vec![StrategyKind::Scalping, StrategyKind::Intraday],
            cycle_interval_secs: 60,
            equity_sample_secs: 30,
            retry: RetryPolicy::default(),
            indicators: IndicatorConfig::default(),
            strategy: StrategyConfig::default(),
            confluence: ConfluenceConfig::default(),
            calibration: CalibrationConfig::default(),
            sizing: SizingConfig::default(),
            recovery: RecoveryConfig::default(),
            trailing: TrailingConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

impl Settings {
    /// Layer defaults, an optional TOML file and `FXSENTINEL__*` variables.
    ///
    /// An explicit `path` must exist; the default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Path::new(DEFAULT_CONFIG_FILE).to_path_buf(), false),
        };

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(file).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject tables that would silently skew decisions
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.symbols.is_empty() {
            return invalid("no symbols configured".to_string());
        }
        if self.strategies.is_empty() {
            return invalid("no strategies configured".to_string());
        }
        if self.cycle_interval_secs == 0 || self.equity_sample_secs == 0 {
            return invalid("cycle and equity sample intervals must be positive".to_string());
        }
        if self.trailing.check_interval_ms == 0 {
            return invalid("trailing check interval must be positive".to_string());
        }

        let weight_sum = self.calibration.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return invalid(format!("factor weights sum to {:.4}, expected 1.0", weight_sum));
        }

        for kind in StrategyKind::ALL {
            if !self.calibration.thresholds.get(kind).is_ordered() {
                return invalid(format!("{} grade thresholds are not descending", kind));
            }
            if self
                .confluence
                .timeframes(kind)
                .iter()
                .any(|tw| !(tw.weight > 0.0))
            {
                return invalid(format!("{} confluence weights must be positive", kind));
            }
        }

        if !self.recovery.thresholds.is_ordered() {
            return invalid("drawdown thresholds must ascend warning < caution < danger < emergency".to_string());
        }
        for kind in StrategyKind::ALL {
            if !self.recovery.strategy_limits.get(kind).is_valid() {
                return invalid(format!("{} drawdown limits are inconsistent", kind));
            }
        }
        if !(self.recovery.volatility_spike_multiplier > 1.0) {
            return invalid("volatility spike multiplier must exceed 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.sizing.equity_weight) {
            return invalid(format!(
                "sizing equity weight {} outside [0, 1]",
                self.sizing.equity_weight
            ));
        }
        if !(self.calibration.confidence_cap > 0.0 && self.calibration.confidence_cap <= 1.0) {
            return invalid(format!(
                "confidence cap {} outside (0, 1]",
                self.calibration.confidence_cap
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut settings = Settings::default();
        settings.calibration.weights.technical = 0.5;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("weights"));
    }

    #[test]
    fn test_inverted_drawdown_thresholds_rejected() {
        let mut settings = Settings::default();
        settings.recovery.thresholds.caution = 25.0;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_daily_limit_above_weekly_rejected() {
        let mut settings = Settings::default();
        settings.recovery.strategy_limits.hft.daily_limit_pct = 7.0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("hft"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut settings = Settings::default();
        settings.cycle_interval_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = std::env::temp_dir().join(format!("fxsentinel-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.toml");
        std::fs::write(
            &path,
            "symbols = [\"EURUSD\"]\ncycle_interval_secs = 15\n\n[sizing]\nequity_weight = 0.5\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.symbols, vec!["EURUSD".to_string()]);
        assert_eq!(settings.cycle_interval_secs, 15);
        assert_eq!(settings.sizing.equity_weight, 0.5);
        assert_eq!(settings.confluence.min_score, 65.0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = Path::new("/nonexistent/fxsentinel-missing.toml");
        assert!(matches!(Settings::load(Some(path)), Err(ConfigError::Load(_))));
    }
}
