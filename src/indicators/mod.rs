// Technical indicators module
// Pure series computations plus the per-cycle indicator frame

pub mod atr;
pub mod bands;
pub mod frame;
pub mod moving_average;
pub mod oscillators;
pub mod rsi;

pub use atr::{atr_series, calculate_atr, true_range_series, volatility_ratio};
pub use bands::{bollinger_series, BollingerSeries};
pub use frame::{compute, IndicatorConfig, IndicatorFrame, IndicatorRow};
pub use moving_average::{calculate_sma, ema_series, sma_series, wma_series};
pub use oscillators::{macd_series, stochastic_series, MacdSeries};
pub use rsi::{rsi_series, NEUTRAL_RSI};
