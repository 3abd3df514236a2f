use serde::{Deserialize, Serialize};

use super::atr::atr_series;
use super::bands::bollinger_series;
use super::moving_average::{ema_series, sma_series, wma_series};
use super::oscillators::{macd_series, stochastic_series};
use super::rsi::rsi_series;
use crate::error::{PipelineError, Result};
use crate::models::PriceBar;

/// Lookback periods for the indicator battery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorConfig {
    pub min_bars: usize,
    pub rsi_period: usize,
    pub rsi_fast_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub atr_period: usize,
    pub atr_fast_period: usize,
    pub bb_period: usize,
    pub bb_std_dev: f64,
    pub volume_period: usize,
    pub sr_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            min_bars: 50,
            rsi_period: 14,
            rsi_fast_period: 7,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            stoch_k: 14,
            stoch_d: 3,
            atr_period: 14,
            atr_fast_period: 7,
            bb_period: 20,
            bb_std_dev: 2.0,
            volume_period: 20,
            sr_window: 20, // support/resistance lookback
        }
    }
}

/// Indicator values for one bar
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct IndicatorRow {
    pub ema_8: f64,
    pub ema_12: f64,
    pub ema_20: f64,
    pub ema_26: f64,
    pub ema_50: f64,
    pub ema_100: f64,
    pub ema_200: f64,
    pub wma_8: f64,
    pub wma_14: f64,
    pub wma_21: f64,
    pub rsi: f64,
    pub rsi_fast: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub atr: f64,
    pub atr_fast: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
    pub volume_ma: f64,
    pub volume_ratio: f64,
    pub support: f64,
    pub resistance: f64,
}

/// Bars annotated with one `IndicatorRow` each.
///
/// Row `i` is computed from bars `0..=i` only.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    bars: Vec<PriceBar>,
    rows: Vec<IndicatorRow>,
}

impl IndicatorFrame {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn rows(&self) -> &[IndicatorRow] {
        &self.rows
    }

    /// Bar `back` positions before the last one (0 = last)
    pub fn bar_back(&self, back: usize) -> Option<&PriceBar> {
        self.bars.len().checked_sub(back + 1).map(|i| &self.bars[i])
    }

    /// Row `back` positions before the last one (0 = last)
    pub fn row_back(&self, back: usize) -> Option<&IndicatorRow> {
        self.rows.len().checked_sub(back + 1).map(|i| &self.rows[i])
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}

/// Validate bars and compute the full indicator battery
pub fn compute(bars: &[PriceBar], config: &IndicatorConfig) -> Result<IndicatorFrame> {
    if bars.len() < config.min_bars.max(2) {
        return Err(PipelineError::InsufficientData {
            needed: config.min_bars.max(2),
            got: bars.len(),
        });
    }
    validate_bars(bars)?;

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let ema_8 = ema_series(&closes, 8);
    let ema_12 = ema_series(&closes, 12);
    let ema_20 = ema_series(&closes, 20);
    let ema_26 = ema_series(&closes, 26);
    let ema_50 = ema_series(&closes, 50);
    let ema_100 = ema_series(&closes, 100);
    let ema_200 = ema_series(&closes, 200);
    let wma_8 = wma_series(&closes, 8);
    let wma_14 = wma_series(&closes, 14);
    let wma_21 = wma_series(&closes, 21);
    let rsi = rsi_series(&closes, config.rsi_period);
    let rsi_fast = rsi_series(&closes, config.rsi_fast_period);
    let macd = macd_series(&closes, config.macd_fast, config.macd_slow, config.macd_signal);
    let (stoch_k, stoch_d) = stochastic_series(bars, config.stoch_k, config.stoch_d);
    let atr = atr_series(bars, config.atr_period);
    let atr_fast = atr_series(bars, config.atr_fast_period);
    let bands = bollinger_series(&closes, config.bb_period, config.bb_std_dev);
    let volume_ma = sma_series(&volumes, config.volume_period);
    let sr_window = config.sr_window.max(1);

    let rows = (0..bars.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(sr_window);
            let window = &bars[start..=i];
            let support = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let resistance = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let volume_ratio = if volume_ma[i] > 0.0 {
                volumes[i] / volume_ma[i]
            } else {
                1.0
            };

            IndicatorRow {
                ema_8: ema_8[i],
                ema_12: ema_12[i],
                ema_20: ema_20[i],
                ema_26: ema_26[i],
                ema_50: ema_50[i],
                ema_100: ema_100[i],
                ema_200: ema_200[i],
                wma_8: wma_8[i],
                wma_14: wma_14[i],
                wma_21: wma_21[i],
                rsi: rsi[i],
                rsi_fast: rsi_fast[i],
                macd: macd.macd[i],
                macd_signal: macd.signal[i],
                macd_hist: macd.histogram[i],
                stoch_k: stoch_k[i],
                stoch_d: stoch_d[i],
                atr: atr[i],
                atr_fast: atr_fast[i],
                bb_upper: bands.upper[i],
                bb_middle: bands.middle[i],
                bb_lower: bands.lower[i],
                bb_width: bands.width[i],
                volume_ma: volume_ma[i],
                volume_ratio,
                support,
                resistance,
            }
        })
        .collect();

    Ok(IndicatorFrame {
        bars: bars.to_vec(),
        rows,
    })
}

fn validate_bars(bars: &[PriceBar]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(PipelineError::MalformedInput(format!(
                "bar {} has a missing or non-positive price",
                i
            )));
        }
        if bar.high < bar.open.max(bar.close) || bar.low > bar.open.min(bar.close) {
            return Err(PipelineError::MalformedInput(format!(
                "bar {} high/low do not bracket open/close",
                i
            )));
        }
        if !bar.volume.is_finite() || bar.volume < 0.0 {
            return Err(PipelineError::MalformedInput(format!(
                "bar {} has invalid volume",
                i
            )));
        }
        if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
            return Err(PipelineError::MalformedInput(format!(
                "bar {} timestamp is not after bar {}",
                i,
                i - 1
            )));
        }
    }
    Ok(())
}
