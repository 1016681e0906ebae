use analysis_core::{AnalysisError, PriceBar, TechnicalFeatureRecord};

use crate::indicators::*;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const STOCH_K: usize = 14;
pub const STOCH_D: usize = 3;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_WIDTH: f64 = 2.0;
pub const VOLATILITY_WINDOW: usize = 21;

/// Feature subset scored by the per-ticker anomaly detector.
pub const ANOMALY_FEATURES: &[&str] = &["return_1d", "volatility_21d", "rsi", "macd", "stoch_k"];

/// Derives momentum, trend and volatility indicators from one ticker's bars.
#[derive(Debug, Clone, Default)]
pub struct TechnicalFeatureComputer;

impl TechnicalFeatureComputer {
    pub fn new() -> Self {
        Self
    }

    /// Bars must be strictly date-ordered with finite prices and non-negative volume.
    pub fn validate(bars: &[PriceBar]) -> Result<(), AnalysisError> {
        for (i, bar) in bars.iter().enumerate() {
            let fields = [
                ("open", bar.open),
                ("high", bar.high),
                ("low", bar.low),
                ("close", bar.close),
                ("volume", bar.volume),
            ];
            if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
                return Err(AnalysisError::DataQuality(format!(
                    "{}: non-finite {} ({})",
                    bar.date, name, value
                )));
            }
            if bar.volume < 0.0 {
                return Err(AnalysisError::DataQuality(format!(
                    "{}: negative volume {}",
                    bar.date, bar.volume
                )));
            }
            if i > 0 && bars[i - 1].date >= bar.date {
                let kind = if bars[i - 1].date == bar.date {
                    "duplicate"
                } else {
                    "out-of-order"
                };
                return Err(AnalysisError::DataQuality(format!(
                    "{} bar date {}",
                    kind, bar.date
                )));
            }
        }
        Ok(())
    }

    /// One output record per input bar.
    pub fn compute(&self, bars: &[PriceBar]) -> Result<Vec<TechnicalFeatureRecord>, AnalysisError> {
        Self::validate(bars)?;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let return_1d = returns(&closes);
        let volatility_21d = rolling_std(&return_1d, VOLATILITY_WINDOW);
        let ma_20 = sma(&closes, 20);
        let ma_50 = sma(&closes, 50);
        let ma_200 = sma(&closes, 200);
        let ema_20 = ema(&closes, 20);
        let ema_50 = ema(&closes, 50);
        let ema_200 = ema(&closes, 200);
        let rsi_values = rsi(&closes, RSI_PERIOD);
        let macd_result = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let stoch = stochastic(bars, STOCH_K, STOCH_D);
        let bands = bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_WIDTH);
        let obv_values = obv(bars);

        let records = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| TechnicalFeatureRecord {
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                return_1d: return_1d[i],
                volatility_21d: volatility_21d[i],
                ma_20: ma_20[i],
                ma_50: ma_50[i],
                ma_200: ma_200[i],
                ema_20: ema_20[i],
                ema_50: ema_50[i],
                ema_200: ema_200[i],
                rsi: rsi_values[i],
                macd: macd_result.macd_line[i],
                macd_signal: macd_result.signal_line[i],
                macd_histogram: macd_result.histogram[i],
                stoch_k: stoch.k[i],
                stoch_d: stoch.d[i],
                bb_upper: bands.upper[i],
                bb_middle: bands.middle[i],
                bb_lower: bands.lower[i],
                obv: obv_values[i],
            })
            .collect();

        Ok(records)
    }
}
