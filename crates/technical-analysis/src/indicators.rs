//! Trailing-window indicators.
//!
//! Every function returns a vector aligned 1:1 with its input; positions
//! before the lookback is satisfied are `None`.

use analysis_core::stats::{mean, std_dev};
use analysis_core::PriceBar;

/// Apply `f` to each full window of defined values.
pub fn rolling(
    data: &[Option<f64>],
    period: usize,
    f: impl Fn(&[f64]) -> f64,
) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let mut window = Vec::with_capacity(period);
    for i in period - 1..data.len() {
        window.clear();
        window.extend(data[i + 1 - period..=i].iter().flatten());
        if window.len() == period {
            result[i] = Some(f(&window));
        }
    }
    result
}

fn defined(data: &[f64]) -> Vec<Option<f64>> {
    data.iter().map(|v| Some(*v)).collect()
}

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling(&defined(data), period, mean)
}

/// Rolling sample (n - 1) standard deviation
pub fn rolling_std(data: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(data, period, std_dev)
}

/// Recursive EMA over a possibly-gapped series, seeded with its first defined
/// value. Undefined inputs leave the state untouched.
fn ema_state(data: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut state: Option<f64> = None;
    data.iter()
        .map(|value| {
            let value = (*value)?;
            let next = match state {
                None => value,
                Some(prev) => (value - prev) * multiplier + prev,
            };
            state = Some(next);
            Some(next)
        })
        .collect()
}

/// Mask the first `period - 1` defined outputs after the series starts.
fn mask_warmup(values: Vec<Option<f64>>, source: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let start = match source.iter().position(|v| v.is_some()) {
        Some(start) => start,
        None => return values,
    };
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| if i + 1 >= start + period { v } else { None })
        .collect()
}

/// Exponential Moving Average
///
/// Smoothing factor `2 / (period + 1)`, seeded with the first value (not an
/// SMA). Values are reported once `period` inputs have been seen.
pub fn ema(data: &[f64], period: usize) -> Vec<Option<f64>> {
    ema_of(&defined(data), period)
}

/// EMA of a series that only becomes defined part-way through.
pub fn ema_of(data: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; data.len()];
    }
    mask_warmup(ema_state(data, period), data, period)
}

/// Relative Strength Index (Wilder smoothing)
///
/// Seeded with the simple average of the first `period` gains and losses;
/// the first value lands at index `period`. Saturates at 100 when the
/// average loss is zero.
pub fn rsi(data: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);

    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    result[period] = Some(rsi_value(avg_gain, avg_loss));

    // gains[i] is the change into bar i + 1
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        result[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }

    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<Option<f64>>,
    pub signal_line: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// MACD line = EMA(fast) - EMA(slow), defined once `slow` bars exist.
/// The signal line is an EMA of the MACD line seeded on its first defined value.
pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    let empty = || vec![None; data.len()];
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || slow_period < fast_period {
        return MacdResult { macd_line: empty(), signal_line: empty(), histogram: empty() };
    }

    let source = defined(data);
    let ema_fast = ema_state(&source, fast_period);
    let ema_slow = ema_state(&source, slow_period);

    let macd_raw: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let macd_line = mask_warmup(macd_raw, &source, slow_period);

    let signal_line = ema_of(&macd_line, signal_period);

    let histogram = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// SMA(period) +/- `std_dev` rolling sample standard deviations.
pub fn bollinger_bands(data: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = sma(data, period);
    let spread = rolling_std(&defined(data), period);

    let band = |sign: f64| -> Vec<Option<f64>> {
        middle
            .iter()
            .zip(&spread)
            .map(|(m, s)| Some((*m)? + sign * std_dev * (*s)?))
            .collect()
    };

    BollingerBands {
        upper: band(1.0),
        lower: band(-1.0),
        middle,
    }
}

/// Stochastic Oscillator
pub struct StochasticResult {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

/// %K over `k_period` bars, %D as a `d_period` SMA of %K.
/// A flat high/low range reads as 50.
pub fn stochastic(bars: &[PriceBar], k_period: usize, d_period: usize) -> StochasticResult {
    let mut k_values = vec![None; bars.len()];

    if k_period > 0 && bars.len() >= k_period {
        for i in k_period - 1..bars.len() {
            let slice = &bars[i + 1 - k_period..=i];
            let highest = slice.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
            let lowest = slice.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

            let k = if highest == lowest {
                50.0
            } else {
                100.0 * (bars[i].close - lowest) / (highest - lowest)
            };

            k_values[i] = Some(k);
        }
    }

    let d_values = rolling(&k_values, d_period, mean);

    StochasticResult {
        k: k_values,
        d: d_values,
    }
}

/// On-Balance Volume, starting from 0.
pub fn obv(bars: &[PriceBar]) -> Vec<f64> {
    if bars.is_empty() {
        return vec![];
    }

    let mut obv_values = Vec::with_capacity(bars.len());
    obv_values.push(0.0);

    for i in 1..bars.len() {
        let prev_obv = obv_values[i - 1];
        let new_obv = if bars[i].close > bars[i - 1].close {
            prev_obv + bars[i].volume
        } else if bars[i].close < bars[i - 1].close {
            prev_obv - bars[i].volume
        } else {
            prev_obv
        };
        obv_values.push(new_obv);
    }

    obv_values
}

/// Simple one-period returns; undefined at index 0 and after a zero price.
pub fn returns(data: &[f64]) -> Vec<Option<f64>> {
    let mut result = vec![None; data.len()];
    for i in 1..data.len() {
        if data[i - 1] != 0.0 {
            result[i] = Some((data[i] - data[i - 1]) / data[i - 1]);
        }
    }
    result
}
