//! Event back-tests of classic indicator signals.
//!
//! Each test walks a date-ordered indicator series, fires when its condition
//! switches on, and checks whether the close a fixed number of bars later is
//! higher. The hit count is scored against a fair coin.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, DiscreteCDF};

use analysis_core::{AnalysisError, BacktestReport, SignalTestResult, TechnicalFeatureRecord};

pub const RSI_OVERSOLD: f64 = 30.0;
pub const STOCH_OVERSOLD: f64 = 20.0;
pub const OBV_WINDOW: usize = 5;
pub const OBV_TREND_MIN: f64 = 0.02;
pub const PRICE_TREND_MAX: f64 = 0.01;

/// One bar of indicator history.
///
/// Field names match the stored indicator-history JSON records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorPoint {
    pub timestamp: Option<String>,
    pub close: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub obv: Option<f64>,
}

impl From<&TechnicalFeatureRecord> for IndicatorPoint {
    fn from(record: &TechnicalFeatureRecord) -> Self {
        Self {
            timestamp: Some(record.date.to_string()),
            close: Some(record.close),
            rsi: record.rsi,
            macd: record.macd,
            macd_signal: record.macd_signal,
            ema_50: record.ema_50,
            ema_200: record.ema_200,
            stoch_k: record.stoch_k,
            stoch_d: record.stoch_d,
            bb_upper: record.bb_upper,
            bb_middle: record.bb_middle,
            bb_lower: record.bb_lower,
            obv: Some(record.obv),
        }
    }
}

pub fn points_from_features(records: &[TechnicalFeatureRecord]) -> Vec<IndicatorPoint> {
    records.iter().map(IndicatorPoint::from).collect()
}

/// `a` strictly below `b` on the previous bar and strictly above on this one.
fn crossed_above(prev: (Option<f64>, Option<f64>), curr: (Option<f64>, Option<f64>)) -> bool {
    match (prev, curr) {
        ((Some(pa), Some(pb)), (Some(ca), Some(cb))) => pa < pb && ca > cb,
        _ => false,
    }
}

/// Bars where `condition` holds now but did not on the previous bar.
fn edges(len: usize, condition: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut previous = false;
    let mut fired = Vec::new();
    for i in 0..len {
        let current = condition(i);
        if current && !previous {
            fired.push(i);
        }
        previous = current;
    }
    fired
}

/// Count signals and hits. A signal at `i` is judged by comparing the close
/// at `i + offset + horizon` with the close at `i + offset`; signals without
/// that forward bar are dropped.
fn score(points: &[IndicatorPoint], signals: &[usize], offset: usize, horizon: usize) -> SignalTestResult {
    let mut signal_count = 0;
    let mut success_count = 0;

    for &i in signals {
        let entry = i + offset;
        let exit = entry + horizon;
        let (Some(entry_close), Some(exit_close)) = (
            points.get(entry).and_then(|p| p.close),
            points.get(exit).and_then(|p| p.close),
        ) else {
            continue;
        };
        signal_count += 1;
        if exit_close > entry_close {
            success_count += 1;
        }
    }

    SignalTestResult {
        signal_count,
        success_count,
        p_value: binomial_p_value(success_count, signal_count),
    }
}

/// One-sided binomial test against p = 0.5: `P(X >= successes)`.
///
/// `None` when there were no trials.
pub fn binomial_p_value(successes: usize, trials: usize) -> Option<f64> {
    if trials == 0 {
        return None;
    }
    if successes == 0 {
        return Some(1.0);
    }
    let dist = Binomial::new(0.5, trials as u64).ok()?;
    Some(dist.sf(successes as u64 - 1).clamp(0.0, 1.0))
}

/// RSI drops below 30; next-bar close.
pub fn rsi_oversold(points: &[IndicatorPoint]) -> SignalTestResult {
    let signals = edges(points.len(), |i| points[i].rsi.is_some_and(|r| r < RSI_OVERSOLD));
    score(points, &signals, 0, 1)
}

/// MACD crosses above its signal line; close two bars later.
pub fn macd_bullish_cross(points: &[IndicatorPoint]) -> SignalTestResult {
    let signals: Vec<usize> = (1..points.len())
        .filter(|&i| {
            crossed_above(
                (points[i - 1].macd, points[i - 1].macd_signal),
                (points[i].macd, points[i].macd_signal),
            )
        })
        .collect();
    score(points, &signals, 0, 2)
}

/// EMA(50) crosses above EMA(200); close seven bars later.
pub fn ema_golden_cross(points: &[IndicatorPoint]) -> SignalTestResult {
    let signals: Vec<usize> = (1..points.len())
        .filter(|&i| {
            crossed_above(
                (points[i - 1].ema_50, points[i - 1].ema_200),
                (points[i].ema_50, points[i].ema_200),
            )
        })
        .collect();
    score(points, &signals, 0, 7)
}

/// %K crosses above %D while %K is below 20; next-bar close.
pub fn stochastic_bullish_cross(points: &[IndicatorPoint]) -> SignalTestResult {
    let signals: Vec<usize> = (1..points.len())
        .filter(|&i| {
            crossed_above(
                (points[i - 1].stoch_k, points[i - 1].stoch_d),
                (points[i].stoch_k, points[i].stoch_d),
            ) && points[i].stoch_k.is_some_and(|k| k < STOCH_OVERSOLD)
        })
        .collect();
    score(points, &signals, 0, 1)
}

/// Close falls below the lower Bollinger band; next-bar close.
pub fn bollinger_bounce(points: &[IndicatorPoint]) -> SignalTestResult {
    let signals = edges(points.len(), |i| match (points[i].close, points[i].bb_lower) {
        (Some(close), Some(lower)) => close < lower,
        _ => false,
    });
    score(points, &signals, 0, 1)
}

/// Sum of one-bar percentage changes over `values`, skipping undefined or
/// non-finite terms.
fn pct_change_sum(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let values: Vec<Option<f64>> = values.collect();
    if values.iter().any(Option::is_none) {
        return None;
    }
    Some(
        values
            .windows(2)
            .filter_map(|w| match (w[0], w[1]) {
                (Some(a), Some(b)) if a != 0.0 => Some((b - a) / a),
                _ => None,
            })
            .filter(|v| v.is_finite())
            .sum(),
    )
}

/// Volume trend up while price is flat or down over a `window`-bar span.
/// Judged from the end of the window, three bars ahead.
pub fn obv_divergence(points: &[IndicatorPoint], window: usize) -> SignalTestResult {
    let condition = |i: usize| {
        if i + window >= points.len() {
            return false;
        }
        let span = &points[i..=i + window];
        let obv_trend = pct_change_sum(span.iter().map(|p| p.obv));
        let price_trend = pct_change_sum(span.iter().map(|p| p.close));
        match (obv_trend, price_trend) {
            (Some(obv), Some(price)) => obv > OBV_TREND_MIN && price <= PRICE_TREND_MAX,
            _ => false,
        }
    };
    let signals = edges(points.len(), condition);
    score(points, &signals, window, 3)
}

pub const RSI_TEST: &str = "RSI";
pub const MACD_TEST: &str = "MACD";
pub const EMA_TEST: &str = "EMA Golden Cross";
pub const STOCH_TEST: &str = "Stochastic Crossover";
pub const BOLLINGER_TEST: &str = "Bollinger Bounce";
pub const OBV_TEST: &str = "OBV Divergence";

/// Run all six tests over one ticker's history.
pub fn run_all_backtests(points: &[IndicatorPoint]) -> BacktestReport {
    let mut report = BacktestReport::new();
    report.insert(RSI_TEST.to_string(), rsi_oversold(points));
    report.insert(MACD_TEST.to_string(), macd_bullish_cross(points));
    report.insert(EMA_TEST.to_string(), ema_golden_cross(points));
    report.insert(STOCH_TEST.to_string(), stochastic_bullish_cross(points));
    report.insert(BOLLINGER_TEST.to_string(), bollinger_bounce(points));
    report.insert(OBV_TEST.to_string(), obv_divergence(points, OBV_WINDOW));

    let signals: usize = report.values().map(|r| r.signal_count).sum();
    tracing::debug!("Back-tests over {} bars fired {} signals", points.len(), signals);
    report
}

/// Back-tests need a close on at least two bars to judge anything.
pub fn ensure_backtestable(points: &[IndicatorPoint]) -> Result<(), AnalysisError> {
    let closes = points.iter().filter(|p| p.close.is_some()).count();
    if closes < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "indicator history has {} bars with a close",
            closes
        )));
    }
    Ok(())
}
