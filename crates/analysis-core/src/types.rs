use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::traits::{identifier_as_feature, is_identifier_column, unknown_column};
use crate::{AnalysisError, FeatureRow, GroupRow};

/// Out-of-range marker for a ratio that is missing or was not a finite number.
pub const SENTINEL: f64 = -9999.0;

/// Parse the date formats found in fundamentals and price files.
///
/// Accepts `2021-12-31`, `2021-12-31 00:00:00(+tz)` and `12/31/2021`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if raw.len() > 10 && raw.is_char_boundary(10) {
        if let Ok(date) = NaiveDate::parse_from_str(&raw[..10], "%Y-%m-%d") {
            return Some(date);
        }
    }
    NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()
}

/// Daily OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A ratio cell: a finite number or the explicit sentinel.
///
/// Serialized as a plain number, with the sentinel written as `-9999`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatioValue {
    Valid(f64),
    Sentinel,
}

impl RatioValue {
    /// Non-finite values and the sentinel itself both map to `Sentinel`.
    pub fn from_raw(raw: f64) -> Self {
        if !raw.is_finite() || raw == SENTINEL {
            RatioValue::Sentinel
        } else {
            RatioValue::Valid(raw)
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            RatioValue::Valid(v) => Some(*v),
            RatioValue::Sentinel => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, RatioValue::Sentinel)
    }

    pub fn to_raw(&self) -> f64 {
        self.value().unwrap_or(SENTINEL)
    }
}

impl Serialize for RatioValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_raw())
    }
}

impl<'de> Deserialize<'de> for RatioValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(RatioValue::from_raw)
    }
}

/// The canonical financial ratio columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RatioField {
    CurrentRatio,
    QuickRatio,
    CashRatio,
    DebtEquity,
    DebtRatio,
    NetMargin,
    GrossMargin,
    OperatingMargin,
    Roa,
    Roe,
    InterestCoverage,
    AssetTurnover,
    InventoryTurnover,
}

impl RatioField {
    pub const ALL: [RatioField; 13] = [
        RatioField::CurrentRatio,
        RatioField::QuickRatio,
        RatioField::CashRatio,
        RatioField::DebtEquity,
        RatioField::DebtRatio,
        RatioField::NetMargin,
        RatioField::GrossMargin,
        RatioField::OperatingMargin,
        RatioField::Roa,
        RatioField::Roe,
        RatioField::InterestCoverage,
        RatioField::AssetTurnover,
        RatioField::InventoryTurnover,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            RatioField::CurrentRatio => "current_ratio",
            RatioField::QuickRatio => "quick_ratio",
            RatioField::CashRatio => "cash_ratio",
            RatioField::DebtEquity => "debt_equity",
            RatioField::DebtRatio => "debt_ratio",
            RatioField::NetMargin => "net_margin",
            RatioField::GrossMargin => "gross_margin",
            RatioField::OperatingMargin => "operating_margin",
            RatioField::Roa => "roa",
            RatioField::Roe => "roe",
            RatioField::InterestCoverage => "interest_coverage",
            RatioField::AssetTurnover => "asset_turnover",
            RatioField::InventoryTurnover => "inventory_turnover",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column() == column)
    }

    pub fn columns() -> Vec<&'static str> {
        Self::ALL.iter().map(|f| f.column()).collect()
    }
}

impl fmt::Display for RatioField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// One value per [`RatioField`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioSet {
    // Liquidity
    pub current_ratio: RatioValue,
    pub quick_ratio: RatioValue,
    pub cash_ratio: RatioValue,
    // Leverage
    pub debt_equity: RatioValue,
    pub debt_ratio: RatioValue,
    // Profitability
    pub net_margin: RatioValue,
    pub gross_margin: RatioValue,
    pub operating_margin: RatioValue,
    pub roa: RatioValue,
    pub roe: RatioValue,
    // Efficiency
    pub interest_coverage: RatioValue,
    pub asset_turnover: RatioValue,
    pub inventory_turnover: RatioValue,
}

impl RatioSet {
    pub fn all_sentinel() -> Self {
        Self::from_fn(|_| RatioValue::Sentinel)
    }

    pub fn from_fn(mut f: impl FnMut(RatioField) -> RatioValue) -> Self {
        Self {
            current_ratio: f(RatioField::CurrentRatio),
            quick_ratio: f(RatioField::QuickRatio),
            cash_ratio: f(RatioField::CashRatio),
            debt_equity: f(RatioField::DebtEquity),
            debt_ratio: f(RatioField::DebtRatio),
            net_margin: f(RatioField::NetMargin),
            gross_margin: f(RatioField::GrossMargin),
            operating_margin: f(RatioField::OperatingMargin),
            roa: f(RatioField::Roa),
            roe: f(RatioField::Roe),
            interest_coverage: f(RatioField::InterestCoverage),
            asset_turnover: f(RatioField::AssetTurnover),
            inventory_turnover: f(RatioField::InventoryTurnover),
        }
    }

    pub fn get(&self, field: RatioField) -> RatioValue {
        match field {
            RatioField::CurrentRatio => self.current_ratio,
            RatioField::QuickRatio => self.quick_ratio,
            RatioField::CashRatio => self.cash_ratio,
            RatioField::DebtEquity => self.debt_equity,
            RatioField::DebtRatio => self.debt_ratio,
            RatioField::NetMargin => self.net_margin,
            RatioField::GrossMargin => self.gross_margin,
            RatioField::OperatingMargin => self.operating_margin,
            RatioField::Roa => self.roa,
            RatioField::Roe => self.roe,
            RatioField::InterestCoverage => self.interest_coverage,
            RatioField::AssetTurnover => self.asset_turnover,
            RatioField::InventoryTurnover => self.inventory_turnover,
        }
    }

    pub fn set(&mut self, field: RatioField, value: RatioValue) {
        let slot = match field {
            RatioField::CurrentRatio => &mut self.current_ratio,
            RatioField::QuickRatio => &mut self.quick_ratio,
            RatioField::CashRatio => &mut self.cash_ratio,
            RatioField::DebtEquity => &mut self.debt_equity,
            RatioField::DebtRatio => &mut self.debt_ratio,
            RatioField::NetMargin => &mut self.net_margin,
            RatioField::GrossMargin => &mut self.gross_margin,
            RatioField::OperatingMargin => &mut self.operating_margin,
            RatioField::Roa => &mut self.roa,
            RatioField::Roe => &mut self.roe,
            RatioField::InterestCoverage => &mut self.interest_coverage,
            RatioField::AssetTurnover => &mut self.asset_turnover,
            RatioField::InventoryTurnover => &mut self.inventory_turnover,
        };
        *slot = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (RatioField, RatioValue)> + '_ {
        RatioField::ALL.into_iter().map(move |f| (f, self.get(f)))
    }

    pub fn has_sentinel(&self) -> bool {
        self.iter().any(|(_, v)| v.is_sentinel())
    }
}

/// One row of the ratio table, keyed by `(ticker_symbol, period_ending)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRatioRecord {
    pub ticker_symbol: String,
    pub period_ending: NaiveDate,
    #[serde(flatten)]
    pub ratios: RatioSet,
}

impl FinancialRatioRecord {
    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.ticker_symbol, self.period_ending)
    }
}

impl FeatureRow for FinancialRatioRecord {
    fn feature(&self, column: &str) -> Result<Option<f64>, AnalysisError> {
        if is_identifier_column(column) {
            return Err(identifier_as_feature(column));
        }
        RatioField::from_column(column)
            .map(|field| self.ratios.get(field).value())
            .ok_or_else(|| unknown_column(column))
    }
}

impl GroupRow for FinancialRatioRecord {
    fn group_key(&self, column: &str) -> Result<String, AnalysisError> {
        match column {
            "ticker_symbol" | "Ticker.Symbol" => Ok(self.ticker_symbol.clone()),
            "period_ending" | "Period.Ending" => Ok(self.period_ending.to_string()),
            "year" => Ok(self.period_ending.year().to_string()),
            _ => Err(unknown_column(column)),
        }
    }
}

/// Indicator columns derived from price history, in output order.
pub const TECHNICAL_FEATURE_COLUMNS: &[&str] = &[
    "return_1d",
    "volatility_21d",
    "ma_20",
    "ma_50",
    "ma_200",
    "ema_20",
    "ema_50",
    "ema_200",
    "rsi",
    "macd",
    "macd_signal",
    "macd_histogram",
    "stoch_k",
    "stoch_d",
    "bb_upper",
    "bb_middle",
    "bb_lower",
    "obv",
];

/// A price bar plus its trailing-window indicators.
///
/// `None` marks positions where the indicator's lookback is not yet satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalFeatureRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub return_1d: Option<f64>,
    pub volatility_21d: Option<f64>,
    pub ma_20: Option<f64>,
    pub ma_50: Option<f64>,
    pub ma_200: Option<f64>,
    pub ema_20: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub obv: f64,
}

impl TechnicalFeatureRecord {
    pub fn column(&self, column: &str) -> Option<Option<f64>> {
        let value = match column {
            "open" => Some(self.open),
            "high" => Some(self.high),
            "low" => Some(self.low),
            "close" => Some(self.close),
            "volume" => Some(self.volume),
            "return_1d" => self.return_1d,
            "volatility_21d" => self.volatility_21d,
            "ma_20" => self.ma_20,
            "ma_50" => self.ma_50,
            "ma_200" => self.ma_200,
            "ema_20" => self.ema_20,
            "ema_50" => self.ema_50,
            "ema_200" => self.ema_200,
            "rsi" => self.rsi,
            "macd" => self.macd,
            "macd_signal" => self.macd_signal,
            "macd_histogram" => self.macd_histogram,
            "stoch_k" => self.stoch_k,
            "stoch_d" => self.stoch_d,
            "bb_upper" => self.bb_upper,
            "bb_middle" => self.bb_middle,
            "bb_lower" => self.bb_lower,
            "obv" => Some(self.obv),
            _ => return None,
        };
        Some(value)
    }
}

impl FeatureRow for TechnicalFeatureRecord {
    fn feature(&self, column: &str) -> Result<Option<f64>, AnalysisError> {
        if is_identifier_column(column) {
            return Err(identifier_as_feature(column));
        }
        self.column(column)
            .map(|v| v.filter(|x| x.is_finite()))
            .ok_or_else(|| unknown_column(column))
    }
}

impl GroupRow for TechnicalFeatureRecord {
    fn group_key(&self, column: &str) -> Result<String, AnalysisError> {
        match column {
            "date" | "Date" => Ok(self.date.to_string()),
            "year" => Ok(self.date.year().to_string()),
            _ => Err(unknown_column(column)),
        }
    }
}

/// Binary anomaly label: outlier = 1, normal = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AnomalyLabel {
    Normal,
    Outlier,
}

impl AnomalyLabel {
    pub fn is_outlier(&self) -> bool {
        matches!(self, AnomalyLabel::Outlier)
    }
}

impl From<AnomalyLabel> for u8 {
    fn from(label: AnomalyLabel) -> u8 {
        match label {
            AnomalyLabel::Normal => 0,
            AnomalyLabel::Outlier => 1,
        }
    }
}

impl TryFrom<u8> for AnomalyLabel {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(AnomalyLabel::Normal),
            1 => Ok(AnomalyLabel::Outlier),
            other => Err(format!("invalid anomaly label {}", other)),
        }
    }
}

impl fmt::Display for AnomalyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A row together with the anomaly label assigned relative to its cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Labeled<T> {
    #[serde(flatten)]
    pub record: T,
    pub anomaly: AnomalyLabel,
}

impl<T: FeatureRow> FeatureRow for Labeled<T> {
    fn feature(&self, column: &str) -> Result<Option<f64>, AnalysisError> {
        self.record.feature(column)
    }
}

impl<T: GroupRow> GroupRow for Labeled<T> {
    fn group_key(&self, column: &str) -> Result<String, AnalysisError> {
        if column == "anomaly" {
            return Ok(self.anomaly.to_string());
        }
        self.record.group_key(column)
    }
}

/// Two-sample mean comparison (Welch's t-test).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoSampleTestResult {
    pub value_column: String,
    pub group_column: String,
    pub group_1: String,
    pub group_2: String,
    pub n_1: usize,
    pub n_2: usize,
    pub mean_1: f64,
    pub mean_2: f64,
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// Outcome of an event-based back-test against a coin flip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalTestResult {
    pub signal_count: usize,
    pub success_count: usize,
    /// `None` when no signal fired.
    pub p_value: Option<f64>,
}

/// Named back-test → result, ordered by name.
pub type BacktestReport = BTreeMap<String, SignalTestResult>;

/// Two-sample results keyed by hypothesis name.
pub type HypothesisReport = BTreeMap<String, TwoSampleTestResult>;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(debt_equity: RatioValue) -> FinancialRatioRecord {
        let mut ratios = RatioSet::from_fn(|_| RatioValue::Valid(1.0));
        ratios.set(RatioField::DebtEquity, debt_equity);
        FinancialRatioRecord {
            ticker_symbol: "AAPL".to_string(),
            period_ending: NaiveDate::from_ymd_opt(2022, 9, 24).unwrap(),
            ratios,
        }
    }

    #[test]
    fn test_ratio_value_from_raw() {
        assert_eq!(RatioValue::from_raw(1.5), RatioValue::Valid(1.5));
        assert_eq!(RatioValue::from_raw(f64::INFINITY), RatioValue::Sentinel);
        assert_eq!(RatioValue::from_raw(f64::NAN), RatioValue::Sentinel);
        assert_eq!(RatioValue::from_raw(SENTINEL), RatioValue::Sentinel);
        assert_eq!(RatioValue::Sentinel.to_raw(), SENTINEL);
    }

    #[test]
    fn test_ratio_value_serializes_sentinel_as_number() {
        let json = serde_json::to_string(&RatioValue::Sentinel).unwrap();
        assert_eq!(json, "-9999.0");
        let back: RatioValue = serde_json::from_str(&json).unwrap();
        assert!(back.is_sentinel());
    }

    #[test]
    fn test_ratio_field_columns() {
        assert_eq!(RatioField::ALL.len(), 13);
        for field in RatioField::ALL {
            assert_eq!(RatioField::from_column(field.column()), Some(field));
        }
        assert_eq!(RatioField::from_column("pe_ratio"), None);
    }

    #[test]
    fn test_feature_lookup() {
        let row = record(RatioValue::Sentinel);
        assert_eq!(row.feature("roa").unwrap(), Some(1.0));
        assert_eq!(row.feature("debt_equity").unwrap(), None);
        assert!(row.feature("ticker_symbol").unwrap_err().is_schema());
        assert!(row.feature("Period.Ending").unwrap_err().is_schema());
        assert!(row.feature("nonexistent").unwrap_err().is_schema());
    }

    #[test]
    fn test_group_keys() {
        let labeled = Labeled {
            record: record(RatioValue::Valid(0.3)),
            anomaly: AnomalyLabel::Outlier,
        };
        assert_eq!(labeled.group_key("year").unwrap(), "2022");
        assert_eq!(labeled.group_key("anomaly").unwrap(), "1");
        assert_eq!(labeled.group_key("ticker_symbol").unwrap(), "AAPL");
    }

    #[test]
    fn test_anomaly_label_serialization() {
        let labeled = Labeled {
            record: record(RatioValue::Valid(0.3)),
            anomaly: AnomalyLabel::Normal,
        };
        let json = serde_json::to_value(&labeled).unwrap();
        assert_eq!(json["anomaly"], 0);
        assert_eq!(json["debt_equity"], 0.3);
        let back: Labeled<FinancialRatioRecord> = serde_json::from_value(json).unwrap();
        assert_eq!(back, labeled);
        assert!(AnomalyLabel::try_from(2u8).is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 12, 31);
        assert_eq!(parse_date("2021-12-31"), expected);
        assert_eq!(parse_date("2021-12-31 00:00:00+00:00"), expected);
        assert_eq!(parse_date("12/31/2021"), expected);
        assert_eq!(parse_date("not a date"), None);
    }
}
