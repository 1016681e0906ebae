use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use analysis_core::{
    AnomalyLabel, BacktestReport, FinancialRatioRecord, Labeled, PriceBar, RatioSet,
    TechnicalFeatureRecord,
};

use crate::io;
use crate::layout::DataLayout;
use crate::StoreError;

/// One kind of per-company data the store merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Ratios,
    Anomalies,
    Backtests,
    HistoricalFeatures,
    PriceHistory,
}

impl DataSource {
    pub const ALL: [DataSource; 5] = [
        DataSource::Ratios,
        DataSource::Anomalies,
        DataSource::Backtests,
        DataSource::HistoricalFeatures,
        DataSource::PriceHistory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Ratios => "ratios",
            DataSource::Anomalies => "anomalies",
            DataSource::Backtests => "backtests",
            DataSource::HistoricalFeatures => "historical_features",
            DataSource::PriceHistory => "price_history",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reporting period of a company after joining ratios with anomaly labels.
///
/// Either side may be absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialRow {
    pub period_ending: NaiveDate,
    #[serde(flatten)]
    pub ratios: Option<RatioSet>,
    pub anomaly: Option<AnomalyLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyRecord {
    pub ticker: String,
    /// Ordered by period.
    pub financials: Vec<FinancialRow>,
    pub historical_features: Vec<Labeled<TechnicalFeatureRecord>>,
    pub backtests: Option<BacktestReport>,
    pub stock_data: Vec<PriceBar>,
    pub missing_sources: BTreeSet<DataSource>,
}

impl CompanyRecord {
    fn new(ticker: String) -> Self {
        Self {
            ticker,
            financials: Vec::new(),
            historical_features: Vec::new(),
            backtests: None,
            stock_data: Vec::new(),
            missing_sources: BTreeSet::new(),
        }
    }

    /// Sources that contributed data for this company.
    pub fn data_types(&self) -> Vec<DataSource> {
        DataSource::ALL
            .into_iter()
            .filter(|s| self.has(*s))
            .collect()
    }

    pub fn has(&self, source: DataSource) -> bool {
        !self.missing_sources.contains(&source)
    }
}

/// Collects per-source tables before they are merged into a store.
#[derive(Debug, Default)]
pub struct CompanyDataStoreBuilder {
    ratios: Vec<FinancialRatioRecord>,
    anomalies: Vec<Labeled<FinancialRatioRecord>>,
    backtests: BTreeMap<String, BacktestReport>,
    features: BTreeMap<String, Vec<Labeled<TechnicalFeatureRecord>>>,
    prices: BTreeMap<String, Vec<PriceBar>>,
}

fn key(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

impl CompanyDataStoreBuilder {
    pub fn ratios(mut self, rows: Vec<FinancialRatioRecord>) -> Self {
        self.ratios = rows;
        self
    }

    pub fn anomalies(mut self, rows: Vec<Labeled<FinancialRatioRecord>>) -> Self {
        self.anomalies = rows;
        self
    }

    pub fn backtests(mut self, ticker: &str, report: BacktestReport) -> Self {
        self.backtests.insert(key(ticker), report);
        self
    }

    pub fn historical_features(mut self, ticker: &str, rows: Vec<Labeled<TechnicalFeatureRecord>>) -> Self {
        self.features.insert(key(ticker), rows);
        self
    }

    pub fn price_history(mut self, ticker: &str, bars: Vec<PriceBar>) -> Self {
        self.prices.insert(key(ticker), bars);
        self
    }

    /// Outer-join ratios and anomaly labels on (ticker, period) and attach
    /// every per-ticker source. Every ticker seen in any source gets a record.
    pub fn build(self) -> CompanyDataStore {
        let mut periods: BTreeMap<String, BTreeMap<NaiveDate, FinancialRow>> = BTreeMap::new();
        let mut seen: BTreeMap<String, BTreeSet<DataSource>> = BTreeMap::new();

        for record in self.ratios {
            let ticker = key(&record.ticker_symbol);
            seen.entry(ticker.clone()).or_default().insert(DataSource::Ratios);
            let row = periods
                .entry(ticker)
                .or_default()
                .entry(record.period_ending)
                .or_insert_with(|| FinancialRow {
                    period_ending: record.period_ending,
                    ratios: None,
                    anomaly: None,
                });
            row.ratios = Some(record.ratios);
        }

        for labeled in self.anomalies {
            let ticker = key(&labeled.record.ticker_symbol);
            seen.entry(ticker.clone()).or_default().insert(DataSource::Anomalies);
            let row = periods
                .entry(ticker)
                .or_default()
                .entry(labeled.record.period_ending)
                .or_insert_with(|| FinancialRow {
                    period_ending: labeled.record.period_ending,
                    ratios: None,
                    anomaly: None,
                });
            row.anomaly = Some(labeled.anomaly);
            // Anomaly rows carry the same ratio values
            row.ratios.get_or_insert(labeled.record.ratios);
        }

        for ticker in self.backtests.keys() {
            seen.entry(ticker.clone()).or_default().insert(DataSource::Backtests);
        }
        for ticker in self.features.keys() {
            seen.entry(ticker.clone()).or_default().insert(DataSource::HistoricalFeatures);
        }
        for ticker in self.prices.keys() {
            seen.entry(ticker.clone()).or_default().insert(DataSource::PriceHistory);
        }

        let mut backtests = self.backtests;
        let mut features = self.features;
        let mut prices = self.prices;

        let companies = seen
            .into_iter()
            .map(|(ticker, present)| {
                let mut record = CompanyRecord::new(ticker.clone());
                record.financials = periods.remove(&ticker).map(|p| p.into_values().collect()).unwrap_or_default();
                record.backtests = backtests.remove(&ticker);
                record.historical_features = features.remove(&ticker).unwrap_or_default();
                record.stock_data = prices.remove(&ticker).unwrap_or_default();
                record.missing_sources = DataSource::ALL
                    .into_iter()
                    .filter(|s| !present.contains(s))
                    .collect();
                (ticker, record)
            })
            .collect();

        CompanyDataStore { companies }
    }
}

/// Immutable per-ticker view over every derived table.
#[derive(Debug, Clone, Default)]
pub struct CompanyDataStore {
    companies: BTreeMap<String, CompanyRecord>,
}

impl CompanyDataStore {
    pub fn builder() -> CompanyDataStoreBuilder {
        CompanyDataStoreBuilder::default()
    }

    /// Look up a company; the ticker is trimmed and upper-cased first.
    pub fn get(&self, ticker: &str) -> Option<&CompanyRecord> {
        self.companies.get(&key(ticker))
    }

    /// Tickers in sorted order.
    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.companies.keys().map(String::as_str)
    }

    pub fn companies(&self) -> impl Iterator<Item = &CompanyRecord> {
        self.companies.values()
    }

    pub fn len(&self) -> usize {
        self.companies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
    }

    /// Populate from the derived files under `layout`.
    ///
    /// Absent or malformed files are logged and leave their source missing;
    /// loading itself never fails.
    pub fn load(layout: &DataLayout) -> Self {
        let mut builder = Self::builder();

        let ratios = load_or_warn("ratio table", io::read_ratios(&layout.ratios()));
        let anomalies = load_or_warn("anomaly table", io::read_anomalies(&layout.anomalies()));
        if ratios.is_none() && anomalies.is_none() {
            tracing::warn!(
                "Neither ratio nor anomaly table found under {}",
                layout.root().display()
            );
        }
        builder = builder
            .ratios(ratios.unwrap_or_default())
            .anomalies(anomalies.unwrap_or_default());

        for ticker in layout.backtest_tickers() {
            if let Some(report) = load_or_warn("back-tests", io::read_json(&layout.backtests(&ticker))) {
                builder = builder.backtests(&ticker, report);
            }
        }
        for ticker in layout.feature_tickers() {
            if let Some(rows) = load_or_warn("features", io::read_features(&layout.features(&ticker))) {
                builder = builder.historical_features(&ticker, rows);
            }
        }
        for ticker in layout.price_tickers() {
            if let Some(bars) = load_or_warn("prices", io::read_prices(&layout.prices(&ticker))) {
                builder = builder.price_history(&ticker, bars);
            }
        }

        let store = builder.build();
        tracing::info!(
            "Loaded company store from {}: {} companies",
            layout.root().display(),
            store.len()
        );
        store
    }
}

fn load_or_warn<T>(what: &str, result: Result<T, StoreError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_not_found() => {
            tracing::warn!("No {}: {}", what, e);
            None
        }
        Err(e) => {
            tracing::warn!("Skipping unreadable {}: {}", what, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{RatioValue, SignalTestResult};
    use std::fs;

    fn ratio(ticker: &str, year: i32, value: f64) -> FinancialRatioRecord {
        FinancialRatioRecord {
            ticker_symbol: ticker.to_string(),
            period_ending: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
            ratios: RatioSet::from_fn(|_| RatioValue::Valid(value)),
        }
    }

    fn labeled(ticker: &str, year: i32, outlier: bool) -> Labeled<FinancialRatioRecord> {
        Labeled {
            record: ratio(ticker, year, 0.0),
            anomaly: if outlier { AnomalyLabel::Outlier } else { AnomalyLabel::Normal },
        }
    }

    fn bar(day: u32) -> PriceBar {
        PriceBar {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn test_outer_join_keeps_unmatched_rows() {
        let store = CompanyDataStore::builder()
            .ratios(vec![ratio("AAPL", 2021, 1.0), ratio("AAPL", 2022, 2.0)])
            .anomalies(vec![labeled("AAPL", 2022, true), labeled("AAPL", 2023, false)])
            .build();

        let aapl = store.get("aapl").unwrap();
        let years: Vec<i32> = aapl.financials.iter().map(|r| chrono::Datelike::year(&r.period_ending)).collect();
        assert_eq!(years, vec![2021, 2022, 2023]);

        assert!(aapl.financials[0].ratios.is_some());
        assert_eq!(aapl.financials[0].anomaly, None);
        assert_eq!(aapl.financials[1].anomaly, Some(AnomalyLabel::Outlier));
        assert_eq!(aapl.financials[1].ratios.unwrap().roa, RatioValue::Valid(2.0));
        assert_eq!(aapl.financials[2].anomaly, Some(AnomalyLabel::Normal));
        assert!(aapl.financials[2].ratios.is_some());
    }

    #[test]
    fn test_every_ticker_from_any_source() {
        let store = CompanyDataStore::builder()
            .ratios(vec![ratio("AAPL", 2022, 1.0)])
            .anomalies(vec![labeled("MSFT", 2022, false)])
            .price_history("nvda", vec![bar(2), bar(3)])
            .backtests("TSLA", BacktestReport::new())
            .build();

        assert_eq!(store.tickers().collect::<Vec<_>>(), vec!["AAPL", "MSFT", "NVDA", "TSLA"]);

        let nvda = store.get("NVDA").unwrap();
        assert!(nvda.financials.is_empty());
        assert_eq!(nvda.stock_data.len(), 2);
        assert_eq!(nvda.data_types(), vec![DataSource::PriceHistory]);

        let aapl = store.get("AAPL").unwrap();
        assert!(aapl.missing_sources.contains(&DataSource::Anomalies));
        assert!(!aapl.missing_sources.contains(&DataSource::Ratios));
        assert!(store.get("GOOG").is_none());
    }

    #[test]
    fn test_financial_row_json_flattens_ratios() {
        let row = FinancialRow {
            period_ending: NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
            ratios: Some(RatioSet::all_sentinel()),
            anomaly: Some(AnomalyLabel::Outlier),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["roa"], -9999.0);
        assert_eq!(json["anomaly"], 1);
        assert_eq!(json["period_ending"], "2022-12-31");
    }

    #[test]
    fn test_load_from_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        io::write_ratios(&layout.ratios(), &[ratio("AAPL", 2022, 1.0)]).unwrap();
        io::write_anomalies(&layout.anomalies(), &[labeled("AAPL", 2022, true)]).unwrap();

        let mut report = BacktestReport::new();
        report.insert(
            "RSI".to_string(),
            SignalTestResult { signal_count: 2, success_count: 1, p_value: Some(0.75) },
        );
        io::write_json(&layout.backtests("AAPL"), &report).unwrap();

        fs::create_dir_all(layout.prices_dir()).unwrap();
        fs::write(layout.prices("MSFT"), "Date,Open,High,Low,Close,Volume\n2024-01-02,1,2,0.5,1.5,100\n").unwrap();
        // malformed file is skipped, not fatal
        fs::write(layout.prices("BAD"), "Date,Open,High,Low,Close,Volume\n2024-01-02,x,2,0.5,1.5,100\n").unwrap();

        let store = CompanyDataStore::load(&layout);
        assert_eq!(store.len(), 2);

        let aapl = store.get("AAPL").unwrap();
        assert_eq!(aapl.financials.len(), 1);
        assert_eq!(aapl.financials[0].anomaly, Some(AnomalyLabel::Outlier));
        assert_eq!(aapl.backtests.as_ref().unwrap()["RSI"].signal_count, 2);
        assert!(aapl.missing_sources.contains(&DataSource::PriceHistory));

        let msft = store.get("MSFT").unwrap();
        assert_eq!(msft.stock_data.len(), 1);
        assert!(store.get("BAD").is_none());
    }

    #[test]
    fn test_load_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = CompanyDataStore::load(&DataLayout::new(dir.path()));
        assert!(store.is_empty());
    }
}
