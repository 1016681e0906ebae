use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

const FEATURES_SUFFIX: &str = "_historical_features.csv";
const BACKTESTS_SUFFIX: &str = "_hypothesis_results.json";
const INDICATOR_HISTORY_SUFFIX: &str = "_taapi_history.json";
const PRICES_SUFFIX: &str = ".csv";

/// Where the pipeline's inputs and outputs live under one data directory.
///
/// ```text
/// fundamentals.csv
/// prices/{T}.csv
/// indicator_history/{T}_taapi_history.json
/// derived/ratios.csv
/// derived/anomalies.csv
/// derived/hypothesis_results.json
/// derived/features/{T}_historical_features.csv
/// derived/backtests/{T}_hypothesis_results.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fundamentals(&self) -> PathBuf {
        self.root.join("fundamentals.csv")
    }

    pub fn prices_dir(&self) -> PathBuf {
        self.root.join("prices")
    }

    pub fn prices(&self, ticker: &str) -> PathBuf {
        self.prices_dir().join(format!("{}{}", ticker, PRICES_SUFFIX))
    }

    pub fn indicator_history_dir(&self) -> PathBuf {
        self.root.join("indicator_history")
    }

    pub fn indicator_history(&self, ticker: &str) -> PathBuf {
        self.indicator_history_dir()
            .join(format!("{}{}", ticker, INDICATOR_HISTORY_SUFFIX))
    }

    pub fn derived_dir(&self) -> PathBuf {
        self.root.join("derived")
    }

    pub fn ratios(&self) -> PathBuf {
        self.derived_dir().join("ratios.csv")
    }

    pub fn anomalies(&self) -> PathBuf {
        self.derived_dir().join("anomalies.csv")
    }

    pub fn hypothesis_results(&self) -> PathBuf {
        self.derived_dir().join("hypothesis_results.json")
    }

    pub fn features_dir(&self) -> PathBuf {
        self.derived_dir().join("features")
    }

    pub fn features(&self, ticker: &str) -> PathBuf {
        self.features_dir().join(format!("{}{}", ticker, FEATURES_SUFFIX))
    }

    pub fn backtests_dir(&self) -> PathBuf {
        self.derived_dir().join("backtests")
    }

    pub fn backtests(&self, ticker: &str) -> PathBuf {
        self.backtests_dir().join(format!("{}{}", ticker, BACKTESTS_SUFFIX))
    }

    /// Create every output directory.
    pub fn ensure_output_dirs(&self) -> Result<(), StoreError> {
        for dir in [self.derived_dir(), self.features_dir(), self.backtests_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Tickers with a price file, sorted.
    pub fn price_tickers(&self) -> Vec<String> {
        tickers_in(&self.prices_dir(), PRICES_SUFFIX)
    }

    pub fn feature_tickers(&self) -> Vec<String> {
        tickers_in(&self.features_dir(), FEATURES_SUFFIX)
    }

    pub fn backtest_tickers(&self) -> Vec<String> {
        tickers_in(&self.backtests_dir(), BACKTESTS_SUFFIX)
    }
}

/// File stems in `dir` ending in `suffix`. A missing directory has none.
fn tickers_in(dir: &Path, suffix: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut tickers: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let ticker = name.strip_suffix(suffix)?;
            (!ticker.is_empty()).then(|| ticker.to_string())
        })
        .collect();
    tickers.sort();
    tickers.dedup();
    tickers
}
