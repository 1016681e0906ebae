//! data-loader: Run the offline feature pipeline over a data directory.
//!
//! Fundamentals are turned into scaled ratios, anomaly labels and the ratio
//! hypothesis studies. Every ticker with a price file then gets technical
//! features, feature anomaly labels and signal back-tests.
//!
//! Usage:
//!   cargo run -p data-loader -- --data-dir ./data
//!   cargo run -p data-loader -- --tickers AAPL MSFT
//!   cargo run -p data-loader -- --dry-run

use std::path::PathBuf;

use anyhow::{bail, Context};
use rayon::prelude::*;

use analysis_core::{normalize_ticker, RatioField};
use anomaly_detector::{AnomalyConfig, AnomalyDetector, InvalidRowPolicy};
use company_store::{io, DataLayout};
use fundamental_analysis::{unique_tickers, RatioComputer};
use quant_analysis::{ensure_backtestable, points_from_features, run_all_backtests, HypothesisSuite, IndicatorPoint};
use technical_analysis::{TechnicalFeatureComputer, ANOMALY_FEATURES};

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone)]
struct LoaderConfig {
    data_dir: PathBuf,
    dry_run: bool,
    tickers: Option<Vec<String>>,
    anomaly: AnomalyConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}

impl LoaderConfig {
    /// Environment first, then command-line flags on top.
    fn from_env_and_args(args: &[String]) -> anyhow::Result<Self> {
        let mut anomaly = AnomalyConfig::default();
        if let Some(c) = env_parse("ANOMALY_CONTAMINATION")? {
            anomaly.contamination = c;
        }
        if let Some(seed) = env_parse("ANOMALY_SEED")? {
            anomaly.seed = seed;
        }
        if let Some(trees) = env_parse("ANOMALY_TREES")? {
            anomaly.n_estimators = trees;
        }

        let data_dir = args
            .iter()
            .position(|a| a == "--data-dir")
            .and_then(|i| args.get(i + 1))
            .map(PathBuf::from)
            .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let dry_run = args.iter().any(|a| a == "--dry-run");

        let tickers = match args.iter().position(|a| a == "--tickers") {
            Some(idx) => {
                let tickers = args[idx + 1..]
                    .iter()
                    .take_while(|a| !a.starts_with("--"))
                    .map(|t| normalize_ticker(t))
                    .collect::<Result<Vec<_>, _>>()?;
                if tickers.is_empty() {
                    bail!("--tickers needs at least one symbol");
                }
                Some(tickers)
            }
            None => None,
        };

        Ok(Self {
            data_dir,
            dry_run,
            tickers,
            anomaly,
        })
    }
}

#[derive(Debug, Default)]
struct BatchSummary {
    succeeded: Vec<String>,
    failed: Vec<(String, String)>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "data_loader=info,company_store=info,anomaly_detector=info,fundamental_analysis=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage:");
        eprintln!("  data-loader [--data-dir DIR] [--tickers T1 T2 ...] [--dry-run]");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --data-dir DIR     Data directory (default: $DATA_DIR or ./{})", DEFAULT_DATA_DIR);
        eprintln!("  --tickers T ...    Only process these tickers' price files");
        eprintln!("  --dry-run          Compute everything without writing outputs");
        return Ok(());
    }

    let config = LoaderConfig::from_env_and_args(&args)?;
    let layout = DataLayout::new(&config.data_dir);
    tracing::info!(
        "data-loader: data_dir={}, dry_run={}, contamination={}",
        config.data_dir.display(),
        config.dry_run,
        config.anomaly.contamination
    );

    if !config.dry_run {
        layout.ensure_output_dirs()?;
    }

    run_fundamentals(&layout, &config)?;

    let summary = run_prices(&layout, &config)?;
    for (ticker, error) in &summary.failed {
        tracing::warn!("{} failed: {}", ticker, error);
    }
    tracing::info!(
        "Done! {} tickers succeeded, {} failed",
        summary.succeeded.len(),
        summary.failed.len()
    );
    Ok(())
}

/// Ratios, ratio anomalies and the ratio hypothesis studies. A missing
/// fundamentals file skips the stage; an unusable one aborts the batch.
fn run_fundamentals(layout: &DataLayout, config: &LoaderConfig) -> anyhow::Result<()> {
    let table = match io::read_table(&layout.fundamentals()) {
        Ok(table) => table,
        Err(e) if e.is_not_found() => {
            tracing::warn!("Skipping fundamentals stage: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let tickers = unique_tickers(&table).context("fundamentals")?;
    let ratios = RatioComputer::new().compute(&table).context("fundamentals")?;
    tracing::info!("Computed ratios for {} rows across {} tickers", ratios.len(), tickers.len());

    let detector = AnomalyDetector::new(config.anomaly.clone().with_policy(InvalidRowPolicy::ForceOutlier))?;
    let report = detector.detect(&ratios, &RatioField::columns())?;
    tracing::info!(
        "Ratio anomalies: {} outliers of {} rows ({} forced)",
        report.outlier_count(),
        report.rows.len(),
        report.forced_outliers
    );

    let results = HypothesisSuite::default_ratio_suite().run(&report.rows)?;
    for (name, result) in &results {
        tracing::info!(
            "{}: {} by {} ({} vs {}): t={:.3}, p={:.4}",
            name,
            result.value_column,
            result.group_column,
            result.group_1,
            result.group_2,
            result.statistic,
            result.p_value
        );
    }

    if !config.dry_run {
        io::write_ratios(&layout.ratios(), &ratios)?;
        io::write_anomalies(&layout.anomalies(), &report.rows)?;
        io::write_json(&layout.hypothesis_results(), &results)?;
    }
    Ok(())
}

fn run_prices(layout: &DataLayout, config: &LoaderConfig) -> anyhow::Result<BatchSummary> {
    let tickers = match &config.tickers {
        Some(tickers) => tickers.clone(),
        None => layout.price_tickers(),
    };
    if tickers.is_empty() {
        tracing::warn!("No price files under {}", layout.prices_dir().display());
        return Ok(BatchSummary::default());
    }

    let detector = AnomalyDetector::new(config.anomaly.clone().with_policy(InvalidRowPolicy::ImputeMean))?;
    let total = tickers.len();

    let outcomes: Vec<(String, anyhow::Result<usize>)> = tickers
        .par_iter()
        .map(|ticker| (ticker.clone(), process_ticker(layout, &detector, ticker, config.dry_run)))
        .collect();

    let mut summary = BatchSummary::default();
    for (i, (ticker, outcome)) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(rows) => {
                tracing::info!("[{}/{}] {} => {} rows", i + 1, total, ticker, rows);
                summary.succeeded.push(ticker);
            }
            Err(e) => summary.failed.push((ticker, format!("{:#}", e))),
        }
    }
    Ok(summary)
}

/// Features, feature anomalies and back-tests for one ticker.
fn process_ticker(
    layout: &DataLayout,
    detector: &AnomalyDetector,
    ticker: &str,
    dry_run: bool,
) -> anyhow::Result<usize> {
    let bars = io::read_prices(&layout.prices(ticker))?;
    let features = TechnicalFeatureComputer::new()
        .compute(&bars)
        .with_context(|| format!("{} price history", ticker))?;
    let report = detector.detect(&features, ANOMALY_FEATURES)?;

    let points = match io::read_json::<Vec<IndicatorPoint>>(&layout.indicator_history(ticker)) {
        Ok(points) => points,
        Err(e) if e.is_not_found() => points_from_features(&features),
        Err(e) => return Err(e.into()),
    };
    ensure_backtestable(&points).with_context(|| format!("{} back-tests", ticker))?;
    let backtests = run_all_backtests(&points);

    if !dry_run {
        io::write_features(&layout.features(ticker), &report.rows)?;
        io::write_json(&layout.backtests(ticker), &backtests)?;
    }
    Ok(report.rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{BacktestReport, HypothesisReport, PriceBar};
    use quant_analysis::RSI_TEST;
    use chrono::{Duration, NaiveDate};
    use company_store::CompanyDataStore;
    use std::fs;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn config(dir: &std::path::Path) -> LoaderConfig {
        LoaderConfig {
            data_dir: dir.to_path_buf(),
            dry_run: false,
            tickers: None,
            anomaly: AnomalyConfig::default(),
        }
    }

    fn write_prices(layout: &DataLayout, ticker: &str, n: usize) {
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let bars: Vec<PriceBar> = (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.37).sin() * 8.0 + i as f64 * 0.05;
                PriceBar {
                    date: start + Duration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0 + i as f64,
                }
            })
            .collect();
        let mut body = String::from("Date,Open,High,Low,Close,Volume\n");
        for b in &bars {
            body.push_str(&format!("{},{},{},{},{},{}\n", b.date, b.open, b.high, b.low, b.close, b.volume));
        }
        fs::create_dir_all(layout.prices_dir()).unwrap();
        fs::write(layout.prices(ticker), body).unwrap();
    }

    fn write_fundamentals(layout: &DataLayout) {
        let mut body = String::from("Ticker.Symbol,Period.Ending,");
        body.push_str(&RatioField::columns().join(","));
        body.push('\n');
        for (i, ticker) in ["AAPL", "MSFT", "NVDA", "AMZN"].iter().enumerate() {
            for (j, year) in [2019, 2020, 2021, 2023].iter().enumerate() {
                let cells: Vec<String> = (0..RatioField::ALL.len())
                    .map(|k| {
                        if i == 1 && j == 2 && k == 3 {
                            "inf".to_string()
                        } else {
                            format!("{}", (i * 7 + j * 3 + k) as f64 * 0.1 + 0.5)
                        }
                    })
                    .collect();
                body.push_str(&format!("{},{}-12-31,{}\n", ticker, year, cells.join(",")));
            }
        }
        fs::write(layout.fundamentals(), body).unwrap();
    }

    #[test]
    fn test_args_parsing() {
        let config = LoaderConfig::from_env_and_args(&args(&[
            "data-loader", "--data-dir", "/tmp/x", "--tickers", "aapl", "msft", "--dry-run",
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/x"));
        assert!(config.dry_run);
        assert_eq!(config.tickers, Some(vec!["AAPL".to_string(), "MSFT".to_string()]));
    }

    #[test]
    fn test_bad_ticker_flag_rejected() {
        assert!(LoaderConfig::from_env_and_args(&args(&["data-loader", "--tickers", "BAD;"])).is_err());
        assert!(LoaderConfig::from_env_and_args(&args(&["data-loader", "--tickers"])).is_err());
    }

    #[test]
    fn test_full_batch_then_store() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        let config = config(dir.path());
        layout.ensure_output_dirs().unwrap();

        write_fundamentals(&layout);
        write_prices(&layout, "AAPL", 260);
        write_prices(&layout, "TSLA", 30);
        fs::write(layout.prices("BROKEN"), "Date,Open,High,Low,Close,Volume\n2022-01-03,1,1,1,oops,1\n").unwrap();

        run_fundamentals(&layout, &config).unwrap();
        let summary = run_prices(&layout, &config).unwrap();

        assert_eq!(summary.succeeded, vec!["AAPL", "TSLA"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "BROKEN");

        assert!(layout.ratios().exists());
        assert!(layout.anomalies().exists());
        let hypotheses: HypothesisReport = io::read_json(&layout.hypothesis_results()).unwrap();
        assert_eq!(hypotheses["debt_equity_2020_vs_2023"].group_2, "2023");
        assert_eq!(hypotheses["net_margin_2019_vs_2021"].value_column, "net_margin");
        assert!(layout.features("AAPL").exists());
        assert!(layout.backtests("TSLA").exists());

        let store = CompanyDataStore::load(&layout);
        let aapl = store.get("AAPL").unwrap();
        assert_eq!(aapl.financials.len(), 4);
        assert_eq!(aapl.historical_features.len(), 260);
        assert!(aapl.backtests.is_some());

        let msft = store.get("MSFT").unwrap();
        // infinite debt_equity forced to outlier
        assert!(msft.financials[2].anomaly.unwrap().is_outlier());
        assert!(msft.missing_sources.contains(&company_store::DataSource::PriceHistory));
    }

    #[test]
    fn test_schema_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        fs::write(layout.fundamentals(), "Ticker.Symbol,Period.Ending,roa\nAAPL,2022-12-31,1\n").unwrap();
        let err = run_fundamentals(&layout, &config(dir.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("missing required columns"));
    }

    #[test]
    fn test_indicator_history_drives_backtests() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        write_prices(&layout, "AAPL", 40);
        fs::create_dir_all(layout.indicator_history_dir()).unwrap();
        fs::write(
            layout.indicator_history("AAPL"),
            r#"[{"close": 10.0, "rsi": 40.0}, {"close": 10.0, "rsi": 25.0}, {"close": 11.0, "rsi": 35.0}]"#,
        )
        .unwrap();

        let summary = run_prices(&layout, &config(dir.path())).unwrap();
        assert_eq!(summary.succeeded, vec!["AAPL"]);

        let report: BacktestReport = io::read_json(&layout.backtests("AAPL")).unwrap();
        assert_eq!(report[RSI_TEST].signal_count, 1);
        assert_eq!(report[RSI_TEST].success_count, 1);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        write_prices(&layout, "AAPL", 40);
        let mut config = config(dir.path());
        config.dry_run = true;

        let summary = run_prices(&layout, &config).unwrap();
        assert_eq!(summary.succeeded, vec!["AAPL"]);
        assert!(!layout.derived_dir().exists());
    }
}
