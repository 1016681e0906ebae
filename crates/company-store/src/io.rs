//! Flat-file readers and writers for every table the pipeline produces.
//!
//! Ratio cells holding the sentinel are written as `-9999`, undefined
//! indicator cells as empty cells and anomaly labels as `0`/`1`.

use std::fs::{self, File};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use analysis_core::{
    parse_date, AnalysisError, AnomalyLabel, FinancialRatioRecord, Labeled, PriceBar, RatioField,
    RatioSet, RatioValue, TechnicalFeatureRecord, TECHNICAL_FEATURE_COLUMNS,
};
use fundamental_analysis::{RawTable, PERIOD_COLUMN, TICKER_COLUMN};

use crate::error::StoreError;

pub const ANOMALY_COLUMN: &str = "anomaly";
const BAR_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

pub fn read_table(path: &Path) -> Result<RawTable, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    RawTable::from_reader(file).map_err(|e| StoreError::analysis(path, e))
}

fn csv_writer(path: &Path) -> Result<csv::Writer<File>, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    csv::Writer::from_path(path).map_err(|e| StoreError::csv(path, e))
}

fn finish(path: &Path, mut writer: csv::Writer<File>) -> Result<(), StoreError> {
    writer.flush().map_err(|e| StoreError::io(path, e))
}

fn number(value: f64) -> String {
    value.to_string()
}

fn optional(value: Option<f64>) -> String {
    value.map(number).unwrap_or_default()
}

fn ratio_header(with_anomaly: bool) -> Vec<&'static str> {
    let mut header = vec![TICKER_COLUMN, PERIOD_COLUMN];
    header.extend(RatioField::columns());
    if with_anomaly {
        header.push(ANOMALY_COLUMN);
    }
    header
}

fn ratio_cells(record: &FinancialRatioRecord) -> Vec<String> {
    let mut cells = vec![record.ticker_symbol.clone(), record.period_ending.to_string()];
    cells.extend(record.ratios.iter().map(|(_, v)| number(v.to_raw())));
    cells
}

pub fn write_ratios(path: &Path, records: &[FinancialRatioRecord]) -> Result<(), StoreError> {
    let mut writer = csv_writer(path)?;
    writer
        .write_record(ratio_header(false))
        .map_err(|e| StoreError::csv(path, e))?;
    for record in records {
        writer
            .write_record(ratio_cells(record))
            .map_err(|e| StoreError::csv(path, e))?;
    }
    finish(path, writer)
}

pub fn write_anomalies(path: &Path, rows: &[Labeled<FinancialRatioRecord>]) -> Result<(), StoreError> {
    let mut writer = csv_writer(path)?;
    writer
        .write_record(ratio_header(true))
        .map_err(|e| StoreError::csv(path, e))?;
    for row in rows {
        let mut cells = ratio_cells(&row.record);
        cells.push(row.anomaly.to_string());
        writer.write_record(cells).map_err(|e| StoreError::csv(path, e))?;
    }
    finish(path, writer)
}

fn parse_number(raw: &str, line: usize, column: &str) -> Result<f64, AnalysisError> {
    raw.trim().parse::<f64>().map_err(|_| {
        AnalysisError::DataQuality(format!("row {}: non-numeric {} '{}'", line, column, raw))
    })
}

fn parse_optional(raw: &str, line: usize, column: &str) -> Result<Option<f64>, AnalysisError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_number(raw, line, column).map(Some)
}

fn parse_label(raw: &str, line: usize) -> Result<AnomalyLabel, AnalysisError> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .and_then(|v| AnomalyLabel::try_from(v).ok())
        .ok_or_else(|| {
            AnalysisError::DataQuality(format!("row {}: invalid anomaly label '{}'", line, raw))
        })
}

fn parse_ratio_rows(table: &RawTable, with_anomaly: bool) -> Result<Vec<(FinancialRatioRecord, Option<AnomalyLabel>)>, AnalysisError> {
    let indices = table.require_columns(&ratio_header(with_anomaly))?;
    let ratio_idx = &indices[2..2 + RatioField::ALL.len()];

    table
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let line = i + 1;
            let period_ending = parse_date(&row[indices[1]]).ok_or_else(|| {
                AnalysisError::DataQuality(format!("row {}: unparseable {} '{}'", line, PERIOD_COLUMN, row[indices[1]]))
            })?;
            let mut ratios = RatioSet::all_sentinel();
            for (field, &idx) in RatioField::ALL.into_iter().zip(ratio_idx) {
                let value = parse_number(&row[idx], line, field.column())?;
                ratios.set(field, RatioValue::from_raw(value));
            }
            let label = if with_anomaly {
                Some(parse_label(&row[indices[indices.len() - 1]], line)?)
            } else {
                None
            };
            let record = FinancialRatioRecord {
                ticker_symbol: row[indices[0]].trim().to_uppercase(),
                period_ending,
                ratios,
            };
            Ok((record, label))
        })
        .collect()
}

pub fn read_ratios(path: &Path) -> Result<Vec<FinancialRatioRecord>, StoreError> {
    let table = read_table(path)?;
    let rows = parse_ratio_rows(&table, false).map_err(|e| StoreError::analysis(path, e))?;
    Ok(rows.into_iter().map(|(record, _)| record).collect())
}

pub fn read_anomalies(path: &Path) -> Result<Vec<Labeled<FinancialRatioRecord>>, StoreError> {
    let table = read_table(path)?;
    let rows = parse_ratio_rows(&table, true).map_err(|e| StoreError::analysis(path, e))?;
    Ok(rows
        .into_iter()
        .filter_map(|(record, label)| label.map(|anomaly| Labeled { record, anomaly }))
        .collect())
}

/// Parse a daily price table. Column names are matched case-insensitively;
/// the date lives in `Date`, or `Price` for files carrying a multi-row header.
/// Rows before the first parseable date are header residue and skipped.
pub fn parse_prices(table: &RawTable) -> Result<Vec<PriceBar>, AnalysisError> {
    let find = |name: &str| table.headers().iter().position(|h| h.trim().eq_ignore_ascii_case(name));

    let date_idx = find("date").or_else(|| find("price")).unwrap_or(0);
    let missing: Vec<&str> = BAR_COLUMNS.iter().copied().filter(|c| find(c).is_none()).collect();
    if !missing.is_empty() || table.headers().is_empty() {
        return Err(AnalysisError::Schema(format!(
            "price table missing columns: {}",
            missing.join(", ")
        )));
    }
    let idx: Vec<usize> = BAR_COLUMNS.iter().filter_map(|c| find(c)).collect();

    let mut bars = Vec::with_capacity(table.len());
    for (i, row) in table.rows().iter().enumerate() {
        let line = i + 1;
        let Some(date) = parse_date(&row[date_idx]) else {
            if bars.is_empty() {
                tracing::debug!("Skipping price header residue on row {}", line);
                continue;
            }
            return Err(AnalysisError::DataQuality(format!(
                "row {}: unparseable date '{}'",
                line, row[date_idx]
            )));
        };
        let values = BAR_COLUMNS
            .iter()
            .zip(&idx)
            .map(|(column, &j)| parse_number(&row[j], line, column))
            .collect::<Result<Vec<f64>, _>>()?;
        bars.push(PriceBar {
            date,
            open: values[0],
            high: values[1],
            low: values[2],
            close: values[3],
            volume: values[4],
        });
    }
    Ok(bars)
}

pub fn read_prices(path: &Path) -> Result<Vec<PriceBar>, StoreError> {
    let table = read_table(path)?;
    parse_prices(&table).map_err(|e| StoreError::analysis(path, e))
}

fn feature_header() -> Vec<&'static str> {
    let mut header = vec!["date"];
    header.extend(BAR_COLUMNS);
    header.extend(TECHNICAL_FEATURE_COLUMNS);
    header.push(ANOMALY_COLUMN);
    header
}

pub fn write_features(path: &Path, rows: &[Labeled<TechnicalFeatureRecord>]) -> Result<(), StoreError> {
    let header = feature_header();
    let mut writer = csv_writer(path)?;
    writer.write_record(&header).map_err(|e| StoreError::csv(path, e))?;

    for row in rows {
        let mut cells = vec![row.record.date.to_string()];
        cells.extend(
            header[1..header.len() - 1]
                .iter()
                .map(|column| optional(row.record.column(column).flatten())),
        );
        cells.push(row.anomaly.to_string());
        writer.write_record(cells).map_err(|e| StoreError::csv(path, e))?;
    }
    finish(path, writer)
}

pub fn parse_features(table: &RawTable) -> Result<Vec<Labeled<TechnicalFeatureRecord>>, AnalysisError> {
    let header = feature_header();
    let indices = table.require_columns(&header)?;

    table
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let line = i + 1;
            let cell = |column: &str| -> Result<Option<f64>, AnalysisError> {
                let pos = header.iter().position(|h| *h == column).unwrap_or(0);
                parse_optional(&row[indices[pos]], line, column)
            };
            let required = |column: &str| -> Result<f64, AnalysisError> {
                cell(column)?.ok_or_else(|| {
                    AnalysisError::DataQuality(format!("row {}: empty {}", line, column))
                })
            };

            let date = parse_date(&row[indices[0]]).ok_or_else(|| {
                AnalysisError::DataQuality(format!("row {}: unparseable date '{}'", line, row[indices[0]]))
            })?;

            let record = TechnicalFeatureRecord {
                date,
                open: required("open")?,
                high: required("high")?,
                low: required("low")?,
                close: required("close")?,
                volume: required("volume")?,
                return_1d: cell("return_1d")?,
                volatility_21d: cell("volatility_21d")?,
                ma_20: cell("ma_20")?,
                ma_50: cell("ma_50")?,
                ma_200: cell("ma_200")?,
                ema_20: cell("ema_20")?,
                ema_50: cell("ema_50")?,
                ema_200: cell("ema_200")?,
                rsi: cell("rsi")?,
                macd: cell("macd")?,
                macd_signal: cell("macd_signal")?,
                macd_histogram: cell("macd_histogram")?,
                stoch_k: cell("stoch_k")?,
                stoch_d: cell("stoch_d")?,
                bb_upper: cell("bb_upper")?,
                bb_middle: cell("bb_middle")?,
                bb_lower: cell("bb_lower")?,
                obv: required("obv")?,
            };
            let anomaly = parse_label(&row[indices[indices.len() - 1]], line)?;
            Ok(Labeled { record, anomaly })
        })
        .collect()
}

pub fn read_features(path: &Path) -> Result<Vec<Labeled<TechnicalFeatureRecord>>, StoreError> {
    let table = read_table(path)?;
    parse_features(&table).map_err(|e| StoreError::analysis(path, e))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, body).map_err(|e| StoreError::io(path, e))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let body = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&body).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}
