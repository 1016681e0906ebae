use std::collections::HashSet;

use analysis_core::stats::StandardScaler;
use analysis_core::{parse_date, AnalysisError, FinancialRatioRecord, RatioField, RatioSet, RatioValue};

use crate::raw_table::RawTable;

pub const TICKER_COLUMN: &str = "Ticker.Symbol";
pub const PERIOD_COLUMN: &str = "Period.Ending";

/// Turns raw per-company-per-period fundamentals into the scaled ratio table.
///
/// Invalid cells become the sentinel, and each column is z-scaled using only
/// its non-sentinel values. Row count and row order are preserved.
#[derive(Debug, Clone, Default)]
pub struct RatioComputer;

impl RatioComputer {
    pub fn new() -> Self {
        Self
    }

    pub fn required_columns() -> Vec<&'static str> {
        let mut columns = vec![TICKER_COLUMN, PERIOD_COLUMN];
        columns.extend(RatioField::columns());
        columns
    }

    /// Select, clean and scale. Fails with `Schema` when a required column is
    /// absent and `DataQuality` on malformed cells or duplicate keys.
    pub fn compute(&self, table: &RawTable) -> Result<Vec<FinancialRatioRecord>, AnalysisError> {
        let cleaned = self.clean(table)?;
        Ok(self.scale(cleaned))
    }

    /// Steps 1-3: column selection, parsing and sentinel replacement.
    pub fn clean(&self, table: &RawTable) -> Result<Vec<FinancialRatioRecord>, AnalysisError> {
        let indices = table.require_columns(&Self::required_columns())?;
        let (ticker_idx, period_idx) = (indices[0], indices[1]);
        let ratio_idx = &indices[2..];

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(table.len());

        for (row_no, row) in table.rows().iter().enumerate() {
            let line = row_no + 1;
            let ticker = row[ticker_idx].trim().to_uppercase();
            if ticker.is_empty() {
                return Err(AnalysisError::DataQuality(format!(
                    "row {}: empty {}",
                    line, TICKER_COLUMN
                )));
            }
            let period_ending = parse_date(&row[period_idx]).ok_or_else(|| {
                AnalysisError::DataQuality(format!(
                    "row {}: unparseable {} '{}'",
                    line, PERIOD_COLUMN, row[period_idx]
                ))
            })?;

            if !seen.insert((ticker.clone(), period_ending)) {
                return Err(AnalysisError::DataQuality(format!(
                    "row {}: duplicate key ({}, {})",
                    line, ticker, period_ending
                )));
            }

            let mut ratios = RatioSet::all_sentinel();
            for (field, &idx) in RatioField::ALL.iter().zip(ratio_idx) {
                ratios.set(*field, parse_ratio_cell(&row[idx], line, *field)?);
            }

            records.push(FinancialRatioRecord {
                ticker_symbol: ticker,
                period_ending,
                ratios,
            });
        }

        tracing::debug!("Cleaned {} fundamentals rows", records.len());
        Ok(records)
    }

    /// Step 4: z-scale every column over its non-sentinel cells.
    ///
    /// A column with no valid values anywhere stays entirely sentinel.
    pub fn scale(&self, mut records: Vec<FinancialRatioRecord>) -> Vec<FinancialRatioRecord> {
        for field in RatioField::ALL {
            let valid: Vec<f64> = records
                .iter()
                .filter_map(|r| r.ratios.get(field).value())
                .collect();

            let Some(scaler) = StandardScaler::fit(&valid) else {
                if !records.is_empty() {
                    tracing::warn!("Column {} has no valid values, left as sentinel", field);
                }
                continue;
            };

            for record in records.iter_mut() {
                if let RatioValue::Valid(v) = record.ratios.get(field) {
                    record
                        .ratios
                        .set(field, RatioValue::Valid(scaler.transform(v)));
                }
            }
        }
        records
    }
}

/// Missing, `nan` and infinite cells map to the sentinel; other text is malformed.
fn parse_ratio_cell(raw: &str, line: usize, field: RatioField) -> Result<RatioValue, AnalysisError> {
    let cell = raw.trim();
    match cell.to_ascii_lowercase().as_str() {
        "" | "nan" | "na" | "n/a" | "null" | "none" => return Ok(RatioValue::Sentinel),
        _ => {}
    }
    cell.parse::<f64>().map(RatioValue::from_raw).map_err(|_| {
        AnalysisError::DataQuality(format!(
            "row {}: non-numeric {} '{}'",
            line, field, cell
        ))
    })
}

/// Distinct tickers in first-seen order.
pub fn unique_tickers(table: &RawTable) -> Result<Vec<String>, AnalysisError> {
    let idx = table.require_columns(&[TICKER_COLUMN])?[0];
    let mut seen = HashSet::new();
    Ok(table
        .rows()
        .iter()
        .map(|row| row[idx].trim().to_uppercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::stats::{mean, population_std_dev};
    use analysis_core::SENTINEL;
    use chrono::{Datelike, NaiveDate};

    fn headers() -> Vec<String> {
        RatioComputer::required_columns()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Build a row whose ratio cells all equal `base`, with overrides.
    fn row(ticker: &str, period: &str, base: f64, overrides: &[(&str, &str)]) -> Vec<String> {
        let mut cells = vec![ticker.to_string(), period.to_string()];
        for column in RatioField::columns() {
            let value = overrides
                .iter()
                .find(|(c, _)| *c == column)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| base.to_string());
            cells.push(value);
        }
        cells
    }

    fn aapl_table() -> RawTable {
        RawTable::new(
            headers(),
            vec![
                row("AAPL", "2021-09-25", 1.0, &[("debt_equity", "1.0")]),
                row("AAPL", "2022-09-24", 2.0, &[("debt_equity", "inf")]),
                row("AAPL", "2023-09-30", 3.0, &[("debt_equity", "3.0")]),
            ],
        )
    }

    #[test]
    fn test_aapl_infinite_debt_equity_becomes_sentinel() {
        let records = RatioComputer::new().compute(&aapl_table()).unwrap();
        assert_eq!(records.len(), 3);

        let de: Vec<RatioValue> = records.iter().map(|r| r.ratios.debt_equity).collect();
        assert!(de[1].is_sentinel());
        assert_eq!(de[1].to_raw(), SENTINEL);
        // 1.0 and 3.0 scaled only against each other
        assert!((de[0].value().unwrap() + 1.0).abs() < 1e-12);
        assert!((de[2].value().unwrap() - 1.0).abs() < 1e-12);

        let years: Vec<i32> = records.iter().map(|r| r.period_ending.year()).collect();
        assert_eq!(years, vec![2021, 2022, 2023]);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let mut headers = headers();
        headers.retain(|h| h != "roe");
        let table = RawTable::new(headers, vec![]);
        let err = RatioComputer::new().compute(&table).unwrap_err();
        assert!(err.is_schema());
        assert!(err.to_string().contains("roe"));
    }

    #[test]
    fn test_short_rows_read_as_missing_cells() {
        let short = vec!["AAPL".to_string(), "2022-12-31".to_string(), "1.0".to_string()];
        let table = RawTable::new(headers(), vec![short, row("MSFT", "2022-06-30", 2.0, &[])]);
        let records = RatioComputer::new().compute(&table).unwrap();

        assert_eq!(records.len(), 2);
        assert!(!records[0].ratios.get(RatioField::ALL[0]).is_sentinel());
        assert!(records[0].ratios.get(RatioField::ALL[1]).is_sentinel());
        assert!(records[0].ratios.get(RatioField::ALL[12]).is_sentinel());
    }

    #[test]
    fn test_row_without_period_is_data_quality_error() {
        let table = RawTable::new(headers(), vec![vec!["AAPL".to_string()]]);
        let err = RatioComputer::new().compute(&table).unwrap_err();
        assert!(matches!(err, AnalysisError::DataQuality(_)));
    }

    #[test]
    fn test_extra_columns_are_discarded() {
        let mut headers = headers();
        headers.push("Revenue".to_string());
        let mut r = row("MSFT", "2022-06-30", 1.0, &[]);
        r.push("198270000000".to_string());
        let table = RawTable::new(headers, vec![r]);
        let records = RatioComputer::new().compute(&table).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let table = big_table();
        let computer = RatioComputer::new();
        let first = computer.compute(&table).unwrap();
        let second = computer.compute(&table).unwrap();
        for (a, b) in first.iter().zip(&second) {
            for ((_, x), (_, y)) in a.ratios.iter().zip(b.ratios.iter()) {
                assert_eq!(x.to_raw().to_bits(), y.to_raw().to_bits());
            }
        }
    }

    fn big_table() -> RawTable {
        let rows = (0..20)
            .map(|i| {
                let value = (i * 7 % 11) as f64 + 0.5;
                let overrides: Vec<(&str, &str)> = match i % 5 {
                    0 => vec![("roa", "")],
                    1 => vec![("cash_ratio", "-inf"), ("roe", "NaN")],
                    _ => vec![],
                };
                row(&format!("T{}", i), "2020-12-31", value, &overrides)
            })
            .collect();
        RawTable::new(headers(), rows)
    }

    #[test]
    fn test_sentinel_preservation_and_scaling_invariant() {
        let table = big_table();
        let cleaned = RatioComputer::new().clean(&table).unwrap();
        let scaled = RatioComputer::new().scale(cleaned.clone());

        for field in RatioField::ALL {
            for (before, after) in cleaned.iter().zip(&scaled) {
                if before.ratios.get(field).is_sentinel() {
                    assert_eq!(after.ratios.get(field).to_raw(), SENTINEL);
                }
            }
            let valid: Vec<f64> = scaled
                .iter()
                .filter_map(|r| r.ratios.get(field).value())
                .collect();
            assert!(mean(&valid).abs() < 1e-9, "{} mean", field);
            assert!((population_std_dev(&valid) - 1.0).abs() < 1e-9, "{} std", field);
        }
    }

    #[test]
    fn test_all_sentinel_column_stays_sentinel() {
        let rows = vec![
            row("A", "2020-12-31", 1.0, &[("inventory_turnover", "")]),
            row("B", "2020-12-31", 2.0, &[("inventory_turnover", "inf")]),
        ];
        let records = RatioComputer::new()
            .compute(&RawTable::new(headers(), rows))
            .unwrap();
        assert!(records.iter().all(|r| r.ratios.inventory_turnover.is_sentinel()));
        assert!(records.iter().all(|r| !r.ratios.roa.is_sentinel()));
    }

    #[test]
    fn test_non_numeric_cell_is_data_quality_error() {
        let rows = vec![row("A", "2020-12-31", 1.0, &[("roa", "twelve")])];
        let err = RatioComputer::new()
            .compute(&RawTable::new(headers(), rows))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DataQuality(_)));
        assert!(err.to_string().contains("roa"));
    }

    #[test]
    fn test_duplicate_key_is_data_quality_error() {
        let rows = vec![
            row("A", "2020-12-31", 1.0, &[]),
            row("a", "2020-12-31", 2.0, &[]),
        ];
        let err = RatioComputer::new()
            .compute(&RawTable::new(headers(), rows))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DataQuality(_)));
    }

    #[test]
    fn test_unique_tickers_first_seen_order() {
        let rows = vec![
            row("MSFT", "2020-12-31", 1.0, &[]),
            row("AAPL", "2020-12-31", 1.0, &[]),
            row("MSFT", "2021-12-31", 1.0, &[]),
        ];
        let tickers = unique_tickers(&RawTable::new(headers(), rows)).unwrap();
        assert_eq!(tickers, vec!["MSFT", "AAPL"]);
        assert_eq!(
            parse_date("2020-12-31"),
            NaiveDate::from_ymd_opt(2020, 12, 31)
        );
    }
}
