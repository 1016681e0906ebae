use crate::AnalysisError;

/// Column names that identify a row and must never be used as model features.
pub const IDENTIFIER_COLUMNS: &[&str] = &[
    "ticker_symbol",
    "Ticker.Symbol",
    "period_ending",
    "Period.Ending",
    "date",
    "Date",
];

pub fn is_identifier_column(column: &str) -> bool {
    IDENTIFIER_COLUMNS.contains(&column)
}

/// A table row whose numeric columns can be looked up by name.
pub trait FeatureRow {
    /// Value of a named numeric column.
    ///
    /// `Ok(None)` marks a sentinel or undefined cell. Unknown columns and
    /// identifier columns are a `Schema` error.
    fn feature(&self, column: &str) -> Result<Option<f64>, AnalysisError>;
}

/// A table row that can be assigned to a group by a named column.
pub trait GroupRow {
    fn group_key(&self, column: &str) -> Result<String, AnalysisError>;
}

pub(crate) fn identifier_as_feature(column: &str) -> AnalysisError {
    AnalysisError::Schema(format!(
        "identifier column '{}' cannot be used as a feature",
        column
    ))
}

pub(crate) fn unknown_column(column: &str) -> AnalysisError {
    AnalysisError::Schema(format!("unknown column '{}'", column))
}
