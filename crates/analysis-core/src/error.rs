use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Required columns are absent, or a column was used in a role it cannot fill.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Non-numeric or malformed values where numeric data is required.
    #[error("Data quality error: {0}")]
    DataQuality(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// No valid rows left to fit an anomaly model on.
    #[error("Empty cohort: {0}")]
    EmptyCohort(String),

    #[error("Calculation error: {0}")]
    CalculationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Schema failures on a primary source stop the whole batch.
    pub fn is_schema(&self) -> bool {
        matches!(self, AnalysisError::Schema(_))
    }
}
