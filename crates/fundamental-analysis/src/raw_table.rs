use std::io::Read;

use analysis_core::AnalysisError;

/// An untyped table: a header row plus string cells, as read from CSV.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Rows are padded with empty cells (or cut) to the header width.
    pub fn new(headers: Vec<String>, mut rows: Vec<Vec<String>>) -> Self {
        for row in rows.iter_mut() {
            row.resize(headers.len(), String::new());
        }
        Self { headers, rows }
    }

    /// Read a headed CSV. Short rows are padded with empty cells.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AnalysisError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| AnalysisError::DataQuality(format!("unreadable CSV header: {}", e)))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows: Vec<Vec<String>> = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| {
                AnalysisError::DataQuality(format!("unreadable CSV row {}: {}", i + 1, e))
            })?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }

        Ok(Self::new(headers, rows))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Resolve every name to a column index, or list all that are absent.
    pub fn require_columns(&self, names: &[&str]) -> Result<Vec<usize>, AnalysisError> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| self.column_index(n).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(AnalysisError::Schema(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }
        Ok(names.iter().filter_map(|n| self.column_index(n)).collect())
    }
}
