use std::path::PathBuf;

use analysis_core::AnalysisError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{}: file not found", path.display())]
    NotFound { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: malformed CSV: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{}: malformed JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: {source}", path.display())]
    Analysis {
        path: PathBuf,
        #[source]
        source: AnalysisError,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Schema problems in a primary input stop the batch.
    pub fn is_schema(&self) -> bool {
        matches!(self, StoreError::Analysis { source, .. } if source.is_schema())
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            StoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub(crate) fn csv(path: &std::path::Path, source: csv::Error) -> Self {
        match source.kind() {
            csv::ErrorKind::Io(e) if e.kind() == std::io::ErrorKind::NotFound => StoreError::NotFound {
                path: path.to_path_buf(),
            },
            _ => StoreError::Csv {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub(crate) fn analysis(path: &std::path::Path, source: AnalysisError) -> Self {
        StoreError::Analysis {
            path: path.to_path_buf(),
            source,
        }
    }
}
