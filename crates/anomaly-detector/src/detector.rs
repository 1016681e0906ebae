use nalgebra::DMatrix;

use analysis_core::stats::StandardScaler;
use analysis_core::{is_identifier_column, AnalysisError, AnomalyLabel, FeatureRow, Labeled};

use crate::isolation_forest::IsolationForest;

/// What to do with rows whose selected features are not all defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRowPolicy {
    /// Any missing feature makes the row an outlier without scoring it.
    ForceOutlier,
    /// Missing features are imputed with the column mean. Only rows with no
    /// defined feature at all are forced.
    ImputeMean,
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// Expected share of outliers among scored rows, in (0, 0.5].
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
    pub invalid_rows: InvalidRowPolicy,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            n_estimators: 100,
            max_samples: 256,
            seed: 42,
            invalid_rows: InvalidRowPolicy::ForceOutlier,
        }
    }
}

impl AnomalyConfig {
    pub fn with_policy(mut self, invalid_rows: InvalidRowPolicy) -> Self {
        self.invalid_rows = invalid_rows;
        self
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(AnalysisError::Schema(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 || self.max_samples == 0 {
            return Err(AnalysisError::Schema(
                "n_estimators and max_samples must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Labeled rows plus bookkeeping about how the labels were assigned.
#[derive(Debug, Clone)]
pub struct AnomalyReport<R> {
    /// Same length and order as the input.
    pub rows: Vec<Labeled<R>>,
    /// Rows that were scored by the forest.
    pub valid_rows: usize,
    /// Rows labeled outlier because of missing features.
    pub forced_outliers: usize,
    /// Whether a model was fitted at all.
    pub fitted: bool,
}

impl<R> AnomalyReport<R> {
    pub fn outlier_count(&self) -> usize {
        self.rows.iter().filter(|r| r.anomaly.is_outlier()).count()
    }

    pub fn labels(&self) -> Vec<AnomalyLabel> {
        self.rows.iter().map(|r| r.anomaly).collect()
    }
}

/// Flags rows that are unusual relative to the cohort they are scored in.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Label every row. Identifier or unknown feature columns are a `Schema`
    /// error; an empty cohort is not an error and leaves only forced labels.
    pub fn detect<R: FeatureRow + Clone>(
        &self,
        rows: &[R],
        features: &[&str],
    ) -> Result<AnomalyReport<R>, AnalysisError> {
        if features.is_empty() {
            return Err(AnalysisError::Schema("no feature columns selected".to_string()));
        }
        if let Some(column) = features.iter().find(|c| is_identifier_column(c)) {
            return Err(AnalysisError::Schema(format!(
                "identifier column '{}' cannot be used as a feature",
                column
            )));
        }

        let cells: Vec<Vec<Option<f64>>> = rows
            .iter()
            .map(|row| {
                features
                    .iter()
                    .map(|column| row.feature(column))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<_, _>>()?;

        let valid: Vec<usize> = cells
            .iter()
            .enumerate()
            .filter(|(_, row)| match self.config.invalid_rows {
                InvalidRowPolicy::ForceOutlier => row.iter().all(Option::is_some),
                InvalidRowPolicy::ImputeMean => row.iter().any(Option::is_some),
            })
            .map(|(i, _)| i)
            .collect();

        let mut labels = vec![AnomalyLabel::Outlier; rows.len()];
        let forced_outliers = rows.len() - valid.len();

        let matrix = scaled_matrix(&cells, &valid, features.len());
        let fitted = match self.score_cohort(&matrix) {
            Ok(outliers) => {
                for (pos, &row) in valid.iter().enumerate() {
                    labels[row] = if outliers[pos] {
                        AnomalyLabel::Outlier
                    } else {
                        AnomalyLabel::Normal
                    };
                }
                true
            }
            Err(AnalysisError::EmptyCohort(msg)) => {
                tracing::warn!(
                    "No valid rows to fit on ({}); {} rows keep the outlier label",
                    msg,
                    rows.len()
                );
                false
            }
            Err(e) => return Err(e),
        };

        if forced_outliers > 0 {
            tracing::info!(
                "{} of {} rows forced to outlier for missing features",
                forced_outliers,
                rows.len()
            );
        }

        let rows = rows
            .iter()
            .cloned()
            .zip(labels)
            .map(|(record, anomaly)| Labeled { record, anomaly })
            .collect();

        Ok(AnomalyReport {
            rows,
            valid_rows: valid.len(),
            forced_outliers,
            fitted,
        })
    }

    /// Fit on the cohort and mark exactly `round(contamination * n)` of the
    /// highest-scoring rows; ties go to the earlier row.
    fn score_cohort(&self, matrix: &DMatrix<f64>) -> Result<Vec<bool>, AnalysisError> {
        let mut forest = IsolationForest::new(
            self.config.n_estimators,
            self.config.max_samples,
            self.config.seed,
        );
        forest.fit(matrix)?;
        let scores = forest.score_samples(matrix);

        let n_outliers = (self.config.contamination * scores.len() as f64).round() as usize;
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let mut outliers = vec![false; scores.len()];
        for &i in order.iter().take(n_outliers) {
            outliers[i] = true;
        }
        Ok(outliers)
    }
}

/// Standard-scale each feature over the cohort's defined values. Undefined
/// cells land on the column mean (0 after scaling).
fn scaled_matrix(cells: &[Vec<Option<f64>>], cohort: &[usize], n_features: usize) -> DMatrix<f64> {
    let scalers: Vec<Option<StandardScaler>> = (0..n_features)
        .map(|j| {
            let column: Vec<f64> = cohort.iter().filter_map(|&i| cells[i][j]).collect();
            StandardScaler::fit(&column)
        })
        .collect();

    DMatrix::from_fn(cohort.len(), n_features, |r, j| {
        match (cells[cohort[r]][j], scalers[j]) {
            (Some(v), Some(scaler)) => scaler.transform(v),
            _ => 0.0,
        }
    })
}
