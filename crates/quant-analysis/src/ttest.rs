use statrs::distribution::{ContinuousCDF, StudentsT};

use analysis_core::stats::{mean, sample_variance};
use analysis_core::{AnalysisError, FeatureRow, GroupRow, HypothesisReport, TwoSampleTestResult};

pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

fn finite(sample: &[Option<f64>]) -> Vec<f64> {
    sample.iter().flatten().copied().filter(|v| v.is_finite()).collect()
}

/// Welch's unequal-variance t-test, two-sided.
///
/// Undefined and non-finite observations are dropped before testing. Each
/// sample needs at least two observations.
pub fn welch_t_test(
    label_1: &str,
    sample_1: &[Option<f64>],
    label_2: &str,
    sample_2: &[Option<f64>],
) -> Result<TwoSampleTestResult, AnalysisError> {
    let a = finite(sample_1);
    let b = finite(sample_2);

    for (label, sample) in [(label_1, &a), (label_2, &b)] {
        if sample.len() < 2 {
            return Err(AnalysisError::InsufficientData(format!(
                "group '{}' has {} observations, need at least 2",
                label,
                sample.len()
            )));
        }
    }

    let (n_1, n_2) = (a.len() as f64, b.len() as f64);
    let (mean_1, mean_2) = (mean(&a), mean(&b));
    let se_1 = sample_variance(&a) / n_1;
    let se_2 = sample_variance(&b) / n_2;
    let se = se_1 + se_2;

    if se <= 0.0 {
        return Err(AnalysisError::CalculationError(format!(
            "groups '{}' and '{}' both have zero variance",
            label_1, label_2
        )));
    }

    let statistic = (mean_1 - mean_2) / se.sqrt();
    let degrees_of_freedom = se.powi(2) / (se_1.powi(2) / (n_1 - 1.0) + se_2.powi(2) / (n_2 - 1.0));

    let dist = StudentsT::new(0.0, 1.0, degrees_of_freedom)
        .map_err(|e| AnalysisError::CalculationError(format!("Student's t: {}", e)))?;
    let p_value = (2.0 * dist.sf(statistic.abs())).min(1.0);

    Ok(TwoSampleTestResult {
        value_column: String::new(),
        group_column: String::new(),
        group_1: label_1.to_string(),
        group_2: label_2.to_string(),
        n_1: a.len(),
        n_2: b.len(),
        mean_1,
        mean_2,
        statistic,
        degrees_of_freedom,
        p_value,
        significant: p_value < SIGNIFICANCE_LEVEL,
    })
}

/// Compare `value_column` between the rows whose `group_column` equals
/// `group_1` and those equal to `group_2`.
pub fn compare_groups<R: FeatureRow + GroupRow>(
    rows: &[R],
    group_column: &str,
    value_column: &str,
    group_1: &str,
    group_2: &str,
) -> Result<TwoSampleTestResult, AnalysisError> {
    let mut sample_1 = Vec::new();
    let mut sample_2 = Vec::new();

    for row in rows {
        let key = row.group_key(group_column)?;
        if key == group_1 {
            sample_1.push(row.feature(value_column)?);
        } else if key == group_2 {
            sample_2.push(row.feature(value_column)?);
        }
    }

    let mut result = welch_t_test(group_1, &sample_1, group_2, &sample_2)?;
    result.value_column = value_column.to_string();
    result.group_column = group_column.to_string();
    Ok(result)
}

pub fn year_over_year<R: FeatureRow + GroupRow>(
    rows: &[R],
    value_column: &str,
    year_1: i32,
    year_2: i32,
) -> Result<TwoSampleTestResult, AnalysisError> {
    compare_groups(rows, "year", value_column, &year_1.to_string(), &year_2.to_string())
}

/// Outliers (group 1) against normal rows (group 2).
pub fn anomaly_vs_normal<R: FeatureRow + GroupRow>(
    rows: &[R],
    value_column: &str,
) -> Result<TwoSampleTestResult, AnalysisError> {
    compare_groups(rows, "anomaly", value_column, "1", "0")
}

/// One planned two-group comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub name: String,
    pub group_column: String,
    pub value_column: String,
    pub group_1: String,
    pub group_2: String,
}

impl Hypothesis {
    pub fn new(name: &str, group_column: &str, value_column: &str, group_1: &str, group_2: &str) -> Self {
        Self {
            name: name.to_string(),
            group_column: group_column.to_string(),
            value_column: value_column.to_string(),
            group_1: group_1.to_string(),
            group_2: group_2.to_string(),
        }
    }
}

/// A batch of comparisons run against the same table.
#[derive(Debug, Clone, Default)]
pub struct HypothesisSuite {
    pub hypotheses: Vec<Hypothesis>,
}

impl HypothesisSuite {
    pub fn new(hypotheses: Vec<Hypothesis>) -> Self {
        Self { hypotheses }
    }

    /// Studies run over the labeled ratio table by the batch driver.
    pub fn default_ratio_suite() -> Self {
        Self::new(vec![
            Hypothesis::new("roa_outlier_vs_normal", "anomaly", "roa", "1", "0"),
            Hypothesis::new("debt_equity_2020_vs_2023", "year", "debt_equity", "2020", "2023"),
            Hypothesis::new("net_margin_2019_vs_2021", "year", "net_margin", "2019", "2021"),
        ])
    }

    /// Run every comparison, keeping each outcome.
    pub fn try_run<R: FeatureRow + GroupRow>(
        &self,
        rows: &[R],
    ) -> Vec<(String, Result<TwoSampleTestResult, AnalysisError>)> {
        self.hypotheses
            .iter()
            .map(|h| {
                let result = compare_groups(rows, &h.group_column, &h.value_column, &h.group_1, &h.group_2);
                (h.name.clone(), result)
            })
            .collect()
    }

    /// Run every comparison, keyed by hypothesis name. Statistical edge
    /// cases are logged and skipped; schema errors are returned.
    pub fn run<R: FeatureRow + GroupRow>(&self, rows: &[R]) -> Result<HypothesisReport, AnalysisError> {
        let mut results = HypothesisReport::new();
        for (name, outcome) in self.try_run(rows) {
            match outcome {
                Ok(result) => {
                    results.insert(name, result);
                }
                Err(e @ AnalysisError::Schema(_)) => return Err(e),
                Err(e) => tracing::warn!("Skipping hypothesis {}: {}", name, e),
            }
        }
        Ok(results)
    }
}
