//! Small descriptive-statistics helpers shared by the scaling, detection and
//! testing stages.

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Compute sample standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    sample_variance(data).sqrt()
}

/// Unbiased (n - 1) variance. Zero for fewer than two values.
pub fn sample_variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64
}

/// Population (n) standard deviation, the estimator used for z-scaling.
pub fn population_std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let m = mean(data);
    (data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Zero-mean, unit-variance scaling fitted on one column.
///
/// A constant column keeps a scale of 1.0, so every value maps to 0.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardScaler {
    pub mean: f64,
    pub scale: f64,
}

impl StandardScaler {
    /// Fit on the given values. `None` when there is nothing to fit on.
    pub fn fit(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sd = population_std_dev(values);
        let scale = if sd > f64::EPSILON * mean(values).abs().max(1.0) {
            sd
        } else {
            1.0
        };
        Some(Self {
            mean: mean(values),
            scale,
        })
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let data = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert!((mean(&data) - 30.0).abs() < 1e-12);
        assert!((std_dev(&data) - 250.0_f64.sqrt()).abs() < 1e-12);
        assert!((population_std_dev(&data) - 200.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(std_dev(&[1.0]), 0.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_scaler_zero_mean_unit_variance() {
        let data = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let scaler = StandardScaler::fit(&data).unwrap();
        let scaled: Vec<f64> = data.iter().map(|v| scaler.transform(*v)).collect();
        assert!(mean(&scaled).abs() < 1e-12);
        assert!((population_std_dev(&scaled) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_scaler_constant_column() {
        let scaler = StandardScaler::fit(&[3.0, 3.0, 3.0]).unwrap();
        assert_eq!(scaler.scale, 1.0);
        assert_eq!(scaler.transform(3.0), 0.0);
        assert!(StandardScaler::fit(&[]).is_none());
    }
}
