//! Split Conformal Calibration
//!
//! Turns absolute residuals of past regression forecasts into a symmetric
//! interval half-width with a finite-sample coverage guarantee.

use outcome_core::{CalibrationConfig, ForecastType, OutcomeError, PredictionInterval};
use serde::{Deserialize, Serialize};

use crate::window::CalibrationSet;

/// Half-width of the conformal interval for one forecast type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConformalQuantile {
    pub forecast_type: ForecastType,
    /// Interval half-width
    pub quantile: f64,
    /// Declared coverage the quantile was computed for
    pub coverage: f64,
    pub sample_size: usize,
    /// True when the requested rank exceeded `n` and the maximum residual
    /// was used instead
    pub clamped: bool,
}

/// Stateless split-conformal calibrator
#[derive(Debug, Clone)]
pub struct ConformalCalibrator {
    min_samples: usize,
}

impl Default for ConformalCalibrator {
    fn default() -> Self {
        Self::from_config(&CalibrationConfig::default())
    }
}

impl ConformalCalibrator {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(1),
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(config.min_samples)
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Compute the conformal quantile of `set` for the given coverage.
    ///
    /// Rank `k = ceil((n + 1) * coverage)` over the sorted residuals
    /// (1-based). If `k > n` the maximum residual is used.
    pub fn calibrate(
        &self,
        set: &CalibrationSet,
        coverage: f64,
    ) -> Result<ConformalQuantile, OutcomeError> {
        if !(coverage > 0.0 && coverage < 1.0) {
            return Err(OutcomeError::InvalidCoverage(coverage));
        }

        let n = set.len();
        if n < self.min_samples {
            return Err(OutcomeError::InsufficientCalibrationData {
                forecast_type: set.forecast_type(),
                available: n,
                required: self.min_samples,
            });
        }

        let mut scores = set.residuals();
        scores.sort_by(|a, b| a.total_cmp(b));

        // Subtract a hair so that products like 50 * 0.9 do not round up a rank
        let rank = (((n + 1) as f64) * coverage - 1e-9).ceil() as usize;
        let rank = rank.max(1);
        let clamped = rank > n;
        let quantile = if clamped {
            scores[n - 1]
        } else {
            scores[rank - 1]
        };

        tracing::debug!(
            forecast_type = %set.forecast_type(),
            n,
            rank,
            quantile,
            clamped,
            "Conformal quantile computed"
        );

        Ok(ConformalQuantile {
            forecast_type: set.forecast_type(),
            quantile,
            coverage,
            sample_size: n,
            clamped,
        })
    }
}

/// `point ± quantile`
pub fn predict_interval(point: f64, quantile: &ConformalQuantile) -> PredictionInterval {
    PredictionInterval {
        lower: point - quantile.quantile,
        upper: point + quantile.quantile,
        coverage: quantile.coverage,
        quantile: quantile.quantile,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outcome_core::CalibrationPair;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use statrs::distribution::Normal;

    fn set_from_residuals(residuals: &[f64]) -> CalibrationSet {
        let mut set = CalibrationSet::new(ForecastType::TotalAmount, residuals.len());
        for r in residuals {
            set.push(CalibrationPair::new(*r, 0.0));
        }
        set
    }

    #[test]
    fn test_quantile_rank() {
        // n = 39, k = ceil(40 * 0.9) = 36
        let residuals: Vec<f64> = (1..=39).map(|i| i as f64).collect();
        let q = ConformalCalibrator::new(30)
            .calibrate(&set_from_residuals(&residuals), 0.9)
            .unwrap();
        assert_eq!(q.quantile, 36.0);
        assert!(!q.clamped);
        assert_eq!(q.sample_size, 39);
    }

    #[test]
    fn test_exact_product_does_not_round_up() {
        // n = 49, (n + 1) * 0.9 = 45
        let residuals: Vec<f64> = (1..=49).map(|i| i as f64).collect();
        let q = ConformalCalibrator::new(30)
            .calibrate(&set_from_residuals(&residuals), 0.9)
            .unwrap();
        assert_eq!(q.quantile, 45.0);
    }

    #[test]
    fn test_small_sample_clamps_to_max() {
        // n = 5, k = ceil(6 * 0.9) = 6 > 5
        let q = ConformalCalibrator::new(1)
            .calibrate(&set_from_residuals(&[0.5, 2.0, 1.0, 0.1, 0.7]), 0.9)
            .unwrap();
        assert!(q.clamped);
        assert_eq!(q.quantile, 2.0);
    }

    #[test]
    fn test_insufficient_data() {
        let residuals: Vec<f64> = (0..29).map(|i| i as f64).collect();
        let err = ConformalCalibrator::default()
            .calibrate(&set_from_residuals(&residuals), 0.9)
            .unwrap_err();
        assert_eq!(
            err,
            OutcomeError::InsufficientCalibrationData {
                forecast_type: ForecastType::TotalAmount,
                available: 29,
                required: 30,
            }
        );
    }

    #[test]
    fn test_invalid_coverage() {
        let set = set_from_residuals(&[1.0; 40]);
        let calibrator = ConformalCalibrator::default();
        assert!(matches!(
            calibrator.calibrate(&set, 1.0),
            Err(OutcomeError::InvalidCoverage(_))
        ));
        assert!(calibrator.calibrate(&set, 0.0).is_err());
        assert!(calibrator.calibrate(&set, f64::NAN).is_err());
    }

    #[test]
    fn test_predict_interval_is_symmetric() {
        let q = ConformalQuantile {
            forecast_type: ForecastType::TotalAmount,
            quantile: 1.25,
            coverage: 0.9,
            sample_size: 100,
            clamped: false,
        };
        let interval = predict_interval(2.75, &q);
        assert_eq!(interval.lower, 1.5);
        assert_eq!(interval.upper, 4.0);
        assert_eq!(interval.coverage, 0.9);
        assert_eq!(interval.width(), 2.5);
    }

    #[test]
    fn test_calibration_is_order_independent() {
        let forward: Vec<f64> = (0..60).map(|i| (i as f64 * 0.37) % 5.0).collect();
        let mut backward = forward.clone();
        backward.reverse();
        let calibrator = ConformalCalibrator::default();
        assert_eq!(
            calibrator.calibrate(&set_from_residuals(&forward), 0.8).unwrap().quantile,
            calibrator.calibrate(&set_from_residuals(&backward), 0.8).unwrap().quantile
        );
    }

    #[test]
    fn test_empirical_coverage_meets_target() {
        use rand::distributions::Distribution;

        let noise = Normal::new(0.0, 1.3).unwrap();
        let mut rng = StdRng::seed_from_u64(20240501);
        let calibrator = ConformalCalibrator::default();
        let coverage = 0.9;

        let trials = 200;
        let test_points = 500;
        let mut covered = 0usize;

        for _ in 0..trials {
            let mut set = CalibrationSet::new(ForecastType::TotalAmount, 200);
            for _ in 0..200 {
                let predicted = 2.6;
                set.push(CalibrationPair::new(predicted, predicted + noise.sample(&mut rng)));
            }
            let q = calibrator.calibrate(&set, coverage).unwrap();

            for _ in 0..test_points {
                let predicted = 2.6;
                let actual = predicted + noise.sample(&mut rng);
                if predict_interval(predicted, &q).contains(actual) {
                    covered += 1;
                }
            }
        }

        let empirical = covered as f64 / (trials * test_points) as f64;
        assert!(empirical >= coverage - 0.01, "coverage {}", empirical);
        assert!(empirical <= coverage + 0.02, "coverage {}", empirical);
    }
}
