//! Interval coverage monitoring against the declared coverage level.

use outcome_core::{CoverageCounts, ForecastType};
use serde::Serialize;

/// Fewer observations than this never raise a drift flag
const MIN_OBSERVATIONS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageReport {
    pub forecast_type: ForecastType,
    pub declared: f64,
    pub empirical: Option<f64>,
    pub observations: u64,
    pub drifting: bool,
}

/// Tracks whether issued intervals actually contain the realised values
#[derive(Debug, Clone)]
pub struct CoverageMonitor {
    forecast_type: ForecastType,
    declared: f64,
    tolerance: f64,
    hits: u64,
    total: u64,
}

impl CoverageMonitor {
    pub fn new(forecast_type: ForecastType, declared: f64, tolerance: f64) -> Self {
        Self {
            forecast_type,
            declared,
            tolerance,
            hits: 0,
            total: 0,
        }
    }

    /// Seed from persisted verdict history
    pub fn from_counts(
        forecast_type: ForecastType,
        counts: &CoverageCounts,
        tolerance: f64,
        fallback_declared: f64,
    ) -> Self {
        Self {
            forecast_type,
            declared: counts.mean_declared.unwrap_or(fallback_declared),
            tolerance,
            hits: counts.covered,
            total: counts.total,
        }
    }

    pub fn record(&mut self, covered: bool) {
        self.total += 1;
        if covered {
            self.hits += 1;
        }
    }

    pub fn empirical(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }

    /// Empirical coverage fell more than the tolerance below the declared level
    pub fn is_drifting(&self) -> bool {
        match self.empirical() {
            Some(empirical) if self.total >= MIN_OBSERVATIONS => {
                self.declared - empirical > self.tolerance
            }
            _ => false,
        }
    }

    pub fn report(&self) -> CoverageReport {
        let report = CoverageReport {
            forecast_type: self.forecast_type,
            declared: self.declared,
            empirical: self.empirical(),
            observations: self.total,
            drifting: self.is_drifting(),
        };
        if report.drifting {
            tracing::warn!(
                forecast_type = %self.forecast_type,
                declared = self.declared,
                empirical = ?report.empirical,
                observations = self.total,
                "Interval coverage below declared level"
            );
        }
        report
    }
}
