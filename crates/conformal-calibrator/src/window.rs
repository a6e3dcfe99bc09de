//! Rolling calibration window of absolute residuals, oldest first.

use outcome_core::{CalibrationPair, ForecastType};
use std::collections::VecDeque;

/// Rolling calibration history for one forecast type, oldest first.
///
/// Holds at most `capacity` pairs; pushing past it drops the oldest.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    forecast_type: ForecastType,
    capacity: usize,
    pairs: VecDeque<CalibrationPair>,
}

impl CalibrationSet {
    pub fn new(forecast_type: ForecastType, capacity: usize) -> Self {
        Self {
            forecast_type,
            capacity,
            pairs: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    /// Build from history returned newest first, as the forecast store does
    pub fn from_newest_first(
        forecast_type: ForecastType,
        capacity: usize,
        newest_first: Vec<CalibrationPair>,
    ) -> Self {
        let mut set = Self::new(forecast_type, capacity);
        for pair in newest_first.into_iter().rev() {
            set.push(pair);
        }
        set
    }

    /// Append the newest observation. Non-finite pairs are ignored.
    pub fn push(&mut self, pair: CalibrationPair) -> bool {
        if !(pair.predicted.is_finite() && pair.actual.is_finite()) {
            tracing::debug!(
                forecast_type = %self.forecast_type,
                "Ignoring non-finite calibration pair"
            );
            return false;
        }
        if self.capacity == 0 {
            return false;
        }
        if self.pairs.len() == self.capacity {
            self.pairs.pop_front();
        }
        self.pairs.push_back(pair);
        true
    }

    pub fn forecast_type(&self) -> ForecastType {
        self.forecast_type
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Nonconformity scores in insertion order
    pub fn residuals(&self) -> Vec<f64> {
        self.pairs.iter().map(CalibrationPair::residual).collect()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &CalibrationPair> {
        self.pairs.iter()
    }
}
