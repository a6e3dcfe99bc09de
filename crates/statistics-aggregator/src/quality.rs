//! Quality gate that picks the forecasts worth publishing.

use outcome_core::{Aggregate, FixtureForecast, QualityConfig, StatKey};
use serde::Serialize;
use std::cmp::Ordering;

/// A forecast up for publication with the statistics of its key
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub forecast: FixtureForecast,
    pub key: StatKey,
    pub statistics: Option<Aggregate>,
}

impl Candidate {
    fn accuracy(&self) -> f64 {
        self.statistics.as_ref().map(|s| s.accuracy).unwrap_or(0.0)
    }

    fn probability(&self) -> f64 {
        self.forecast.forecast.probability().unwrap_or(0.0)
    }
}

/// Publication gate: which forecasts are good enough to publish
#[derive(Debug, Clone)]
pub struct QualitySelector {
    config: QualityConfig,
}

impl QualitySelector {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Whether a single candidate clears every threshold.
    ///
    /// Regression forecasts need a conformal interval. Classification
    /// forecasts need the minimum probability. History thresholds only
    /// apply when configured above zero.
    pub fn passes(&self, candidate: &Candidate) -> bool {
        let forecast = &candidate.forecast.forecast;

        if forecast.forecast_type.is_regression() {
            if forecast.interval().is_none() {
                return false;
            }
        } else {
            match forecast.probability() {
                Some(p) if p >= self.config.min_probability => {}
                _ => return false,
            }
        }

        let needs_history = self.config.min_samples > 0 || self.config.min_accuracy > 0.0;
        if !needs_history {
            return true;
        }

        match &candidate.statistics {
            Some(stats) => {
                stats.count >= self.config.min_samples && stats.accuracy >= self.config.min_accuracy
            }
            None => false,
        }
    }

    /// Best candidates first: historical accuracy, then probability, then
    /// match id. At most `top_n`.
    pub fn select(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let total = candidates.len();
        let mut selected: Vec<Candidate> =
            candidates.into_iter().filter(|c| self.passes(c)).collect();

        selected.sort_by(|a, b| {
            b.accuracy()
                .partial_cmp(&a.accuracy())
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.probability()
                        .partial_cmp(&a.probability())
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.forecast.fixture.match_id.cmp(&b.forecast.fixture.match_id))
        });
        selected.truncate(self.config.top_n);

        tracing::debug!(
            candidates = total,
            selected = selected.len(),
            "Quality selection complete"
        );
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use outcome_core::{
        Fixture, Forecast, ForecastType, ForecastValue, PredictionInterval, Scope, Sport, Subtype,
        ESTIMATE_SUBTYPE,
    };

    fn fixture(match_id: i64) -> Fixture {
        Fixture {
            match_id,
            sport: Sport::Soccer,
            league_id: 39,
            match_date: NaiveDate::from_ymd_opt(2024, 5, 4).unwrap(),
        }
    }

    fn stats(key: StatKey, count: u64, accuracy: f64) -> Aggregate {
        Aggregate {
            key,
            count,
            correct: (count as f64 * accuracy).round() as u64,
            accuracy,
            recent_count: 0,
            recent_correct: 0,
            recent_accuracy: 0.0,
            calibration_error: None,
            empirical_coverage: None,
            declared_coverage: None,
            stability: 0.75,
            lower_bound: 0.0,
            upper_bound: 1.0,
            computed_at: Utc::now(),
        }
    }

    fn classification(match_id: i64, probability: f64, history: Option<(u64, f64)>) -> Candidate {
        let key = StatKey::new(ForecastType::Total, Subtype::Over, Scope::All);
        Candidate {
            forecast: FixtureForecast {
                fixture: fixture(match_id),
                forecast: Forecast {
                    id: Some(match_id),
                    match_id,
                    forecast_type: ForecastType::Total,
                    subtype: "over".to_string(),
                    model_version: "v1".to_string(),
                    value: ForecastValue::Category {
                        label: "over".to_string(),
                        probability,
                    },
                },
            },
            key,
            statistics: history.map(|(count, accuracy)| stats(key, count, accuracy)),
        }
    }

    fn regression(match_id: i64, interval: Option<PredictionInterval>) -> Candidate {
        let key = StatKey::new(ForecastType::TotalAmount, Subtype::Over, Scope::All);
        Candidate {
            forecast: FixtureForecast {
                fixture: fixture(match_id),
                forecast: Forecast {
                    id: Some(match_id),
                    match_id,
                    forecast_type: ForecastType::TotalAmount,
                    subtype: ESTIMATE_SUBTYPE.to_string(),
                    model_version: "v1".to_string(),
                    value: ForecastValue::Estimate {
                        value: 3.2,
                        interval,
                    },
                },
            },
            key,
            statistics: None,
        }
    }

    #[test]
    fn test_regression_requires_interval() {
        let selector = QualitySelector::new(QualityConfig::default());
        let interval = PredictionInterval {
            lower: 1.7,
            upper: 4.7,
            coverage: 0.9,
            quantile: 1.5,
        };
        assert!(selector.passes(&regression(1, Some(interval))));
        assert!(!selector.passes(&regression(2, None)));
    }

    #[test]
    fn test_probability_and_history_thresholds() {
        let selector = QualitySelector::new(QualityConfig {
            min_probability: 0.6,
            min_accuracy: 0.55,
            min_samples: 50,
            top_n: 10,
        });
        assert!(selector.passes(&classification(1, 0.7, Some((80, 0.6)))));
        assert!(!selector.passes(&classification(2, 0.5, Some((80, 0.6)))));
        assert!(!selector.passes(&classification(3, 0.7, Some((20, 0.9)))));
        assert!(!selector.passes(&classification(4, 0.7, Some((80, 0.5)))));
        assert!(!selector.passes(&classification(5, 0.7, None)));
    }

    #[test]
    fn test_no_history_needed_without_thresholds() {
        let selector = QualitySelector::new(QualityConfig::default());
        assert!(selector.passes(&classification(1, 0.1, None)));
    }

    #[test]
    fn test_select_orders_and_truncates() {
        let selector = QualitySelector::new(QualityConfig {
            top_n: 3,
            ..QualityConfig::default()
        });
        let picked = selector.select(vec![
            classification(10, 0.60, Some((30, 0.5))),
            classification(11, 0.80, Some((30, 0.7))),
            classification(12, 0.65, Some((30, 0.7))),
            classification(13, 0.80, Some((30, 0.7))),
            classification(14, 0.90, None),
        ]);

        let ids: Vec<i64> = picked.iter().map(|c| c.forecast.fixture.match_id).collect();
        assert_eq!(ids, vec![11, 13, 12]);
    }
}
