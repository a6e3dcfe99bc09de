//! Statistics Aggregation
//!
//! Per-key accuracy, calibration and stability statistics, served through
//! the generation-checked cache, plus the batched variant used at
//! publication time.

use chrono::{Duration, Utc};
use outcome_core::{
    Aggregate, AggregateStore, FixtureForecast, ForecastStore, ForecastType, OutcomeError, Scope,
    StatKey, StatisticsConfig, Subtype, VerdictStore,
};
use outcome_validator::OutcomeValidator;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

use crate::cache::{CacheError, StatisticsCache};
use crate::metrics::{calibration_error, stability, wilson_bounds, z_score};

/// Statistics for one key inside a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "aggregate", rename_all = "snake_case")]
pub enum BatchEntry {
    Fresh(Aggregate),
    /// Last materialized row, served because the batch ran out of time or
    /// the recompute failed
    Stale(Aggregate),
    Unavailable,
}

impl BatchEntry {
    pub fn aggregate(&self) -> Option<&Aggregate> {
        match self {
            BatchEntry::Fresh(a) | BatchEntry::Stale(a) => Some(a),
            BatchEntry::Unavailable => None,
        }
    }
}

/// A forecast of the batch with the statistics of its key
#[derive(Debug, Clone, Serialize)]
pub struct ForecastStatistics {
    pub forecast: FixtureForecast,
    /// `None` when the forecast has no mappable subtype
    pub key: Option<StatKey>,
    pub entry: BatchEntry,
}

pub struct StatisticsAggregator {
    verdicts: Arc<dyn VerdictStore>,
    forecasts: Arc<dyn ForecastStore>,
    aggregates: Arc<dyn AggregateStore>,
    cache: Arc<StatisticsCache>,
    validator: OutcomeValidator,
    config: StatisticsConfig,
    z: f64,
}

impl StatisticsAggregator {
    pub fn new(
        verdicts: Arc<dyn VerdictStore>,
        forecasts: Arc<dyn ForecastStore>,
        aggregates: Arc<dyn AggregateStore>,
        cache: Arc<StatisticsCache>,
        validator: OutcomeValidator,
        config: StatisticsConfig,
    ) -> Self {
        let z = z_score(config.confidence_level);
        Self {
            verdicts,
            forecasts,
            aggregates,
            cache,
            validator,
            config,
            z,
        }
    }

    pub fn cache(&self) -> &Arc<StatisticsCache> {
        &self.cache
    }

    /// Statistics for one key, served from the cache when still valid
    pub async fn get_statistics(
        &self,
        forecast_type: ForecastType,
        subtype: Subtype,
        scope: Scope,
    ) -> Result<Aggregate, OutcomeError> {
        let key = StatKey::new(forecast_type, subtype, scope);

        match self.cache.get(&key) {
            Ok(aggregate) => return Ok(aggregate),
            Err(CacheError::Stale(_)) => {
                tracing::debug!(key = %key, "Cached statistics are stale, recomputing");
            }
            Err(CacheError::Miss(_)) => {}
        }

        let stamp = self.cache.stamp(&key);
        let aggregate = self.compute(&key).await?;
        self.cache.insert(key, aggregate.clone(), stamp);
        Ok(aggregate)
    }

    /// Recompute a key from the verdict history, bypassing the cache
    pub async fn compute(&self, key: &StatKey) -> Result<Aggregate, OutcomeError> {
        let since = Utc::now().date_naive() - Duration::days(self.config.stability_days);

        let (lifetime, recent, mean_probability, coverage, dated) = tokio::try_join!(
            self.verdicts.lifetime_counts(key),
            self.verdicts.recent_outcomes(key, self.config.recent_window),
            self.verdicts.mean_probability(key),
            self.verdicts.coverage_counts(key),
            self.verdicts.dated_outcomes(key, since),
        )?;

        let (count, correct) = lifetime;
        let accuracy = ratio(correct, count);
        let recent_count = recent.len() as u64;
        let recent_correct = recent.iter().filter(|c| **c).count() as u64;

        let regression = key.forecast_type.is_regression();
        let (empirical_coverage, declared_coverage, calibration) = if regression {
            let empirical = (coverage.total > 0).then(|| ratio(coverage.covered, coverage.total));
            let declared = coverage.mean_declared;
            let error = match (declared, empirical) {
                (Some(d), Some(e)) => Some(calibration_error(d, e)),
                _ => None,
            };
            (empirical, declared, error)
        } else {
            let error = match mean_probability {
                Some(p) if count > 0 => Some(calibration_error(p, accuracy)),
                _ => None,
            };
            (None, None, error)
        };

        let (lower_bound, upper_bound) = wilson_bounds(correct, count, self.z);

        Ok(Aggregate {
            key: *key,
            count,
            correct,
            accuracy,
            recent_count,
            recent_correct,
            recent_accuracy: ratio(recent_correct, recent_count),
            calibration_error: calibration,
            empirical_coverage,
            declared_coverage,
            stability: stability(&dated),
            lower_bound,
            upper_bound,
            computed_at: Utc::now(),
        })
    }

    /// Recompute a key, persist the row and refresh the cache
    pub async fn materialize(&self, key: &StatKey) -> Result<Aggregate, OutcomeError> {
        let stamp = self.cache.stamp(key);
        let aggregate = self.compute(key).await?;
        self.aggregates.upsert(&aggregate).await?;
        self.cache.insert(*key, aggregate.clone(), stamp);
        Ok(aggregate)
    }

    pub fn invalidate(&self, forecast_type: Option<ForecastType>, subtype: Option<Subtype>) {
        self.cache.invalidate(forecast_type, subtype);
    }

    /// Global-scope key a forecast's statistics live under
    pub fn key_for(&self, forecast: &FixtureForecast) -> Option<StatKey> {
        let f = &forecast.forecast;
        let sport = forecast.fixture.sport;
        self.validator
            .predicted_subtype(f.forecast_type, &f.subtype, &f.raw_outcome(), sport)
            .ok()
            .map(|subtype| StatKey::new(f.forecast_type, subtype, Scope::All))
    }

    /// Statistics for every forecast of the given matches. Each distinct key
    /// is computed once. Keys not finished by the batch deadline fall back
    /// to their last materialized row.
    pub async fn get_statistics_batch(
        &self,
        match_ids: &[i64],
    ) -> Result<Vec<ForecastStatistics>, OutcomeError> {
        let forecasts = self.forecasts.for_matches(match_ids).await?;
        let keyed: Vec<(FixtureForecast, Option<StatKey>)> = forecasts
            .into_iter()
            .map(|f| {
                let key = self.key_for(&f);
                (f, key)
            })
            .collect();

        let unique: BTreeSet<(ForecastType, Subtype)> = keyed
            .iter()
            .filter_map(|(_, key)| key.map(|k| (k.forecast_type, k.subtype)))
            .collect();

        let deadline =
            Instant::now() + std::time::Duration::from_millis(self.config.batch_timeout_ms);
        let mut entries: HashMap<StatKey, BatchEntry> = HashMap::with_capacity(unique.len());

        for (forecast_type, subtype) in unique {
            let key = StatKey::new(forecast_type, subtype, Scope::All);
            let computed = tokio::time::timeout_at(
                deadline,
                self.get_statistics(forecast_type, subtype, Scope::All),
            )
            .await;

            let entry = match computed {
                Ok(Ok(aggregate)) => BatchEntry::Fresh(aggregate),
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "Statistics recompute failed");
                    self.fallback(&key).await
                }
                Err(_) => {
                    tracing::warn!(key = %key, "Statistics batch deadline reached");
                    self.fallback(&key).await
                }
            };
            entries.insert(key, entry);
        }

        Ok(keyed
            .into_iter()
            .map(|(forecast, key)| {
                let entry = key
                    .and_then(|k| entries.get(&k).cloned())
                    .unwrap_or(BatchEntry::Unavailable);
                ForecastStatistics {
                    forecast,
                    key,
                    entry,
                }
            })
            .collect())
    }

    async fn fallback(&self, key: &StatKey) -> BatchEntry {
        match self.aggregates.get(key).await {
            Ok(Some(aggregate)) => BatchEntry::Stale(aggregate),
            Ok(None) => BatchEntry::Unavailable,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Materialized statistics unavailable");
                BatchEntry::Unavailable
            }
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
