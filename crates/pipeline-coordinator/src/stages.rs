//! Stage runners
//!
//! One runner per [`PipelineStage`]. A runner does the work of its stage for
//! a single window and reports per-entity counts. Errors on one match or
//! forecast are counted as `failed` and never abort the stage; only an error
//! that makes the whole stage meaningless is returned.

use async_trait::async_trait;
use chrono::NaiveDate;
use conformal_calibrator::{predict_interval, CalibrationSet, CoverageMonitor};
use outcome_core::{
    FixtureForecast, ForecastType, OutcomeError, PipelineStage, Scope, StatKey, Subtype, Target,
    Verdict, VerdictRecord,
};
use serde::Serialize;
use statistics_aggregator::Candidate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::context::PipelineContext;

/// Per-entity counts of one stage run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub processed: usize,
    /// Entities deliberately left for a later run
    pub skipped: usize,
    pub failed: usize,
}

impl StageReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[async_trait]
pub trait StageRunner: Send + Sync {
    fn stage(&self) -> PipelineStage;

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError>;
}

/// Runners for every stage, in execution order
pub fn default_runners() -> Vec<Box<dyn StageRunner>> {
    vec![
        Box::new(IngestStage),
        Box::new(FeaturizeStage),
        Box::new(PredictStage),
        Box::new(CalibrateStage),
        Box::new(ValidateStage),
        Box::new(AggregateStage),
        Box::new(PublishStage),
    ]
}

/// Match results are written by external ingestion; this stage only takes
/// stock of what arrived.
pub struct IngestStage;

#[async_trait]
impl StageRunner for IngestStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Ingested
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError> {
        let results = ctx.matches.results_for_window(window).await?;
        let finished = results.iter().filter(|r| r.is_finished()).count();

        tracing::info!(
            window = %window,
            matches = results.len(),
            finished,
            "Match results ingested"
        );
        Ok(StageReport {
            processed: finished,
            skipped: results.len() - finished,
            failed: 0,
        })
    }
}

pub struct FeaturizeStage;

#[async_trait]
impl StageRunner for FeaturizeStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Featurized
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError> {
        let results = ctx.matches.results_for_window(window).await?;
        let report = ctx.deriver.derive_batch(&results).await;

        Ok(StageReport {
            processed: report.derived + report.existing,
            skipped: report.incomplete,
            failed: report.failed.len(),
        })
    }
}

/// Forecasts are written by external inference; this stage checks they exist.
pub struct PredictStage;

#[async_trait]
impl StageRunner for PredictStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Predicted
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError> {
        let forecasts = ctx.forecasts.for_window(window).await?;
        let regression = forecasts
            .iter()
            .filter(|f| f.forecast.forecast_type.is_regression())
            .count();

        tracing::info!(
            window = %window,
            forecasts = forecasts.len(),
            regression,
            "Forecasts available"
        );
        Ok(StageReport {
            processed: forecasts.len(),
            ..StageReport::default()
        })
    }
}

/// Conformal intervals for the window's regression forecasts, calibrated on
/// matches strictly before the window.
pub struct CalibrateStage;

#[async_trait]
impl StageRunner for CalibrateStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Calibrated
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError> {
        let forecasts = ctx.forecasts.for_window(window).await?;
        let calibration = &ctx.config.calibration;
        let mut report = StageReport::default();

        for forecast_type in ForecastType::regression_types() {
            let of_type: Vec<&FixtureForecast> = forecasts
                .iter()
                .filter(|f| f.forecast.forecast_type == forecast_type)
                .collect();
            if of_type.is_empty() {
                continue;
            }

            let pairs = ctx
                .forecasts
                .calibration_pairs(forecast_type, window, calibration.window)
                .await?;
            let set = CalibrationSet::from_newest_first(forecast_type, calibration.window, pairs);

            let quantile = match ctx.calibrator.calibrate(&set, calibration.coverage) {
                Ok(quantile) => quantile,
                Err(OutcomeError::InsufficientCalibrationData {
                    available,
                    required,
                    ..
                }) => {
                    tracing::info!(
                        window = %window,
                        forecast_type = %forecast_type,
                        available,
                        required,
                        "Not enough calibration history, publishing point estimates only"
                    );
                    report.skipped += of_type.len();
                    continue;
                }
                Err(e) => return Err(e),
            };

            for fixture_forecast in of_type {
                let forecast = &fixture_forecast.forecast;
                let (Some(id), Some(point)) = (forecast.id, forecast.point_estimate()) else {
                    report.skipped += 1;
                    continue;
                };
                let interval = predict_interval(point, &quantile);
                match ctx.forecasts.save_interval(id, &interval).await {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        tracing::warn!(
                            forecast_id = id,
                            match_id = forecast.match_id,
                            error = %e,
                            "Failed to save prediction interval"
                        );
                        report.failed += 1;
                    }
                }
            }

            tracing::info!(
                window = %window,
                forecast_type = %forecast_type,
                quantile = quantile.quantile,
                sample_size = quantile.sample_size,
                "Conformal intervals issued"
            );
        }

        Ok(report)
    }
}

fn verdict_record(
    forecast: &FixtureForecast,
    forecast_id: i64,
    verdict: Verdict,
    subtype: Option<Subtype>,
    actual_value: Option<f64>,
) -> VerdictRecord {
    let f = &forecast.forecast;
    let interval = f.interval();
    let covered = match (interval, actual_value) {
        (Some(interval), Some(actual)) => Some(interval.contains(actual)),
        _ => None,
    };

    VerdictRecord {
        forecast_id,
        fixture: forecast.fixture.clone(),
        forecast_type: f.forecast_type,
        subtype,
        raw_subtype: f.subtype.clone(),
        model_version: f.model_version.clone(),
        verdict,
        probability: f.probability(),
        point_estimate: f.point_estimate(),
        interval,
        actual_value,
        covered,
    }
}

/// Verdict bookkeeping across matches. Callers hold the match lock while
/// calling [`VerdictTally::validate_match`].
pub(crate) struct VerdictTally {
    pub report: StageReport,
    /// Keys that received a resolved verdict
    pub touched: BTreeSet<(ForecastType, Subtype)>,
    monitors: HashMap<ForecastType, CoverageMonitor>,
    drift_tolerance: f64,
}

impl VerdictTally {
    pub fn new(drift_tolerance: f64) -> Self {
        Self {
            report: StageReport::default(),
            touched: BTreeSet::new(),
            monitors: HashMap::new(),
            drift_tolerance,
        }
    }

    pub async fn validate_match(
        &mut self,
        ctx: &PipelineContext,
        match_id: i64,
        forecasts: &[&FixtureForecast],
        target: Option<&Target>,
    ) {
        for fixture_forecast in forecasts {
            let forecast = &fixture_forecast.forecast;
            let Some(forecast_id) = forecast.id else {
                self.report.skipped += 1;
                continue;
            };

            let outcome = ctx.validator.validate(
                forecast.forecast_type,
                &forecast.subtype,
                &forecast.raw_outcome(),
                target,
            );
            if outcome.verdict == Verdict::Pending {
                self.report.skipped += 1;
                continue;
            }

            let record = verdict_record(
                fixture_forecast,
                forecast_id,
                outcome.verdict,
                outcome.subtype,
                outcome.actual_value,
            );
            if let Err(e) = ctx.verdicts.upsert(&record).await {
                tracing::warn!(
                    match_id,
                    forecast_id,
                    error = %e,
                    "Failed to store verdict"
                );
                self.report.failed += 1;
                continue;
            }
            self.report.processed += 1;

            if let Some(subtype) = record.subtype {
                self.touched.insert((record.forecast_type, subtype));
            }
            if let (Some(interval), Some(covered)) = (record.interval, record.covered) {
                let tolerance = self.drift_tolerance;
                self.monitors
                    .entry(record.forecast_type)
                    .or_insert_with(|| {
                        CoverageMonitor::new(record.forecast_type, interval.coverage, tolerance)
                    })
                    .record(covered);
            }
        }
    }

    /// Log interval coverage and drop the cached statistics of every
    /// touched key
    pub fn finish(&self, ctx: &PipelineContext, window: NaiveDate) {
        for monitor in self.monitors.values() {
            let coverage = monitor.report();
            tracing::debug!(
                window = %window,
                forecast_type = %coverage.forecast_type,
                empirical = ?coverage.empirical,
                observations = coverage.observations,
                "Window interval coverage"
            );
        }

        if ctx.config.statistics.invalidate_on_validation {
            for (forecast_type, subtype) in &self.touched {
                ctx.aggregator.invalidate(Some(*forecast_type), Some(*subtype));
            }
        }
    }
}

/// Verdicts for every forecast of the window, written under the match locks
pub struct ValidateStage;

#[async_trait]
impl StageRunner for ValidateStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Validated
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError> {
        let forecasts = ctx.forecasts.for_window(window).await?;
        let mut by_match: BTreeMap<i64, Vec<&FixtureForecast>> = BTreeMap::new();
        for forecast in &forecasts {
            by_match
                .entry(forecast.fixture.match_id)
                .or_default()
                .push(forecast);
        }

        // Ascending match order; every other holder takes one lock at a time
        let match_ids: Vec<i64> = by_match.keys().copied().collect();
        let mut guards = Vec::with_capacity(match_ids.len());
        for match_id in &match_ids {
            guards.push(ctx.locks.lock(*match_id).await);
        }
        let targets = ctx.targets.get_many(&match_ids).await?;

        let mut tally = VerdictTally::new(ctx.config.calibration.drift_tolerance);
        for (match_id, match_forecasts) in &by_match {
            tally
                .validate_match(ctx, *match_id, match_forecasts, targets.get(match_id))
                .await;
        }
        drop(guards);

        tally.finish(ctx, window);

        tracing::info!(
            window = %window,
            verdicts = tally.report.processed,
            pending = tally.report.skipped,
            failed = tally.report.failed,
            keys = tally.touched.len(),
            "Window validated"
        );
        Ok(tally.report)
    }
}

/// Recompute and persist the aggregates touched by the window, globally and
/// per sport and league
pub struct AggregateStage;

#[async_trait]
impl StageRunner for AggregateStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Aggregated
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError> {
        let keys = ctx.verdicts.keys_for_window(window).await?;
        let mut scopes = vec![Scope::All];
        scopes.extend(ctx.verdicts.scopes_for_window(window).await?);

        let mut report = StageReport::default();
        for key in &keys {
            for scope in &scopes {
                let scoped = StatKey::new(key.forecast_type, key.subtype, *scope);
                match ctx.aggregator.materialize(&scoped).await {
                    Ok(_) => report.processed += 1,
                    Err(e) => {
                        tracing::warn!(
                            key = %scoped,
                            error = %e,
                            "Failed to materialize statistics"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        // Coverage over the whole history, not just this window
        let mut drifting = 0usize;
        for key in keys.iter().filter(|k| k.forecast_type.is_regression()) {
            match ctx.verdicts.coverage_counts(key).await {
                Ok(counts) => {
                    let coverage = CoverageMonitor::from_counts(
                        key.forecast_type,
                        &counts,
                        ctx.config.calibration.drift_tolerance,
                        ctx.config.calibration.coverage,
                    )
                    .report();
                    if coverage.drifting {
                        drifting += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to load interval coverage");
                }
            }
        }

        tracing::info!(
            window = %window,
            keys = keys.len(),
            scopes = scopes.len(),
            materialized = report.processed,
            drifting,
            "Statistics aggregated"
        );
        Ok(report)
    }
}

/// Quality gate over the window's forecasts, then hand-off to the sink
pub struct PublishStage;

#[async_trait]
impl StageRunner for PublishStage {
    fn stage(&self) -> PipelineStage {
        PipelineStage::Published
    }

    async fn run(
        &self,
        ctx: &PipelineContext,
        window: NaiveDate,
    ) -> Result<StageReport, OutcomeError> {
        let match_ids: Vec<i64> = ctx
            .matches
            .results_for_window(window)
            .await?
            .into_iter()
            .map(|r| r.fixture.match_id)
            .collect();
        let batch = ctx.aggregator.get_statistics_batch(&match_ids).await?;
        let total = batch.len();

        let candidates: Vec<Candidate> = batch
            .into_iter()
            .filter_map(|entry| {
                let key = entry.key?;
                Some(Candidate {
                    statistics: entry.entry.aggregate().cloned(),
                    forecast: entry.forecast,
                    key,
                })
            })
            .collect();

        let selected = ctx.selector.select(candidates);
        ctx.sink.publish(window, &selected).await?;

        tracing::info!(
            window = %window,
            forecasts = total,
            published = selected.len(),
            "Window published"
        );
        Ok(StageReport {
            processed: selected.len(),
            skipped: total - selected.len(),
            failed: 0,
        })
    }
}
