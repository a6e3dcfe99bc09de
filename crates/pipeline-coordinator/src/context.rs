//! Shared dependencies of the stage runners.

use conformal_calibrator::ConformalCalibrator;
use outcome_core::{
    EngineConfig, ForecastStore, KeyedLock, MatchStore, PipelineStateStore, TargetStore,
    VerdictStore,
};
use outcome_store::OutcomeDb;
use outcome_validator::OutcomeValidator;
use statistics_aggregator::{QualitySelector, StatisticsAggregator, StatisticsCache};
use std::sync::Arc;
use target_deriver::TargetDeriver;

use crate::publish::{LogSink, PublicationSink};

/// Everything a stage runner needs, wired once per process
pub struct PipelineContext {
    pub matches: Arc<dyn MatchStore>,
    pub targets: Arc<dyn TargetStore>,
    pub forecasts: Arc<dyn ForecastStore>,
    pub verdicts: Arc<dyn VerdictStore>,
    pub state: Arc<dyn PipelineStateStore>,
    pub deriver: TargetDeriver,
    pub calibrator: ConformalCalibrator,
    pub validator: OutcomeValidator,
    pub aggregator: StatisticsAggregator,
    pub selector: QualitySelector,
    pub sink: Arc<dyn PublicationSink>,
    /// Shared with the deriver: one writer per match
    pub locks: Arc<KeyedLock<i64>>,
    pub config: EngineConfig,
}

impl PipelineContext {
    pub fn new(db: &OutcomeDb, config: EngineConfig) -> Self {
        let locks = Arc::new(KeyedLock::new());
        let targets: Arc<dyn TargetStore> = Arc::new(db.targets());
        let forecasts: Arc<dyn ForecastStore> = Arc::new(db.forecasts());
        let verdicts: Arc<dyn VerdictStore> = Arc::new(db.verdicts());
        let validator = OutcomeValidator::new(config.thresholds.clone());

        let cache = Arc::new(StatisticsCache::new(config.statistics.cache_capacity));
        let aggregator = StatisticsAggregator::new(
            Arc::clone(&verdicts),
            Arc::clone(&forecasts),
            Arc::new(db.aggregates()),
            cache,
            validator.clone(),
            config.statistics.clone(),
        );

        Self {
            matches: Arc::new(db.matches()),
            deriver: TargetDeriver::new(
                Arc::clone(&targets),
                config.thresholds.clone(),
                Arc::clone(&locks),
            ),
            targets,
            forecasts,
            verdicts,
            state: Arc::new(db.pipeline()),
            calibrator: ConformalCalibrator::from_config(&config.calibration),
            validator,
            aggregator,
            selector: QualitySelector::new(config.quality.clone()),
            sink: Arc::new(LogSink),
            locks,
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PublicationSink>) -> Self {
        self.sink = sink;
        self
    }
}
