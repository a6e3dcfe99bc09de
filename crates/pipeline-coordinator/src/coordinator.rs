//! Per-window stage state machine and command dispatch

use chrono::{Duration, NaiveDate, Utc};
use outcome_core::{
    FixtureForecast, MatchResult, OutcomeError, PipelineStage, Scope, StatKey, WindowStatus,
};
use std::time::Instant;

use crate::command::{Command, ExitSignal};
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::stages::{default_runners, StageReport, StageRunner, VerdictTally};

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: PipelineStage,
    pub report: StageReport,
}

/// What happened to one window during a run
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    pub window: NaiveDate,
    pub stages: Vec<StageOutcome>,
    /// Stages skipped because an earlier run completed them
    pub already_complete: Vec<PipelineStage>,
    /// The error that halted the window
    pub error: Option<PipelineError>,
}

impl WindowReport {
    fn new(window: NaiveDate) -> Self {
        Self {
            window,
            stages: Vec::new(),
            already_complete: Vec::new(),
            error: None,
        }
    }

    pub fn signal(&self) -> ExitSignal {
        match &self.error {
            Some(e) if e.is_retryable() => ExitSignal::Partial,
            Some(_) => ExitSignal::Fatal,
            None if self.stages.iter().any(|s| s.report.has_failures()) => ExitSignal::Partial,
            None => ExitSignal::Success,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub windows: Vec<WindowReport>,
    pub status: Vec<WindowStatus>,
}

impl RunSummary {
    pub fn exit_signal(&self) -> ExitSignal {
        self.windows
            .iter()
            .map(WindowReport::signal)
            .max()
            .unwrap_or(ExitSignal::Success)
    }
}

/// Drives the stage state machine per window
pub struct Coordinator {
    ctx: PipelineContext,
    runners: Vec<Box<dyn StageRunner>>,
}

impl Coordinator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            runners: default_runners(),
        }
    }

    /// Replace the runner of one stage
    pub fn with_runner(mut self, runner: Box<dyn StageRunner>) -> Self {
        let stage = runner.stage();
        self.runners.retain(|r| r.stage() != stage);
        self.runners.push(runner);
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    fn runner(&self, stage: PipelineStage) -> Result<&dyn StageRunner, PipelineError> {
        self.runners
            .iter()
            .find(|r| r.stage() == stage)
            .map(|r| &**r)
            .ok_or_else(|| {
                PipelineError::Outcome(OutcomeError::Config(format!(
                    "no runner registered for stage {}",
                    stage
                )))
            })
    }

    /// Run a single stage for a window. The predecessor must have completed
    /// for the same window. Completion or failure is recorded either way.
    pub async fn run_stage(
        &self,
        stage: PipelineStage,
        window: NaiveDate,
    ) -> Result<StageReport, PipelineError> {
        if let Some(predecessor) = stage.predecessor() {
            if self.ctx.state.completed_at(window, predecessor).await?.is_none() {
                return Err(PipelineError::PredecessorIncomplete {
                    stage,
                    window,
                    predecessor,
                });
            }
        }

        let runner = self.runner(stage)?;
        let started = Instant::now();

        match runner.run(&self.ctx, window).await {
            Ok(report) => {
                self.ctx
                    .state
                    .record_completion(window, stage, Utc::now())
                    .await
                    .map_err(|source| PipelineError::StageFailed {
                        stage,
                        window,
                        source,
                    })?;
                tracing::info!(
                    window = %window,
                    stage = %stage,
                    processed = report.processed,
                    skipped = report.skipped,
                    failed = report.failed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stage completed"
                );
                Ok(report)
            }
            Err(source) => {
                tracing::error!(
                    window = %window,
                    stage = %stage,
                    error = %source,
                    "Stage failed"
                );
                if let Err(e) = self
                    .ctx
                    .state
                    .record_failure(window, stage, &source.to_string(), Utc::now())
                    .await
                {
                    tracing::warn!(
                        window = %window,
                        stage = %stage,
                        error = %e,
                        "Failed to record stage failure"
                    );
                }
                Err(PipelineError::StageFailed {
                    stage,
                    window,
                    source,
                })
            }
        }
    }

    /// Run every stage of a window in order, halting at the first stage
    /// error. Completed stages are skipped unless `rerun_completed`.
    pub async fn run_window(&self, window: NaiveDate, rerun_completed: bool) -> WindowReport {
        let mut report = WindowReport::new(window);

        for stage in PipelineStage::ALL {
            if !rerun_completed {
                match self.ctx.state.completed_at(window, stage).await {
                    Ok(Some(_)) => {
                        report.already_complete.push(stage);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        report.error = Some(e.into());
                        break;
                    }
                }
            }

            match self.run_stage(stage, window).await {
                Ok(stage_report) => report.stages.push(StageOutcome {
                    stage,
                    report: stage_report,
                }),
                Err(e) => {
                    tracing::warn!(window = %window, error = %e, "Window halted");
                    report.error = Some(e);
                    break;
                }
            }
        }

        report
    }

    /// Yesterday's window, for results that arrived overnight, then today's.
    /// Both are re-run from the first stage.
    pub async fn run_today(&self, today: NaiveDate) -> RunSummary {
        let mut summary = RunSummary::default();
        for window in [today - Duration::days(1), today] {
            summary.windows.push(self.run_window(window, true).await);
        }
        summary
    }

    /// Every window with match results, oldest first, resuming where earlier
    /// runs stopped
    pub async fn run_all_time(&self) -> Result<RunSummary, PipelineError> {
        let mut windows = self.ctx.matches.windows().await?;
        windows.sort();
        tracing::info!(windows = windows.len(), "Backfilling all windows");

        let mut summary = RunSummary::default();
        for window in windows {
            summary.windows.push(self.run_window(window, false).await);
        }
        Ok(summary)
    }

    /// Replace the stored target of a finished match with a corrected score.
    /// Cached statistics of every affected forecast type are dropped, the
    /// match is re-validated and its aggregates are recomputed.
    pub async fn correct(
        &self,
        match_id: i64,
        home_goals: i32,
        away_goals: i32,
        reason: &str,
    ) -> Result<WindowReport, PipelineError> {
        let ctx = &self.ctx;
        let stored = ctx
            .matches
            .result(match_id)
            .await?
            .ok_or_else(|| OutcomeError::InvalidData(format!("unknown match {}", match_id)))?;
        let corrected = MatchResult {
            fixture: stored.fixture,
            home_goals: Some(home_goals),
            away_goals: Some(away_goals),
        };
        let fixture = &corrected.fixture;

        let correction = ctx.deriver.correct(&corrected, reason).await?;
        ctx.matches.upsert_result(&corrected).await?;
        for forecast_type in &correction.affected {
            ctx.aggregator.invalidate(Some(*forecast_type), None);
        }

        let forecasts = ctx.forecasts.for_matches(&[match_id]).await?;
        let forecasts: Vec<&FixtureForecast> = forecasts.iter().collect();
        let mut tally = VerdictTally::new(ctx.config.calibration.drift_tolerance);
        {
            let _guard = ctx.locks.lock(match_id).await;
            let target = ctx.targets.get(match_id).await?;
            tally
                .validate_match(ctx, match_id, &forecasts, target.as_ref())
                .await;
        }
        tally.finish(ctx, fixture.match_date);

        let scopes = [
            Scope::All,
            Scope::Sport(fixture.sport),
            Scope::League(fixture.league_id),
        ];
        let mut aggregated = StageReport::default();
        for (forecast_type, subtype) in &tally.touched {
            for scope in scopes {
                let key = StatKey::new(*forecast_type, *subtype, scope);
                match ctx.aggregator.materialize(&key).await {
                    Ok(_) => aggregated.processed += 1,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to materialize statistics");
                        aggregated.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            match_id,
            window = %fixture.match_date,
            affected = correction.affected.len(),
            verdicts = tally.report.processed,
            aggregates = aggregated.processed,
            "Target correction applied"
        );

        let mut report = WindowReport::new(fixture.match_date);
        report.stages.push(StageOutcome {
            stage: PipelineStage::Validated,
            report: tally.report,
        });
        report.stages.push(StageOutcome {
            stage: PipelineStage::Aggregated,
            report: aggregated,
        });
        Ok(report)
    }

    /// Per-window progress. Never executes a stage.
    pub async fn status(&self) -> Result<Vec<WindowStatus>, PipelineError> {
        Ok(self.ctx.state.all_status().await?)
    }

    pub async fn execute(
        &self,
        command: Command,
        today: NaiveDate,
    ) -> Result<RunSummary, PipelineError> {
        match command {
            Command::Today => Ok(self.run_today(today).await),
            Command::AllTime => self.run_all_time().await,
            Command::Status => Ok(RunSummary {
                status: self.status().await?,
                ..RunSummary::default()
            }),
            Command::Stage { stage, window } => {
                let mut report = WindowReport::new(window);
                match self.run_stage(stage, window).await {
                    Ok(stage_report) => report.stages.push(StageOutcome {
                        stage,
                        report: stage_report,
                    }),
                    Err(e) => report.error = Some(e),
                }
                Ok(RunSummary {
                    windows: vec![report],
                    ..RunSummary::default()
                })
            }
            Command::Correct {
                match_id,
                home_goals,
                away_goals,
                reason,
            } => Ok(RunSummary {
                windows: vec![self.correct(match_id, home_goals, away_goals, &reason).await?],
                ..RunSummary::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::PublicationSink;
    use async_trait::async_trait;
    use outcome_core::{
        AggregateStore, EngineConfig, Fixture, Forecast, ForecastStore, ForecastType,
        ForecastValue, MatchStore, PipelineStateStore, Sport, Subtype, TargetFact, TargetStore,
        VerdictStore, ESTIMATE_SUBTYPE,
    };
    use outcome_store::OutcomeDb;
    use statistics_aggregator::Candidate;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MemorySink {
        published: Mutex<Vec<(NaiveDate, Vec<i64>)>>,
    }

    #[async_trait]
    impl PublicationSink for MemorySink {
        async fn publish(
            &self,
            window: NaiveDate,
            selected: &[Candidate],
        ) -> Result<(), OutcomeError> {
            let ids = selected.iter().map(|c| c.forecast.forecast.match_id).collect();
            self.published.lock().unwrap().push((window, ids));
            Ok(())
        }
    }

    struct FailingStage {
        stage: PipelineStage,
        error: OutcomeError,
    }

    #[async_trait]
    impl StageRunner for FailingStage {
        fn stage(&self) -> PipelineStage {
            self.stage
        }

        async fn run(
            &self,
            _ctx: &PipelineContext,
            _window: NaiveDate,
        ) -> Result<StageReport, OutcomeError> {
            Err(self.error.clone())
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    async fn setup() -> (OutcomeDb, Coordinator, Arc<MemorySink>) {
        let db = OutcomeDb::new("sqlite::memory:").await.unwrap();
        let sink = Arc::new(MemorySink::default());
        let ctx = PipelineContext::new(&db, EngineConfig::default()).with_sink(sink.clone());
        (db, Coordinator::new(ctx), sink)
    }

    async fn add_match(
        db: &OutcomeDb,
        match_id: i64,
        window: NaiveDate,
        score: Option<(i32, i32)>,
    ) {
        db.matches()
            .upsert_result(&MatchResult {
                fixture: Fixture {
                    match_id,
                    sport: Sport::Soccer,
                    league_id: 39,
                    match_date: window,
                },
                home_goals: score.map(|s| s.0),
                away_goals: score.map(|s| s.1),
            })
            .await
            .unwrap();
    }

    async fn add_forecast(
        db: &OutcomeDb,
        match_id: i64,
        forecast_type: ForecastType,
        subtype: &str,
        value: ForecastValue,
    ) {
        db.forecasts()
            .insert(&Forecast {
                id: None,
                match_id,
                forecast_type,
                subtype: subtype.to_string(),
                model_version: "v1".to_string(),
                value,
            })
            .await
            .unwrap();
    }

    fn category(label: &str, probability: f64) -> ForecastValue {
        ForecastValue::Category {
            label: label.to_string(),
            probability,
        }
    }

    fn estimate(value: f64) -> ForecastValue {
        ForecastValue::Estimate {
            value,
            interval: None,
        }
    }

    /// 40 finished matches on March 9th with total-goal estimates, and on
    /// March 10th one finished and one unplayed match
    async fn seed(db: &OutcomeDb) {
        for id in 1..=40 {
            add_match(db, id, day(9), Some(((id % 3) as i32, (id % 2) as i32))).await;
            let value = 1.5 + (id % 4) as f64 * 0.5;
            let value = estimate(value);
            add_forecast(db, id, ForecastType::TotalAmount, ESTIMATE_SUBTYPE, value).await;
        }

        add_match(db, 100, day(10), Some((2, 1))).await;
        add_forecast(db, 100, ForecastType::Total, "over", category("over", 0.7)).await;
        add_forecast(db, 100, ForecastType::BothTeamsScore, "yes", category("yes", 0.6)).await;
        add_forecast(db, 100, ForecastType::TotalAmount, ESTIMATE_SUBTYPE, estimate(2.8)).await;

        add_match(db, 101, day(10), None).await;
        let home_win = category("home_win", 0.5);
        add_forecast(db, 101, ForecastType::WinDrawLoss, "home_win", home_win).await;
    }

    fn report_for(report: &WindowReport, stage: PipelineStage) -> StageReport {
        report
            .stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.report)
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_window_run() {
        let (db, coordinator, sink) = setup().await;
        seed(&db).await;

        // history window: nothing to calibrate against yet
        let history = coordinator.run_window(day(9), false).await;
        assert_eq!(history.error, None);
        assert_eq!(report_for(&history, PipelineStage::Featurized).processed, 40);
        assert_eq!(report_for(&history, PipelineStage::Calibrated).skipped, 40);
        assert_eq!(report_for(&history, PipelineStage::Validated).processed, 40);

        let report = coordinator.run_window(day(10), false).await;
        assert_eq!(report.error, None);
        assert_eq!(report.stages.len(), PipelineStage::ALL.len());
        assert_eq!(report.signal(), ExitSignal::Success);

        let ingested = report_for(&report, PipelineStage::Ingested);
        assert_eq!((ingested.processed, ingested.skipped), (1, 1));
        assert_eq!(report_for(&report, PipelineStage::Featurized).skipped, 1);
        assert_eq!(report_for(&report, PipelineStage::Calibrated).processed, 1);

        // three verdicts for the finished match, the unplayed one is pending
        let validated = report_for(&report, PipelineStage::Validated);
        assert_eq!((validated.processed, validated.skipped), (3, 1));

        let stats = coordinator
            .context()
            .aggregator
            .get_statistics(ForecastType::Total, Subtype::Over, Scope::League(39))
            .await
            .unwrap();
        assert_eq!((stats.count, stats.correct), (1, 1));

        // the calibrated estimate carries an interval whose coverage is tracked
        let amount_key = StatKey::new(ForecastType::TotalAmount, Subtype::Over, Scope::All);
        let coverage = db.verdicts().coverage_counts(&amount_key).await.unwrap();
        assert_eq!(coverage.total, 1);
        assert!((coverage.mean_declared.unwrap() - 0.9).abs() < 1e-9);

        let published = sink.published.lock().unwrap().clone();
        let (window, ids) = published.last().unwrap();
        assert_eq!(*window, day(10));
        assert_eq!(ids.len(), 4);

        let status = db.pipeline().status(day(10)).await.unwrap();
        assert_eq!(
            status.last_completed.map(|r| r.stage),
            Some(PipelineStage::Published)
        );
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (db, coordinator, _sink) = setup().await;
        seed(&db).await;
        coordinator.run_window(day(9), false).await;
        coordinator.run_window(day(10), false).await;

        let skipped = coordinator.run_window(day(10), false).await;
        assert!(skipped.stages.is_empty());
        assert_eq!(skipped.already_complete, PipelineStage::ALL.to_vec());

        let rerun = coordinator.run_window(day(10), true).await;
        assert_eq!(rerun.error, None);
        assert_eq!(report_for(&rerun, PipelineStage::Featurized).processed, 1);

        let key = StatKey::new(ForecastType::Total, Subtype::Over, Scope::All);
        assert_eq!(db.verdicts().lifetime_counts(&key).await.unwrap(), (1, 1));
    }

    #[tokio::test]
    async fn test_stage_requires_predecessor() {
        let (_db, coordinator, _sink) = setup().await;
        let err = coordinator
            .run_stage(PipelineStage::Validated, day(10))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::PredecessorIncomplete {
                stage: PipelineStage::Validated,
                window: day(10),
                predecessor: PipelineStage::Calibrated,
            }
        );

        // the first stage has no predecessor
        assert!(coordinator
            .run_stage(PipelineStage::Ingested, day(10))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_stage_failure_halts_window() {
        let (db, coordinator, _sink) = setup().await;
        seed(&db).await;
        let coordinator = coordinator.with_runner(Box::new(FailingStage {
            stage: PipelineStage::Calibrated,
            error: OutcomeError::Storage("database is locked".to_string()),
        }));

        let report = coordinator.run_window(day(10), false).await;
        assert_eq!(report.stages.len(), 3);
        assert_eq!(
            report.error.as_ref().and_then(|e| e.stage()),
            Some(PipelineStage::Calibrated)
        );
        assert_eq!(report.signal(), ExitSignal::Partial);

        let status = db.pipeline().status(day(10)).await.unwrap();
        assert_eq!(
            status.last_completed.map(|r| r.stage),
            Some(PipelineStage::Predicted)
        );
        let failure = status.last_failure.unwrap();
        assert_eq!(failure.stage, PipelineStage::Calibrated);
        assert!(failure.error.contains("database is locked"));
    }

    #[tokio::test]
    async fn test_failed_rerun_blocks_downstream_stages() {
        let (db, coordinator, _sink) = setup().await;
        seed(&db).await;
        assert_eq!(coordinator.run_window(day(9), false).await.error, None);

        let coordinator = coordinator.with_runner(Box::new(FailingStage {
            stage: PipelineStage::Calibrated,
            error: OutcomeError::Storage("disk full".to_string()),
        }));
        let rerun = coordinator.run_window(day(9), true).await;
        assert_eq!(
            rerun.error.as_ref().and_then(|e| e.stage()),
            Some(PipelineStage::Calibrated)
        );

        // the completion from the first run no longer satisfies the guard
        let err = coordinator
            .run_stage(PipelineStage::Validated, day(9))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::PredecessorIncomplete {
                stage: PipelineStage::Validated,
                window: day(9),
                predecessor: PipelineStage::Calibrated,
            }
        );

        let status = db.pipeline().status(day(9)).await.unwrap();
        assert_eq!(
            status.last_completed.map(|r| r.stage),
            Some(PipelineStage::Predicted)
        );
    }

    #[tokio::test]
    async fn test_correction_flips_verdict_and_refreshes_statistics() {
        let (db, coordinator, _sink) = setup().await;
        seed(&db).await;
        coordinator.run_window(day(9), false).await;
        coordinator.run_window(day(10), false).await;

        let league_over = StatKey::new(ForecastType::Total, Subtype::Over, Scope::League(39));
        let aggregator = &coordinator.context().aggregator;
        let before = aggregator
            .get_statistics(ForecastType::Total, Subtype::Over, Scope::League(39))
            .await
            .unwrap();
        assert_eq!((before.count, before.correct), (1, 1));

        // 2:1 was really 1:1, so "over 2.5" no longer came true
        let summary = coordinator
            .execute(
                Command::Correct {
                    match_id: 100,
                    home_goals: 1,
                    away_goals: 1,
                    reason: "scorer feed double counted".to_string(),
                },
                day(11),
            )
            .await
            .unwrap();
        assert_eq!(summary.exit_signal(), ExitSignal::Success);
        let report = &summary.windows[0];
        assert_eq!(report.window, day(10));
        assert_eq!(report_for(report, PipelineStage::Validated).processed, 3);
        assert_eq!(report_for(report, PipelineStage::Aggregated).processed, 9);

        let after = aggregator
            .get_statistics(ForecastType::Total, Subtype::Over, Scope::League(39))
            .await
            .unwrap();
        assert_eq!((after.count, after.correct), (1, 0));
        let stored = db.aggregates().get(&league_over).await.unwrap().unwrap();
        assert_eq!(stored.correct, 0);

        // both teams still scored
        let bts = StatKey::new(ForecastType::BothTeamsScore, Subtype::Yes, Scope::All);
        assert_eq!(db.verdicts().lifetime_counts(&bts).await.unwrap(), (1, 1));

        let target = db.targets().get(100).await.unwrap().unwrap();
        assert!(target.fact(TargetFact::Draw));
        let result = db.matches().result(100).await.unwrap().unwrap();
        assert_eq!((result.home_goals, result.away_goals), (Some(1), Some(1)));
    }

    #[tokio::test]
    async fn test_correction_rejects_unknown_match_and_missing_reason() {
        let (db, coordinator, _sink) = setup().await;
        seed(&db).await;
        coordinator.run_window(day(9), false).await;
        coordinator.run_window(day(10), false).await;

        assert!(coordinator.correct(999, 1, 0, "typo").await.is_err());
        assert!(coordinator.correct(100, 0, 0, "  ").await.is_err());

        let key = StatKey::new(ForecastType::Total, Subtype::Over, Scope::All);
        assert_eq!(db.verdicts().lifetime_counts(&key).await.unwrap(), (1, 1));
        let result = db.matches().result(100).await.unwrap().unwrap();
        assert_eq!(result.home_goals, Some(2));
    }

    #[tokio::test]
    async fn test_configuration_failure_is_fatal() {
        let (db, coordinator, _sink) = setup().await;
        seed(&db).await;
        let coordinator = coordinator.with_runner(Box::new(FailingStage {
            stage: PipelineStage::Featurized,
            error: OutcomeError::Config("bad thresholds".to_string()),
        }));

        let summary = coordinator.run_today(day(10)).await;
        assert_eq!(summary.windows.len(), 2);
        assert_eq!(summary.windows[0].window, day(9));
        assert_eq!(summary.exit_signal(), ExitSignal::Fatal);
    }

    #[tokio::test]
    async fn test_all_time_and_status() {
        let (db, coordinator, _sink) = setup().await;
        seed(&db).await;

        let summary = coordinator.execute(Command::AllTime, day(11)).await.unwrap();
        let windows: Vec<NaiveDate> = summary.windows.iter().map(|w| w.window).collect();
        assert_eq!(windows, vec![day(9), day(10)]);
        assert_eq!(summary.exit_signal(), ExitSignal::Success);

        let status = coordinator.execute(Command::Status, day(11)).await.unwrap();
        assert!(status.windows.is_empty());
        assert_eq!(status.status.len(), 2);
        assert!(status
            .status
            .iter()
            .all(|s| s.last_completed.as_ref().map(|r| r.stage) == Some(PipelineStage::Published)));
    }

    #[tokio::test]
    async fn test_stage_command_reports_missing_predecessor() {
        let (_db, coordinator, _sink) = setup().await;
        let summary = coordinator
            .execute(
                Command::Stage {
                    stage: PipelineStage::Published,
                    window: day(3),
                },
                day(11),
            )
            .await
            .unwrap();
        assert_eq!(summary.exit_signal(), ExitSignal::Partial);
    }
}
