//! Publication sinks for the forecasts that pass the quality gate.

use async_trait::async_trait;
use chrono::NaiveDate;
use outcome_core::OutcomeError;
use statistics_aggregator::Candidate;

/// Where selected forecasts go once a window is published
#[async_trait]
pub trait PublicationSink: Send + Sync {
    async fn publish(&self, window: NaiveDate, selected: &[Candidate]) -> Result<(), OutcomeError>;
}

/// Default sink: one structured log line per published forecast
pub struct LogSink;

#[async_trait]
impl PublicationSink for LogSink {
    async fn publish(&self, window: NaiveDate, selected: &[Candidate]) -> Result<(), OutcomeError> {
        for candidate in selected {
            let forecast = &candidate.forecast.forecast;
            let stats = candidate.statistics.as_ref();
            tracing::info!(
                window = %window,
                match_id = forecast.match_id,
                forecast_type = %forecast.forecast_type,
                subtype = %candidate.key.subtype,
                probability = ?forecast.probability(),
                point_estimate = ?forecast.point_estimate(),
                interval = ?forecast.interval().map(|i| (i.lower, i.upper)),
                accuracy = ?stats.map(|s| s.accuracy),
                samples = ?stats.map(|s| s.count),
                "Forecast published"
            );
        }
        Ok(())
    }
}
