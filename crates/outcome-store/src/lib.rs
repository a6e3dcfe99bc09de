//! SQLite persistence for the outcome engine
//!
//! One [`OutcomeDb`] owns the pool and hands out a store per concern. Each
//! store implements the matching trait from `outcome-core`, so the engine
//! crates never see SQL.

pub mod aggregates;
pub mod db;
pub mod forecasts;
pub mod matches;
pub mod pipeline;
pub mod targets;
pub mod verdicts;

pub use aggregates::SqlAggregateStore;
pub use db::OutcomeDb;
pub use forecasts::SqlForecastStore;
pub use matches::SqlMatchStore;
pub use pipeline::SqlPipelineStateStore;
pub use targets::SqlTargetStore;
pub use verdicts::SqlVerdictStore;
