//! Statistics aggregation
//!
//! Accuracy, calibration and confidence figures per
//! (forecast type, subtype, scope), computed from the verdict history and
//! held in a bounded, generation-checked cache.

pub mod aggregator;
pub mod cache;
pub mod metrics;
pub mod quality;

pub use aggregator::{BatchEntry, ForecastStatistics, StatisticsAggregator};
pub use cache::{CacheError, CacheStats, StatisticsCache};
pub use metrics::{calibration_error, stability, wilson_bounds, z_score, NEUTRAL_STABILITY};
pub use quality::{Candidate, QualitySelector};
