//! Engine configuration
//!
//! Loaded from environment variables with defaults, then validated once at
//! startup. Sport thresholds are parsed from `sport=threshold` lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::{OutcomeError, Sport};

/// Over/under cutoffs for one sport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SportThresholds {
    /// Match total (both teams)
    pub total: f64,
    /// Individual team total
    pub team_total: f64,
}

/// Sport-specific thresholds, looked up by the match's sport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    by_sport: BTreeMap<Sport, SportThresholds>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        let mut by_sport = BTreeMap::new();
        by_sport.insert(
            Sport::Soccer,
            SportThresholds {
                total: 2.5,
                team_total: 1.5,
            },
        );
        by_sport.insert(
            Sport::IceHockey,
            SportThresholds {
                total: 4.5,
                team_total: 2.5,
            },
        );
        Self { by_sport }
    }
}

impl ThresholdTable {
    pub fn new(entries: impl IntoIterator<Item = (Sport, SportThresholds)>) -> Self {
        Self {
            by_sport: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, sport: Sport) -> Result<SportThresholds, OutcomeError> {
        self.by_sport
            .get(&sport)
            .copied()
            .ok_or_else(|| OutcomeError::Config(format!("no thresholds configured for {}", sport)))
    }

    /// Parse `sport:total:team_total` entries separated by commas,
    /// e.g. `soccer:2.5:1.5,ice_hockey:4.5:2.5`.
    pub fn parse(raw: &str) -> Result<Self, OutcomeError> {
        let mut by_sport = BTreeMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            if parts.len() != 3 {
                return Err(OutcomeError::Config(format!(
                    "threshold entry '{}' must be sport:total:team_total",
                    entry
                )));
            }
            let sport: Sport = parts[0].parse()?;
            let total = parse_value("SPORT_THRESHOLDS", parts[1])?;
            let team_total = parse_value("SPORT_THRESHOLDS", parts[2])?;
            by_sport.insert(sport, SportThresholds { total, team_total });
        }
        Ok(Self { by_sport })
    }
}

/// Conformal calibration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Target coverage, e.g. 0.9 for 90% intervals
    pub coverage: f64,
    /// Number of most recent (predicted, actual) pairs kept per forecast type
    pub window: usize,
    /// Smallest calibration set that may produce a quantile
    pub min_samples: usize,
    /// Allowed shortfall of empirical coverage before drift is flagged
    pub drift_tolerance: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            coverage: 0.90,
            window: 500,
            min_samples: 30,
            drift_tolerance: 0.05,
        }
    }
}

/// Statistics aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    pub cache_capacity: usize,
    pub recent_window: usize,
    pub stability_days: i64,
    pub confidence_level: f64,
    pub batch_timeout_ms: u64,
    /// Invalidate cached statistics whenever new verdicts are written
    pub invalidate_on_validation: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            recent_window: 10,
            stability_days: 90,
            confidence_level: 0.95,
            batch_timeout_ms: 5_000,
            invalidate_on_validation: true,
        }
    }
}

/// Publication quality gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    pub min_probability: f64,
    pub min_accuracy: f64,
    pub min_samples: u64,
    pub top_n: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.0,
            min_accuracy: 0.0,
            min_samples: 0,
            top_n: 20,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_url: String,
    pub thresholds: ThresholdTable,
    pub calibration: CalibrationConfig,
    pub statistics: StatisticsConfig,
    pub quality: QualityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://outcomes.db?mode=rwc".to_string(),
            thresholds: ThresholdTable::default(),
            calibration: CalibrationConfig::default(),
            statistics: StatisticsConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, OutcomeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup, falling back to
    /// defaults for unset keys. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, OutcomeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let thresholds = match get("SPORT_THRESHOLDS") {
            Some(raw) => ThresholdTable::parse(&raw)?,
            None => defaults.thresholds,
        };

        let config = Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            thresholds,
            calibration: CalibrationConfig {
                coverage: env_or(&get, "CONFORMAL_COVERAGE", defaults.calibration.coverage)?,
                window: env_or(&get, "CALIBRATION_WINDOW", defaults.calibration.window)?,
                min_samples: env_or(&get, "MIN_CALIBRATION_SIZE", defaults.calibration.min_samples)?,
                drift_tolerance: env_or(
                    &get,
                    "COVERAGE_DRIFT_TOLERANCE",
                    defaults.calibration.drift_tolerance,
                )?,
            },
            statistics: StatisticsConfig {
                cache_capacity: env_or(&get, "STATS_CACHE_CAPACITY", defaults.statistics.cache_capacity)?,
                recent_window: env_or(&get, "STATS_RECENT_WINDOW", defaults.statistics.recent_window)?,
                stability_days: env_or(&get, "STATS_STABILITY_DAYS", defaults.statistics.stability_days)?,
                confidence_level: env_or(
                    &get,
                    "STATS_CONFIDENCE_LEVEL",
                    defaults.statistics.confidence_level,
                )?,
                batch_timeout_ms: env_or(
                    &get,
                    "STATS_BATCH_TIMEOUT_MS",
                    defaults.statistics.batch_timeout_ms,
                )?,
                invalidate_on_validation: env_or(
                    &get,
                    "INVALIDATE_ON_VALIDATION",
                    defaults.statistics.invalidate_on_validation,
                )?,
            },
            quality: QualityConfig {
                min_probability: env_or(&get, "QUALITY_MIN_PROBABILITY", defaults.quality.min_probability)?,
                min_accuracy: env_or(&get, "QUALITY_MIN_ACCURACY", defaults.quality.min_accuracy)?,
                min_samples: env_or(&get, "QUALITY_MIN_SAMPLES", defaults.quality.min_samples)?,
                top_n: env_or(&get, "PUBLISH_TOP_N", defaults.quality.top_n)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine produce meaningless output
    pub fn validate(&self) -> Result<(), OutcomeError> {
        let coverage = self.calibration.coverage;
        if !(coverage > 0.0 && coverage < 1.0) {
            return Err(OutcomeError::InvalidCoverage(coverage));
        }
        if self.calibration.min_samples == 0 {
            return Err(OutcomeError::Config("MIN_CALIBRATION_SIZE must be positive".into()));
        }
        if self.calibration.window < self.calibration.min_samples {
            return Err(OutcomeError::Config(format!(
                "CALIBRATION_WINDOW ({}) must be at least MIN_CALIBRATION_SIZE ({})",
                self.calibration.window, self.calibration.min_samples
            )));
        }
        if self.statistics.cache_capacity == 0 {
            return Err(OutcomeError::Config("STATS_CACHE_CAPACITY must be positive".into()));
        }
        let level = self.statistics.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(OutcomeError::Config(format!(
                "STATS_CONFIDENCE_LEVEL must be in (0, 1), got {}",
                level
            )));
        }
        for sport in Sport::ALL {
            let t = self.thresholds.get(sport)?;
            if !(t.total.is_finite() && t.team_total.is_finite()) {
                return Err(OutcomeError::Config(format!("non-finite thresholds for {}", sport)));
            }
        }
        Ok(())
    }
}

fn env_or<T, G>(get: &G, key: &str, default: T) -> Result<T, OutcomeError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, OutcomeError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| OutcomeError::Config(format!("{}='{}': {}", key, raw, e)))
}
