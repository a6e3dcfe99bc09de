//! Domain types
//!
//! Sports, fixtures, targets, forecasts, verdicts, statistics keys and the
//! pipeline stage records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::OutcomeError;

/// Version of the target fact layout. Bump when facts are added or redefined.
pub const TARGET_SCHEMA_VERSION: i32 = 1;

/// Subtype key stored on regression forecasts (the category is only known
/// after normalization).
pub const ESTIMATE_SUBTYPE: &str = "estimate";

/// Supported sports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sport {
    Soccer,
    IceHockey,
}

impl Sport {
    pub const ALL: [Sport; 2] = [Sport::Soccer, Sport::IceHockey];

    /// Identifier used by the results feed
    pub fn id(self) -> i64 {
        match self {
            Sport::Soccer => 1,
            Sport::IceHockey => 4,
        }
    }

    pub fn from_id(id: i64) -> Result<Self, OutcomeError> {
        match id {
            1 => Ok(Sport::Soccer),
            4 => Ok(Sport::IceHockey),
            other => Err(OutcomeError::UnknownSport(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sport::Soccer => "soccer",
            Sport::IceHockey => "ice_hockey",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sport {
    type Err = OutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soccer" | "football" => Ok(Sport::Soccer),
            "ice_hockey" | "icehockey" | "hockey" => Ok(Sport::IceHockey),
            other => Err(OutcomeError::Config(format!("unknown sport '{}'", other))),
        }
    }
}

/// Scheduling facts about a match, independent of its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub match_id: i64,
    pub sport: Sport,
    pub league_id: i64,
    pub match_date: NaiveDate,
}

/// Final (or partial) score as written by the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub fixture: Fixture,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
}

impl MatchResult {
    pub fn is_finished(&self) -> bool {
        self.home_goals.is_some() && self.away_goals.is_some()
    }
}

/// Predicted category of a forecast.
///
/// Over/under subtypes are produced from numeric values by
/// [`Subtype::split`], which is the single place where the threshold
/// tie-break lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtype {
    HomeWin,
    Draw,
    AwayWin,
    Yes,
    No,
    Over,
    Under,
}

impl Subtype {
    pub const ALL: [Subtype; 7] = [
        Subtype::HomeWin,
        Subtype::Draw,
        Subtype::AwayWin,
        Subtype::Yes,
        Subtype::No,
        Subtype::Over,
        Subtype::Under,
    ];

    /// Split a numeric value against a threshold. Strictly greater is
    /// `Over`; equal or below is `Under`.
    pub fn split(value: f64, threshold: f64) -> Subtype {
        if value > threshold {
            Subtype::Over
        } else {
            Subtype::Under
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Subtype::HomeWin => "home_win",
            Subtype::Draw => "draw",
            Subtype::AwayWin => "away_win",
            Subtype::Yes => "yes",
            Subtype::No => "no",
            Subtype::Over => "over",
            Subtype::Under => "under",
        }
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subtype {
    type Err = OutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home_win" | "home" | "1" => Ok(Subtype::HomeWin),
            "draw" | "x" => Ok(Subtype::Draw),
            "away_win" | "away" | "2" => Ok(Subtype::AwayWin),
            "yes" => Ok(Subtype::Yes),
            "no" => Ok(Subtype::No),
            "over" => Ok(Subtype::Over),
            "under" => Ok(Subtype::Under),
            other => Err(OutcomeError::InvalidData(format!("unknown subtype '{}'", other))),
        }
    }
}

/// Model family of a forecast type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForecastKind {
    Classification,
    Regression,
}

/// Every forecast type the inference stage produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastType {
    WinDrawLoss,
    BothTeamsScore,
    GoalHome,
    GoalAway,
    Total,
    TotalHome,
    TotalAway,
    TotalAmount,
    TotalHomeAmount,
    TotalAwayAmount,
}

impl ForecastType {
    pub const ALL: [ForecastType; 10] = [
        ForecastType::WinDrawLoss,
        ForecastType::BothTeamsScore,
        ForecastType::GoalHome,
        ForecastType::GoalAway,
        ForecastType::Total,
        ForecastType::TotalHome,
        ForecastType::TotalAway,
        ForecastType::TotalAmount,
        ForecastType::TotalHomeAmount,
        ForecastType::TotalAwayAmount,
    ];

    pub fn kind(self) -> ForecastKind {
        match self {
            ForecastType::TotalAmount
            | ForecastType::TotalHomeAmount
            | ForecastType::TotalAwayAmount => ForecastKind::Regression,
            _ => ForecastKind::Classification,
        }
    }

    pub fn is_regression(self) -> bool {
        self.kind() == ForecastKind::Regression
    }

    /// Classification type whose subtype space a regression type is
    /// normalized into. Classification types map to themselves.
    pub fn categorical(self) -> ForecastType {
        match self {
            ForecastType::TotalAmount => ForecastType::Total,
            ForecastType::TotalHomeAmount => ForecastType::TotalHome,
            ForecastType::TotalAwayAmount => ForecastType::TotalAway,
            other => other,
        }
    }

    /// Threshold that splits this type's numeric quantity into over/under.
    /// `None` for types without an over/under split.
    pub fn threshold(self, thresholds: &crate::SportThresholds) -> Option<f64> {
        match self.categorical() {
            ForecastType::Total => Some(thresholds.total),
            ForecastType::TotalHome | ForecastType::TotalAway => Some(thresholds.team_total),
            _ => None,
        }
    }

    /// The observed quantity a regression forecast predicts.
    pub fn actual_value(self, target: &Target) -> Option<f64> {
        match self {
            ForecastType::TotalAmount => Some(target.total_goals as f64),
            ForecastType::TotalHomeAmount => Some(target.home_goals as f64),
            ForecastType::TotalAwayAmount => Some(target.away_goals as f64),
            _ => None,
        }
    }

    pub fn regression_types() -> impl Iterator<Item = ForecastType> {
        Self::ALL.into_iter().filter(|t| t.is_regression())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ForecastType::WinDrawLoss => "win_draw_loss",
            ForecastType::BothTeamsScore => "both_teams_score",
            ForecastType::GoalHome => "goal_home",
            ForecastType::GoalAway => "goal_away",
            ForecastType::Total => "total",
            ForecastType::TotalHome => "total_home",
            ForecastType::TotalAway => "total_away",
            ForecastType::TotalAmount => "total_amount",
            ForecastType::TotalHomeAmount => "total_home_amount",
            ForecastType::TotalAwayAmount => "total_away_amount",
        }
    }
}

impl fmt::Display for ForecastType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastType {
    type Err = OutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| OutcomeError::InvalidData(format!("unknown forecast type '{}'", s)))
    }
}

/// Named boolean facts stored on every target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetFact {
    HomeWin,
    Draw,
    AwayWin,
    BothScore,
    NotBothScore,
    HomeScored,
    HomeNotScored,
    AwayScored,
    AwayNotScored,
    TotalOver,
    TotalUnder,
    HomeTotalOver,
    HomeTotalUnder,
    AwayTotalOver,
    AwayTotalUnder,
}

impl TargetFact {
    pub const ALL: [TargetFact; 15] = [
        TargetFact::HomeWin,
        TargetFact::Draw,
        TargetFact::AwayWin,
        TargetFact::BothScore,
        TargetFact::NotBothScore,
        TargetFact::HomeScored,
        TargetFact::HomeNotScored,
        TargetFact::AwayScored,
        TargetFact::AwayNotScored,
        TargetFact::TotalOver,
        TargetFact::TotalUnder,
        TargetFact::HomeTotalOver,
        TargetFact::HomeTotalUnder,
        TargetFact::AwayTotalOver,
        TargetFact::AwayTotalUnder,
    ];

    /// Column name in the persisted target layout
    pub fn column(self) -> &'static str {
        match self {
            TargetFact::HomeWin => "home_win",
            TargetFact::Draw => "draw",
            TargetFact::AwayWin => "away_win",
            TargetFact::BothScore => "both_score",
            TargetFact::NotBothScore => "not_both_score",
            TargetFact::HomeScored => "home_scored",
            TargetFact::HomeNotScored => "home_not_scored",
            TargetFact::AwayScored => "away_scored",
            TargetFact::AwayNotScored => "away_not_scored",
            TargetFact::TotalOver => "total_over",
            TargetFact::TotalUnder => "total_under",
            TargetFact::HomeTotalOver => "home_total_over",
            TargetFact::HomeTotalUnder => "home_total_under",
            TargetFact::AwayTotalOver => "away_total_over",
            TargetFact::AwayTotalUnder => "away_total_under",
        }
    }
}

/// Boolean ground-truth facts of a finished match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetFacts {
    pub home_win: bool,
    pub draw: bool,
    pub away_win: bool,
    pub both_score: bool,
    pub not_both_score: bool,
    pub home_scored: bool,
    pub home_not_scored: bool,
    pub away_scored: bool,
    pub away_not_scored: bool,
    pub total_over: bool,
    pub total_under: bool,
    pub home_total_over: bool,
    pub home_total_under: bool,
    pub away_total_over: bool,
    pub away_total_under: bool,
}

impl TargetFacts {
    pub fn get(&self, fact: TargetFact) -> bool {
        match fact {
            TargetFact::HomeWin => self.home_win,
            TargetFact::Draw => self.draw,
            TargetFact::AwayWin => self.away_win,
            TargetFact::BothScore => self.both_score,
            TargetFact::NotBothScore => self.not_both_score,
            TargetFact::HomeScored => self.home_scored,
            TargetFact::HomeNotScored => self.home_not_scored,
            TargetFact::AwayScored => self.away_scored,
            TargetFact::AwayNotScored => self.away_not_scored,
            TargetFact::TotalOver => self.total_over,
            TargetFact::TotalUnder => self.total_under,
            TargetFact::HomeTotalOver => self.home_total_over,
            TargetFact::HomeTotalUnder => self.home_total_under,
            TargetFact::AwayTotalOver => self.away_total_over,
            TargetFact::AwayTotalUnder => self.away_total_under,
        }
    }

    pub fn set(&mut self, fact: TargetFact, value: bool) {
        let slot = match fact {
            TargetFact::HomeWin => &mut self.home_win,
            TargetFact::Draw => &mut self.draw,
            TargetFact::AwayWin => &mut self.away_win,
            TargetFact::BothScore => &mut self.both_score,
            TargetFact::NotBothScore => &mut self.not_both_score,
            TargetFact::HomeScored => &mut self.home_scored,
            TargetFact::HomeNotScored => &mut self.home_not_scored,
            TargetFact::AwayScored => &mut self.away_scored,
            TargetFact::AwayNotScored => &mut self.away_not_scored,
            TargetFact::TotalOver => &mut self.total_over,
            TargetFact::TotalUnder => &mut self.total_under,
            TargetFact::HomeTotalOver => &mut self.home_total_over,
            TargetFact::HomeTotalUnder => &mut self.home_total_under,
            TargetFact::AwayTotalOver => &mut self.away_total_over,
            TargetFact::AwayTotalUnder => &mut self.away_total_under,
        };
        *slot = value;
    }
}

/// Immutable ground truth for one finished match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub match_id: i64,
    pub sport: Sport,
    pub version: i32,
    pub home_goals: i32,
    pub away_goals: i32,
    pub total_goals: i32,
    /// Match total threshold the over/under facts were derived with
    pub total_threshold: f64,
    /// Team total threshold the home/away over/under facts were derived with
    pub team_total_threshold: f64,
    pub facts: TargetFacts,
}

impl Target {
    pub fn fact(&self, fact: TargetFact) -> bool {
        self.facts.get(fact)
    }

    pub fn thresholds(&self) -> crate::SportThresholds {
        crate::SportThresholds {
            total: self.total_threshold,
            team_total: self.team_total_threshold,
        }
    }
}

/// Symmetric conformal prediction interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionInterval {
    pub lower: f64,
    pub upper: f64,
    /// Declared coverage level, e.g. 0.9
    pub coverage: f64,
    /// Half-width (the conformal quantile)
    pub quantile: f64,
}

impl PredictionInterval {
    /// Inclusive containment
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// What a model produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastValue {
    Category { label: String, probability: f64 },
    Estimate {
        value: f64,
        interval: Option<PredictionInterval>,
    },
}

/// Raw outcome handed to the validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawOutcome {
    Label(String),
    Estimate(f64),
}

/// A single model prediction for (match, forecast type, subtype, model version)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: Option<i64>,
    pub match_id: i64,
    pub forecast_type: ForecastType,
    pub subtype: String,
    pub model_version: String,
    pub value: ForecastValue,
}

impl Forecast {
    pub fn raw_outcome(&self) -> RawOutcome {
        match &self.value {
            ForecastValue::Category { label, .. } => RawOutcome::Label(label.clone()),
            ForecastValue::Estimate { value, .. } => RawOutcome::Estimate(*value),
        }
    }

    pub fn probability(&self) -> Option<f64> {
        match &self.value {
            ForecastValue::Category { probability, .. } => Some(*probability),
            ForecastValue::Estimate { .. } => None,
        }
    }

    pub fn point_estimate(&self) -> Option<f64> {
        match &self.value {
            ForecastValue::Estimate { value, .. } => Some(*value),
            ForecastValue::Category { .. } => None,
        }
    }

    pub fn interval(&self) -> Option<PredictionInterval> {
        match &self.value {
            ForecastValue::Estimate { interval, .. } => *interval,
            ForecastValue::Category { .. } => None,
        }
    }
}

/// A forecast together with the fixture it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureForecast {
    pub fixture: Fixture,
    pub forecast: Forecast,
}

/// One (predicted, actual) observation for conformal calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    pub predicted: f64,
    pub actual: f64,
}

impl CalibrationPair {
    pub fn new(predicted: f64, actual: f64) -> Self {
        Self { predicted, actual }
    }

    /// Nonconformity score
    pub fn residual(&self) -> f64 {
        (self.predicted - self.actual).abs()
    }
}

/// Correctness of a forecast against a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    /// No target yet: the match is not finished
    Pending,
    /// No mapping to any target fact; excluded from accuracy denominators
    Indeterminate,
}

impl Verdict {
    /// Only correct/incorrect verdicts count toward accuracy
    pub fn is_resolved(self) -> bool {
        matches!(self, Verdict::Correct | Verdict::Incorrect)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Correct => "correct",
            Verdict::Incorrect => "incorrect",
            Verdict::Pending => "pending",
            Verdict::Indeterminate => "indeterminate",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = OutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correct" => Ok(Verdict::Correct),
            "incorrect" => Ok(Verdict::Incorrect),
            "pending" => Ok(Verdict::Pending),
            "indeterminate" => Ok(Verdict::Indeterminate),
            other => Err(OutcomeError::InvalidData(format!("unknown verdict '{}'", other))),
        }
    }
}

/// Optional narrowing of a statistics key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Scope {
    All,
    Sport(Sport),
    League(i64),
}

impl Scope {
    /// Stable string form used as a storage key
    pub fn as_key(&self) -> String {
        match self {
            Scope::All => "all".to_string(),
            Scope::Sport(sport) => format!("sport:{}", sport.id()),
            Scope::League(id) => format!("league:{}", id),
        }
    }

    pub fn parse_key(key: &str) -> Result<Self, OutcomeError> {
        if key == "all" {
            return Ok(Scope::All);
        }
        let invalid = || OutcomeError::InvalidData(format!("invalid scope key '{}'", key));
        match key.split_once(':') {
            Some(("sport", id)) => Sport::from_id(id.parse().map_err(|_| invalid())?).map(Scope::Sport),
            Some(("league", id)) => Ok(Scope::League(id.parse().map_err(|_| invalid())?)),
            _ => Err(invalid()),
        }
    }
}

/// Full argument tuple of a statistics lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatKey {
    pub forecast_type: ForecastType,
    pub subtype: Subtype,
    pub scope: Scope,
}

impl StatKey {
    pub fn new(forecast_type: ForecastType, subtype: Subtype, scope: Scope) -> Self {
        Self {
            forecast_type,
            subtype,
            scope,
        }
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.forecast_type, self.subtype, self.scope.as_key())
    }
}

/// Materialized verdict for one forecast, the input of every aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub forecast_id: i64,
    pub fixture: Fixture,
    pub forecast_type: ForecastType,
    /// Predicted or normalized subtype; `None` when it could not be mapped
    pub subtype: Option<Subtype>,
    /// Subtype as written on the forecast
    pub raw_subtype: String,
    pub model_version: String,
    pub verdict: Verdict,
    pub probability: Option<f64>,
    pub point_estimate: Option<f64>,
    pub interval: Option<PredictionInterval>,
    pub actual_value: Option<f64>,
    /// Whether the interval contained the actual value (regression only)
    pub covered: Option<bool>,
}

/// Coverage history of interval forecasts for one key
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageCounts {
    pub total: u64,
    pub covered: u64,
    pub mean_declared: Option<f64>,
}

/// Cached summary statistics for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub key: StatKey,
    pub count: u64,
    pub correct: u64,
    pub accuracy: f64,
    pub recent_count: u64,
    pub recent_correct: u64,
    pub recent_accuracy: f64,
    /// |declared − empirical| for intervals, |mean probability − accuracy|
    /// for classification; `None` without data
    pub calibration_error: Option<f64>,
    pub empirical_coverage: Option<f64>,
    pub declared_coverage: Option<f64>,
    pub stability: f64,
    /// Wilson bound on `accuracy`
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub computed_at: DateTime<Utc>,
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Ingested,
    Featurized,
    Predicted,
    Calibrated,
    Validated,
    Aggregated,
    Published,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        PipelineStage::Ingested,
        PipelineStage::Featurized,
        PipelineStage::Predicted,
        PipelineStage::Calibrated,
        PipelineStage::Validated,
        PipelineStage::Aggregated,
        PipelineStage::Published,
    ];

    pub fn predecessor(self) -> Option<PipelineStage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        idx.checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Ingested => "ingested",
            PipelineStage::Featurized => "featurized",
            PipelineStage::Predicted => "predicted",
            PipelineStage::Calibrated => "calibrated",
            PipelineStage::Validated => "validated",
            PipelineStage::Aggregated => "aggregated",
            PipelineStage::Published => "published",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = OutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| OutcomeError::InvalidData(format!("unknown stage '{}'", s)))
    }
}

/// Completion of a stage for a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub window: NaiveDate,
    pub stage: PipelineStage,
    pub completed_at: DateTime<Utc>,
}

/// Most recent failure of a stage for a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub window: NaiveDate,
    pub stage: PipelineStage,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Status of one window, as reported by the `status` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowStatus {
    pub window: NaiveDate,
    pub last_completed: Option<StageRecord>,
    pub last_failure: Option<StageFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ties_go_under() {
        assert_eq!(Subtype::split(2.5, 2.5), Subtype::Under);
        assert_eq!(Subtype::split(2.500001, 2.5), Subtype::Over);
        assert_eq!(Subtype::split(0.0, 2.5), Subtype::Under);
    }

    #[test]
    fn test_forecast_type_round_trips_through_str() {
        for t in ForecastType::ALL {
            assert_eq!(t.as_str().parse::<ForecastType>().unwrap(), t);
        }
        assert!("corners".parse::<ForecastType>().is_err());
    }

    #[test]
    fn test_regression_types_map_to_total_family() {
        assert_eq!(ForecastType::TotalAmount.categorical(), ForecastType::Total);
        assert_eq!(ForecastType::TotalHomeAmount.categorical(), ForecastType::TotalHome);
        assert_eq!(ForecastType::WinDrawLoss.categorical(), ForecastType::WinDrawLoss);
        assert_eq!(ForecastType::regression_types().count(), 3);
    }

    #[test]
    fn test_scope_keys() {
        for scope in [Scope::All, Scope::Sport(Sport::IceHockey), Scope::League(77)] {
            assert_eq!(Scope::parse_key(&scope.as_key()).unwrap(), scope);
        }
        assert!(Scope::parse_key("league:abc").is_err());
        assert!(Scope::parse_key("sport:3").is_err());
    }

    #[test]
    fn test_stage_predecessors() {
        assert_eq!(PipelineStage::Ingested.predecessor(), None);
        assert_eq!(
            PipelineStage::Validated.predecessor(),
            Some(PipelineStage::Calibrated)
        );
        assert_eq!("Published".parse::<PipelineStage>().unwrap(), PipelineStage::Published);
    }

    #[test]
    fn test_subtype_aliases() {
        assert_eq!(" Over ".parse::<Subtype>().unwrap(), Subtype::Over);
        assert_eq!("X".parse::<Subtype>().unwrap(), Subtype::Draw);
        assert!("maybe".parse::<Subtype>().is_err());
    }

    #[test]
    fn test_interval_contains_is_inclusive() {
        let interval = PredictionInterval {
            lower: 1.0,
            upper: 3.0,
            coverage: 0.9,
            quantile: 1.0,
        };
        assert!(interval.contains(1.0));
        assert!(interval.contains(3.0));
        assert!(!interval.contains(3.01));
        assert_eq!(interval.width(), 2.0);
    }
}
