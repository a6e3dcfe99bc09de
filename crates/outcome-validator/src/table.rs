//! Static (forecast type, subtype) to target fact table.

use outcome_core::{ForecastType, OutcomeError, Subtype, TargetFact};

/// Every classification (type, subtype) pair and the target fact that makes
/// it correct. Regression types resolve through
/// [`ForecastType::categorical`].
pub static OUTCOME_TABLE: &[(ForecastType, Subtype, TargetFact)] = &[
    (ForecastType::WinDrawLoss, Subtype::HomeWin, TargetFact::HomeWin),
    (ForecastType::WinDrawLoss, Subtype::Draw, TargetFact::Draw),
    (ForecastType::WinDrawLoss, Subtype::AwayWin, TargetFact::AwayWin),
    (ForecastType::BothTeamsScore, Subtype::Yes, TargetFact::BothScore),
    (ForecastType::BothTeamsScore, Subtype::No, TargetFact::NotBothScore),
    (ForecastType::GoalHome, Subtype::Yes, TargetFact::HomeScored),
    (ForecastType::GoalHome, Subtype::No, TargetFact::HomeNotScored),
    (ForecastType::GoalAway, Subtype::Yes, TargetFact::AwayScored),
    (ForecastType::GoalAway, Subtype::No, TargetFact::AwayNotScored),
    (ForecastType::Total, Subtype::Over, TargetFact::TotalOver),
    (ForecastType::Total, Subtype::Under, TargetFact::TotalUnder),
    (ForecastType::TotalHome, Subtype::Over, TargetFact::HomeTotalOver),
    (ForecastType::TotalHome, Subtype::Under, TargetFact::HomeTotalUnder),
    (ForecastType::TotalAway, Subtype::Over, TargetFact::AwayTotalOver),
    (ForecastType::TotalAway, Subtype::Under, TargetFact::AwayTotalUnder),
];

/// Fact decided by a (type, subtype) pair
pub fn fact_for(forecast_type: ForecastType, subtype: Subtype) -> Result<TargetFact, OutcomeError> {
    let categorical = forecast_type.categorical();
    OUTCOME_TABLE
        .iter()
        .find(|(t, s, _)| *t == categorical && *s == subtype)
        .map(|(_, _, fact)| *fact)
        .ok_or_else(|| OutcomeError::UnmappedOutcome {
            forecast_type,
            subtype: subtype.to_string(),
        })
}
