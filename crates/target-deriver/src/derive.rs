//! Pure target derivation from a final score.

use outcome_core::{
    ForecastType, MatchResult, OutcomeError, SportThresholds, Subtype, Target, TargetFact,
    TargetFacts, TARGET_SCHEMA_VERSION,
};

fn over(value: i32, threshold: f64) -> bool {
    Subtype::split(value as f64, threshold) == Subtype::Over
}

fn facts_for(home: i32, away: i32, thresholds: SportThresholds) -> TargetFacts {
    let total = home + away;
    let total_over = over(total, thresholds.total);
    let home_total_over = over(home, thresholds.team_total);
    let away_total_over = over(away, thresholds.team_total);

    TargetFacts {
        home_win: home > away,
        draw: home == away,
        away_win: home < away,
        both_score: home > 0 && away > 0,
        not_both_score: home == 0 || away == 0,
        home_scored: home > 0,
        home_not_scored: home == 0,
        away_scored: away > 0,
        away_not_scored: away == 0,
        total_over,
        total_under: !total_over,
        home_total_over,
        home_total_under: !home_total_over,
        away_total_over,
        away_total_under: !away_total_over,
    }
}

/// Derive every target fact of a finished match.
///
/// Fails with [`OutcomeError::IncompleteResult`] while either score is
/// missing. The output depends only on the score and the thresholds, so
/// repeated calls are bit-identical.
pub fn derive_target(
    result: &MatchResult,
    thresholds: SportThresholds,
) -> Result<Target, OutcomeError> {
    let match_id = result.fixture.match_id;
    let home = result.home_goals.ok_or(OutcomeError::IncompleteResult {
        match_id,
        missing: "home_goals",
    })?;
    let away = result.away_goals.ok_or(OutcomeError::IncompleteResult {
        match_id,
        missing: "away_goals",
    })?;

    if home < 0 || away < 0 {
        return Err(OutcomeError::InvalidData(format!(
            "negative score {}:{} for match {}",
            home, away, match_id
        )));
    }

    Ok(Target {
        match_id,
        sport: result.fixture.sport,
        version: TARGET_SCHEMA_VERSION,
        home_goals: home,
        away_goals: away,
        total_goals: home + away,
        total_threshold: thresholds.total,
        team_total_threshold: thresholds.team_total,
        facts: facts_for(home, away, thresholds),
    })
}

/// Check that a target's facts follow from its stored quantities
pub fn verify_target(target: &Target) -> Result<(), OutcomeError> {
    if target.total_goals != target.home_goals + target.away_goals {
        return Err(OutcomeError::InvalidData(format!(
            "target {} total {} does not match {}:{}",
            target.match_id, target.total_goals, target.home_goals, target.away_goals
        )));
    }

    let expected = facts_for(target.home_goals, target.away_goals, target.thresholds());
    for fact in TargetFact::ALL {
        if target.fact(fact) != expected.get(fact) {
            return Err(OutcomeError::InvalidData(format!(
                "target {} fact {} is inconsistent with {}:{}",
                target.match_id,
                fact.column(),
                target.home_goals,
                target.away_goals
            )));
        }
    }
    Ok(())
}

/// Forecast types whose verdicts can read this fact
fn fact_forecast_types(fact: TargetFact) -> &'static [ForecastType] {
    match fact {
        TargetFact::HomeWin | TargetFact::Draw | TargetFact::AwayWin => &[ForecastType::WinDrawLoss],
        TargetFact::BothScore | TargetFact::NotBothScore => &[ForecastType::BothTeamsScore],
        TargetFact::HomeScored | TargetFact::HomeNotScored => &[ForecastType::GoalHome],
        TargetFact::AwayScored | TargetFact::AwayNotScored => &[ForecastType::GoalAway],
        TargetFact::TotalOver | TargetFact::TotalUnder => {
            &[ForecastType::Total, ForecastType::TotalAmount]
        }
        TargetFact::HomeTotalOver | TargetFact::HomeTotalUnder => {
            &[ForecastType::TotalHome, ForecastType::TotalHomeAmount]
        }
        TargetFact::AwayTotalOver | TargetFact::AwayTotalUnder => {
            &[ForecastType::TotalAway, ForecastType::TotalAwayAmount]
        }
    }
}

/// Forecast types whose verdicts or coverage differ between two versions of
/// a target. Every type is affected when there was no previous target.
pub fn affected_forecast_types(previous: Option<&Target>, replacement: &Target) -> Vec<ForecastType> {
    let Some(previous) = previous else {
        return ForecastType::ALL.to_vec();
    };

    let mut affected = Vec::new();
    for fact in TargetFact::ALL {
        if previous.fact(fact) != replacement.fact(fact) {
            affected.extend_from_slice(fact_forecast_types(fact));
        }
    }
    // Amount types also depend on the raw quantity through interval coverage
    for forecast_type in ForecastType::regression_types() {
        if forecast_type.actual_value(previous) != forecast_type.actual_value(replacement) {
            affected.push(forecast_type);
        }
    }

    affected.sort();
    affected.dedup();
    affected
}
