//! Forecast validation against a derived target.

use outcome_core::{
    ForecastType, OutcomeError, RawOutcome, Sport, SportThresholds, Subtype, Target,
    ThresholdTable, Verdict,
};
use serde::Serialize;

use crate::table::fact_for;

/// Verdict plus what the validator resolved on the way
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub verdict: Verdict,
    /// Predicted subtype, normalized for regression forecasts
    pub subtype: Option<Subtype>,
    /// Observed quantity for regression forecasts
    pub actual_value: Option<f64>,
}

impl ValidationOutcome {
    fn new(verdict: Verdict, subtype: Option<Subtype>, actual_value: Option<f64>) -> Self {
        Self {
            verdict,
            subtype,
            actual_value,
        }
    }
}

/// Map a regression estimate onto the over/under subtype of its
/// classification counterpart. `None` for types without a threshold.
pub fn normalize(
    forecast_type: ForecastType,
    value: f64,
    thresholds: &SportThresholds,
) -> Option<Subtype> {
    if !value.is_finite() {
        return None;
    }
    forecast_type
        .threshold(thresholds)
        .map(|threshold| Subtype::split(value, threshold))
}

fn unmapped(err: &OutcomeError) {
    tracing::warn!(error = %err, "No target fact for forecast, verdict is indeterminate");
}

/// Predicted subtype of a forecast, or the reason it has none
fn resolve_subtype(
    forecast_type: ForecastType,
    subtype: &str,
    raw: &RawOutcome,
    thresholds: &SportThresholds,
) -> Result<Subtype, OutcomeError> {
    let unmapped_err = || OutcomeError::UnmappedOutcome {
        forecast_type,
        subtype: subtype.to_string(),
    };

    if forecast_type.is_regression() {
        return match raw {
            RawOutcome::Estimate(value) => {
                normalize(forecast_type, *value, thresholds).ok_or_else(unmapped_err)
            }
            RawOutcome::Label(_) => Err(unmapped_err()),
        };
    }

    let declared: Subtype = subtype.parse().map_err(|_| unmapped_err())?;
    match raw {
        RawOutcome::Label(label) => match label.parse::<Subtype>() {
            Ok(predicted) if predicted == declared => Ok(declared),
            _ => Err(unmapped_err()),
        },
        RawOutcome::Estimate(_) => Err(unmapped_err()),
    }
}

/// Full validation of one forecast against its target.
///
/// Pure: the result depends only on the arguments. Regression estimates
/// are normalized with the thresholds recorded on the target.
pub fn validate_detailed(
    forecast_type: ForecastType,
    subtype: &str,
    raw: &RawOutcome,
    target: Option<&Target>,
) -> ValidationOutcome {
    let Some(target) = target else {
        return ValidationOutcome::new(Verdict::Pending, None, None);
    };

    let actual_value = forecast_type.actual_value(target);
    let resolved = resolve_subtype(forecast_type, subtype, raw, &target.thresholds())
        .and_then(|predicted| fact_for(forecast_type, predicted).map(|fact| (predicted, fact)));

    match resolved {
        Ok((predicted, fact)) => {
            let verdict = if target.fact(fact) {
                Verdict::Correct
            } else {
                Verdict::Incorrect
            };
            ValidationOutcome::new(verdict, Some(predicted), actual_value)
        }
        Err(err) => {
            unmapped(&err);
            ValidationOutcome::new(Verdict::Indeterminate, None, actual_value)
        }
    }
}

/// Verdict of one forecast against its target
pub fn validate(
    forecast_type: ForecastType,
    subtype: &str,
    raw: &RawOutcome,
    target: Option<&Target>,
) -> Verdict {
    validate_detailed(forecast_type, subtype, raw, target).verdict
}

/// Validator bound to the configured sport thresholds, for forecasts that
/// must be keyed before their target exists.
#[derive(Debug, Clone)]
pub struct OutcomeValidator {
    thresholds: ThresholdTable,
}

impl OutcomeValidator {
    pub fn new(thresholds: ThresholdTable) -> Self {
        Self { thresholds }
    }

    pub fn validate(
        &self,
        forecast_type: ForecastType,
        subtype: &str,
        raw: &RawOutcome,
        target: Option<&Target>,
    ) -> ValidationOutcome {
        validate_detailed(forecast_type, subtype, raw, target)
    }

    /// Mapped subtype a forecast predicts, under the configured thresholds
    /// of `sport`
    pub fn predicted_subtype(
        &self,
        forecast_type: ForecastType,
        subtype: &str,
        raw: &RawOutcome,
        sport: Sport,
    ) -> Result<Subtype, OutcomeError> {
        let thresholds = self.thresholds.get(sport)?;
        let predicted = resolve_subtype(forecast_type, subtype, raw, &thresholds)?;
        fact_for(forecast_type, predicted)?;
        Ok(predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outcome_core::{TargetFact, TargetFacts, ESTIMATE_SUBTYPE};

    /// Target with facts computed inline so this crate does not depend on
    /// the deriver
    fn target(home: i32, away: i32) -> Target {
        let total = home + away;
        let mut facts = TargetFacts::default();
        facts.set(TargetFact::HomeWin, home > away);
        facts.set(TargetFact::Draw, home == away);
        facts.set(TargetFact::AwayWin, home < away);
        facts.set(TargetFact::BothScore, home > 0 && away > 0);
        facts.set(TargetFact::NotBothScore, home == 0 || away == 0);
        facts.set(TargetFact::HomeScored, home > 0);
        facts.set(TargetFact::HomeNotScored, home == 0);
        facts.set(TargetFact::AwayScored, away > 0);
        facts.set(TargetFact::AwayNotScored, away == 0);
        facts.set(TargetFact::TotalOver, total as f64 > 2.5);
        facts.set(TargetFact::TotalUnder, total as f64 <= 2.5);
        facts.set(TargetFact::HomeTotalOver, home as f64 > 1.5);
        facts.set(TargetFact::HomeTotalUnder, home as f64 <= 1.5);
        facts.set(TargetFact::AwayTotalOver, away as f64 > 1.5);
        facts.set(TargetFact::AwayTotalUnder, away as f64 <= 1.5);
        Target {
            match_id: 1,
            sport: Sport::Soccer,
            version: 1,
            home_goals: home,
            away_goals: away,
            total_goals: total,
            total_threshold: 2.5,
            team_total_threshold: 1.5,
            facts,
        }
    }

    fn label(s: &str) -> RawOutcome {
        RawOutcome::Label(s.to_string())
    }

    #[test]
    fn test_worked_example() {
        let three_all = target(3, 3);

        let detailed = validate_detailed(
            ForecastType::TotalAmount,
            ESTIMATE_SUBTYPE,
            &RawOutcome::Estimate(3.27),
            Some(&three_all),
        );
        assert_eq!(detailed.verdict, Verdict::Correct);
        assert_eq!(detailed.subtype, Some(Subtype::Over));
        assert_eq!(detailed.actual_value, Some(6.0));

        assert_eq!(
            validate(ForecastType::Total, "under", &label("under"), Some(&three_all)),
            Verdict::Incorrect
        );
        assert_eq!(
            validate(ForecastType::Total, "under", &label("under"), None),
            Verdict::Pending
        );
    }

    #[test]
    fn test_classification_verdicts() {
        let away_win = target(0, 2);
        assert_eq!(
            validate(ForecastType::WinDrawLoss, "away_win", &label("away_win"), Some(&away_win)),
            Verdict::Correct
        );
        assert_eq!(
            validate(ForecastType::BothTeamsScore, "no", &label("no"), Some(&away_win)),
            Verdict::Correct
        );
        assert_eq!(
            validate(ForecastType::GoalHome, "yes", &label("yes"), Some(&away_win)),
            Verdict::Incorrect
        );
        assert_eq!(
            validate(ForecastType::TotalAway, "over", &label("over"), Some(&away_win)),
            Verdict::Correct
        );
    }

    #[test]
    fn test_unmapped_is_indeterminate() {
        let t = target(1, 0);
        assert_eq!(
            validate(ForecastType::WinDrawLoss, "over", &label("over"), Some(&t)),
            Verdict::Indeterminate
        );
        assert_eq!(
            validate(ForecastType::Total, "corners", &label("corners"), Some(&t)),
            Verdict::Indeterminate
        );
        // Label disagreeing with the declared subtype
        assert_eq!(
            validate(ForecastType::Total, "over", &label("under"), Some(&t)),
            Verdict::Indeterminate
        );
        // Wrong value shape for the type
        assert_eq!(
            validate(ForecastType::TotalAmount, ESTIMATE_SUBTYPE, &label("over"), Some(&t)),
            Verdict::Indeterminate
        );
        assert_eq!(
            validate(ForecastType::Total, "over", &RawOutcome::Estimate(3.0), Some(&t)),
            Verdict::Indeterminate
        );
        assert_eq!(
            validate(
                ForecastType::TotalAmount,
                ESTIMATE_SUBTYPE,
                &RawOutcome::Estimate(f64::NAN),
                Some(&t)
            ),
            Verdict::Indeterminate
        );
    }

    #[test]
    fn test_exclusion_over_all_pairs() {
        let t = target(2, 1);
        for forecast_type in ForecastType::ALL {
            if forecast_type.is_regression() {
                continue;
            }
            for subtype in Subtype::ALL {
                let verdict = validate(
                    forecast_type,
                    subtype.as_str(),
                    &label(subtype.as_str()),
                    Some(&t),
                );
                let mapped = fact_for(forecast_type, subtype).is_ok();
                assert_eq!(
                    verdict == Verdict::Indeterminate,
                    !mapped,
                    "{}/{}",
                    forecast_type,
                    subtype
                );
            }
        }
    }

    #[test]
    fn test_exactly_one_subtype_is_correct() {
        for (home, away) in [(0, 0), (1, 0), (2, 2), (0, 3), (4, 1)] {
            let t = target(home, away);
            for forecast_type in ForecastType::ALL.into_iter().filter(|ft| !ft.is_regression()) {
                let correct = Subtype::ALL
                    .into_iter()
                    .filter(|s| {
                        validate(forecast_type, s.as_str(), &label(s.as_str()), Some(&t))
                            == Verdict::Correct
                    })
                    .count();
                assert_eq!(correct, 1, "{} at {}:{}", forecast_type, home, away);
            }
        }
    }

    #[test]
    fn test_validation_is_deterministic() {
        let t = target(1, 1);
        let raw = RawOutcome::Estimate(2.5);
        let first = validate_detailed(ForecastType::TotalAmount, ESTIMATE_SUBTYPE, &raw, Some(&t));
        for _ in 0..10 {
            assert_eq!(
                validate_detailed(ForecastType::TotalAmount, ESTIMATE_SUBTYPE, &raw, Some(&t)),
                first
            );
        }
        // 2.5 against 2.5 goes under, and 2 goals is under
        assert_eq!(first.subtype, Some(Subtype::Under));
        assert_eq!(first.verdict, Verdict::Correct);
    }

    #[test]
    fn test_normalization_is_monotonic() {
        let thresholds = SportThresholds {
            total: 2.5,
            team_total: 1.5,
        };
        let mut seen_over = false;
        for step in 0..=100 {
            let value = step as f64 * 0.05;
            let subtype = normalize(ForecastType::TotalAmount, value, &thresholds).unwrap();
            if seen_over {
                assert_eq!(subtype, Subtype::Over, "value {}", value);
            }
            seen_over |= subtype == Subtype::Over;
        }
        assert!(seen_over);
        assert_eq!(normalize(ForecastType::WinDrawLoss, 1.0, &thresholds), None);
        assert_eq!(
            normalize(ForecastType::TotalHomeAmount, 1.6, &thresholds),
            Some(Subtype::Over)
        );
    }

    #[test]
    fn test_predicted_subtype_uses_sport_thresholds() {
        let validator = OutcomeValidator::new(ThresholdTable::default());
        let raw = RawOutcome::Estimate(3.9);
        assert_eq!(
            validator
                .predicted_subtype(ForecastType::TotalAmount, ESTIMATE_SUBTYPE, &raw, Sport::Soccer)
                .unwrap(),
            Subtype::Over
        );
        assert_eq!(
            validator
                .predicted_subtype(ForecastType::TotalAmount, ESTIMATE_SUBTYPE, &raw, Sport::IceHockey)
                .unwrap(),
            Subtype::Under
        );
        assert!(validator
            .predicted_subtype(ForecastType::Total, "sideways", &label("sideways"), Sport::Soccer)
            .is_err());
        assert!(validator
            .predicted_subtype(ForecastType::WinDrawLoss, "over", &label("over"), Sport::Soccer)
            .is_err());
    }
}
