//! Accuracy metrics: Wilson bounds, z-score, stability and calibration error.

use chrono::{Datelike, NaiveDate};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Stability reported when there is too little history to measure it
pub const NEUTRAL_STABILITY: f64 = 0.75;

const MIN_STABILITY_SAMPLES: usize = 10;
const MIN_STABILITY_WEEKS: usize = 2;

/// Two-sided standard normal critical value for a confidence level
pub fn z_score(confidence_level: f64) -> f64 {
    let tail = (1.0 - confidence_level) / 2.0;
    Normal::new(0.0, 1.0)
        .map(|normal| normal.inverse_cdf(1.0 - tail))
        .unwrap_or(1.96)
}

/// Wilson score interval for `correct` successes out of `total`.
/// `(0, 1)` without observations.
pub fn wilson_bounds(correct: u64, total: u64, z: f64) -> (f64, f64) {
    if total == 0 {
        return (0.0, 1.0);
    }
    let n = total as f64;
    let p = correct as f64 / n;
    let z2 = z * z;
    let denominator = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denominator;
    let margin = (z / denominator) * ((p * (1.0 - p) / n) + z2 / (4.0 * n * n)).sqrt();

    ((center - margin).max(0.0), (center + margin).min(1.0))
}

/// How steady weekly accuracy has been: `1 - min(stdev / mean, 1)` over
/// ISO weeks. Neutral with fewer than 10 verdicts or 2 weeks.
pub fn stability(dated: &[(NaiveDate, bool)]) -> f64 {
    if dated.len() < MIN_STABILITY_SAMPLES {
        return NEUTRAL_STABILITY;
    }

    let mut weeks: BTreeMap<(i32, u32), (u32, u32)> = BTreeMap::new();
    for (date, correct) in dated {
        let week = date.iso_week();
        let slot = weeks.entry((week.year(), week.week())).or_insert((0, 0));
        slot.1 += 1;
        if *correct {
            slot.0 += 1;
        }
    }

    if weeks.len() < MIN_STABILITY_WEEKS {
        return NEUTRAL_STABILITY;
    }

    let rates: Vec<f64> = weeks
        .values()
        .map(|(correct, total)| *correct as f64 / *total as f64)
        .collect();
    let mean = rates.iter().mean();
    let std_dev = rates.iter().std_dev();
    let scale = if mean > 0.0 { mean } else { 1.0 };

    (1.0 - (std_dev / scale).min(1.0)).clamp(0.0, 1.0)
}

/// Distance between declared and observed confidence
pub fn calibration_error(declared: f64, observed: f64) -> f64 {
    (declared - observed).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> NaiveDate {
        // 2024-01-01 is a Monday
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
    }

    #[test]
    fn test_z_score_95() {
        assert!((z_score(0.95) - 1.959964).abs() < 1e-5);
        assert!(z_score(0.99) > z_score(0.95));
    }

    #[test]
    fn test_wilson_bounds() {
        let (lower, upper) = wilson_bounds(80, 100, 1.96);
        assert!(lower < 0.8 && upper > 0.8);
        assert!((lower - 0.7112).abs() < 1e-3);
        assert!((upper - 0.8666).abs() < 1e-3);

        assert_eq!(wilson_bounds(0, 0, 1.96), (0.0, 1.0));
        let (lower, _) = wilson_bounds(0, 10, 1.96);
        assert_eq!(lower, 0.0);
    }

    #[test]
    fn test_wilson_narrows_with_samples() {
        let (l1, u1) = wilson_bounds(6, 10, 1.96);
        let (l2, u2) = wilson_bounds(600, 1000, 1.96);
        assert!(u2 - l2 < u1 - l1);
    }

    #[test]
    fn test_stability_neutral_without_history() {
        let few: Vec<_> = (0..9).map(|i| (day(i * 7), true)).collect();
        assert_eq!(stability(&few), NEUTRAL_STABILITY);

        // plenty of verdicts, but all in one week
        let one_week: Vec<_> = (0..12).map(|i| (day(i % 5), i % 2 == 0)).collect();
        assert_eq!(stability(&one_week), NEUTRAL_STABILITY);
    }

    #[test]
    fn test_stability_of_constant_accuracy() {
        // four weeks, each 3 of 4 correct
        let dated: Vec<_> = (0..16).map(|i| (day((i / 4) * 7 + i % 4), i % 4 != 0)).collect();
        assert!((stability(&dated) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_stability_drops_with_spread() {
        // alternating perfect and zero weeks
        let dated: Vec<_> = (0..16)
            .map(|i| {
                let week = i / 4;
                (day(week * 7 + i % 4), week % 2 == 0)
            })
            .collect();
        let value = stability(&dated);
        assert!(value < 0.5, "stability {}", value);
        assert!(value >= 0.0);
    }

    #[test]
    fn test_calibration_error() {
        assert!((calibration_error(0.9, 0.84) - 0.06).abs() < 1e-12);
        assert_eq!(calibration_error(0.5, 0.5), 0.0);
    }
}
