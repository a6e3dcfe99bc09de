//! Split conformal calibration
//!
//! Builds symmetric prediction intervals for regression forecasts from the
//! absolute residuals of recent (predicted, actual) pairs. With `n` residuals
//! and coverage `1 - alpha`, the half-width is the `ceil((n + 1)(1 - alpha))`-th
//! smallest residual, which gives at least `1 - alpha` coverage for
//! exchangeable data.

pub mod calibrator;
pub mod monitor;
pub mod window;

pub use calibrator::{predict_interval, ConformalCalibrator, ConformalQuantile};
pub use monitor::{CoverageMonitor, CoverageReport};
pub use window::CalibrationSet;
