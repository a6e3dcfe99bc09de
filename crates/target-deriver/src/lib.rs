//! Target derivation
//!
//! Turns a finished match result into its immutable ground-truth record.
//! [`derive_target`] is pure; [`TargetDeriver`] adds the per-match lock and
//! the write-once persistence contract on top of it.

pub mod derive;
pub mod service;

pub use derive::{affected_forecast_types, derive_target, verify_target};
pub use service::{Correction, DeriveReport, TargetDeriver};
