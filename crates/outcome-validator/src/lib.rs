//! Outcome validation
//!
//! One pure function decides whether a forecast came true. Classification
//! forecasts are looked up in a static (type, subtype) → fact table;
//! regression forecasts are first normalized into the over/under subtype of
//! their classification counterpart.

pub mod table;
pub mod validator;

pub use table::{fact_for, OUTCOME_TABLE};
pub use validator::{normalize, validate, validate_detailed, OutcomeValidator, ValidationOutcome};
