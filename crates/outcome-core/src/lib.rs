//! Outcome Core
//!
//! Shared domain model for the outcome engine: match results, targets,
//! forecasts, verdicts and statistics keys, plus the error taxonomy, the
//! configuration surface, the persistence traits and the per-match lock.

pub mod config;
pub mod error;
pub mod lock;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use lock::{KeyedGuard, KeyedLock};
pub use traits::*;
pub use types::*;
