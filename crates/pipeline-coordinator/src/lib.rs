//! Pipeline Coordinator
//!
//! Runs the per-window stage machine
//! `Ingested → Featurized → Predicted → Calibrated → Validated → Aggregated → Published`.
//! A stage starts only after its predecessor completed for the same window,
//! every completion and failure is written to the pipeline run log, and a
//! stage error halts its window without touching others.

pub mod command;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod publish;
pub mod stages;

pub use command::{Command, ExitSignal, Invocation, USAGE};
pub use context::PipelineContext;
pub use coordinator::{Coordinator, RunSummary, StageOutcome, WindowReport};
pub use error::PipelineError;
pub use publish::{LogSink, PublicationSink};
pub use stages::{default_runners, StageReport, StageRunner};
