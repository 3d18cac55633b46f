//! medidx-engine
//!
//! Request-level orchestration: validate, encode, classify, rank, resolve a
//! treatment and append to the history log.
pub mod pipeline;

pub use pipeline::{DiagnosisOutcome, DiagnosisPipeline, PipelineWarning, PredictionMode, Stage};
