use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Rejected request: nothing was classified or logged.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Only raised under `UnknownSymptomPolicy::Reject`.
    #[error("Unknown symptom: {0}")]
    UnknownSymptom(String),

    #[error("Model cannot produce probabilities: {0}")]
    ModelIncompatibility(String),

    #[error("History persistence failed: {0}")]
    Persistence(String),

    /// Vocabulary, label set and classifier come from different training runs.
    #[error("Artifact version mismatch: {0}")]
    ArtifactVersionMismatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
