use crate::error::Result;
use crate::types::{DiseaseLabel, HistoryEntry, ProbabilityDistribution, SymptomVector};

/// Trained multi-class model behind a probability contract. Implementations
/// are immutable after loading and shared across concurrent requests.
pub trait DiseaseClassifier: Send + Sync {
    /// Known labels; class index `i` refers to `labels()[i]`.
    fn labels(&self) -> &[DiseaseLabel];
    /// Feature vector length the model was fitted on.
    fn n_features(&self) -> usize;
    /// Full distribution over `labels()`. Fails with
    /// `Error::ModelIncompatibility` when the model cannot produce one.
    fn predict_distribution(&self, vector: &SymptomVector) -> Result<ProbabilityDistribution>;
    /// Single most likely label.
    fn predict(&self, vector: &SymptomVector) -> Result<DiseaseLabel>;
}

/// Append-only audit log. Entries are never mutated or removed.
pub trait HistoryStore: Send + Sync {
    /// Create the backing storage (and its header) if it does not exist yet.
    fn ensure_initialized(&self) -> Result<()>;
    /// Must be safe to call from many threads at once.
    fn append(&self, entry: &HistoryEntry) -> Result<()>;
    fn read_all(&self) -> Result<Vec<HistoryEntry>>;
}
