//! medidx-model
//!
//! Everything that turns symptoms into ranked diseases: the vocabulary and
//! label set, the feature encoder, the random-forest classifier, top-k
//! ranking, the co-versioned artifact bundle and the offline training run.
pub mod artifacts;
pub mod encoder;
pub mod forest;
pub mod ranking;
pub mod training;
pub mod vocab;

pub use artifacts::ModelBundle;
pub use encoder::{EncodedSymptoms, SymptomEncoder};
pub use forest::{ForestParams, RandomForest};
pub use ranking::{top_k, RankingPolicy};
pub use training::{TrainedModel, TrainingProcedure, TrainingRow, TrainingSummary};
pub use vocab::{DiseaseLabelSet, SymptomVocabulary};
