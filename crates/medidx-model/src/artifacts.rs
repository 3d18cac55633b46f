//! Co-versioned model artifacts and the read-only bundle built from them.
//!
//! A training run writes three JSON files into one directory, each stamped
//! with the same `run_id`. Feature index `i` only means something relative
//! to the vocabulary it was fitted with, so files from different runs are
//! refused at load time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use medidx_core::error::{Error, Result};
use medidx_core::traits::DiseaseClassifier;
use medidx_core::types::UnknownSymptomPolicy;

use crate::encoder::SymptomEncoder;
use crate::forest::{ForestParams, RandomForest};
use crate::vocab::{DiseaseLabelSet, SymptomVocabulary};

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;
pub const VOCABULARY_FILE: &str = "vocabulary.json";
pub const LABELS_FILE: &str = "labels.json";
pub const CLASSIFIER_FILE: &str = "classifier.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyArtifact {
    pub format_version: u32,
    pub run_id: String,
    pub tokens: SymptomVocabulary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsArtifact {
    pub format_version: u32,
    pub run_id: String,
    pub labels: DiseaseLabelSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub format_version: u32,
    pub run_id: String,
    pub trained_at: String,
    pub params: ForestParams,
    pub forest: RandomForest,
}

/// Write all three artifacts. Each file is written to a sibling temp file
/// and renamed into place.
pub fn save_artifacts(dir: &Path, vocabulary: &VocabularyArtifact, labels: &LabelsArtifact, classifier: &ClassifierArtifact) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::InvalidData(format!("cannot create {}: {}", dir.display(), e)))?;
    write_json(&dir.join(VOCABULARY_FILE), vocabulary)?;
    write_json(&dir.join(LABELS_FILE), labels)?;
    write_json(&dir.join(CLASSIFIER_FILE), classifier)?;
    tracing::info!(dir = %dir.display(), run_id = %classifier.run_id, "saved model artifacts");
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec(value).map_err(|e| Error::InvalidData(format!("{}: {}", path.display(), e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| Error::InvalidData(format!("cannot write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| Error::InvalidData(format!("cannot move {} into place: {}", path.display(), e)))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("artifact {}", path.display())))
        }
        Err(e) => return Err(Error::InvalidData(format!("cannot read {}: {}", path.display(), e))),
    };
    serde_json::from_slice(&body).map_err(|e| Error::InvalidData(format!("{}: {}", path.display(), e)))
}

fn check_format(file: &str, version: u32) -> Result<()> {
    if version != ARTIFACT_FORMAT_VERSION {
        return Err(Error::ArtifactVersionMismatch(format!(
            "{} has format version {}, expected {}",
            file, version, ARTIFACT_FORMAT_VERSION
        )));
    }
    Ok(())
}

/// Encoder, label set and classifier from one training run. Immutable and
/// shareable across threads.
pub struct ModelBundle {
    run_id: String,
    encoder: SymptomEncoder,
    labels: DiseaseLabelSet,
    classifier: Arc<dyn DiseaseClassifier>,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("run_id", &self.run_id)
            .field("features", &self.encoder.dim())
            .field("labels", &self.labels.len())
            .finish()
    }
}

impl ModelBundle {
    /// Assemble a bundle, checking that the classifier was fitted on this
    /// vocabulary width and label set.
    pub fn new(
        run_id: impl Into<String>,
        vocabulary: SymptomVocabulary,
        labels: DiseaseLabelSet,
        classifier: Arc<dyn DiseaseClassifier>,
        policy: UnknownSymptomPolicy,
    ) -> Result<Self> {
        if classifier.n_features() != vocabulary.len() {
            return Err(Error::ArtifactVersionMismatch(format!(
                "classifier expects {} features, vocabulary has {}",
                classifier.n_features(),
                vocabulary.len()
            )));
        }
        if classifier.labels() != labels.labels() {
            return Err(Error::ArtifactVersionMismatch(format!(
                "classifier knows {} labels that differ from the {} in the label set",
                classifier.labels().len(),
                labels.len()
            )));
        }
        Ok(Self {
            run_id: run_id.into(),
            encoder: SymptomEncoder::new(vocabulary, policy),
            labels,
            classifier,
        })
    }

    pub fn load(dir: &Path, policy: UnknownSymptomPolicy) -> Result<Self> {
        let vocabulary: VocabularyArtifact = read_json(&dir.join(VOCABULARY_FILE))?;
        let labels: LabelsArtifact = read_json(&dir.join(LABELS_FILE))?;
        let classifier: ClassifierArtifact = read_json(&dir.join(CLASSIFIER_FILE))?;
        check_format(VOCABULARY_FILE, vocabulary.format_version)?;
        check_format(LABELS_FILE, labels.format_version)?;
        check_format(CLASSIFIER_FILE, classifier.format_version)?;
        for (file, run_id) in [(LABELS_FILE, &labels.run_id), (CLASSIFIER_FILE, &classifier.run_id)] {
            if *run_id != vocabulary.run_id {
                return Err(Error::ArtifactVersionMismatch(format!(
                    "{} is from run {}, {} is from run {}",
                    file, run_id, VOCABULARY_FILE, vocabulary.run_id
                )));
            }
        }
        classifier.forest.validate()?;
        if !classifier.forest.has_probabilities() {
            tracing::warn!(run_id = %vocabulary.run_id, "classifier is label-only; predictions will be degraded");
        }
        let bundle = Self::new(
            vocabulary.run_id,
            vocabulary.tokens,
            labels.labels,
            Arc::new(classifier.forest),
            policy,
        )?;
        tracing::info!(
            dir = %dir.display(),
            run_id = %bundle.run_id,
            symptoms = bundle.encoder.dim(),
            diseases = bundle.labels.len(),
            trained_at = %classifier.trained_at,
            "loaded model bundle"
        );
        Ok(bundle)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn encoder(&self) -> &SymptomEncoder {
        &self.encoder
    }

    pub fn vocabulary(&self) -> &SymptomVocabulary {
        self.encoder.vocabulary()
    }

    pub fn labels(&self) -> &DiseaseLabelSet {
        &self.labels
    }

    pub fn classifier(&self) -> &dyn DiseaseClassifier {
        self.classifier.as_ref()
    }
}
