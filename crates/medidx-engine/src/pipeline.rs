use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use medidx_core::config::Config;
use medidx_core::error::{Error, Result};
use medidx_core::traits::HistoryStore;
use medidx_core::types::{
    DiagnosisRequest, HistoryEntry, PredictionResult, ProbabilityDistribution, RankedDisease, SymptomVector,
};
use medidx_model::{ModelBundle, RankingPolicy};
use medidx_store::history::SYMPTOM_SEPARATOR;
use medidx_store::{CsvHistoryStore, TreatmentDirectory};

/// Per-request progress. `Rejected` is only reachable from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Rejected,
    Encoded,
    Classified,
    Ranked,
    TreatmentResolved,
    Logged,
    Returned,
}

/// Whether the prediction came with calibrated alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMode {
    Ranked,
    /// The classifier could only name a winner; no alternatives, and the
    /// reported confidence of 1.0 is synthetic.
    Degraded,
}

/// Non-fatal conditions surfaced next to a successful diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PipelineWarning {
    UnknownSymptomsIgnored(Vec<String>),
    /// Symptoms were submitted but none is in the vocabulary.
    NoRecognizedSymptoms,
    PersistenceFailed(String),
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSymptomsIgnored(tokens) => write!(f, "unrecognized symptoms ignored: {}", tokens.join(", ")),
            Self::NoRecognizedSymptoms => write!(f, "none of the submitted symptoms is recognized"),
            Self::PersistenceFailed(msg) => write!(f, "diagnosis was not recorded: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisOutcome {
    pub prediction: PredictionResult,
    pub treatment: String,
    pub mode: PredictionMode,
    pub warnings: Vec<PipelineWarning>,
}

impl DiagnosisOutcome {
    pub fn primary(&self) -> &RankedDisease {
        self.prediction.primary()
    }

    pub fn alternatives_available(&self) -> bool {
        self.mode == PredictionMode::Ranked
    }

    pub fn was_logged(&self) -> bool {
        !self.warnings.iter().any(|w| matches!(w, PipelineWarning::PersistenceFailed(_)))
    }
}

/// Holds the immutable model bundle and treatment table plus the shared
/// history store. `diagnose` takes `&self` and may run on many threads.
pub struct DiagnosisPipeline {
    bundle: Arc<ModelBundle>,
    treatments: Arc<TreatmentDirectory>,
    history: Arc<dyn HistoryStore>,
    ranking: RankingPolicy,
}

impl DiagnosisPipeline {
    pub fn new(
        bundle: Arc<ModelBundle>,
        treatments: Arc<TreatmentDirectory>,
        history: Arc<dyn HistoryStore>,
        top_k: usize,
    ) -> Result<Self> {
        Ok(Self { bundle, treatments, history, ranking: RankingPolicy::new(top_k)? })
    }

    /// Startup wiring from configuration: load artifacts (fatal on a version
    /// mismatch), the treatment table and the CSV history log. An unusable
    /// history log is only logged; each diagnosis then carries a
    /// `PersistenceFailed` warning.
    pub fn open(config: &Config) -> Result<Self> {
        let settings = config.settings()?;
        let bundle = ModelBundle::load(&config.path(&settings.artifacts.dir), settings.engine.unknown_symptoms)?;
        let treatments = TreatmentDirectory::load(&config.path(&settings.data.treatment_table))?;
        let history = CsvHistoryStore::new(config.path(&settings.data.history_log));
        if let Err(e) = history.ensure_initialized() {
            tracing::warn!(error = %e, "history log unavailable; diagnoses will not be recorded");
        }
        Self::new(Arc::new(bundle), Arc::new(treatments), Arc::new(history), settings.engine.top_k)
    }

    pub fn treatments(&self) -> &TreatmentDirectory {
        &self.treatments
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    pub fn top_k(&self) -> usize {
        self.ranking.k()
    }

    pub fn diagnose(&self, request: &DiagnosisRequest) -> Result<DiagnosisOutcome> {
        let mut stage = Stage::Idle;
        let submitted = submitted_symptoms(&request.symptoms);
        if submitted.is_empty() {
            advance(&mut stage, Stage::Rejected);
            return Err(Error::Validation("at least one symptom is required".into()));
        }
        if let Err(e) = request.profile.validate() {
            advance(&mut stage, Stage::Rejected);
            return Err(e);
        }
        if let Some(bad) = submitted.iter().find(|s| s.contains(SYMPTOM_SEPARATOR)) {
            advance(&mut stage, Stage::Rejected);
            return Err(Error::Validation(format!("symptom '{}' contains '{}'", bad, SYMPTOM_SEPARATOR)));
        }

        let mut warnings = Vec::new();
        let encoded = self.bundle.encoder().encode_report(&submitted)?;
        if !encoded.ignored.is_empty() {
            tracing::info!(ignored = ?encoded.ignored, "unrecognized symptoms ignored");
            warnings.push(PipelineWarning::UnknownSymptomsIgnored(encoded.ignored));
        }
        if encoded.vector.is_all_zero() {
            warnings.push(PipelineWarning::NoRecognizedSymptoms);
        }
        advance(&mut stage, Stage::Encoded);

        let (distribution, mode) = self.classify(&encoded.vector)?;
        advance(&mut stage, Stage::Classified);

        let prediction = self.ranking.rank(&distribution)?;
        advance(&mut stage, Stage::Ranked);

        let primary = prediction.primary();
        let treatment = self.treatments.lookup(&primary.disease).to_string();
        advance(&mut stage, Stage::TreatmentResolved);

        let confidence = match mode {
            PredictionMode::Ranked => Some(primary.confidence),
            PredictionMode::Degraded => None,
        };
        let entry = HistoryEntry::now(&request.profile, submitted, primary.disease.clone(), confidence);
        if let Err(e) = self.history.append(&entry) {
            tracing::warn!(error = %e, "history append failed; returning diagnosis anyway");
            warnings.push(PipelineWarning::PersistenceFailed(e.to_string()));
        }
        advance(&mut stage, Stage::Logged);

        tracing::info!(
            disease = %primary.disease,
            confidence = primary.confidence,
            mode = ?mode,
            warnings = warnings.len(),
            "diagnosis complete"
        );
        advance(&mut stage, Stage::Returned);
        Ok(DiagnosisOutcome { prediction, treatment, mode, warnings })
    }

    fn classify(&self, vector: &SymptomVector) -> Result<(ProbabilityDistribution, PredictionMode)> {
        let classifier = self.bundle.classifier();
        match classifier.predict_distribution(vector) {
            Ok(d) => Ok((d, PredictionMode::Ranked)),
            Err(Error::ModelIncompatibility(reason)) => {
                tracing::warn!(%reason, "probabilities unavailable; falling back to single-label prediction");
                let winner = classifier.predict(vector)?;
                Ok((ProbabilityDistribution::certain(winner), PredictionMode::Degraded))
            }
            Err(e) => Err(e),
        }
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = ?*stage, to = ?next, "pipeline stage");
    *stage = next;
}

/// Non-blank symptoms in submission order, duplicates removed.
fn submitted_symptoms(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        if s.trim().is_empty() || out.contains(s) {
            continue;
        }
        out.push(s.clone());
    }
    out
}
