//! Offline training run: dataset CSV in, co-versioned artifacts out.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use medidx_core::config::TrainingSettings;
use medidx_core::error::{Error, Result};
use medidx_core::types::{SymptomVector, UnknownSymptomPolicy};

use crate::artifacts::{
    save_artifacts, ClassifierArtifact, LabelsArtifact, ModelBundle, VocabularyArtifact, ARTIFACT_FORMAT_VERSION,
};
use crate::forest::{ForestParams, RandomForest};
use crate::vocab::{DiseaseLabelSet, SymptomVocabulary};

const SYMPTOM_COLUMNS: [&str; 3] = ["Symptom_1", "Symptom_2", "Symptom_3"];
const LABEL_COLUMNS: [&str; 2] = ["Disease", "Diagnosis"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingRow {
    pub symptoms: Vec<String>,
    pub disease: String,
}

impl TrainingRow {
    pub fn new(symptoms: [&str; 3], disease: &str) -> Self {
        Self { symptoms: symptoms.iter().map(|s| s.to_string()).collect(), disease: disease.to_string() }
    }
}

/// Hand-authored rows covering diseases the public dataset under-represents.
pub fn supplementary_rows() -> Vec<TrainingRow> {
    vec![
        TrainingRow::new(["chest_pain", "shortness_of_breath", "sweating"], "Heart Attack"),
        TrainingRow::new(["abdominal_pain", "nausea", "vomiting"], "Gastritis"),
        TrainingRow::new(["fatigue", "swelling_legs", "reduced_urine_output"], "Kidney Failure"),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetReport {
    pub rows_read: usize,
    pub dropped_missing: usize,
    pub dropped_excluded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSummary {
    pub run_id: String,
    pub rows_read: usize,
    pub dropped_missing: usize,
    pub dropped_excluded: usize,
    pub supplementary_rows: usize,
    pub training_rows: usize,
    pub vocabulary_size: usize,
    pub label_count: usize,
}

/// Parse a dataset with `Symptom_1..3` and a `Disease` (or `Diagnosis`)
/// column. Rows with a blank symptom or label are dropped, as are rows
/// labelled `excluded_label` (case-insensitive).
pub fn read_dataset<R: Read>(reader: R, excluded_label: &str) -> Result<(Vec<TrainingRow>, DatasetReport)> {
    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = csv_reader.headers().map_err(|e| Error::InvalidData(format!("dataset header: {}", e)))?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let mut symptom_cols = Vec::with_capacity(SYMPTOM_COLUMNS.len());
    for name in SYMPTOM_COLUMNS {
        symptom_cols.push(column(name).ok_or_else(|| Error::InvalidData(format!("dataset has no '{}' column", name)))?);
    }
    let label_col = LABEL_COLUMNS
        .iter()
        .find_map(|name| column(*name))
        .ok_or_else(|| Error::InvalidData("dataset has no 'Disease' or 'Diagnosis' column".into()))?;

    let excluded = excluded_label.trim().to_lowercase();
    let mut report = DatasetReport::default();
    let mut rows = Vec::new();
    for (i, record) in csv_reader.records().enumerate() {
        let record = record.map_err(|e| Error::InvalidData(format!("dataset row {}: {}", i + 1, e)))?;
        report.rows_read += 1;
        let cell = |col: usize| record.get(col).map(str::trim).filter(|s| !s.is_empty());
        let symptoms: Option<Vec<String>> = symptom_cols.iter().map(|c| cell(*c).map(str::to_string)).collect();
        let (Some(symptoms), Some(disease)) = (symptoms, cell(label_col)) else {
            report.dropped_missing += 1;
            continue;
        };
        if !excluded.is_empty() && disease.to_lowercase() == excluded {
            report.dropped_excluded += 1;
            continue;
        }
        rows.push(TrainingRow { symptoms, disease: disease.to_string() });
    }
    Ok((rows, report))
}

fn open_dataset(path: &Path, excluded_label: &str) -> Result<(Vec<TrainingRow>, DatasetReport)> {
    let file = std::fs::File::open(path).map_err(|e| Error::NotFound(format!("dataset {}: {}", path.display(), e)))?;
    read_dataset(std::io::BufReader::new(file), excluded_label)
}

/// Output of a fit, not yet persisted.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub run_id: String,
    pub vocabulary: SymptomVocabulary,
    pub labels: DiseaseLabelSet,
    pub params: ForestParams,
    pub forest: RandomForest,
}

impl TrainedModel {
    pub fn save(&self, dir: &Path) -> Result<()> {
        let vocabulary = VocabularyArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            run_id: self.run_id.clone(),
            tokens: self.vocabulary.clone(),
        };
        let labels = LabelsArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            run_id: self.run_id.clone(),
            labels: self.labels.clone(),
        };
        let classifier = ClassifierArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            run_id: self.run_id.clone(),
            trained_at: chrono::Utc::now().to_rfc3339(),
            params: self.params.clone(),
            forest: self.forest.clone(),
        };
        save_artifacts(dir, &vocabulary, &labels, &classifier)
    }

    /// Keep only each leaf's winning class in the exported forest.
    pub fn into_label_only(self) -> Self {
        Self { forest: self.forest.into_label_only(), ..self }
    }

    pub fn into_bundle(self, policy: UnknownSymptomPolicy) -> Result<ModelBundle> {
        ModelBundle::new(self.run_id, self.vocabulary, self.labels, Arc::new(self.forest), policy)
    }
}

pub struct TrainingProcedure {
    params: ForestParams,
    excluded_label: String,
    show_progress: bool,
}

impl TrainingProcedure {
    pub fn new(settings: &TrainingSettings) -> Self {
        Self {
            params: ForestParams::from(settings),
            excluded_label: settings.excluded_label.clone(),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Read the dataset, apply filters and append supplementary rows (the
    /// built-in ones plus any from `supplementary`).
    pub fn load_rows(&self, dataset: &Path, supplementary: Option<&Path>) -> Result<(Vec<TrainingRow>, DatasetReport, usize)> {
        let (mut rows, report) = open_dataset(dataset, &self.excluded_label)?;
        tracing::info!(
            path = %dataset.display(),
            read = report.rows_read,
            kept = rows.len(),
            dropped_missing = report.dropped_missing,
            dropped_excluded = report.dropped_excluded,
            "loaded training dataset"
        );
        let mut extra = supplementary_rows();
        if let Some(path) = supplementary {
            let (more, more_report) = open_dataset(path, &self.excluded_label)?;
            if more_report.dropped_missing + more_report.dropped_excluded > 0 {
                tracing::warn!(
                    path = %path.display(),
                    dropped = more_report.dropped_missing + more_report.dropped_excluded,
                    "supplementary rows dropped"
                );
            }
            extra.extend(more);
        }
        let n_extra = extra.len();
        rows.extend(extra);
        Ok((rows, report, n_extra))
    }

    pub fn fit(&self, rows: &[TrainingRow]) -> Result<TrainedModel> {
        if rows.is_empty() {
            return Err(Error::InvalidData("no training rows left after filtering".into()));
        }
        let vocabulary = SymptomVocabulary::fit(rows.iter().flat_map(|r| r.symptoms.iter().cloned()));
        let labels = DiseaseLabelSet::fit(rows.iter().map(|r| r.disease.clone()));

        let mut samples = Vec::with_capacity(rows.len());
        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            let mut vector = SymptomVector::zeros(vocabulary.len());
            for s in &row.symptoms {
                if let Some(i) = vocabulary.index_of(s) {
                    vector.set(i);
                }
            }
            let target = labels
                .index_of(&row.disease)
                .ok_or_else(|| Error::InvalidData(format!("label '{}' missing from fitted set", row.disease)))?;
            samples.push(vector);
            targets.push(target);
        }

        let progress = if self.show_progress {
            let pb = ProgressBar::new(self.params.n_estimators as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} trees ({percent}%)")
                    .map(|s| s.progress_chars("#>-"))
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb
        } else {
            ProgressBar::hidden()
        };
        let forest = RandomForest::fit_with_progress(&samples, &targets, labels.labels().to_vec(), &self.params, &progress)?;
        progress.finish_and_clear();

        let run_id = run_id(rows, &self.params);
        tracing::info!(
            run_id = %run_id,
            rows = rows.len(),
            symptoms = vocabulary.len(),
            diseases = labels.len(),
            trees = self.params.n_estimators,
            "fitted classifier"
        );
        Ok(TrainedModel { run_id, vocabulary, labels, params: self.params.clone(), forest })
    }

    /// Full run: load, fit, persist.
    pub fn run(&self, dataset: &Path, supplementary: Option<&Path>, out_dir: &Path) -> Result<TrainingSummary> {
        let (rows, report, n_extra) = self.load_rows(dataset, supplementary)?;
        let model = self.fit(&rows)?;
        model.save(out_dir)?;
        Ok(TrainingSummary {
            run_id: model.run_id,
            rows_read: report.rows_read,
            dropped_missing: report.dropped_missing,
            dropped_excluded: report.dropped_excluded,
            supplementary_rows: n_extra,
            training_rows: rows.len(),
            vocabulary_size: model.vocabulary.len(),
            label_count: model.labels.len(),
        })
    }
}

/// Digest of the training rows and hyper-parameters.
fn run_id(rows: &[TrainingRow], params: &ForestParams) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&ARTIFACT_FORMAT_VERSION.to_le_bytes());
    hasher.update(&(params.n_estimators as u64).to_le_bytes());
    hasher.update(&params.seed.to_le_bytes());
    hasher.update(&params.max_depth.map_or(0u64, |d| d as u64 + 1).to_le_bytes());
    hasher.update(&(params.min_samples_split as u64).to_le_bytes());
    for row in rows {
        for s in &row.symptoms {
            hasher.update(s.as_bytes());
            hasher.update(&[0x1f]);
        }
        hasher.update(row.disease.as_bytes());
        hasher.update(&[0x1e]);
    }
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..16].to_string()
}
