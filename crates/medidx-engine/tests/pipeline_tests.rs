use std::fs;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use medidx_core::config::{Config, TrainingSettings};
use medidx_core::traits::HistoryStore;
use medidx_core::types::{DiagnosisRequest, HistoryEntry, TreatmentRecord, UnknownSymptomPolicy, UserProfile};
use medidx_core::{Error, Result};
use medidx_engine::{DiagnosisPipeline, PipelineWarning, PredictionMode};
use medidx_model::training::supplementary_rows;
use medidx_model::{ModelBundle, TrainedModel, TrainingProcedure, TrainingRow};
use medidx_store::{CsvHistoryStore, MemoryHistoryStore, TreatmentDirectory, FALLBACK_TREATMENT};

const TREATMENTS: &str = "\
Disease,Treatment
Flu,Rest and fluids
Common Cold,Steam inhalation and rest
Measles,Isolation and vitamin A
";

fn rows() -> Vec<TrainingRow> {
    let base = [
        TrainingRow::new(["fever", "cough", "headache"], "Flu"),
        TrainingRow::new(["fever", "cough", "sore_throat"], "Flu"),
        TrainingRow::new(["fever", "rash", "headache"], "Measles"),
        TrainingRow::new(["sneezing", "cough", "runny_nose"], "Common Cold"),
        TrainingRow::new(["sneezing", "sore_throat", "runny_nose"], "Common Cold"),
        TrainingRow::new(["chest_pain", "cough", "shortness_of_breath"], "Pneumonia"),
        TrainingRow::new(["fever", "chills", "sweating"], "Malaria"),
    ];
    let mut out = Vec::new();
    for _ in 0..3 {
        out.extend(base.iter().cloned());
    }
    out.extend(supplementary_rows());
    out
}

fn trained() -> TrainedModel {
    let settings = TrainingSettings { n_estimators: 30, ..TrainingSettings::default() };
    TrainingProcedure::new(&settings).fit(&rows()).expect("fit")
}

fn treatments() -> Arc<TreatmentDirectory> {
    Arc::new(TreatmentDirectory::from_reader(TREATMENTS.as_bytes()).expect("treatments"))
}

fn pipeline_with(bundle: ModelBundle, history: Arc<dyn HistoryStore>) -> DiagnosisPipeline {
    DiagnosisPipeline::new(Arc::new(bundle), treatments(), history, 3).expect("pipeline")
}

fn profile() -> UserProfile {
    UserProfile {
        name: "Ada".into(),
        age: "34".into(),
        gender: "Female".into(),
        phone: "555-0100".into(),
    }
}

fn request(symptoms: &[&str]) -> DiagnosisRequest {
    DiagnosisRequest::new(profile(), symptoms.iter().copied())
}

struct FailingHistoryStore;

impl HistoryStore for FailingHistoryStore {
    fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn append(&self, _entry: &HistoryEntry) -> Result<()> {
        Err(Error::Persistence("disk full".into()))
    }

    fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        Ok(Vec::new())
    }
}

#[test]
fn diagnose_ranks_top_three_and_logs_once() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    let outcome = pipeline.diagnose(&request(&["fever", "cough", "headache"])).expect("diagnose");
    assert_eq!(outcome.mode, PredictionMode::Ranked);
    assert!(outcome.alternatives_available());
    assert_eq!(outcome.prediction.len(), 3);
    assert_eq!(outcome.primary().disease, "Flu");
    assert_eq!(outcome.treatment, "Rest and fluids");
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);

    let confidences: Vec<f64> = outcome.prediction.iter().map(|r| r.confidence).collect();
    assert!(confidences.windows(2).all(|w| w[0] >= w[1]));

    let logged = history.read_all().expect("history");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].name, "Ada");
    assert_eq!(logged[0].symptoms, vec!["fever", "cough", "headache"]);
    assert_eq!(logged[0].predicted_disease, "Flu");
    assert_eq!(logged[0].confidence, Some(outcome.primary().confidence));
}

#[test]
fn disease_without_treatment_row_gets_fallback() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history);

    let outcome = pipeline.diagnose(&request(&["abdominal_pain", "nausea", "vomiting"])).expect("diagnose");
    assert_eq!(outcome.primary().disease, "Gastritis");
    assert!(pipeline.treatments().get("Gastritis").is_none());
    assert_eq!(outcome.treatment, FALLBACK_TREATMENT);
}

#[test]
fn symptom_containing_the_log_separator_is_rejected() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    let err = pipeline.diagnose(&request(&["fever", "pain, chest"])).err().expect("rejected");
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert!(history.is_empty());
}

#[test]
fn empty_symptom_list_is_rejected_before_anything_is_logged() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    for symptoms in [&[][..], &["", "   "][..]] {
        let err = pipeline.diagnose(&request(symptoms)).err().expect("rejected");
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    }
    assert!(history.is_empty());
}

#[test]
fn blank_profile_field_is_rejected() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    let mut req = request(&["fever"]);
    req.profile.phone = " ".into();
    let err = pipeline.diagnose(&req).err().expect("rejected");
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert!(history.is_empty());
}

#[test]
fn duplicate_symptoms_are_logged_once() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    let once = pipeline.diagnose(&request(&["fever", "cough"])).expect("diagnose");
    let twice = pipeline.diagnose(&request(&["fever", "cough", "fever", ""])).expect("diagnose");
    assert_eq!(once.prediction, twice.prediction);
    let logged = history.read_all().expect("history");
    assert_eq!(logged[1].symptoms, vec!["fever", "cough"]);
}

#[test]
fn unrecognized_symptoms_still_produce_a_diagnosis() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    let outcome = pipeline.diagnose(&request(&["purple_spots", "glowing"])).expect("diagnose");
    assert_eq!(outcome.prediction.len(), 3);
    assert!(outcome
        .warnings
        .contains(&PipelineWarning::UnknownSymptomsIgnored(vec!["purple_spots".into(), "glowing".into()])));
    assert!(outcome.warnings.contains(&PipelineWarning::NoRecognizedSymptoms));
    assert_eq!(history.len(), 1);

    let mixed = pipeline.diagnose(&request(&["fever", "purple_spots"])).expect("diagnose");
    assert_eq!(mixed.warnings, vec![PipelineWarning::UnknownSymptomsIgnored(vec!["purple_spots".into()])]);
}

#[test]
fn reject_policy_fails_on_unknown_symptom() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Reject).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    let err = pipeline.diagnose(&request(&["fever", "purple_spots"])).err().expect("rejected");
    assert!(matches!(err, Error::UnknownSymptom(_)), "got {err:?}");
    assert!(history.is_empty());
}

#[test]
fn label_only_model_runs_degraded() {
    let history = Arc::new(MemoryHistoryStore::new());
    let bundle = trained().into_label_only().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, history.clone());

    let outcome = pipeline.diagnose(&request(&["fever", "cough", "headache"])).expect("diagnose");
    assert_eq!(outcome.mode, PredictionMode::Degraded);
    assert!(!outcome.alternatives_available());
    assert_eq!(outcome.prediction.len(), 1);
    assert_eq!(outcome.primary().disease, "Flu");
    assert_eq!(outcome.primary().confidence, 1.0);

    let logged = history.read_all().expect("history");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].confidence, None);
}

#[test]
fn persistence_failure_does_not_lose_the_diagnosis() {
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = pipeline_with(bundle, Arc::new(FailingHistoryStore));

    let outcome = pipeline.diagnose(&request(&["fever", "cough", "headache"])).expect("diagnose");
    assert_eq!(outcome.primary().disease, "Flu");
    assert!(!outcome.was_logged());
    assert!(matches!(outcome.warnings.as_slice(), [PipelineWarning::PersistenceFailed(msg)] if msg.contains("disk full")));
}

#[test]
fn zero_top_k_is_rejected() {
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
    let err = DiagnosisPipeline::new(Arc::new(bundle), treatments(), history, 0).err().expect("rejected");
    assert!(matches!(err, Error::Validation(_) | Error::InvalidConfig(_)), "got {err:?}");
}

#[test]
fn concurrent_diagnoses_each_log_one_row() {
    let tmp = TempDir::new().unwrap();
    let store = CsvHistoryStore::new(tmp.path().join("history.csv"));
    store.ensure_initialized().expect("init");
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let pipeline = Arc::new(pipeline_with(bundle, Arc::new(store)));

    let threads = 6;
    let per_thread = 10;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let mut req = request(&["sneezing", "runny_nose"]);
                    req.profile.name = format!("user-{t}-{i}");
                    let outcome = pipeline.diagnose(&req).expect("diagnose");
                    assert!(outcome.was_logged());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let rows = pipeline.history().read_all().expect("history");
    assert_eq!(rows.len(), threads * per_thread);
    assert!(rows.iter().all(|r| r.predicted_disease == "Common Cold"));
}

#[test]
fn open_wires_everything_from_config() {
    let tmp = TempDir::new().unwrap();
    trained().save(&tmp.path().join("artifacts")).expect("save");
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(tmp.path().join("data").join("treatment_data.csv"), TREATMENTS).unwrap();
    fs::write(tmp.path().join("config.toml"), "[engine]\ntop_k = 2\n").unwrap();

    let config = Config::load_from(tmp.path(), "test").expect("config");
    let pipeline = DiagnosisPipeline::open(&config).expect("open");
    assert_eq!(pipeline.top_k(), 2);
    assert!(tmp.path().join("data").join("history.csv").exists());

    let outcome = pipeline.diagnose(&request(&["fever", "rash"])).expect("diagnose");
    assert_eq!(outcome.prediction.len(), 2);
    assert_eq!(outcome.primary().disease, "Measles");
    assert_eq!(outcome.treatment, "Isolation and vitamin A");
    assert_eq!(pipeline.history().read_all().expect("history").len(), 1);
}

#[test]
fn open_with_unwritable_history_still_diagnoses() {
    let tmp = TempDir::new().unwrap();
    trained().save(&tmp.path().join("artifacts")).expect("save");
    fs::create_dir_all(tmp.path().join("data")).unwrap();
    fs::write(tmp.path().join("data").join("treatment_data.csv"), TREATMENTS).unwrap();
    // a regular file where the log's directory should be
    fs::write(tmp.path().join("blocked"), "").unwrap();
    fs::write(tmp.path().join("config.toml"), "[data]\nhistory_log = \"blocked/history.csv\"\n").unwrap();

    let config = Config::load_from(tmp.path(), "test").expect("config");
    let pipeline = DiagnosisPipeline::open(&config).expect("open despite unusable history");
    let outcome = pipeline.diagnose(&request(&["fever", "cough", "headache"])).expect("diagnose");
    assert_eq!(outcome.primary().disease, "Flu");
    assert!(!outcome.was_logged());
    assert!(matches!(outcome.warnings.as_slice(), [PipelineWarning::PersistenceFailed(_)]), "{:?}", outcome.warnings);
}

#[test]
fn open_without_artifacts_fails() {
    let tmp = TempDir::new().unwrap();
    let config = Config::load_from(tmp.path(), "test").expect("config");
    let err = DiagnosisPipeline::open(&config).err().expect("no artifacts");
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

#[test]
fn treatment_records_can_be_supplied_directly() {
    let dir = TreatmentDirectory::from_records(vec![TreatmentRecord {
        disease: "Malaria".into(),
        treatment: "Artemisinin".into(),
    }]);
    let bundle = trained().into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
    let pipeline = DiagnosisPipeline::new(Arc::new(bundle), Arc::new(dir), history, 3).expect("pipeline");
    let outcome = pipeline.diagnose(&request(&["fever", "chills", "sweating"])).expect("diagnose");
    assert_eq!(outcome.primary().disease, "Malaria");
    assert_eq!(outcome.treatment, "Artemisinin");
}
