use std::collections::BTreeSet;
use std::fs;

use medidx_core::config::TrainingSettings;
use medidx_core::traits::DiseaseClassifier;
use medidx_core::types::{SymptomVector, UnknownSymptomPolicy, PROBABILITY_TOLERANCE};
use medidx_core::Error;
use medidx_model::artifacts::LABELS_FILE;
use medidx_model::training::read_dataset;
use medidx_model::{top_k, ModelBundle, SymptomEncoder, SymptomVocabulary, TrainingProcedure, TrainingRow};

const DATASET: &str = "\
Patient_ID,Symptom_1,Symptom_2,Symptom_3,Diagnosis
1,fever,cough,headache,Flu
2,fever,cough,sore_throat,Flu
3,fever,rash,headache,Measles
4,sneezing,cough,runny_nose,Common Cold
5,sneezing,sore_throat,runny_nose,Common Cold
6,chest_pain,cough,shortness_of_breath,Pneumonia
7,fever,chills,sweating,Malaria
8,fatigue,,headache,Flu
9,fatigue,headache,cough,healthy
10,fatigue,headache,cough,Healthy
";

fn settings(trees: usize) -> TrainingSettings {
    TrainingSettings { n_estimators: trees, ..TrainingSettings::default() }
}

/// Every clean row three times over, plus the built-in supplementary rows.
fn fixture_rows() -> Vec<TrainingRow> {
    let (rows, _) = read_dataset(DATASET.as_bytes(), "healthy").expect("dataset");
    let mut out = Vec::new();
    for _ in 0..3 {
        out.extend(rows.iter().cloned());
    }
    out.extend(medidx_model::training::supplementary_rows());
    out
}

fn bundle(policy: UnknownSymptomPolicy) -> ModelBundle {
    let model = TrainingProcedure::new(&settings(30)).fit(&fixture_rows()).expect("fit");
    model.into_bundle(policy).expect("bundle")
}

#[test]
fn dataset_filters_missing_and_healthy_rows() {
    let (rows, report) = read_dataset(DATASET.as_bytes(), "healthy").expect("dataset");
    assert_eq!(report.rows_read, 10);
    assert_eq!(report.dropped_missing, 1, "row 8 has a blank symptom");
    assert_eq!(report.dropped_excluded, 2, "'healthy' is matched case-insensitively");
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(|r| r.symptoms.len() == 3));
    assert_eq!(rows[2], TrainingRow::new(["fever", "rash", "headache"], "Measles"));
}

#[test]
fn dataset_without_label_column_is_rejected() {
    let err = read_dataset("Symptom_1,Symptom_2,Symptom_3\na,b,c\n".as_bytes(), "healthy").err().expect("no label");
    assert!(matches!(err, Error::InvalidData(_)), "got {err:?}");
}

#[test]
fn vocabulary_and_labels_are_sorted() {
    let b = bundle(UnknownSymptomPolicy::Ignore);
    let tokens = b.vocabulary().tokens();
    assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    assert!(tokens.iter().any(|t| t == "reduced_urine_output"), "supplementary symptoms included");
    let labels = b.labels().labels();
    assert!(labels.windows(2).all(|w| w[0] < w[1]));
    assert!(labels.iter().any(|l| l == "Kidney Failure"));
    assert!(!labels.iter().any(|l| l.eq_ignore_ascii_case("healthy")));
}

#[test]
fn encode_decode_round_trip() {
    let b = bundle(UnknownSymptomPolicy::Ignore);
    let enc = b.encoder();
    let tokens = enc.vocabulary().tokens();
    for window in tokens.windows(3) {
        let set: BTreeSet<String> = window.iter().cloned().collect();
        let v = enc.encode(&set).expect("encode");
        assert_eq!(enc.decode(&v).expect("decode"), set);
    }
    let all: BTreeSet<String> = tokens.iter().cloned().collect();
    assert_eq!(enc.decode(&enc.encode(&all).expect("encode")).expect("decode"), all);
}

#[test]
fn encode_ignores_order_and_duplicates() {
    let vocab = SymptomVocabulary::fit(["cough", "fever", "headache", "rash"]);
    let enc = SymptomEncoder::new(vocab, UnknownSymptomPolicy::Ignore);
    let a = enc.encode(["fever", "cough", "headache"]).expect("a");
    let b = enc.encode(["headache", "fever", "cough", "fever"]).expect("b");
    assert_eq!(a, b);
    assert_eq!(a.ones(), 3);
    assert_eq!(a.as_slice(), &[1, 1, 1, 0]);
    let empty: [&str; 0] = [];
    assert!(enc.encode(empty).expect("empty").is_all_zero());
}

#[test]
fn encode_is_case_sensitive() {
    let enc = SymptomEncoder::new(SymptomVocabulary::fit(["fever"]), UnknownSymptomPolicy::Ignore);
    let report = enc.encode_report(["Fever"]).expect("encode");
    assert!(report.vector.is_all_zero());
    assert_eq!(report.ignored, vec!["Fever".to_string()]);
}

#[test]
fn unknown_symptom_policies() {
    let vocab = SymptomVocabulary::fit(["cough", "fever"]);
    let lenient = SymptomEncoder::new(vocab.clone(), UnknownSymptomPolicy::Ignore);
    let report = lenient
        .encode_report(["fever", "unobtainium_itch", "unobtainium_itch"])
        .expect("ignore policy");
    assert_eq!(report.vector.ones(), 1);
    assert_eq!(report.ignored, vec!["unobtainium_itch".to_string()]);

    let strict = SymptomEncoder::new(vocab, UnknownSymptomPolicy::Reject);
    let err = strict.encode(["fever", "unobtainium_itch"]).err().expect("reject policy");
    assert!(matches!(err, Error::UnknownSymptom(ref s) if s == "unobtainium_itch"), "got {err:?}");
}

#[test]
fn distributions_sum_to_one() {
    let b = bundle(UnknownSymptomPolicy::Ignore);
    let dim = b.encoder().dim();
    let mut vectors = vec![SymptomVector::zeros(dim)];
    for i in 0..dim {
        let mut v = SymptomVector::zeros(dim);
        v.set(i);
        vectors.push(v.clone());
        v.set((i + 5) % dim);
        vectors.push(v);
    }
    for v in &vectors {
        let d = b.classifier().predict_distribution(v).expect("distribution");
        assert_eq!(d.len(), b.labels().len());
        assert!((d.total() - 1.0).abs() <= PROBABILITY_TOLERANCE, "sum {}", d.total());
        assert!(d.iter().all(|(_, p)| p >= 0.0));
    }
}

#[test]
fn fever_cough_headache_scenario() {
    let b = bundle(UnknownSymptomPolicy::Ignore);
    let v = b.encoder().encode(["fever", "cough", "headache"]).expect("encode");
    assert_eq!(v.ones(), 3);
    let d = b.classifier().predict_distribution(&v).expect("distribution");
    assert_eq!(d.len(), b.labels().len());
    let ranked = top_k(&d, 3).expect("rank");
    assert_eq!(ranked.len(), 3);
    let names: BTreeSet<&str> = ranked.iter().map(|r| r.disease.as_str()).collect();
    assert_eq!(names.len(), 3, "distinct diseases");
    assert!(ranked.as_slice().windows(2).all(|w| w[0].confidence >= w[1].confidence));
    assert_eq!(ranked.primary().disease, "Flu");
}

#[test]
fn distinctive_symptom_wins() {
    let b = bundle(UnknownSymptomPolicy::Ignore);
    let v = b.encoder().encode(["fever", "rash", "headache"]).expect("encode");
    assert_eq!(b.classifier().predict(&v).expect("predict"), "Measles");
}

#[test]
fn unknown_only_input_still_ranks() {
    let b = bundle(UnknownSymptomPolicy::Ignore);
    let v = b.encoder().encode(["unobtainium_itch"]).expect("encode");
    assert!(v.is_all_zero());
    let d = b.classifier().predict_distribution(&v).expect("distribution");
    assert!((d.total() - 1.0).abs() <= PROBABILITY_TOLERANCE);
    assert_eq!(top_k(&d, 3).expect("rank").len(), 3);
}

#[test]
fn training_is_deterministic_for_a_seed() {
    let proc = TrainingProcedure::new(&settings(10));
    let a = proc.fit(&fixture_rows()).expect("a");
    let b = proc.fit(&fixture_rows()).expect("b");
    assert_eq!(a.run_id, b.run_id);
    assert_eq!(a.forest, b.forest);

    let other = TrainingProcedure::new(&TrainingSettings { seed: 7, ..settings(10) });
    assert_ne!(other.fit(&fixture_rows()).expect("c").run_id, a.run_id, "seed is part of the run id");
}

#[test]
fn label_only_forest_cannot_rank() {
    let model = TrainingProcedure::new(&settings(15)).fit(&fixture_rows()).expect("fit").into_label_only();
    assert!(!model.forest.has_probabilities());
    let b = model.into_bundle(UnknownSymptomPolicy::Ignore).expect("bundle");
    let v = b.encoder().encode(["fever", "rash", "headache"]).expect("encode");
    let err = b.classifier().predict_distribution(&v).err().expect("no probabilities");
    assert!(matches!(err, Error::ModelIncompatibility(_)), "got {err:?}");
    assert_eq!(b.classifier().predict(&v).expect("vote"), "Measles");
}

#[test]
fn wrong_width_vector_is_incompatible() {
    let b = bundle(UnknownSymptomPolicy::Ignore);
    let err = b.classifier().predict_distribution(&SymptomVector::zeros(2)).err().expect("width");
    assert!(matches!(err, Error::ModelIncompatibility(_)), "got {err:?}");
}

#[test]
fn empty_training_set_is_rejected() {
    let err = TrainingProcedure::new(&settings(5)).fit(&[]).err().expect("empty");
    assert!(matches!(err, Error::InvalidData(_)), "got {err:?}");
}

#[test]
fn artifacts_round_trip_through_disk() {
    let tmp = tempfile::tempdir().expect("tmp");
    let dataset = tmp.path().join("dataset.csv");
    fs::write(&dataset, DATASET).expect("write dataset");
    let out = tmp.path().join("artifacts");

    let summary = TrainingProcedure::new(&settings(12)).run(&dataset, None, &out).expect("train");
    assert_eq!(summary.rows_read, 10);
    assert_eq!(summary.supplementary_rows, 3);
    assert_eq!(summary.training_rows, 10);

    let loaded = ModelBundle::load(&out, UnknownSymptomPolicy::Ignore).expect("load");
    assert_eq!(loaded.run_id(), summary.run_id);
    assert_eq!(loaded.vocabulary().len(), summary.vocabulary_size);
    assert_eq!(loaded.labels().len(), summary.label_count);
    let v = loaded.encoder().encode(["chest_pain", "shortness_of_breath", "sweating"]).expect("encode");
    assert!(loaded.classifier().predict_distribution(&v).is_ok());
}

#[test]
fn artifacts_from_different_runs_are_refused() {
    let tmp = tempfile::tempdir().expect("tmp");
    let dataset = tmp.path().join("dataset.csv");
    fs::write(&dataset, DATASET).expect("write dataset");
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    TrainingProcedure::new(&settings(5)).run(&dataset, None, &first).expect("first");
    TrainingProcedure::new(&TrainingSettings { seed: 1, ..settings(5) }).run(&dataset, None, &second).expect("second");

    fs::copy(second.join(LABELS_FILE), first.join(LABELS_FILE)).expect("swap labels");
    let err = ModelBundle::load(&first, UnknownSymptomPolicy::Ignore).err().expect("mismatch");
    assert!(matches!(err, Error::ArtifactVersionMismatch(_)), "got {err:?}");
}

#[test]
fn artifacts_with_unknown_format_are_refused() {
    let tmp = tempfile::tempdir().expect("tmp");
    let dataset = tmp.path().join("dataset.csv");
    fs::write(&dataset, DATASET).expect("write dataset");
    let out = tmp.path().join("artifacts");
    TrainingProcedure::new(&settings(5)).run(&dataset, None, &out).expect("train");

    let path = out.join(LABELS_FILE);
    let body = fs::read_to_string(&path).expect("read");
    fs::write(&path, body.replace("\"format_version\":1", "\"format_version\":99")).expect("rewrite");
    let err = ModelBundle::load(&out, UnknownSymptomPolicy::Ignore).err().expect("format");
    assert!(matches!(err, Error::ArtifactVersionMismatch(_)), "got {err:?}");
}

#[test]
fn missing_artifacts_are_not_found() {
    let tmp = tempfile::tempdir().expect("tmp");
    let err = ModelBundle::load(tmp.path(), UnknownSymptomPolicy::Ignore).err().expect("missing");
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}
