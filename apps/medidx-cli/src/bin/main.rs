use std::env;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use medidx_core::config::{Config, Settings};
use medidx_core::traits::HistoryStore;
use medidx_core::types::{normalize_symptom, DiagnosisRequest, UserProfile, HISTORY_TIMESTAMP_FORMAT};
use medidx_engine::{DiagnosisOutcome, DiagnosisPipeline};
use medidx_model::{ModelBundle, TrainingProcedure};
use medidx_store::CsvHistoryStore;

const USAGE: &str = "\
Usage: medidx <command> [args...]

Commands:
  train     [--dataset <csv>] [--supplementary <csv>] [--out <dir>] [--label-only]
  diagnose  --name <n> --age <a> --gender <g> --phone <p> [--json] <symptom>...
  symptoms  list every symptom the current model recognizes
  history   [--export <csv>]";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

/// `--flag value` pairs and boolean switches, in any order; everything else
/// is positional.
struct Flags {
    values: Vec<(String, String)>,
    switches: Vec<String>,
    positional: Vec<String>,
}

impl Flags {
    fn parse(args: &[String], switches: &[&str]) -> anyhow::Result<Self> {
        let mut flags = Flags { values: Vec::new(), switches: Vec::new(), positional: Vec::new() };
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if switches.contains(&arg.as_str()) {
                flags.switches.push(arg.clone());
            } else if arg.starts_with("--") {
                let value = args.get(i + 1).with_context(|| format!("{} requires a value", arg))?;
                flags.values.push((arg.clone(), value.clone()));
                i += 1;
            } else {
                flags.positional.push(arg.clone());
            }
            i += 1;
        }
        Ok(flags)
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn required(&self, name: &str) -> anyhow::Result<String> {
        self.value(name).map(str::to_string).with_context(|| format!("missing {}", name))
    }

    fn switch(&self, name: &str) -> bool {
        self.switches.iter().any(|s| s == name)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();
    match cmd.as_str() {
        "train" => train(&config, &settings, &args),
        "diagnose" => diagnose(&config, &args),
        "symptoms" => symptoms(&config, &settings),
        "history" => history(&config, &settings, &args),
        _ => {
            eprintln!("Unknown command: {}\n\n{}", cmd, USAGE);
            std::process::exit(1);
        }
    }
}

fn train(config: &Config, settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let flags = Flags::parse(args, &["--label-only"])?;
    let dataset = flags
        .value("--dataset")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.path(&settings.data.training_dataset));
    let supplementary = flags
        .value("--supplementary")
        .map(PathBuf::from)
        .or_else(|| settings.data.supplementary_dataset.as_ref().map(|p| config.path(p)));
    let out_dir = flags.value("--out").map(PathBuf::from).unwrap_or_else(|| config.path(&settings.artifacts.dir));

    println!("Training from {}", dataset.display());
    let procedure = TrainingProcedure::new(&settings.training).with_progress(true);
    if flags.switch("--label-only") {
        let (rows, _, _) = procedure.load_rows(&dataset, supplementary.as_deref())?;
        let model = procedure.fit(&rows)?.into_label_only();
        model.save(&out_dir).with_context(|| format!("writing artifacts to {}", out_dir.display()))?;
        println!("✅ Label-only model {} written to {} ({} rows)", model.run_id, out_dir.display(), rows.len());
        return Ok(());
    }

    let summary = procedure
        .run(&dataset, supplementary.as_deref(), &out_dir)
        .with_context(|| format!("training from {}", dataset.display()))?;
    println!("✅ Model {} written to {}", summary.run_id, out_dir.display());
    println!(
        "📊 {} rows read, {} dropped (missing), {} dropped ({}), {} supplementary",
        summary.rows_read,
        summary.dropped_missing,
        summary.dropped_excluded,
        settings.training.excluded_label,
        summary.supplementary_rows
    );
    println!(
        "📊 {} training rows, {} symptoms, {} diseases",
        summary.training_rows, summary.vocabulary_size, summary.label_count
    );
    Ok(())
}

fn diagnose(config: &Config, args: &[String]) -> anyhow::Result<()> {
    let flags = Flags::parse(args, &["--json"])?;
    let profile = UserProfile {
        name: flags.required("--name")?,
        age: flags.required("--age")?,
        gender: flags.required("--gender")?,
        phone: flags.required("--phone")?,
    };
    let symptoms: Vec<String> = flags.positional.iter().map(|s| normalize_symptom(s)).collect();
    if symptoms.is_empty() {
        bail!("at least one symptom is required\n\n{}", USAGE);
    }

    let pipeline = DiagnosisPipeline::open(config).context("starting diagnosis pipeline")?;
    let outcome = pipeline.diagnose(&DiagnosisRequest::new(profile, symptoms))?;
    if flags.switch("--json") {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &DiagnosisOutcome) {
    let primary = outcome.primary();
    if outcome.alternatives_available() {
        println!("🩺 Predicted disease: {} ({:.1}%)", primary.disease, primary.confidence * 100.0);
        if !outcome.prediction.alternatives().is_empty() {
            println!("\nOther possibilities:");
            for (i, alt) in outcome.prediction.alternatives().iter().enumerate() {
                println!("  {}. {} ({:.1}%)", i + 2, alt.disease, alt.confidence * 100.0);
            }
        }
    } else {
        println!("🩺 Predicted disease: {}", primary.disease);
        println!("   (confidence and alternatives unavailable for this model)");
    }
    println!("\n💊 Treatment: {}", outcome.treatment);
    for warning in &outcome.warnings {
        println!("⚠️  {}", warning);
    }
}

fn symptoms(config: &Config, settings: &Settings) -> anyhow::Result<()> {
    let dir = config.path(&settings.artifacts.dir);
    let bundle = ModelBundle::load(&dir, settings.engine.unknown_symptoms)
        .with_context(|| format!("loading model from {}", dir.display()))?;
    for token in bundle.vocabulary().tokens() {
        println!("{}", token);
    }
    Ok(())
}

fn history(config: &Config, settings: &Settings, args: &[String]) -> anyhow::Result<()> {
    let flags = Flags::parse(args, &[])?;
    let store = CsvHistoryStore::new(config.path(&settings.data.history_log));
    if let Some(path) = flags.value("--export") {
        let file = File::create(path).with_context(|| format!("creating {}", path))?;
        let n = store.export_csv(file)?;
        println!("✅ Exported {} rows to {}", n, path);
        return Ok(());
    }

    let entries = store.read_all()?;
    if entries.is_empty() {
        println!("No diagnoses recorded yet ({}).", store.path().display());
        return Ok(());
    }
    for e in &entries {
        let confidence = e.confidence.map(|c| format!("{:.1}%", c * 100.0)).unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<16} {:>3} {:<8} {:<14} {:<24} [{}]  {}",
            e.timestamp.format(HISTORY_TIMESTAMP_FORMAT),
            e.name,
            e.age,
            e.gender,
            e.phone,
            e.predicted_disease,
            confidence,
            e.symptoms.join(", ")
        );
    }
    println!("\n📊 {} diagnoses", entries.len());
    Ok(())
}
