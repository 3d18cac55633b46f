//! Append-only diagnosis history.
//!
//! `CsvHistoryStore` keeps one row per diagnosis in a CSV file. The log is
//! created by linking a fully written header file into place without
//! clobbering, so exactly one writer (in any process) creates it and no
//! reader ever sees a log without its header. Rows then go out as one
//! `write_all` on a handle opened in append mode; writers in this process
//! are also serialized through a mutex.

use chrono::NaiveDateTime;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

use medidx_core::error::{Error, Result};
use medidx_core::traits::HistoryStore;
use medidx_core::types::{HistoryEntry, HISTORY_TIMESTAMP_FORMAT};

pub const HISTORY_HEADER: [&str; 8] = [
    "Timestamp",
    "Name",
    "Age",
    "Gender",
    "Phone",
    "Symptoms",
    "Predicted Disease",
    "Confidence",
];

/// Joins the submitted symptoms inside the `Symptoms` cell. A symptom that
/// itself contains the separator would not read back as one token, so the
/// pipeline refuses such requests.
pub const SYMPTOM_SEPARATOR: &str = ", ";

/// Rows written before the confidence column existed have 7 fields.
const LEGACY_FIELD_COUNT: usize = 7;

pub struct CsvHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."))
    }

    /// Create the log holding only the header, unless some writer (this one
    /// or another process) created it first.
    fn create_with_header(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let dir = self.parent_dir();
        fs::create_dir_all(dir).map_err(|e| self.persistence(e))?;
        let header = render(&[HISTORY_HEADER.map(str::to_string)]).map_err(|e| self.persistence(e))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.persistence(e))?;
        tmp.write_all(&header).map_err(|e| self.persistence(e))?;
        tmp.as_file().sync_data().map_err(|e| self.persistence(e))?;
        match tmp.persist_noclobber(&self.path) {
            Ok(_) => {
                tracing::info!(path = %self.path.display(), "created history log");
                Ok(())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(self.persistence(e.error)),
        }
    }

    /// Append-mode handle on an initialized log. A pre-existing empty file
    /// (e.g. created by hand) gets its header here.
    fn open_for_append(&self) -> Result<File> {
        self.create_with_header()?;
        let mut file = OpenOptions::new().append(true).open(&self.path).map_err(|e| self.persistence(e))?;
        if file.metadata().map_err(|e| self.persistence(e))?.len() == 0 {
            let header = render(&[HISTORY_HEADER.map(str::to_string)]).map_err(|e| self.persistence(e))?;
            file.write_all(&header).map_err(|e| self.persistence(e))?;
        }
        Ok(file)
    }

    fn persistence(&self, e: impl std::fmt::Display) -> Error {
        Error::Persistence(format!("{}: {}", self.path.display(), e))
    }

    /// Write header plus every row to `out`; returns the number of rows.
    pub fn export_csv<W: Write>(&self, out: W) -> Result<usize> {
        let entries = self.read_all()?;
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(HISTORY_HEADER).map_err(|e| self.persistence(e))?;
        for entry in &entries {
            writer.write_record(encode_row(entry)).map_err(|e| self.persistence(e))?;
        }
        writer.flush().map_err(|e| self.persistence(e))?;
        Ok(entries.len())
    }
}

impl HistoryStore for CsvHistoryStore {
    fn ensure_initialized(&self) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| self.persistence("writer lock poisoned"))?;
        self.open_for_append()?;
        Ok(())
    }

    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| self.persistence("writer lock poisoned"))?;
        let mut file = self.open_for_append()?;
        let buf = render(&[encode_row(entry)]).map_err(|e| self.persistence(e))?;
        file.write_all(&buf).map_err(|e| self.persistence(e))?;
        file.sync_data().map_err(|e| self.persistence(e))?;
        tracing::debug!(path = %self.path.display(), disease = %entry.predicted_disease, "appended history row");
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.persistence(e)),
        };
        let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(io::BufReader::new(file));
        let mut entries = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| self.persistence(e))?;
            let fields: Vec<&str> = record.iter().collect();
            entries.push(decode_row(&fields).map_err(|msg| Error::InvalidData(format!("history row {}: {}", i + 1, msg)))?);
        }
        Ok(entries)
    }
}

fn encode_row(entry: &HistoryEntry) -> [String; 8] {
    [
        entry.timestamp.format(HISTORY_TIMESTAMP_FORMAT).to_string(),
        entry.name.clone(),
        entry.age.clone(),
        entry.gender.clone(),
        entry.phone.clone(),
        entry.symptoms.join(SYMPTOM_SEPARATOR),
        entry.predicted_disease.clone(),
        entry.confidence.map(|c| c.to_string()).unwrap_or_default(),
    ]
}

fn decode_row(fields: &[&str]) -> std::result::Result<HistoryEntry, String> {
    if fields.len() < LEGACY_FIELD_COUNT {
        return Err(format!("expected at least {} fields, found {}", LEGACY_FIELD_COUNT, fields.len()));
    }
    let timestamp = NaiveDateTime::parse_from_str(fields[0], HISTORY_TIMESTAMP_FORMAT)
        .map_err(|e| format!("bad timestamp '{}': {}", fields[0], e))?;
    let confidence = match fields.get(7).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<f64>().map_err(|e| format!("bad confidence '{}': {}", raw, e))?),
        None => None,
    };
    Ok(HistoryEntry {
        timestamp,
        name: fields[1].to_string(),
        age: fields[2].to_string(),
        gender: fields[3].to_string(),
        phone: fields[4].to_string(),
        symptoms: fields[5]
            .split(SYMPTOM_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        predicted_disease: fields[6].to_string(),
        confidence,
    })
}

fn render(rows: &[[String; 8]]) -> std::result::Result<Vec<u8>, String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.write_record(row).map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

/// In-process store for embedding and tests.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn append(&self, entry: &HistoryEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::Persistence("history lock poisoned".into()))?
            .push(entry.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| Error::Persistence("history lock poisoned".into()))?
            .clone())
    }
}
