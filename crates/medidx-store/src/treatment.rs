use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use medidx_core::error::{Error, Result};
use medidx_core::types::TreatmentRecord;

/// Returned when no row matches; absence is not an error.
pub const FALLBACK_TREATMENT: &str = "No specific treatment found. Please consult a doctor.";

/// Case-insensitive disease → treatment table. The first row for a disease
/// wins; later duplicates are reported at load time and otherwise ignored.
#[derive(Debug, Clone, Default)]
pub struct TreatmentDirectory {
    by_disease: HashMap<String, String>,
    duplicates: Vec<String>,
}

impl TreatmentDirectory {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = TreatmentRecord>,
    {
        let mut dir = Self::default();
        for record in records {
            let key = fold_case(&record.disease);
            if dir.by_disease.contains_key(&key) {
                tracing::warn!(disease = %record.disease, "duplicate treatment row ignored; first match wins");
                dir.duplicates.push(record.disease);
                continue;
            }
            dir.by_disease.insert(key, record.treatment);
        }
        dir
    }

    /// Parse a CSV with `Disease` and `Treatment` headers (matched
    /// case-insensitively; other columns are ignored).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
        let headers = csv_reader
            .headers()
            .map_err(|e| Error::InvalidData(format!("treatment table header: {}", e)))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let disease_col = column("Disease").ok_or_else(|| Error::InvalidData("treatment table has no 'Disease' column".into()))?;
        let treatment_col =
            column("Treatment").ok_or_else(|| Error::InvalidData("treatment table has no 'Treatment' column".into()))?;

        let mut records = Vec::new();
        for (i, row) in csv_reader.records().enumerate() {
            let row = row.map_err(|e| Error::InvalidData(format!("treatment row {}: {}", i + 1, e)))?;
            let disease = row.get(disease_col).unwrap_or_default();
            if disease.trim().is_empty() {
                tracing::warn!(row = i + 1, "treatment row without a disease skipped");
                continue;
            }
            records.push(TreatmentRecord {
                disease: disease.to_string(),
                treatment: row.get(treatment_col).unwrap_or_default().to_string(),
            });
        }
        Ok(Self::from_records(records))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::NotFound(format!("treatment table {}: {}", path.display(), e)))?;
        let dir = Self::from_reader(std::io::BufReader::new(file))?;
        tracing::info!(path = %path.display(), diseases = dir.len(), duplicates = dir.duplicates.len(), "loaded treatment table");
        Ok(dir)
    }

    pub fn get(&self, disease: &str) -> Option<&str> {
        self.by_disease.get(&fold_case(disease)).map(String::as_str)
    }

    pub fn lookup(&self, disease: &str) -> &str {
        self.get(disease).unwrap_or(FALLBACK_TREATMENT)
    }

    /// Disease names of rows that were shadowed by an earlier row.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.by_disease.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_disease.is_empty()
    }
}

/// Caseless key: upper- then lower-casing maps e.g. `ß`, `SS` and `ss` to
/// the same string.
fn fold_case(s: &str) -> String {
    s.to_uppercase().to_lowercase()
}
