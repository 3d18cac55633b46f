//! Domain types shared by the encoder, classifier, stores and pipeline.

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};

pub type DiseaseLabel = String;

/// Distributions must sum to one within this tolerance.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Format of the `Timestamp` column in the history log.
pub const HISTORY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What the encoder does with a token outside the trained vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownSymptomPolicy {
    /// Drop the token; a request made only of unknown tokens encodes to zeros.
    #[default]
    Ignore,
    /// Fail the request with `Error::UnknownSymptom`.
    Reject,
}

/// Binary feature vector, one slot per vocabulary token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymptomVector {
    bits: Vec<u8>,
}

impl SymptomVector {
    pub fn zeros(len: usize) -> Self {
        Self { bits: vec![0; len] }
    }

    pub fn from_bits(bits: Vec<u8>) -> Result<Self> {
        if let Some(pos) = bits.iter().position(|b| *b > 1) {
            return Err(Error::InvalidData(format!("feature {} is {}, expected 0 or 1", pos, bits[pos])));
        }
        Ok(Self { bits })
    }

    /// Marks feature `index` as present. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if let Some(bit) = self.bits.get_mut(index) {
            *bit = 1;
        }
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|b| *b == 1)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn ones(&self) -> usize {
        self.bits.iter().filter(|b| **b == 1).count()
    }

    pub fn is_all_zero(&self) -> bool {
        self.ones() == 0
    }

    pub fn active_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().filter(|(_, b)| **b == 1).map(|(i, _)| i)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bits
    }
}

/// Probability per disease label, kept in the classifier's label order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityDistribution {
    entries: Vec<(DiseaseLabel, f64)>,
}

impl ProbabilityDistribution {
    pub fn new(entries: Vec<(DiseaseLabel, f64)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::InvalidData("distribution has no labels".into()));
        }
        let mut seen = HashSet::new();
        for (label, p) in &entries {
            if !seen.insert(label.as_str()) {
                return Err(Error::InvalidData(format!("label '{}' appears twice in distribution", label)));
            }
            if !p.is_finite() || *p < 0.0 {
                return Err(Error::InvalidData(format!("probability for '{}' is {}", label, p)));
            }
        }
        let total: f64 = entries.iter().map(|(_, p)| p).sum();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(Error::InvalidData(format!("probabilities sum to {}", total)));
        }
        Ok(Self { entries })
    }

    /// Single-outcome distribution used when ranked probabilities are unavailable.
    pub fn certain(label: DiseaseLabel) -> Self {
        Self { entries: vec![(label, 1.0)] }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(l, p)| (l.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, p)| p).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDisease {
    pub disease: DiseaseLabel,
    pub confidence: f64,
}

/// Diseases ordered by confidence, highest first. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    ranked: Vec<RankedDisease>,
}

impl PredictionResult {
    pub fn new(ranked: Vec<RankedDisease>) -> Result<Self> {
        if ranked.is_empty() {
            return Err(Error::InvalidData("prediction has no entries".into()));
        }
        if ranked.windows(2).any(|w| w[1].confidence > w[0].confidence) {
            return Err(Error::InvalidData("prediction confidences are not non-increasing".into()));
        }
        Ok(Self { ranked })
    }

    pub fn primary(&self) -> &RankedDisease {
        &self.ranked[0]
    }

    /// Ranks 2..k; informational only.
    pub fn alternatives(&self) -> &[RankedDisease] {
        &self.ranked[1..]
    }

    pub fn as_slice(&self) -> &[RankedDisease] {
        &self.ranked
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedDisease> + '_ {
        self.ranked.iter()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentRecord {
    pub disease: String,
    pub treatment: String,
}

/// Identity fields supplied by the caller. Opaque to the engine apart from
/// the non-empty check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub age: String,
    pub gender: String,
    pub phone: String,
}

impl UserProfile {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("age", &self.age),
            ("gender", &self.gender),
            ("phone", &self.phone),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("user field '{}' is empty", field)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisRequest {
    pub profile: UserProfile,
    pub symptoms: Vec<String>,
}

impl DiagnosisRequest {
    pub fn new<I, S>(profile: UserProfile, symptoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { profile, symptoms: symptoms.into_iter().map(Into::into).collect() }
    }
}

/// One row of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: NaiveDateTime,
    pub name: String,
    pub age: String,
    pub gender: String,
    pub phone: String,
    pub symptoms: Vec<String>,
    pub predicted_disease: DiseaseLabel,
    pub confidence: Option<f64>,
}

impl HistoryEntry {
    /// Stamped with the local wall clock, truncated to whole seconds to match
    /// the persisted format.
    pub fn now(profile: &UserProfile, symptoms: Vec<String>, predicted_disease: DiseaseLabel, confidence: Option<f64>) -> Self {
        let now = Local::now().naive_local();
        Self {
            timestamp: now.with_nanosecond(0).unwrap_or(now),
            name: profile.name.clone(),
            age: profile.age.clone(),
            gender: profile.gender.clone(),
            phone: profile.phone.clone(),
            symptoms,
            predicted_disease,
            confidence,
        }
    }
}

/// Canonical token form: trimmed, lowercase, runs of whitespace or `-`
/// collapsed to `_`. The encoder itself never normalizes; callers opt in.
pub fn normalize_symptom(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.extend(ch.to_lowercase());
    }
    out
}
