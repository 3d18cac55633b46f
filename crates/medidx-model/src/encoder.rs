use std::collections::BTreeSet;

use medidx_core::error::{Error, Result};
use medidx_core::types::{SymptomVector, UnknownSymptomPolicy};

use crate::vocab::SymptomVocabulary;

/// Vector plus the tokens the encoder dropped under `UnknownSymptomPolicy::Ignore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSymptoms {
    pub vector: SymptomVector,
    /// Unknown tokens, deduplicated, in first-seen order.
    pub ignored: Vec<String>,
}

/// Multi-hot encoder over a closed vocabulary. Matching is case-sensitive
/// and performs no normalization.
#[derive(Debug, Clone)]
pub struct SymptomEncoder {
    vocabulary: SymptomVocabulary,
    policy: UnknownSymptomPolicy,
}

impl SymptomEncoder {
    pub fn new(vocabulary: SymptomVocabulary, policy: UnknownSymptomPolicy) -> Self {
        Self { vocabulary, policy }
    }

    pub fn vocabulary(&self) -> &SymptomVocabulary {
        &self.vocabulary
    }

    pub fn dim(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn encode<I>(&self, symptoms: I) -> Result<SymptomVector>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Ok(self.encode_report(symptoms)?.vector)
    }

    pub fn encode_report<I>(&self, symptoms: I) -> Result<EncodedSymptoms>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut vector = SymptomVector::zeros(self.vocabulary.len());
        let mut ignored: Vec<String> = Vec::new();
        for symptom in symptoms {
            let symptom = symptom.as_ref();
            match self.vocabulary.index_of(symptom) {
                Some(index) => vector.set(index),
                None => match self.policy {
                    UnknownSymptomPolicy::Reject => return Err(Error::UnknownSymptom(symptom.to_string())),
                    UnknownSymptomPolicy::Ignore => {
                        if !ignored.iter().any(|s| s == symptom) {
                            ignored.push(symptom.to_string());
                        }
                    }
                },
            }
        }
        Ok(EncodedSymptoms { vector, ignored })
    }

    /// Tokens whose bit is set.
    pub fn decode(&self, vector: &SymptomVector) -> Result<BTreeSet<String>> {
        if vector.len() != self.vocabulary.len() {
            return Err(Error::InvalidData(format!(
                "vector has {} features, vocabulary has {}",
                vector.len(),
                self.vocabulary.len()
            )));
        }
        Ok(vector
            .active_indices()
            .filter_map(|i| self.vocabulary.token(i))
            .map(str::to_string)
            .collect())
    }
}
