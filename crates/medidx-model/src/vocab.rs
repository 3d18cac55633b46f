//! Ordered token sets fixed at training time.
//!
//! Both sets are kept in ascending lexical order: index `i` of a feature
//! vector means `SymptomVocabulary::tokens()[i]`, and class `i` of the
//! classifier means `DiseaseLabelSet::labels()[i]`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use medidx_core::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
struct SortedTokens(Vec<String>);

impl SortedTokens {
    fn fit<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = items.into_iter().map(Into::into).collect();
        Self(set.into_iter().collect())
    }

    fn position(&self, item: &str) -> Option<usize> {
        self.0.binary_search_by(|t| t.as_str().cmp(item)).ok()
    }
}

impl TryFrom<Vec<String>> for SortedTokens {
    type Error = Error;

    fn try_from(items: Vec<String>) -> Result<Self> {
        if let Some(w) = items.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::InvalidData(format!(
                "tokens must be unique and ascending, found '{}' before '{}'",
                w[0], w[1]
            )));
        }
        Ok(Self(items))
    }
}

impl From<SortedTokens> for Vec<String> {
    fn from(tokens: SortedTokens) -> Self {
        tokens.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymptomVocabulary {
    tokens: SortedTokens,
}

impl SymptomVocabulary {
    pub fn fit<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { tokens: SortedTokens::fit(tokens) }
    }

    /// Rebuild from a persisted list; the list must already be sorted and unique.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        Ok(Self { tokens: SortedTokens::try_from(tokens)? })
    }

    pub fn index_of(&self, token: &str) -> Option<usize> {
        self.tokens.position(token)
    }

    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.0.get(index).map(String::as_str)
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens.0
    }

    pub fn len(&self) -> usize {
        self.tokens.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiseaseLabelSet {
    labels: SortedTokens,
}

impl DiseaseLabelSet {
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { labels: SortedTokens::fit(labels) }
    }

    pub fn from_labels(labels: Vec<String>) -> Result<Self> {
        Ok(Self { labels: SortedTokens::try_from(labels)? })
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.position(label)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels.0
    }

    pub fn len(&self) -> usize {
        self.labels.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.0.is_empty()
    }
}
