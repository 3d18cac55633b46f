use std::cmp::Ordering;

use medidx_core::error::{Error, Result};
use medidx_core::types::{PredictionResult, ProbabilityDistribution, RankedDisease};

/// Top-k selection with a fixed tie-break: equal probabilities are ordered
/// by disease label, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingPolicy {
    k: usize,
}

impl RankingPolicy {
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(Error::Validation("k must be at least 1".into()));
        }
        Ok(Self { k })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn rank(&self, distribution: &ProbabilityDistribution) -> Result<PredictionResult> {
        top_k(distribution, self.k)
    }
}

/// The `min(k, |distribution|)` most probable diseases.
pub fn top_k(distribution: &ProbabilityDistribution, k: usize) -> Result<PredictionResult> {
    if k == 0 {
        return Err(Error::Validation("k must be at least 1".into()));
    }
    let mut ranked: Vec<RankedDisease> = distribution
        .iter()
        .map(|(disease, confidence)| RankedDisease { disease: disease.to_string(), confidence })
        .collect();
    ranked.sort_by(compare);
    ranked.truncate(k);
    PredictionResult::new(ranked)
}

fn compare(a: &RankedDisease, b: &RankedDisease) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.disease.cmp(&b.disease))
}
