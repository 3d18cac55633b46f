//! Random forest over binary symptom features.
//!
//! Each tree is grown on a bootstrap sample with Gini splits, considering
//! `floor(sqrt(n_features))` non-constant features per node. Leaves keep the
//! class frequencies of the samples that reached them; the forest's
//! probability output is the mean of those frequencies across trees.
//!
//! A forest may also be exported label-only (`into_label_only`). Such a model
//! still answers `predict` by majority vote but cannot produce a distribution.

use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use medidx_core::config::TrainingSettings;
use medidx_core::error::{Error, Result};
use medidx_core::traits::DiseaseClassifier;
use medidx_core::types::{DiseaseLabel, ProbabilityDistribution, SymptomVector};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub seed: u64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self::from(&TrainingSettings::default())
    }
}

impl From<&TrainingSettings> for ForestParams {
    fn from(settings: &TrainingSettings) -> Self {
        Self {
            n_estimators: settings.n_estimators,
            seed: settings.seed,
            max_depth: settings.max_depth,
            min_samples_split: settings.min_samples_split,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Split {
        feature: usize,
        absent: usize,
        present: usize,
    },
    Leaf {
        class: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proba: Option<Vec<f64>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf(&self, vector: &SymptomVector) -> (usize, Option<&[f64]>) {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Split { feature, absent, present } => {
                    index = if vector.get(*feature) { *present } else { *absent };
                }
                Node::Leaf { class, proba } => return (*class, proba.as_deref()),
            }
        }
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidData("tree has no nodes".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split { feature, absent, present } => {
                    if *feature >= n_features {
                        return Err(Error::InvalidData(format!("node {} splits on feature {} of {}", i, feature, n_features)));
                    }
                    // children always follow their parent, which rules out cycles
                    for child in [absent, present] {
                        if *child <= i || *child >= self.nodes.len() {
                            return Err(Error::InvalidData(format!("node {} has invalid child {}", i, child)));
                        }
                    }
                }
                Node::Leaf { class, proba } => {
                    if *class >= n_classes {
                        return Err(Error::InvalidData(format!("leaf {} predicts class {} of {}", i, class, n_classes)));
                    }
                    if proba.as_ref().is_some_and(|p| p.len() != n_classes) {
                        return Err(Error::InvalidData(format!("leaf {} has wrong probability width", i)));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    labels: Vec<DiseaseLabel>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit on `samples` with class indices `targets` into `labels`.
    pub fn fit(samples: &[SymptomVector], targets: &[usize], labels: Vec<DiseaseLabel>, params: &ForestParams) -> Result<Self> {
        Self::fit_with_progress(samples, targets, labels, params, &ProgressBar::hidden())
    }

    pub fn fit_with_progress(
        samples: &[SymptomVector],
        targets: &[usize],
        labels: Vec<DiseaseLabel>,
        params: &ForestParams,
        progress: &ProgressBar,
    ) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::InvalidData("no training samples".into()));
        }
        if samples.len() != targets.len() {
            return Err(Error::InvalidData(format!("{} samples but {} targets", samples.len(), targets.len())));
        }
        if labels.is_empty() {
            return Err(Error::InvalidData("no class labels".into()));
        }
        if params.n_estimators == 0 {
            return Err(Error::InvalidData("n_estimators must be at least 1".into()));
        }
        let n_features = samples[0].len();
        if let Some(bad) = samples.iter().position(|s| s.len() != n_features) {
            return Err(Error::InvalidData(format!("sample {} has {} features, expected {}", bad, samples[bad].len(), n_features)));
        }
        if let Some(bad) = targets.iter().position(|t| *t >= labels.len()) {
            return Err(Error::InvalidData(format!("target {} is out of range", bad)));
        }

        let mut master = StdRng::seed_from_u64(params.seed);
        let max_features = ((n_features as f64).sqrt().floor() as usize).max(1);
        let n = samples.len();
        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            let mut rng = StdRng::seed_from_u64(master.gen::<u64>());
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let mut builder = TreeBuilder {
                samples,
                targets,
                n_classes: labels.len(),
                n_features,
                max_features,
                params,
                nodes: Vec::new(),
            };
            builder.grow(rows, 0, &mut rng);
            trees.push(DecisionTree { nodes: builder.nodes });
            progress.inc(1);
        }
        Ok(Self { labels, n_features, trees })
    }

    /// Drop leaf probabilities, keeping only each leaf's winning class.
    pub fn into_label_only(mut self) -> Self {
        for tree in &mut self.trees {
            for node in &mut tree.nodes {
                if let Node::Leaf { proba, .. } = node {
                    *proba = None;
                }
            }
        }
        self
    }

    pub fn has_probabilities(&self) -> bool {
        self.trees.iter().flat_map(|t| t.nodes.iter()).all(|n| match n {
            Node::Leaf { proba, .. } => proba.is_some(),
            Node::Split { .. } => true,
        })
    }

    /// Structural check for parameters loaded from disk.
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(Error::InvalidData("forest has no trees".into()));
        }
        if self.labels.is_empty() {
            return Err(Error::InvalidData("forest has no labels".into()));
        }
        for tree in &self.trees {
            tree.validate(self.n_features, self.labels.len())?;
        }
        Ok(())
    }

    fn check_width(&self, vector: &SymptomVector) -> Result<()> {
        if vector.len() != self.n_features {
            return Err(Error::ModelIncompatibility(format!(
                "vector has {} features, model expects {}",
                vector.len(),
                self.n_features
            )));
        }
        Ok(())
    }

    fn mean_proba(&self, vector: &SymptomVector) -> Result<Vec<f64>> {
        let mut acc = vec![0.0; self.labels.len()];
        for tree in &self.trees {
            let (_, proba) = tree.leaf(vector);
            let proba = proba.ok_or_else(|| {
                Error::ModelIncompatibility("classifier was exported without leaf probabilities".into())
            })?;
            for (a, p) in acc.iter_mut().zip(proba) {
                *a += p;
            }
        }
        let n = self.trees.len() as f64;
        for a in &mut acc {
            *a /= n;
        }
        Ok(acc)
    }
}

impl DiseaseClassifier for RandomForest {
    fn labels(&self) -> &[DiseaseLabel] {
        &self.labels
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_distribution(&self, vector: &SymptomVector) -> Result<ProbabilityDistribution> {
        self.check_width(vector)?;
        let proba = self.mean_proba(vector)?;
        ProbabilityDistribution::new(self.labels.iter().cloned().zip(proba).collect())
    }

    fn predict(&self, vector: &SymptomVector) -> Result<DiseaseLabel> {
        self.check_width(vector)?;
        let scores = match self.mean_proba(vector) {
            Ok(proba) => proba,
            Err(Error::ModelIncompatibility(_)) => {
                let mut votes = vec![0.0; self.labels.len()];
                for tree in &self.trees {
                    votes[tree.leaf(vector).0] += 1.0;
                }
                votes
            }
            Err(e) => return Err(e),
        };
        Ok(self.labels[argmax(&scores)].clone())
    }
}

/// First index of the maximum; ties go to the lowest index.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts.iter().map(|c| (*c as f64 / total).powi(2)).sum::<f64>()
}

struct TreeBuilder<'a> {
    samples: &'a [SymptomVector],
    targets: &'a [usize],
    n_classes: usize,
    n_features: usize,
    max_features: usize,
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &r in rows {
            counts[self.targets[r]] += 1;
        }
        counts
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let counts = self.counts(&rows);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { class: 0, proba: None });

        let pure = counts.iter().filter(|c| **c > 0).count() <= 1;
        let too_small = rows.len() < self.params.min_samples_split;
        let too_deep = self.params.max_depth.is_some_and(|d| depth >= d);
        if !(pure || too_small || too_deep) {
            if let Some(feature) = self.best_split(&rows, &counts, rng) {
                let (present_rows, absent_rows): (Vec<usize>, Vec<usize>) =
                    rows.into_iter().partition(|&r| self.samples[r].get(feature));
                let absent = self.grow(absent_rows, depth + 1, rng);
                let present = self.grow(present_rows, depth + 1, rng);
                self.nodes[id] = Node::Split { feature, absent, present };
                return id;
            }
        }

        let total = rows.len() as f64;
        let proba: Vec<f64> = counts.iter().map(|c| *c as f64 / total).collect();
        let class_scores: Vec<f64> = counts.iter().map(|c| *c as f64).collect();
        self.nodes[id] = Node::Leaf { class: argmax(&class_scores), proba: Some(proba) };
        id
    }

    /// Lowest weighted Gini among up to `max_features` non-constant features,
    /// drawn in random order. `None` when every feature is constant here.
    fn best_split(&self, rows: &[usize], counts: &[usize], rng: &mut StdRng) -> Option<usize> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(rng);

        let n = rows.len();
        let mut visited = 0;
        let mut best: Option<(usize, f64)> = None;
        for feature in features {
            if visited == self.max_features {
                break;
            }
            let mut present = vec![0usize; self.n_classes];
            let mut n_present = 0;
            for &r in rows {
                if self.samples[r].get(feature) {
                    present[self.targets[r]] += 1;
                    n_present += 1;
                }
            }
            if n_present == 0 || n_present == n {
                continue;
            }
            visited += 1;
            let absent: Vec<usize> = counts.iter().zip(&present).map(|(c, p)| c - p).collect();
            let n_absent = n - n_present;
            let impurity = (n_present as f64 * gini(&present, n_present) + n_absent as f64 * gini(&absent, n_absent)) / n as f64;
            if best.map_or(true, |(_, b)| impurity < b) {
                best = Some((feature, impurity));
            }
        }
        best.map(|(feature, _)| feature)
    }
}
