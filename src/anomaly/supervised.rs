// SOC Sentinel - GPL-3.0-or-later
// This file is part of SOC Sentinel.
//
// Copyright (C) 2026 Daniel Freiermuth
//
// SOC Sentinel is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// SOC Sentinel is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with SOC Sentinel.  If not, see <https://www.gnu.org/licenses/>.

//! Random-forest attack classifier, used only when ground-truth labels exist.

use crate::anomaly::cart::{fit_forest, CartParams};
use crate::anomaly::scorer::ScoringModel;
use crate::anomaly::tree::TreeEnsemble;
use crate::core::{FeatureMatrix, FeatureSchema};
use crate::error::{EngineError, Result};
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisedParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Share of each class held out for validation metrics
    pub test_fraction: f64,
    /// Taken from the engine-wide seed
    #[serde(skip)]
    pub seed: u64,
}

impl Default for SupervisedParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SupervisedParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(EngineError::invalid("supervised.n_estimators", "must be at least 1"));
        }
        if self.max_depth == 0 {
            return Err(EngineError::invalid("supervised.max_depth", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(EngineError::invalid(
                "supervised.test_fraction",
                format!("must lie in [0, 1), got {}", self.test_fraction),
            ));
        }
        Ok(())
    }
}

/// Binary classification metrics; undefined ratios are reported as 0
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ClassificationMetrics {
    pub fn compute(labels: &[bool], predicted: &[bool]) -> Result<Self> {
        EngineError::check_len("predictions", labels.len(), predicted.len())?;

        let mut m = Self::default();
        for (&truth, &guess) in labels.iter().zip(predicted) {
            match (truth, guess) {
                (true, true) => m.true_positives += 1,
                (false, true) => m.false_positives += 1,
                (false, false) => m.true_negatives += 1,
                (true, false) => m.false_negatives += 1,
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        m.precision = ratio(m.true_positives, m.true_positives + m.false_positives);
        m.recall = ratio(m.true_positives, m.true_positives + m.false_negatives);
        m.f1 = if m.precision + m.recall > 0.0 {
            2.0 * m.precision * m.recall / (m.precision + m.recall)
        } else {
            0.0
        };
        m.accuracy = ratio(m.true_positives + m.true_negatives, labels.len());
        Ok(m)
    }
}

/// Split row indices per class so both partitions keep the label ratio.
///
/// Every class keeps at least one training row.
fn stratified_split(labels: &[bool], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [false, true] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        let n_test = ((idx.len() as f64 * test_fraction).round() as usize).min(idx.len().saturating_sub(1));
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// A fitted attack classifier. Its output is the forest's mean leaf probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackClassifier {
    schema: Arc<FeatureSchema>,
    ensemble: TreeEnsemble,
    importance: Vec<f64>,
    validation: Option<ClassificationMetrics>,
    train_rows: usize,
}

impl AttackClassifier {
    pub fn fit(x: &FeatureMatrix, labels: &[bool], params: &SupervisedParams) -> Result<Self> {
        profiling::scope!("AttackClassifier::fit");
        params.validate()?;
        EngineError::check_len("labels", x.n_rows(), labels.len())?;
        let positives = labels.iter().filter(|&&l| l).count();
        if positives == 0 || positives == labels.len() {
            return Err(EngineError::insufficient(
                "supervised fit",
                format!("labels must contain both classes, got {positives} attacks of {}", labels.len()),
            ));
        }

        let (train, test) = stratified_split(labels, params.test_fraction, params.seed);
        let y: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let cart = CartParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split.max(2),
            max_features: Some(((x.n_features() as f64).sqrt() as usize).max(1)),
        };
        let forest = fit_forest(x, &y, &train, params.n_estimators, cart, params.seed);

        let mut model = Self {
            schema: x.schema_arc(),
            ensemble: forest.ensemble,
            importance: forest.importance,
            validation: None,
            train_rows: train.len(),
        };

        if test.is_empty() {
            tracing::info!("Attack classifier fitted on {} rows without hold-out", train.len());
        } else {
            let held_out = x.select_rows(&test)?;
            let held_labels: Vec<bool> = test.iter().map(|&i| labels[i]).collect();
            let metrics = model.evaluate(&held_out, &held_labels)?;
            tracing::info!(
                "Attack classifier fitted on {} rows; held-out precision={:.3} recall={:.3} f1={:.3}",
                train.len(),
                metrics.precision,
                metrics.recall,
                metrics.f1
            );
            model.validation = Some(metrics);
        }

        Ok(model)
    }

    /// Probability of the attack class per row
    pub fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.ensure_schema(&self.schema)?;
        Ok((0..x.n_rows())
            .into_par_iter()
            .map(|i| self.ensemble.predict(x.row(i)).clamp(0.0, 1.0))
            .collect())
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<bool>> {
        Ok(self.predict_proba(x)?.into_iter().map(|p| p > 0.5).collect())
    }

    /// Diagnostic only; not part of the scoring path
    pub fn evaluate(&self, x: &FeatureMatrix, labels: &[bool]) -> Result<ClassificationMetrics> {
        EngineError::check_len("labels", x.n_rows(), labels.len())?;
        ClassificationMetrics::compute(labels, &self.predict(x)?)
    }

    /// Mean impurity decrease per feature, in schema order
    #[must_use]
    pub fn feature_importance(&self) -> IndexMap<String, f64> {
        self.schema
            .names()
            .iter()
            .cloned()
            .zip(self.importance.iter().copied())
            .collect()
    }

    #[must_use]
    pub const fn validation(&self) -> Option<&ClassificationMetrics> {
        self.validation.as_ref()
    }

    #[must_use]
    pub const fn train_rows(&self) -> usize {
        self.train_rows
    }
}

impl ScoringModel for AttackClassifier {
    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.ensure_schema(&self.schema)?;
        Ok((0..x.n_rows())
            .into_par_iter()
            .map(|i| self.ensemble.predict(x.row(i)))
            .collect())
    }

    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        Some(&self.ensemble)
    }
}

/// Fit-before-use wrapper around [`AttackClassifier`]
#[derive(Debug, Clone, Default)]
pub struct SupervisedScorer {
    params: SupervisedParams,
    model: Option<Arc<AttackClassifier>>,
}

impl SupervisedScorer {
    #[must_use]
    pub const fn new(params: SupervisedParams) -> Self {
        Self {
            params,
            model: None,
        }
    }

    pub fn fit(&mut self, x: &FeatureMatrix, labels: &[bool]) -> Result<Arc<AttackClassifier>> {
        let model = Arc::new(AttackClassifier::fit(x, labels, &self.params)?);
        self.model = Some(Arc::clone(&model));
        Ok(model)
    }

    pub fn model(&self) -> Result<&Arc<AttackClassifier>> {
        self.model.as_ref().ok_or(EngineError::NotFitted {
            component: "SupervisedScorer",
        })
    }

    pub fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        self.model()?.predict_proba(x)
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<bool>> {
        self.model()?.predict(x)
    }

    pub fn evaluate(&self, x: &FeatureMatrix, labels: &[bool]) -> Result<ClassificationMetrics> {
        self.model()?.evaluate(x, labels)
    }

    pub fn feature_importance(&self) -> Result<IndexMap<String, f64>> {
        Ok(self.model()?.feature_importance())
    }
}
