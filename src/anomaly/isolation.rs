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

//! Unsupervised isolation-forest scoring.
//!
//! Points that random axis-aligned partitioning separates from the bulk in few
//! steps get a short average path length and therefore a high anomaly score.
//! The decision threshold is frozen at fit time from the contamination rate.

use crate::anomaly::scorer::ScoringModel;
use crate::anomaly::normalize_scores;
use crate::anomaly::tree::{DecisionTree, NodeId, TreeBuilder, TreeEnsemble};
use crate::core::{FeatureMatrix, FeatureSchema};
use crate::error::{EngineError, Result};
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful BST search among `n` points, `c(n)`
#[must_use]
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated quantile of already sorted values, `q` in [0, 1]
fn sorted_quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsolationParams {
    pub n_estimators: usize,
    /// Sub-sample size per tree, capped at the batch size
    pub max_samples: usize,
    /// Expected anomaly fraction, in (0, 1)
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_samples: 256,
            contamination: 0.05,
            seed: 42,
        }
    }
}

impl IsolationParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(EngineError::invalid(
                "contamination",
                format!("must lie in (0, 1), got {}", self.contamination),
            ));
        }
        if self.n_estimators == 0 {
            return Err(EngineError::invalid("n_estimators", "must be at least 1"));
        }
        if self.max_samples < 2 {
            return Err(EngineError::invalid("max_samples", "must be at least 2"));
        }
        Ok(())
    }
}

/// A fitted isolation forest.
///
/// Leaf values are stored as `-(depth + c(leaf_size)) / (c(ψ) · T)` with a bias
/// of 1, so the ensemble output is the additive depth score `1 - E[h(x)] / c(ψ)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    schema: Arc<FeatureSchema>,
    ensemble: TreeEnsemble,
    subsample_size: usize,
    contamination: f64,
    /// Raw-score cutoff: the (1 - contamination) quantile over the fit batch
    threshold: f64,
}

impl IsolationForest {
    /// Uniform draw in `[min, max)` that stays finite when `max - min` overflows.
    fn split_point<R: Rng>(min: f64, max: f64, rng: &mut R) -> f64 {
        let t: f64 = rng.gen();
        let threshold = min.mul_add(1.0 - t, max * t);
        if threshold < max {
            threshold.max(min)
        } else {
            min / 2.0 + max / 2.0
        }
    }

    fn grow<R: Rng>(
        x: &FeatureMatrix,
        samples: &[usize],
        depth: usize,
        limit: usize,
        leaf_norm: f64,
        rng: &mut R,
        builder: &mut TreeBuilder,
    ) -> NodeId {
        let leaf_value =
            |size: usize| -(depth as f64 + average_path_length(size)) * leaf_norm;
        if depth >= limit || samples.len() <= 1 {
            return builder.leaf(leaf_value(samples.len()));
        }

        let mut features: Vec<usize> = (0..x.n_features()).collect();
        features.shuffle(rng);

        for feature in features {
            let (min, max) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                let v = x.row(i)[feature];
                (lo.min(v), hi.max(v))
            });
            if max <= min {
                continue;
            }

            let threshold = Self::split_point(min, max, rng);
            let (left, right): (Vec<usize>, Vec<usize>) = samples
                .iter()
                .partition(|&&i| x.row(i)[feature] < threshold);

            let id = builder.reserve();
            let l = Self::grow(x, &left, depth + 1, limit, leaf_norm, rng, builder);
            let r = Self::grow(x, &right, depth + 1, limit, leaf_norm, rng, builder);
            builder.set_split(id, feature, threshold, l, r);
            return id;
        }

        // Every remaining sample is identical
        builder.leaf(leaf_value(samples.len()))
    }

    fn build_tree(
        x: &FeatureMatrix,
        subsample_size: usize,
        leaf_norm: f64,
        seed: u64,
    ) -> DecisionTree {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let samples = index::sample(&mut rng, x.n_rows(), subsample_size).into_vec();
        let limit = (subsample_size as f64).log2().ceil() as usize;

        let mut builder = TreeBuilder::new();
        Self::grow(x, &samples, 0, limit, leaf_norm, &mut rng, &mut builder);
        builder.finish()
    }

    /// Fit a forest. Requires at least two rows and a contamination that flags at least one.
    pub fn fit(x: &FeatureMatrix, params: &IsolationParams) -> Result<Self> {
        profiling::scope!("IsolationForest::fit");
        params.validate()?;
        if x.n_rows() < 2 {
            return Err(EngineError::insufficient(
                "isolation forest fit",
                format!("need at least 2 rows, got {}", x.n_rows()),
            ));
        }
        let expected_anomalies = (x.n_rows() as f64 * params.contamination).round();
        if expected_anomalies < 1.0 {
            return Err(EngineError::insufficient(
                "isolation forest fit",
                format!(
                    "contamination {} of {} rows rounds to zero anomalies",
                    params.contamination,
                    x.n_rows()
                ),
            ));
        }

        let started = Instant::now();
        let subsample_size = params.max_samples.min(x.n_rows());
        let leaf_norm = 1.0 / (average_path_length(subsample_size) * params.n_estimators as f64);

        let mut seeder = ChaCha8Rng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| seeder.gen()).collect();
        let trees: Vec<DecisionTree> = seeds
            .par_iter()
            .map(|&seed| Self::build_tree(x, subsample_size, leaf_norm, seed))
            .collect();

        let mut forest = Self {
            schema: x.schema_arc(),
            ensemble: TreeEnsemble::new(trees, 1.0),
            subsample_size,
            contamination: params.contamination,
            threshold: f64::INFINITY,
        };

        let mut fit_scores = forest.raw_scores_unchecked(x);
        fit_scores.sort_by(f64::total_cmp);
        forest.threshold = sorted_quantile(&fit_scores, 1.0 - params.contamination);

        tracing::info!(
            "Isolation forest fitted: {} rows, {} features, {} trees, psi={}, threshold={:.4} in {:?}",
            x.n_rows(),
            x.n_features(),
            params.n_estimators,
            subsample_size,
            forest.threshold,
            started.elapsed()
        );
        Ok(forest)
    }

    /// `1 - E[h(x)] / c(ψ)`; higher means easier to isolate
    #[must_use]
    pub fn depth_score(&self, row: &[f64]) -> f64 {
        self.ensemble.predict(row)
    }

    /// Classic isolation score `2^(-E[h(x)] / c(ψ))` in (0, 1]
    #[must_use]
    pub fn raw_score(&self, row: &[f64]) -> f64 {
        (self.depth_score(row) - 1.0).exp2()
    }

    fn raw_scores_unchecked(&self, x: &FeatureMatrix) -> Vec<f64> {
        (0..x.n_rows())
            .into_par_iter()
            .map(|i| self.raw_score(x.row(i)))
            .collect()
    }

    pub fn raw_scores(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.ensure_schema(&self.schema)?;
        Ok(self.raw_scores_unchecked(x))
    }

    /// Batch min-max rescaled scores; 1.0 is the most anomalous row of the batch
    pub fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        Ok(normalize_scores(&self.raw_scores(x)?))
    }

    /// Compare raw scores against the threshold frozen at fit time
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<bool>> {
        Ok(self
            .raw_scores(x)?
            .into_iter()
            .map(|s| s > self.threshold)
            .collect())
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    #[must_use]
    pub const fn contamination(&self) -> f64 {
        self.contamination
    }

    #[must_use]
    pub const fn subsample_size(&self) -> usize {
        self.subsample_size
    }
}

impl ScoringModel for IsolationForest {
    fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.ensure_schema(&self.schema)?;
        Ok((0..x.n_rows())
            .into_par_iter()
            .map(|i| self.depth_score(x.row(i)))
            .collect())
    }

    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        Some(&self.ensemble)
    }
}

/// Fit-before-use wrapper around [`IsolationForest`].
///
/// `fit` always produces a fresh model; previously handed-out models are untouched.
#[derive(Debug, Clone, Default)]
pub struct UnsupervisedScorer {
    params: IsolationParams,
    model: Option<Arc<IsolationForest>>,
}

impl UnsupervisedScorer {
    #[must_use]
    pub const fn new(params: IsolationParams) -> Self {
        Self {
            params,
            model: None,
        }
    }

    pub fn fit(&mut self, x: &FeatureMatrix) -> Result<Arc<IsolationForest>> {
        let model = Arc::new(IsolationForest::fit(x, &self.params)?);
        self.model = Some(Arc::clone(&model));
        Ok(model)
    }

    pub fn model(&self) -> Result<&Arc<IsolationForest>> {
        self.model.as_ref().ok_or(EngineError::NotFitted {
            component: "UnsupervisedScorer",
        })
    }

    pub fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        self.model()?.score(x)
    }

    pub fn raw_scores(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        self.model()?.raw_scores(x)
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<bool>> {
        self.model()?.predict(x)
    }

    #[must_use]
    pub const fn params(&self) -> &IsolationParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn gaussian_batch(rows: usize, seed: u64) -> FeatureMatrix {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).expect("valid distribution");
        let data = (0..rows)
            .map(|_| (0..3).map(|_| normal.sample(&mut rng)).collect())
            .collect();
        FeatureMatrix::with_names(["a", "b", "c"], data).expect("valid matrix")
    }

    fn params(contamination: f64) -> IsolationParams {
        IsolationParams {
            n_estimators: 100,
            contamination,
            ..IsolationParams::default()
        }
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!(c256 > 10.0 && c256 < 11.0, "c(256) = {c256}");
    }

    #[test]
    fn test_outlier_scores_higher_than_center() {
        let x = gaussian_batch(200, 3);
        let forest = IsolationForest::fit(&x, &params(0.05)).expect("fit");
        let query =
            FeatureMatrix::with_names(["a", "b", "c"], vec![vec![0.0, 0.0, 0.0], vec![8.0, -8.0, 8.0]])
                .expect("valid matrix");
        let raw = forest.raw_scores(&query).expect("score");
        assert!(raw[1] > raw[0], "outlier {} vs center {}", raw[1], raw[0]);
        assert_eq!(forest.predict(&query).expect("predict"), vec![false, true]);
    }

    #[test]
    fn test_threshold_flags_roughly_contamination_share_of_fit_data() {
        let x = gaussian_batch(400, 5);
        let forest = IsolationForest::fit(&x, &params(0.1)).expect("fit");
        let flagged = forest.predict(&x).expect("predict").iter().filter(|&&f| f).count();
        assert!((30..=50).contains(&flagged), "flagged {flagged}");
    }

    #[test]
    fn test_scores_are_normalized_to_unit_interval() {
        let x = gaussian_batch(100, 9);
        let forest = IsolationForest::fit(&x, &params(0.05)).expect("fit");
        let scores = forest.score(&x).expect("score");
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        assert!(max > 0.99);
        assert_eq!(min, 0.0);
    }

    #[test]
    fn test_same_seed_same_scores() {
        let x = gaussian_batch(150, 1);
        let a = IsolationForest::fit(&x, &params(0.05)).expect("fit");
        let b = IsolationForest::fit(&x, &params(0.05)).expect("fit");
        let sa = a.score(&x).expect("score");
        let sb = b.score(&x).expect("score");
        assert!(sa.iter().zip(&sb).all(|(p, q)| p.to_bits() == q.to_bits()));
    }

    #[test]
    fn test_depth_score_matches_raw_score() {
        let x = gaussian_batch(64, 2);
        let forest = IsolationForest::fit(&x, &params(0.1)).expect("fit");
        let row = x.row(0);
        let expected = (forest.depth_score(row) - 1.0).exp2();
        assert!((forest.raw_score(row) - expected).abs() < 1e-15);
        let depth = ScoringModel::score(&forest, &x).expect("score");
        assert!((depth[0] - forest.depth_score(row)).abs() < 1e-15);
    }

    #[test]
    fn test_fit_rejects_tiny_batches() {
        let one = gaussian_batch(1, 0);
        assert!(matches!(
            IsolationForest::fit(&one, &params(0.05)),
            Err(EngineError::InsufficientData { .. })
        ));
        // 10 rows * 0.01 rounds to zero flagged rows
        let ten = gaussian_batch(10, 0);
        assert!(matches!(
            IsolationForest::fit(&ten, &params(0.01)),
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_split_point_stays_inside_overflowing_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..1000 {
            let t = IsolationForest::split_point(-1e308, 1e308, &mut rng);
            assert!(t.is_finite() && (-1e308..1e308).contains(&t), "split {t}");
        }
        let t = IsolationForest::split_point(1.0, 2.0, &mut rng);
        assert!((1.0..2.0).contains(&t));
    }

    #[test]
    fn test_fit_on_extreme_finite_values() {
        let data = (0..40)
            .map(|i| {
                let extreme = if i % 2 == 0 { 1e308 } else { -1e308 };
                vec![extreme, f64::from(i), 0.5]
            })
            .collect();
        let x = FeatureMatrix::with_names(["a", "b", "c"], data).expect("valid matrix");
        let forest = IsolationForest::fit(&x, &IsolationParams::default()).expect("fit");
        let scores = forest.score(&x).expect("score");
        assert!(scores.iter().all(|s| s.is_finite() && (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_unfitted_scorer_reports_not_fitted() {
        let scorer = UnsupervisedScorer::new(params(0.05));
        let x = gaussian_batch(10, 0);
        let not_fitted = EngineError::NotFitted {
            component: "UnsupervisedScorer",
        };
        assert_eq!(scorer.score(&x).expect_err("unfitted"), not_fitted);
        assert_eq!(scorer.raw_scores(&x).expect_err("unfitted"), not_fitted);
        assert_eq!(scorer.predict(&x).expect_err("unfitted"), not_fitted);
    }
}
