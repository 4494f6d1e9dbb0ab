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

//! Variance-reduction CART trees and bagged forests of them.
//!
//! For 0/1 targets the variance of a node is half its Gini impurity, so the same
//! builder grows the attack classifier and the regression surrogate.

use crate::anomaly::tree::{DecisionTree, NodeId, TreeBuilder, TreeEnsemble};
use crate::core::FeatureMatrix;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Splits that reduce the squared error by less than this are not taken
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features considered per split; `None` means all of them
    pub max_features: Option<usize>,
}

/// Best split found for one node
struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a, R> {
    x: &'a FeatureMatrix,
    y: &'a [f64],
    params: CartParams,
    rng: &'a mut R,
    builder: TreeBuilder,
    /// Total squared-error reduction per feature
    importance: Vec<f64>,
    /// Every leaf value is multiplied by this (1/T inside a forest)
    leaf_scale: f64,
}

impl<R: Rng> Grower<'_, R> {
    fn grow(&mut self, samples: &[usize], depth: usize) -> NodeId {
        let n = samples.len() as f64;
        let mean = samples.iter().map(|&i| self.y[i]).sum::<f64>() / n;

        let pure = samples.iter().all(|&i| (self.y[i] - mean).abs() < f64::EPSILON);
        if depth >= self.params.max_depth || samples.len() < self.params.min_samples_split || pure {
            return self.builder.leaf(mean * self.leaf_scale);
        }

        let Some(split) = self.best_split(samples) else {
            return self.builder.leaf(mean * self.leaf_scale);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.x.row(i)[split.feature] < split.threshold);
        if left.is_empty() || right.is_empty() {
            return self.builder.leaf(mean * self.leaf_scale);
        }

        self.importance[split.feature] += split.gain;

        let id = self.builder.reserve();
        let l = self.grow(&left, depth + 1);
        let r = self.grow(&right, depth + 1);
        self.builder.set_split(id, split.feature, split.threshold, l, r);
        id
    }

    fn best_split(&mut self, samples: &[usize]) -> Option<Split> {
        let width = self.x.n_features();
        let k = self.params.max_features.unwrap_or(width).clamp(1, width);
        let candidates = index::sample(&mut *self.rng, width, k);

        let mut best: Option<Split> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(samples.len());
        for feature in candidates.iter() {
            pairs.clear();
            pairs.extend(samples.iter().map(|&i| (self.x.row(i)[feature], self.y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let total: f64 = pairs.iter().map(|p| p.1).sum();
            let n = pairs.len() as f64;
            let parent = total * total / n;

            let mut left_sum = 0.0;
            for i in 1..pairs.len() {
                left_sum += pairs[i - 1].1;
                let (lo, hi) = (pairs[i - 1].0, pairs[i].0);
                if lo >= hi {
                    continue;
                }
                let nl = i as f64;
                let right_sum = total - left_sum;
                // Reduction of the sum of squared errors
                let gain = left_sum * left_sum / nl + right_sum * right_sum / (n - nl) - parent;
                if gain > MIN_GAIN && best.as_ref().is_none_or(|b| gain > b.gain) {
                    let mid = 0.5 * (lo + hi);
                    let threshold = if mid > lo { mid } else { hi };
                    best = Some(Split {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Grow one tree on `samples` (indices into `x`, duplicates allowed).
///
/// Returns the tree and the per-feature squared-error reduction.
pub fn fit_tree<R: Rng>(
    x: &FeatureMatrix,
    y: &[f64],
    samples: &[usize],
    params: CartParams,
    leaf_scale: f64,
    rng: &mut R,
) -> (DecisionTree, Vec<f64>) {
    let mut grower = Grower {
        x,
        y,
        params,
        rng,
        builder: TreeBuilder::new(),
        importance: vec![0.0; x.n_features()],
        leaf_scale,
    };
    if samples.is_empty() {
        grower.builder.leaf(0.0);
    } else {
        grower.grow(samples, 0);
    }
    (grower.builder.finish(), grower.importance)
}

/// A bagged forest whose prediction is the mean of its trees.
#[derive(Debug, Clone)]
pub struct FittedForest {
    pub ensemble: TreeEnsemble,
    /// Mean per-tree normalised impurity decrease; sums to 1 unless no tree split
    pub importance: Vec<f64>,
}

/// Fit `n_trees` trees on bootstrap resamples of `train` and average them.
///
/// Per-tree seeds are drawn up front from `seed`, so the parallel build is
/// reproducible.
#[must_use]
pub fn fit_forest(
    x: &FeatureMatrix,
    y: &[f64],
    train: &[usize],
    n_trees: usize,
    params: CartParams,
    seed: u64,
) -> FittedForest {
    profiling::scope!("cart::fit_forest");
    let mut seeder = ChaCha8Rng::seed_from_u64(seed);
    let seeds: Vec<u64> = (0..n_trees).map(|_| seeder.gen()).collect();
    let leaf_scale = 1.0 / n_trees.max(1) as f64;

    let grown: Vec<(DecisionTree, Vec<f64>)> = seeds
        .par_iter()
        .map(|&tree_seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(tree_seed);
            let bootstrap: Vec<usize> = (0..train.len())
                .map(|_| train[rng.gen_range(0..train.len())])
                .collect();
            fit_tree(x, y, &bootstrap, params, leaf_scale, &mut rng)
        })
        .collect();

    let mut importance = vec![0.0; x.n_features()];
    let mut trees = Vec::with_capacity(grown.len());
    for (tree, imp) in grown {
        let total: f64 = imp.iter().sum();
        if total > 0.0 {
            for (acc, v) in importance.iter_mut().zip(&imp) {
                *acc += v / total;
            }
        }
        trees.push(tree);
    }
    let total: f64 = importance.iter().sum();
    if total > 0.0 {
        for v in &mut importance {
            *v /= total;
        }
    }

    FittedForest {
        ensemble: TreeEnsemble::new(trees, 0.0),
        importance,
    }
}
