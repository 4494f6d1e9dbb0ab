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

//! Exact interventional Shapley values for tree ensembles.
//!
//! For a single reference row `z`, the game `v(S) = f(x_S, z_rest)` of a tree
//! only changes at splits where `x` and `z` disagree. Walking both branches at
//! those splits enumerates every reachable leaf together with the set `A` of
//! features taken from `x` and `B` taken from `z`. Such a leaf contributes
//! `v · (|A|-1)! |B|! / (|A|+|B|)!` to each feature in `A` and the negated
//! `v · |A|! (|B|-1)! / (|A|+|B|)!` to each feature in `B`.
//!
//! Per reference row the attributions sum to `f(x) - f(z)`, so averaging over a
//! background sample sums to `f(x) - E[f(z)]`.

use crate::anomaly::tree::{DecisionTree, NodeId, TreeEnsemble, TreeNode};
use crate::core::FeatureMatrix;
use rayon::prelude::*;

/// `p! q! / (p + q + 1)!`
fn shapley_weight(p: usize, q: usize) -> f64 {
    // 1 / ((p + q + 1) · C(p + q, p))
    let n = p + q;
    let k = p.min(q);
    let mut binom = 1.0;
    for i in 0..k {
        binom = binom * (n - i) as f64 / (i + 1) as f64;
    }
    1.0 / ((n + 1) as f64 * binom)
}

struct PathWalk<'a> {
    nodes: &'a [TreeNode],
    x: &'a [f64],
    z: &'a [f64],
    /// Features fixed on the current path and whether they came from `x`
    fixed: Vec<(usize, bool)>,
    phi: &'a mut [f64],
}

impl PathWalk<'_> {
    fn walk(&mut self, id: NodeId) {
        let nodes = self.nodes;
        match &nodes[id] {
            TreeNode::Leaf { value } => self.credit(*value),
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let child = |goes_left: bool| if goes_left { *left } else { *right };
                let x_left = self.x[*feature] < *threshold;
                let z_left = self.z[*feature] < *threshold;

                let already_fixed = self
                    .fixed
                    .iter()
                    .find(|(f, _)| f == feature)
                    .map(|&(_, from_x)| from_x);

                if let Some(from_x) = already_fixed {
                    self.walk(child(if from_x { x_left } else { z_left }));
                } else if x_left == z_left {
                    self.walk(child(x_left));
                } else {
                    self.fixed.push((*feature, true));
                    self.walk(child(x_left));
                    self.fixed.pop();

                    self.fixed.push((*feature, false));
                    self.walk(child(z_left));
                    self.fixed.pop();
                }
            }
        }
    }

    fn credit(&mut self, value: f64) {
        let a = self.fixed.iter().filter(|(_, from_x)| *from_x).count();
        let b = self.fixed.len() - a;
        if a + b == 0 {
            return;
        }
        for &(feature, from_x) in &self.fixed {
            if from_x {
                self.phi[feature] += value * shapley_weight(a - 1, b);
            } else {
                self.phi[feature] -= value * shapley_weight(a, b - 1);
            }
        }
    }
}

/// Add the attributions of `tree` for `x` against reference `z` into `phi`
pub fn tree_attribution(tree: &DecisionTree, x: &[f64], z: &[f64], phi: &mut [f64]) {
    let mut walk = PathWalk {
        nodes: tree.nodes(),
        x,
        z,
        fixed: Vec::new(),
        phi,
    };
    walk.walk(0);
}

/// Attributions of `ensemble` at `x`, averaged over every background row.
///
/// Returns `(phi, base_value)` where `base_value` is the mean ensemble output
/// over the background and `Σ phi = ensemble.predict(x) - base_value`.
#[must_use]
pub fn ensemble_attribution(
    ensemble: &TreeEnsemble,
    x: &[f64],
    background: &FeatureMatrix,
) -> (Vec<f64>, f64) {
    profiling::scope!("tree_shap::ensemble_attribution");
    let width = x.len();
    let n_background = background.n_rows().max(1) as f64;

    // Collected in background order before summing so the result is reproducible
    let per_reference: Vec<(Vec<f64>, f64)> = (0..background.n_rows())
        .into_par_iter()
        .map(|r| {
            let z = background.row(r);
            let mut phi = vec![0.0; width];
            for tree in ensemble.trees() {
                tree_attribution(tree, x, z, &mut phi);
            }
            (phi, ensemble.predict(z))
        })
        .collect();

    let mut phi = vec![0.0; width];
    let mut base_value = 0.0;
    for (contribution, reference) in per_reference {
        for (acc, v) in phi.iter_mut().zip(contribution) {
            *acc += v;
        }
        base_value += reference;
    }
    for v in &mut phi {
        *v /= n_background;
    }
    (phi, base_value / n_background)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::tree::TreeBuilder;

    /// x0 < 0 ? (x1 < 0 ? 1 : 2) : (x1 < 0 ? 3 : 10)
    fn interaction_tree() -> DecisionTree {
        let mut b = TreeBuilder::new();
        let root = b.reserve();
        let l = b.reserve();
        let ll = b.leaf(1.0);
        let lr = b.leaf(2.0);
        let r = b.reserve();
        let rl = b.leaf(3.0);
        let rr = b.leaf(10.0);
        b.set_split(l, 1, 0.0, ll, lr);
        b.set_split(r, 1, 0.0, rl, rr);
        b.set_split(root, 0, 0.0, l, r);
        b.finish()
    }

    #[test]
    fn test_weights() {
        assert!((shapley_weight(0, 0) - 1.0).abs() < 1e-12);
        assert!((shapley_weight(1, 0) - 0.5).abs() < 1e-12);
        assert!((shapley_weight(1, 1) - 1.0 / 6.0).abs() < 1e-12);
        assert!((shapley_weight(2, 1) - 2.0 / 24.0).abs() < 1e-12);
    }

    #[test]
    fn test_two_feature_game_matches_brute_force() {
        let tree = interaction_tree();
        let x = [1.0, 1.0];
        let z = [-1.0, -1.0];
        let mut phi = vec![0.0; 2];
        tree_attribution(&tree, &x, &z, &mut phi);

        // v({}) = 1, v({0}) = 3, v({1}) = 2, v({0,1}) = 10
        let phi0 = 0.5 * (3.0 - 1.0) + 0.5 * (10.0 - 2.0);
        let phi1 = 0.5 * (2.0 - 1.0) + 0.5 * (10.0 - 3.0);
        assert!((phi[0] - phi0).abs() < 1e-12);
        assert!((phi[1] - phi1).abs() < 1e-12);
        assert!((phi[0] + phi[1] - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_identical_rows_get_zero() {
        let tree = interaction_tree();
        let mut phi = vec![0.0; 2];
        tree_attribution(&tree, &[0.3, -2.0], &[0.7, -5.0], &mut phi);
        assert_eq!(phi, vec![0.0, 0.0]);
    }

    #[test]
    fn test_ensemble_average_is_additive() {
        let ensemble = TreeEnsemble::new(vec![interaction_tree(), interaction_tree()], 0.25);
        let background = FeatureMatrix::with_names(
            ["a", "b"],
            vec![vec![-1.0, -1.0], vec![1.0, -1.0], vec![-1.0, 1.0]],
        )
        .expect("matrix");
        let x = [1.0, 1.0];
        let (phi, base) = ensemble_attribution(&ensemble, &x, &background);
        let total: f64 = phi.iter().sum();
        assert!((total - (ensemble.predict(&x) - base)).abs() < 1e-9);
    }
}
