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

//! Arena-backed binary decision trees and additive tree ensembles.
//!
//! Every tree model in the crate (isolation trees, classifier trees, attribution
//! surrogates) is lowered into this representation, which is what the exact
//! attribution algorithm walks.

use serde::{Deserialize, Serialize};

/// Index of a node inside [`DecisionTree::nodes`]
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    /// `row[feature] < threshold` goes left, everything else right
    Split {
        feature: usize,
        threshold: f64,
        left: NodeId,
        right: NodeId,
    },
    Leaf { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Root is node 0
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub(crate) const fn from_nodes(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    #[must_use]
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Value of the leaf reached by `row`
    #[must_use]
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                TreeNode::Leaf { value } => return *value,
            }
        }
    }

    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }
}

/// Incrementally assembles a [`DecisionTree`] during recursive growth.
#[derive(Debug, Default)]
pub(crate) struct TreeBuilder {
    nodes: Vec<TreeNode>,
}

impl TreeBuilder {
    pub(crate) const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub(crate) fn leaf(&mut self, value: f64) -> NodeId {
        self.nodes.push(TreeNode::Leaf { value });
        self.nodes.len() - 1
    }

    /// Reserve a slot for a split whose children are not built yet
    pub(crate) fn reserve(&mut self) -> NodeId {
        self.leaf(0.0)
    }

    pub(crate) fn set_split(
        &mut self,
        id: NodeId,
        feature: usize,
        threshold: f64,
        left: NodeId,
        right: NodeId,
    ) {
        self.nodes[id] = TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        };
    }

    pub(crate) fn finish(self) -> DecisionTree {
        DecisionTree::from_nodes(self.nodes)
    }
}

/// `prediction(row) = bias + Σ tree(row)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    trees: Vec<DecisionTree>,
    bias: f64,
}

impl TreeEnsemble {
    pub(crate) const fn new(trees: Vec<DecisionTree>, bias: f64) -> Self {
        Self { trees, bias }
    }

    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    #[must_use]
    pub const fn bias(&self) -> f64 {
        self.bias
    }

    #[must_use]
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.bias + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// x0 < 0.5 ? 1.0 : (x1 < 2.0 ? 2.0 : 3.0)
    fn stump() -> DecisionTree {
        let mut b = TreeBuilder::new();
        let root = b.reserve();
        let l = b.leaf(1.0);
        let r = b.reserve();
        let rl = b.leaf(2.0);
        let rr = b.leaf(3.0);
        b.set_split(r, 1, 2.0, rl, rr);
        b.set_split(root, 0, 0.5, l, r);
        b.finish()
    }

    #[test]
    fn test_predict_follows_thresholds() {
        let t = stump();
        assert_eq!(t.predict(&[0.0, 0.0]), 1.0);
        assert_eq!(t.predict(&[0.5, 0.0]), 2.0); // equal goes right
        assert_eq!(t.predict(&[1.0, 5.0]), 3.0);
        assert_eq!(t.n_leaves(), 3);
    }

    #[test]
    fn test_ensemble_adds_bias() {
        let e = TreeEnsemble::new(vec![stump(), stump()], 0.5);
        assert_eq!(e.predict(&[1.0, 5.0]), 6.5);
    }
}
