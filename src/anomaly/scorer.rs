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

use crate::anomaly::tree::TreeEnsemble;
use crate::core::{FeatureMatrix, FeatureSchema};
use crate::error::{EngineError, Result};

/// Capability interface for fitted scoring models
pub trait ScoringModel: Send + Sync {
    /// Schema the model was fitted on
    fn schema(&self) -> &FeatureSchema;

    /// Score every row independently of the rest of the batch.
    /// Higher = more anomalous.
    fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Additive tree structure whose prediction equals [`ScoringModel::score`], if any
    fn tree_ensemble(&self) -> Option<&TreeEnsemble> {
        None
    }

    /// Whether exact path-based attribution can be used
    fn supports_exact_attribution(&self) -> bool {
        self.tree_ensemble().is_some()
    }
}

/// Blends the unsupervised and (optional) supervised score vectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleBlender {
    supervised_weight: f64,
    threshold: f64,
}

impl EnsembleBlender {
    pub fn new(supervised_weight: f64, threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&supervised_weight) {
            return Err(EngineError::invalid(
                "supervised_weight",
                format!("must lie in [0, 1], got {supervised_weight}"),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngineError::invalid(
                "threshold",
                format!("must lie in [0, 1], got {threshold}"),
            ));
        }
        Ok(Self {
            supervised_weight,
            threshold,
        })
    }

    /// Weighted mean of the available components; just `unsup` when there is no supervised vector
    pub fn blend(&self, unsup: &[f64], sup: Option<&[f64]>) -> Result<Vec<f64>> {
        let Some(sup) = sup else {
            return Ok(unsup.to_vec());
        };
        EngineError::check_len("supervised scores", unsup.len(), sup.len())?;

        let components = [(unsup, 1.0 - self.supervised_weight), (sup, self.supervised_weight)];
        let total_weight: f64 = components.iter().map(|(_, w)| w).sum();

        Ok((0..unsup.len())
            .map(|i| {
                components
                    .iter()
                    .map(|(scores, weight)| scores[i] * weight)
                    .sum::<f64>()
                    / total_weight
            })
            .collect())
    }

    #[must_use]
    pub fn classify(&self, ensemble: &[f64]) -> Vec<bool> {
        ensemble.iter().map(|&s| s > self.threshold).collect()
    }

    #[must_use]
    pub const fn supervised_weight(&self) -> f64 {
        self.supervised_weight
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for EnsembleBlender {
    fn default() -> Self {
        Self {
            supervised_weight: 0.5,
            threshold: 0.5,
        }
    }
}
