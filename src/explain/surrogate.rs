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

//! Small regression forest that mimics an opaque model on the background sample.

use crate::anomaly::cart::{fit_forest, CartParams};
use crate::anomaly::scorer::ScoringModel;
use crate::anomaly::tree::TreeEnsemble;
use crate::core::FeatureMatrix;
use crate::error::{EngineError, Result};

/// Fit the surrogate on `background` against the model's own outputs.
pub fn fit_surrogate(
    model: &dyn ScoringModel,
    background: &FeatureMatrix,
    n_trees: usize,
    max_depth: usize,
    seed: u64,
) -> Result<TreeEnsemble> {
    profiling::scope!("surrogate::fit_surrogate");
    if background.n_rows() < 2 {
        return Err(EngineError::insufficient(
            "surrogate fit",
            format!("need at least 2 background rows, got {}", background.n_rows()),
        ));
    }
    let targets = model.score(background)?;
    EngineError::check_len("model outputs", background.n_rows(), targets.len())?;
    if targets.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::Model(
            "non-finite output on background sample".into(),
        ));
    }

    let params = CartParams {
        max_depth,
        min_samples_split: 2,
        max_features: None,
    };
    let all: Vec<usize> = (0..background.n_rows()).collect();
    let forest = fit_forest(background, &targets, &all, n_trees, params, seed);
    tracing::debug!(
        "Fitted attribution surrogate: {} trees on {} background rows",
        forest.ensemble.trees().len(),
        background.n_rows()
    );
    Ok(forest.ensemble)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FeatureSchema;

    struct Linear {
        schema: FeatureSchema,
    }

    impl ScoringModel for Linear {
        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(x.rows().map(|r| 2.0 * r[0]).collect())
        }
    }

    #[test]
    fn test_surrogate_tracks_model() {
        let rows: Vec<Vec<f64>> = (0..60).map(|i| vec![f64::from(i) / 10.0, 0.0]).collect();
        let bg = FeatureMatrix::with_names(["signal", "noise"], rows).expect("matrix");
        let model = Linear {
            schema: bg.schema().clone(),
        };
        let surrogate = fit_surrogate(&model, &bg, 10, 8, 42).expect("surrogate");
        assert_eq!(surrogate.trees().len(), 10);
        assert!(surrogate.predict(&[5.0, 0.0]) > surrogate.predict(&[0.5, 0.0]));
    }

    #[test]
    fn test_surrogate_needs_rows() {
        let bg = FeatureMatrix::with_names(["a"], vec![vec![1.0]]).expect("matrix");
        let model = Linear {
            schema: bg.schema().clone(),
        };
        assert!(fit_surrogate(&model, &bg, 10, 8, 42).is_err());
    }
}
