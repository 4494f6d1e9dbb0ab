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

//! Model-agnostic permutation sampling of Shapley values.
//!
//! Each (permutation, background row) pair starts from the background row and
//! swaps in the features of `x` one at a time in permutation order, crediting
//! each feature with the change in model output. A single pair telescopes to
//! `f(x) - f(z)`, so the average over all pairs is additive against the mean
//! background output no matter how few permutations are drawn.

use crate::anomaly::scorer::ScoringModel;
use crate::core::FeatureMatrix;
use crate::error::{EngineError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Draw `count` feature orderings. Fixed per explainer so repeated calls agree.
#[must_use]
pub fn draw_permutations(width: usize, count: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count.max(1))
        .map(|_| {
            let mut order: Vec<usize> = (0..width).collect();
            order.shuffle(&mut rng);
            order
        })
        .collect()
}

/// Returns `(phi, base_value, prediction)` with `Σ phi = prediction - base_value`.
pub fn sampled_attribution(
    model: &dyn ScoringModel,
    x: &[f64],
    background: &FeatureMatrix,
    permutations: &[Vec<usize>],
) -> Result<(Vec<f64>, f64, f64)> {
    profiling::scope!("sampling::sampled_attribution");
    let width = x.len();
    if background.is_empty() || permutations.is_empty() {
        return Err(EngineError::insufficient(
            "sampled attribution",
            "needs at least one background row and one permutation",
        ));
    }

    // Every hybrid row of every pair is scored in a single model call
    let steps = width + 1;
    let pairs = permutations.len() * background.n_rows();
    let mut hybrids = Vec::with_capacity(pairs * steps * width);
    for order in permutations {
        for z in background.rows() {
            let mut hybrid = z.to_vec();
            hybrids.extend_from_slice(&hybrid);
            for &feature in order {
                hybrid[feature] = x[feature];
                hybrids.extend_from_slice(&hybrid);
            }
        }
    }
    let batch = FeatureMatrix::from_flat(background.schema_arc(), hybrids)?;
    let outputs = model.score(&batch)?;
    EngineError::check_len("model outputs", batch.n_rows(), outputs.len())?;
    if let Some(bad) = outputs.iter().find(|v| !v.is_finite()) {
        return Err(EngineError::Model(format!("non-finite model output {bad}")));
    }

    let mut phi = vec![0.0; width];
    let mut base_value = 0.0;
    let mut prediction = 0.0;
    for (pair, chunk) in outputs.chunks_exact(steps).enumerate() {
        let order = &permutations[pair / background.n_rows()];
        for (step, &feature) in order.iter().enumerate() {
            phi[feature] += chunk[step + 1] - chunk[step];
        }
        base_value += chunk[0];
        prediction += chunk[width];
    }

    let n = pairs as f64;
    for v in &mut phi {
        *v /= n;
    }
    Ok((phi, base_value / n, prediction / n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FeatureSchema;

    /// Opaque model with an interaction term
    struct Product {
        schema: FeatureSchema,
    }

    impl ScoringModel for Product {
        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(x.rows().map(|r| r[0] * r[1] + r[2]).collect())
        }
    }

    fn background() -> FeatureMatrix {
        FeatureMatrix::with_names(
            ["a", "b", "c"],
            vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 2.0], vec![-1.0, 2.0, 1.0]],
        )
        .expect("matrix")
    }

    #[test]
    fn test_sampled_attribution_is_additive() {
        let bg = background();
        let model = Product {
            schema: bg.schema().clone(),
        };
        let perms = draw_permutations(3, 4, 7);
        let x = [2.0, 3.0, -1.0];
        let (phi, base, prediction) =
            sampled_attribution(&model, &x, &bg, &perms).expect("attribution");

        assert!((prediction - 5.0).abs() < 1e-12);
        assert!((base - 1.0 / 3.0 * (0.0 + 2.0 + (-2.0 + 1.0))).abs() < 1e-12);
        let total: f64 = phi.iter().sum();
        assert!((total - (prediction - base)).abs() < 1e-9);
    }

    #[test]
    fn test_additive_feature_gets_exact_credit() {
        let bg = background();
        let model = Product {
            schema: bg.schema().clone(),
        };
        let perms = draw_permutations(3, 3, 1);
        let (phi, _, _) =
            sampled_attribution(&model, &[0.0, 0.0, 4.0], &bg, &perms).expect("attribution");
        // c enters linearly: credit is x_c - mean(z_c) = 4 - 1
        assert!((phi[2] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_permutations_are_reproducible() {
        assert_eq!(draw_permutations(6, 5, 42), draw_permutations(6, 5, 42));
        let p = draw_permutations(6, 1, 42);
        let mut sorted = p[0].clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..6).collect::<Vec<_>>());
    }

    struct Failing {
        schema: FeatureSchema,
    }

    impl ScoringModel for Failing {
        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn score(&self, _x: &FeatureMatrix) -> Result<Vec<f64>> {
            Err(EngineError::Model("estimator not trained".into()))
        }
    }

    #[test]
    fn test_model_failure_propagates() {
        let bg = background();
        let model = Failing {
            schema: bg.schema().clone(),
        };
        let perms = draw_permutations(3, 2, 0);
        assert!(matches!(
            sampled_attribution(&model, &[0.0; 3], &bg, &perms),
            Err(EngineError::Model(_))
        ));
    }
}
