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

//! Per-feature standardisation fitted once on a reference batch.

use crate::core::matrix::{FeatureMatrix, FeatureSchema};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Floor applied to the standard deviation of constant columns
pub const MIN_STD: f64 = 1e-10;

/// `(v - mean) / std`, with the difference taken on halves so it stays finite
/// for values near `f64::MAX`. Saturates instead of returning infinity.
fn standardize(v: f64, mean: f64, std: f64) -> f64 {
    ((v / 2.0 - mean / 2.0) / std * 2.0).clamp(f64::MIN, f64::MAX)
}

/// Frozen (mean, std) per feature. Never mutated after `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationState {
    schema: Arc<FeatureSchema>,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl NormalizationState {
    /// Compute column means and population standard deviations.
    pub fn fit(matrix: &FeatureMatrix) -> Result<Self> {
        profiling::scope!("NormalizationState::fit");
        if matrix.is_empty() {
            return Err(EngineError::insufficient(
                "normalizer fit",
                "reference batch has no rows",
            ));
        }

        let width = matrix.n_features();
        let n = matrix.n_rows() as f64;

        // Moments are taken on columns scaled into [-1, 1] so sums of large
        // finite values cannot overflow.
        let mut scales = vec![0.0_f64; width];
        for row in matrix.rows() {
            for (scale, &v) in scales.iter_mut().zip(row) {
                *scale = scale.max(v.abs());
            }
        }
        let scales: Vec<f64> = scales
            .into_iter()
            .map(|s| if s > 0.0 { s } else { 1.0 })
            .collect();

        let mut means = vec![0.0; width];
        for row in matrix.rows() {
            for ((acc, &v), &scale) in means.iter_mut().zip(row).zip(&scales) {
                *acc += v / scale;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut stds = vec![0.0; width];
        for row in matrix.rows() {
            for (((acc, &v), &mean), &scale) in stds.iter_mut().zip(row).zip(&means).zip(&scales) {
                let d = v / scale - mean;
                *acc += d * d;
            }
        }

        let means: Vec<f64> = means.iter().zip(&scales).map(|(m, s)| m * s).collect();
        let stds: Vec<f64> = stds
            .iter()
            .zip(&scales)
            .map(|(acc, s)| ((acc / n).sqrt() * s).max(MIN_STD))
            .collect();

        Ok(Self {
            schema: matrix.schema_arc(),
            means,
            stds,
        })
    }

    /// Apply `(x - mean) / std` to every value of a batch with the fitted schema.
    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        profiling::scope!("NormalizationState::transform");
        matrix.ensure_schema(&self.schema)?;

        let values = matrix
            .rows()
            .flat_map(|row| {
                row.iter()
                    .zip(&self.means)
                    .zip(&self.stds)
                    .map(|((&v, &mean), &std)| standardize(v, mean, std))
            })
            .collect();

        Ok(matrix.with_values(values))
    }

    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    #[must_use]
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    #[must_use]
    pub fn stds(&self) -> &[f64] {
        &self.stds
    }
}

/// Holder that enforces fit-before-transform.
///
/// A re-fit replaces the whole state; handles to the previous state stay valid.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    state: Option<Arc<NormalizationState>>,
}

impl Normalizer {
    #[must_use]
    pub const fn new() -> Self {
        Self { state: None }
    }

    pub fn fit(&mut self, matrix: &FeatureMatrix) -> Result<Arc<NormalizationState>> {
        let state = Arc::new(NormalizationState::fit(matrix)?);
        self.state = Some(Arc::clone(&state));
        Ok(state)
    }

    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        self.state()?.transform(matrix)
    }

    pub fn fit_transform(&mut self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        self.fit(matrix)?.transform(matrix)
    }

    pub fn state(&self) -> Result<&Arc<NormalizationState>> {
        self.state.as_ref().ok_or(EngineError::NotFitted {
            component: "Normalizer",
        })
    }
}
