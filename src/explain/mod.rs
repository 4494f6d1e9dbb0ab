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

//! Per-feature attribution of anomaly verdicts.
//!
//! The [`Explainer`] picks the strongest strategy the model allows and degrades
//! step by step instead of failing:
//!
//! 1. exact tree attribution when the model exposes a [`TreeEnsemble`]
//! 2. permutation sampling against the background sample for opaque models
//! 3. a small regression surrogate fitted to the model on the background sample
//! 4. the feature-magnitude fallback, flagged with [`AttributionDegraded`]

pub mod sampling;
pub mod summary;
pub mod surrogate;
pub mod tree_shap;

use crate::anomaly::scorer::ScoringModel;
use crate::anomaly::tree::TreeEnsemble;
use crate::core::{FeatureMatrix, NormalizationState};
use crate::error::{EngineError, Result};
use dashmap::DashMap;
use indexmap::IndexMap;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// How an explanation's attributions were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    ExactTree,
    Sampling,
    Surrogate,
    MagnitudeFallback,
}

impl AttributionMethod {
    /// Attributions sum to `prediction - base_value` of the explained model itself
    #[must_use]
    pub const fn is_additive(self) -> bool {
        matches!(self, Self::ExactTree | Self::Sampling)
    }
}

/// Marks an explanation produced by the magnitude fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionDegraded {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainerParams {
    /// Upper bound on background rows drawn from the fit matrix
    pub background_size: usize,
    /// Length of [`Explanation::top_features`]
    pub top_k: usize,
    pub waterfall_cap: usize,
    pub sampling_permutations: usize,
    pub surrogate_trees: usize,
    pub surrogate_max_depth: usize,
    /// Single-row attributions kept for repeated queries; 0 disables the cache
    pub cache_capacity: usize,
    #[serde(skip)]
    pub seed: u64,
}

impl Default for ExplainerParams {
    fn default() -> Self {
        Self {
            background_size: 100,
            top_k: 5,
            waterfall_cap: 15,
            sampling_permutations: 16,
            surrogate_trees: 10,
            surrogate_max_depth: 8,
            cache_capacity: 1024,
            seed: 42,
        }
    }
}

impl ExplainerParams {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("background_size", self.background_size),
            ("top_k", self.top_k),
            ("waterfall_cap", self.waterfall_cap),
            ("sampling_permutations", self.sampling_permutations),
            ("surrogate_trees", self.surrogate_trees),
            ("surrogate_max_depth", self.surrogate_max_depth),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EngineError::invalid(name, "must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Why one row received its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Attribution per feature, in schema order
    pub attributions: IndexMap<String, f64>,
    /// Largest attributions by magnitude, most important first
    pub top_features: Vec<(String, f64)>,
    pub base_value: f64,
    pub prediction: f64,
    pub summary_text: String,
    pub method: AttributionMethod,
    pub degraded: Option<AttributionDegraded>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallFeature {
    pub feature: String,
    pub shap_value: f64,
    pub feature_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallData {
    pub base_value: f64,
    pub prediction: f64,
    /// Sorted by `|shap_value|` descending
    pub features: Vec<WaterfallFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForcePlotData {
    pub base_value: f64,
    pub shap_values: Vec<f64>,
    pub feature_names: Vec<String>,
    pub feature_values: Vec<f64>,
    pub prediction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalImportance {
    /// Mean absolute attribution per feature
    pub absolute_importance: IndexMap<String, f64>,
    /// Percent of the total; sums to 100
    pub relative_importance: IndexMap<String, f64>,
    /// `(feature, percent)`, largest first
    pub ranked_features: Vec<(String, f64)>,
    pub top_3_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPlotData {
    pub feature_importance: IndexMap<String, f64>,
    /// At most ten entries, largest first
    pub top_features: Vec<(String, f64)>,
    /// One attribution vector per row
    pub shap_values: Vec<Vec<f64>>,
}

const SUMMARY_PLOT_FEATURES: usize = 10;
const GLOBAL_TOP_FEATURES: usize = 3;

/// Attributions for one row, before they are dressed up for a particular view
#[derive(Debug, Clone, PartialEq)]
struct Attribution {
    phi: Vec<f64>,
    base_value: f64,
    prediction: f64,
    method: AttributionMethod,
    degraded: Option<AttributionDegraded>,
}

struct ExplainerState {
    params: ExplainerParams,
    model: Arc<dyn ScoringModel>,
    background: FeatureMatrix,
    /// Background means and stds, used for deviations and the magnitude fallback
    reference: NormalizationState,
    /// Mean model output on the background, if the model could score it
    background_output: Option<f64>,
    /// Empty when exact attribution is available
    permutations: Vec<Vec<usize>>,
    surrogate: Option<TreeEnsemble>,
    /// Keyed by the bit patterns of the row. Soft-capped at `params.cache_capacity`.
    cache: DashMap<Vec<u64>, Arc<Attribution>>,
}

impl ExplainerState {
    fn exact_ensemble(&self) -> Option<&TreeEnsemble> {
        if self.model.supports_exact_attribution() {
            self.model.tree_ensemble()
        } else {
            None
        }
    }

    fn preferred_method(&self) -> AttributionMethod {
        if self.exact_ensemble().is_some() {
            AttributionMethod::ExactTree
        } else {
            AttributionMethod::Sampling
        }
    }

    /// Cached attribution of `row`. Only `remember` queries add new entries, so
    /// batch sweeps cannot flood the cache.
    fn attribute(&self, row: &[f64], remember: bool) -> Arc<Attribution> {
        let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
        if let Some(hit) = self.cache.get(&key) {
            return Arc::clone(hit.value());
        }
        let computed = Arc::new(self.compute(row));
        if !remember || self.cache.len() >= self.params.cache_capacity {
            return computed;
        }
        Arc::clone(self.cache.entry(key).or_insert(computed).value())
    }

    fn compute(&self, row: &[f64]) -> Attribution {
        if let Some(ensemble) = self.exact_ensemble() {
            let (phi, base_value) = tree_shap::ensemble_attribution(ensemble, row, &self.background);
            return Attribution {
                phi,
                base_value,
                prediction: ensemble.predict(row),
                method: AttributionMethod::ExactTree,
                degraded: None,
            };
        }

        let failure = match sampling::sampled_attribution(
            self.model.as_ref(),
            row,
            &self.background,
            &self.permutations,
        ) {
            Ok((phi, base_value, prediction)) => {
                return Attribution {
                    phi,
                    base_value,
                    prediction,
                    method: AttributionMethod::Sampling,
                    degraded: None,
                };
            }
            Err(err) => err,
        };

        if let Some(surrogate) = &self.surrogate {
            tracing::debug!("Sampled attribution failed ({failure}), using surrogate");
            let (phi, base_value) =
                tree_shap::ensemble_attribution(surrogate, row, &self.background);
            return Attribution {
                phi,
                base_value,
                prediction: surrogate.predict(row),
                method: AttributionMethod::Surrogate,
                degraded: None,
            };
        }

        tracing::warn!("Attribution degraded to feature magnitudes: {failure}");
        self.magnitude_fallback(row, &failure)
    }

    fn magnitude_fallback(&self, row: &[f64], failure: &EngineError) -> Attribution {
        let phi: Vec<f64> = (0..row.len()).map(|i| self.deviation(row, i)).collect();
        let base_value = self.background_output.unwrap_or(0.0);
        let prediction = FeatureMatrix::from_flat(self.background.schema_arc(), row.to_vec())
            .and_then(|single| self.model.score(&single))
            .ok()
            .and_then(|scores| scores.first().copied())
            .filter(|v| v.is_finite())
            .unwrap_or(base_value);
        Attribution {
            phi,
            base_value,
            prediction,
            method: AttributionMethod::MagnitudeFallback,
            degraded: Some(AttributionDegraded {
                reason: failure.to_string(),
            }),
        }
    }

    /// Feature `i` of `row` in background standard deviations
    fn deviation(&self, row: &[f64], i: usize) -> f64 {
        (row[i] - self.reference.means()[i]) / self.reference.stds()[i]
    }

    fn ranked(phi: &[f64]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..phi.len()).collect();
        order.sort_by(|&a, &b| phi[b].abs().total_cmp(&phi[a].abs()));
        order
    }

    fn explanation(&self, row: &[f64], attribution: &Attribution) -> Explanation {
        let names = self.background.feature_names();
        let phi = &attribution.phi;
        let ranked = Self::ranked(phi);

        let summary_text = summary::summarize(
            ranked
                .iter()
                .filter(|&&i| phi[i].abs() > 0.0)
                .map(|&i| (names[i].as_str(), self.deviation(row, i))),
        );

        Explanation {
            attributions: names.iter().cloned().zip(phi.iter().copied()).collect(),
            top_features: ranked
                .iter()
                .take(self.params.top_k)
                .map(|&i| (names[i].clone(), phi[i]))
                .collect(),
            base_value: attribution.base_value,
            prediction: attribution.prediction,
            summary_text,
            method: attribution.method,
            degraded: attribution.degraded.clone(),
        }
    }

    fn attribute_all(&self, x: &FeatureMatrix) -> Vec<Arc<Attribution>> {
        let remember = x.n_rows() == 1;
        (0..x.n_rows())
            .into_par_iter()
            .map(|i| self.attribute(x.row(i), remember))
            .collect()
    }

    /// Mean absolute attribution per feature
    fn mean_abs(&self, attributions: &[Arc<Attribution>]) -> Vec<f64> {
        let width = self.background.n_features();
        let mut totals = vec![0.0; width];
        for attribution in attributions {
            for (acc, v) in totals.iter_mut().zip(&attribution.phi) {
                *acc += v.abs();
            }
        }
        let n = attributions.len().max(1) as f64;
        totals.iter().map(|t| t / n).collect()
    }
}

/// Attributes scores of a fitted model to its input features.
///
/// Starts uninitialized; every query before [`Explainer::initialize`] fails
/// with [`EngineError::NotInitialized`]. Re-initializing replaces the whole
/// state, including the attribution cache.
#[derive(Clone, Default)]
pub struct Explainer {
    params: ExplainerParams,
    state: Option<Arc<ExplainerState>>,
}

impl Explainer {
    #[must_use]
    pub fn new(params: ExplainerParams) -> Self {
        Self {
            params,
            state: None,
        }
    }

    /// Draw the background sample from `fit_matrix` and prepare attribution for `model`.
    pub fn initialize(
        &mut self,
        fit_matrix: &FeatureMatrix,
        model: Arc<dyn ScoringModel>,
    ) -> Result<()> {
        profiling::scope!("Explainer::initialize");
        self.params.validate()?;
        fit_matrix.ensure_schema(model.schema())?;
        if fit_matrix.is_empty() {
            return Err(EngineError::insufficient(
                "explainer background",
                "fit matrix has no rows",
            ));
        }

        let started = Instant::now();
        let n = fit_matrix.n_rows();
        let background = if n <= self.params.background_size {
            fit_matrix.clone()
        } else {
            let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
            let mut picked = index::sample(&mut rng, n, self.params.background_size).into_vec();
            picked.sort_unstable();
            fit_matrix.select_rows(&picked)?
        };
        let reference = NormalizationState::fit(&background)?;

        let background_output = model
            .score(&background)
            .ok()
            .filter(|scores| scores.len() == background.n_rows())
            .map(|scores| scores.iter().sum::<f64>() / scores.len() as f64);

        let exact = model.supports_exact_attribution() && model.tree_ensemble().is_some();
        let (permutations, surrogate) = if exact {
            (Vec::new(), None)
        } else {
            let permutations = sampling::draw_permutations(
                background.n_features(),
                self.params.sampling_permutations,
                self.params.seed,
            );
            let surrogate = surrogate::fit_surrogate(
                model.as_ref(),
                &background,
                self.params.surrogate_trees,
                self.params.surrogate_max_depth,
                self.params.seed,
            )
            .inspect_err(|err| tracing::warn!("No attribution surrogate available: {err}"))
            .ok();
            (permutations, surrogate)
        };

        let state = ExplainerState {
            params: self.params,
            model,
            background,
            reference,
            background_output,
            permutations,
            surrogate,
            cache: DashMap::new(),
        };
        tracing::info!(
            "Explainer initialized: {} background rows of {}, method {:?} in {:?}",
            state.background.n_rows(),
            n,
            state.preferred_method(),
            started.elapsed()
        );
        self.state = Some(Arc::new(state));
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn state(&self) -> Result<&ExplainerState> {
        self.state.as_deref().ok_or(EngineError::NotInitialized)
    }

    /// Validate `x` against the explained schema
    fn checked(&self, x: &FeatureMatrix) -> Result<&ExplainerState> {
        let state = self.state()?;
        x.ensure_schema(state.background.schema())?;
        Ok(state)
    }

    fn checked_row<'a>(&self, x: &'a FeatureMatrix, index: usize) -> Result<(&ExplainerState, &'a [f64])> {
        let state = self.checked(x)?;
        if index >= x.n_rows() {
            return Err(EngineError::invalid(
                "index",
                format!("row {index} out of range for a batch of {}", x.n_rows()),
            ));
        }
        Ok((state, x.row(index)))
    }

    /// Strategy used when nothing fails: exact for tree models, sampling otherwise
    pub fn method(&self) -> Result<AttributionMethod> {
        Ok(self.state()?.preferred_method())
    }

    pub fn background(&self) -> Result<&FeatureMatrix> {
        Ok(&self.state()?.background)
    }

    /// One explanation per row of `x`, index-aligned
    pub fn explain(&self, x: &FeatureMatrix) -> Result<Vec<Explanation>> {
        profiling::scope!("Explainer::explain");
        let state = self.checked(x)?;
        let attributions = state.attribute_all(x);
        Ok(attributions
            .iter()
            .enumerate()
            .map(|(i, a)| state.explanation(x.row(i), a))
            .collect())
    }

    pub fn waterfall(&self, x: &FeatureMatrix, index: usize) -> Result<WaterfallData> {
        let (state, row) = self.checked_row(x, index)?;
        let attribution = state.attribute(row, true);
        let names = x.feature_names();
        let features = ExplainerState::ranked(&attribution.phi)
            .into_iter()
            .take(state.params.waterfall_cap)
            .map(|i| WaterfallFeature {
                feature: names[i].clone(),
                shap_value: attribution.phi[i],
                feature_value: row[i],
            })
            .collect();
        Ok(WaterfallData {
            base_value: attribution.base_value,
            prediction: attribution.prediction,
            features,
        })
    }

    pub fn force_plot(&self, x: &FeatureMatrix, index: usize) -> Result<ForcePlotData> {
        let (state, row) = self.checked_row(x, index)?;
        let attribution = state.attribute(row, true);
        Ok(ForcePlotData {
            base_value: attribution.base_value,
            shap_values: attribution.phi.clone(),
            feature_names: x.feature_names().to_vec(),
            feature_values: row.to_vec(),
            prediction: attribution.prediction,
        })
    }

    /// Mean absolute attribution per feature over `x`, as absolute values and percentages
    pub fn global_importance(&self, x: &FeatureMatrix) -> Result<GlobalImportance> {
        profiling::scope!("Explainer::global_importance");
        let state = self.checked(x)?;
        if x.is_empty() {
            return Err(EngineError::insufficient(
                "global importance",
                "batch has no rows",
            ));
        }
        let absolute = state.mean_abs(&state.attribute_all(x));
        let total: f64 = absolute.iter().sum();
        let width = absolute.len() as f64;
        let relative: Vec<f64> = absolute
            .iter()
            .map(|a| if total > 0.0 { a / total * 100.0 } else { 100.0 / width })
            .collect();

        let names = x.feature_names();
        let mut ranked: Vec<(String, f64)> = names.iter().cloned().zip(relative.iter().copied()).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top_3_contribution = ranked.iter().take(GLOBAL_TOP_FEATURES).map(|(_, p)| p).sum();

        Ok(GlobalImportance {
            absolute_importance: names.iter().cloned().zip(absolute).collect(),
            relative_importance: names.iter().cloned().zip(relative).collect(),
            ranked_features: ranked,
            top_3_contribution,
        })
    }

    pub fn summary_plot(&self, x: &FeatureMatrix) -> Result<SummaryPlotData> {
        let state = self.checked(x)?;
        let attributions = state.attribute_all(x);
        let importance = state.mean_abs(&attributions);

        let names = x.feature_names();
        let mut top_features: Vec<(String, f64)> =
            names.iter().cloned().zip(importance.iter().copied()).collect();
        top_features.sort_by(|a, b| b.1.total_cmp(&a.1));
        top_features.truncate(SUMMARY_PLOT_FEATURES);

        Ok(SummaryPlotData {
            feature_importance: names.iter().cloned().zip(importance).collect(),
            top_features,
            shap_values: attributions.iter().map(|a| a.phi.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::isolation::{IsolationForest, IsolationParams};
    use crate::core::FeatureSchema;
    use rand::Rng;

    fn batch(rows: usize, seed: u64) -> FeatureMatrix {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data = (0..rows)
            .map(|_| (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        FeatureMatrix::with_names(
            ["failed_logins", "request_rate", "response_time", "bytes_out"],
            data,
        )
        .expect("matrix")
    }

    fn small_params() -> ExplainerParams {
        ExplainerParams {
            background_size: 20,
            sampling_permutations: 4,
            ..ExplainerParams::default()
        }
    }

    fn forest(x: &FeatureMatrix) -> Arc<IsolationForest> {
        let params = IsolationParams {
            n_estimators: 30,
            max_samples: 64,
            ..IsolationParams::default()
        };
        Arc::new(IsolationForest::fit(x, &params).expect("fit"))
    }

    /// Opaque model: distance from the origin
    struct Radius {
        schema: FeatureSchema,
    }

    impl ScoringModel for Radius {
        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(x.rows().map(|r| r.iter().map(|v| v * v).sum::<f64>().sqrt()).collect())
        }
    }

    /// Opaque model that can score nothing
    struct Broken {
        schema: FeatureSchema,
    }

    impl ScoringModel for Broken {
        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn score(&self, _x: &FeatureMatrix) -> Result<Vec<f64>> {
            Err(EngineError::Model("estimator is not trained".into()))
        }
    }

    /// Scores the background but rejects the large hybrid batches of sampling
    struct SmallBatchesOnly {
        schema: FeatureSchema,
        max_rows: usize,
    }

    impl ScoringModel for SmallBatchesOnly {
        fn schema(&self) -> &FeatureSchema {
            &self.schema
        }

        fn score(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
            if x.n_rows() > self.max_rows {
                return Err(EngineError::Model(format!(
                    "batch of {} rows exceeds {}",
                    x.n_rows(),
                    self.max_rows
                )));
            }
            Ok(x.rows().map(|r| 3.0 * r[0] + r[1].abs()).collect())
        }
    }

    #[test]
    fn test_queries_before_initialize_fail() {
        let x = batch(5, 1);
        let explainer = Explainer::default();
        assert!(!explainer.is_initialized());
        assert_eq!(explainer.explain(&x).expect_err("not initialized"), EngineError::NotInitialized);
        assert_eq!(explainer.waterfall(&x, 0).expect_err("not initialized"), EngineError::NotInitialized);
        assert_eq!(explainer.force_plot(&x, 0).expect_err("not initialized"), EngineError::NotInitialized);
        assert_eq!(
            explainer.global_importance(&x).expect_err("not initialized"),
            EngineError::NotInitialized
        );
        assert_eq!(explainer.summary_plot(&x).expect_err("not initialized"), EngineError::NotInitialized);
    }

    #[test]
    fn test_background_is_bounded_and_reproducible() {
        let x = batch(200, 2);
        let model = forest(&x);
        let mut a = Explainer::new(small_params());
        let mut b = Explainer::new(small_params());
        a.initialize(&x, model.clone()).expect("init");
        b.initialize(&x, model).expect("init");
        assert_eq!(a.background().expect("bg").n_rows(), 20);
        assert_eq!(a.background().expect("bg"), b.background().expect("bg"));
    }

    #[test]
    fn test_exact_attribution_is_additive_and_idempotent() {
        let x = batch(120, 3);
        let mut explainer = Explainer::new(small_params());
        explainer.initialize(&x, forest(&x)).expect("init");
        assert_eq!(explainer.method().expect("method"), AttributionMethod::ExactTree);

        let query = x.select_rows(&[0, 5, 17]).expect("rows");
        let first = explainer.explain(&query).expect("explain");
        for e in &first {
            let total: f64 = e.attributions.values().sum();
            assert!((total - (e.prediction - e.base_value)).abs() < 1e-6);
            assert_eq!(e.top_features.len(), 4);
            assert!(e.degraded.is_none());
        }
        assert_eq!(first, explainer.explain(&query).expect("explain"));
    }

    #[test]
    fn test_opaque_model_uses_sampling() {
        let x = batch(60, 4);
        let model = Arc::new(Radius {
            schema: x.schema().clone(),
        });
        let mut explainer = Explainer::new(small_params());
        explainer.initialize(&x, model).expect("init");
        assert_eq!(explainer.method().expect("method"), AttributionMethod::Sampling);

        let e = &explainer.explain(&x.select_rows(&[3]).expect("row")).expect("explain")[0];
        assert_eq!(e.method, AttributionMethod::Sampling);
        let total: f64 = e.attributions.values().sum();
        assert!((total - (e.prediction - e.base_value)).abs() < 1e-9);
    }

    #[test]
    fn test_broken_model_degrades_to_magnitudes() {
        let x = batch(30, 5);
        let model = Arc::new(Broken {
            schema: x.schema().clone(),
        });
        let mut explainer = Explainer::new(small_params());
        explainer.initialize(&x, model).expect("init");

        let e = &explainer.explain(&x.select_rows(&[0]).expect("row")).expect("explain")[0];
        assert_eq!(e.method, AttributionMethod::MagnitudeFallback);
        assert!(e.degraded.as_ref().is_some_and(|d| d.reason.contains("not trained")));
    }

    #[test]
    fn test_sampling_failure_falls_back_to_surrogate() {
        let x = batch(60, 8);
        let model = Arc::new(SmallBatchesOnly {
            schema: x.schema().clone(),
            max_rows: 50,
        });
        let mut explainer = Explainer::new(small_params());
        explainer.initialize(&x, model).expect("init");

        let e = &explainer.explain(&x.select_rows(&[2]).expect("row")).expect("explain")[0];
        assert_eq!(e.method, AttributionMethod::Surrogate);
        assert!(e.degraded.is_none());
        let total: f64 = e.attributions.values().sum();
        assert!((total - (e.prediction - e.base_value)).abs() < 1e-6);
    }

    #[test]
    fn test_attribution_cache_is_bounded() {
        let x = batch(80, 9);
        let mut explainer = Explainer::new(ExplainerParams {
            cache_capacity: 2,
            ..small_params()
        });
        explainer.initialize(&x, forest(&x)).expect("init");
        let cached = || explainer.state.as_ref().map_or(0, |s| s.cache.len());

        explainer.global_importance(&x).expect("importance");
        explainer.summary_plot(&x).expect("summary");
        assert_eq!(cached(), 0);

        for i in 0..5 {
            explainer.force_plot(&x, i).expect("force");
        }
        assert_eq!(cached(), 2);
        // Rows past the cap are still answered identically
        assert_eq!(
            explainer.force_plot(&x, 4).expect("force"),
            explainer.force_plot(&x, 4).expect("force")
        );
    }

    #[test]
    fn test_waterfall_and_force_plot_agree() {
        let x = batch(80, 6);
        let mut explainer = Explainer::new(ExplainerParams {
            waterfall_cap: 3,
            ..small_params()
        });
        explainer.initialize(&x, forest(&x)).expect("init");

        let waterfall = explainer.waterfall(&x, 7).expect("waterfall");
        assert_eq!(waterfall.features.len(), 3);
        assert!(waterfall
            .features
            .windows(2)
            .all(|w| w[0].shap_value.abs() >= w[1].shap_value.abs()));

        let force = explainer.force_plot(&x, 7).expect("force");
        assert_eq!(force.feature_values, x.row(7).to_vec());
        assert_eq!(force.base_value, waterfall.base_value);
        assert_eq!(force.prediction, waterfall.prediction);

        assert!(matches!(
            explainer.waterfall(&x, 80),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_global_importance_percentages() {
        let x = batch(60, 7);
        let mut explainer = Explainer::new(small_params());
        explainer.initialize(&x, forest(&x)).expect("init");

        let query = x.select_rows(&[1, 2, 3, 4, 5, 6]).expect("rows");
        let gi = explainer.global_importance(&query).expect("importance");
        let total: f64 = gi.relative_importance.values().sum();
        assert!((total - 100.0).abs() < 0.1);
        let top3: f64 = gi.ranked_features.iter().take(3).map(|(_, p)| p).sum();
        assert!((gi.top_3_contribution - top3).abs() < 1e-12);

        let plot = explainer.summary_plot(&query).expect("summary plot");
        assert_eq!(plot.shap_values.len(), 6);
        assert_eq!(plot.top_features.len(), 4);
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let x = batch(40, 8);
        let mut explainer = Explainer::new(small_params());
        explainer.initialize(&x, forest(&x)).expect("init");

        let other = FeatureMatrix::with_names(["a", "b", "c", "d"], vec![vec![0.0; 4]])
            .expect("matrix");
        assert!(matches!(
            explainer.explain(&other),
            Err(EngineError::SchemaMismatch { .. })
        ));
    }
}
