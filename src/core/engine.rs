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

//! Detection session: fit once, then detect and explain any number of batches.
//!
//! All fitted state of one fit lives in an immutable [`Session`]. A refit builds
//! a complete new session and swaps it in, so readers that already loaded the
//! previous session keep a consistent view of it.

use crate::anomaly::severity::SeverityClassifier;
use crate::anomaly::{
    AnomalyResult, ClassificationMetrics, EnsembleBlender, ScoreSource, ScoringModel,
    SupervisedScorer, UnsupervisedScorer,
};
use crate::config::{EngineConfig, ExplainTarget};
use crate::core::{FeatureMatrix, Normalizer};
use crate::error::{EngineError, Result};
use crate::explain::{
    AttributionMethod, Explainer, Explanation, ForcePlotData, GlobalImportance, SummaryPlotData,
    WaterfallData,
};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of [`DetectionEngine::fit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub rows: usize,
    pub features: Vec<String>,
    pub contamination: f64,
    /// Raw isolation score above which a row is anomalous without labels
    pub threshold: f64,
    /// Held-out metrics of the supervised model, when labels were given
    pub supervised_metrics: Option<ClassificationMetrics>,
    pub explain_method: AttributionMethod,
    pub fitted_at: DateTime<Utc>,
}

struct Session {
    normalizer: Normalizer,
    unsupervised: UnsupervisedScorer,
    supervised: Option<SupervisedScorer>,
    explainer: Explainer,
    report: FitReport,
}

pub struct DetectionEngine {
    config: EngineConfig,
    blender: EnsembleBlender,
    severity: SeverityClassifier,
    session: ArcSwapOption<Session>,
}

impl DetectionEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            blender: config.blender()?,
            severity: config.severity_classifier()?,
            config,
            session: ArcSwapOption::empty(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.session.load().is_some()
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.load_full().ok_or(EngineError::NotFitted {
            component: "DetectionEngine",
        })
    }

    /// Fit normalization, the unsupervised model and, with labels, the supervised model.
    ///
    /// `raw` is the unnormalized reference batch; `labels` marks attack rows.
    pub fn fit(&self, raw: &FeatureMatrix, labels: Option<&[bool]>) -> Result<FitReport> {
        profiling::scope!("DetectionEngine::fit");
        if let Some(labels) = labels {
            EngineError::check_len("labels", raw.n_rows(), labels.len())?;
        }
        let started = Instant::now();

        let mut normalizer = Normalizer::new();
        let x = normalizer.fit_transform(raw)?;

        let mut unsupervised = UnsupervisedScorer::new(self.config.isolation_params());
        let forest = unsupervised.fit(&x)?;

        let mut supervised = None;
        let mut classifier = None;
        if let Some(labels) = labels {
            let mut scorer = SupervisedScorer::new(self.config.supervised_params());
            classifier = Some(scorer.fit(&x, labels)?);
            supervised = Some(scorer);
        }

        let explained: Arc<dyn ScoringModel> = match (self.config.explainer.target, &classifier) {
            (ExplainTarget::Supervised, Some(model)) => Arc::clone(model) as Arc<dyn ScoringModel>,
            (ExplainTarget::Supervised, None) => {
                tracing::debug!("No labels given, explaining the unsupervised model instead");
                Arc::clone(&forest) as Arc<dyn ScoringModel>
            }
            (ExplainTarget::Unsupervised, _) => Arc::clone(&forest) as Arc<dyn ScoringModel>,
        };
        let mut explainer = Explainer::new(self.config.explainer_params());
        explainer.initialize(&x, explained)?;

        let report = FitReport {
            rows: raw.n_rows(),
            features: raw.feature_names().to_vec(),
            contamination: forest.contamination(),
            threshold: forest.threshold(),
            supervised_metrics: classifier.as_ref().and_then(|c| c.validation().copied()),
            explain_method: explainer.method()?,
            fitted_at: Utc::now(),
        };

        self.session.store(Some(Arc::new(Session {
            normalizer,
            unsupervised,
            supervised,
            explainer,
            report: report.clone(),
        })));
        tracing::info!(
            "Detection session fitted on {} rows x {} features in {:?}",
            report.rows,
            report.features.len(),
            started.elapsed()
        );
        Ok(report)
    }

    /// Report of the current session
    pub fn report(&self) -> Result<FitReport> {
        Ok(self.session()?.report.clone())
    }

    /// Score `raw` and return one verdict per row, index-aligned.
    ///
    /// Without labels a row is anomalous when its raw isolation score exceeds
    /// the threshold frozen at fit time. With a supervised model the verdict is
    /// the blended score against the blend threshold.
    pub fn detect(&self, raw: &FeatureMatrix) -> Result<Vec<AnomalyResult>> {
        profiling::scope!("DetectionEngine::detect");
        let session = self.session()?;
        let x = session.normalizer.transform(raw)?;
        let unsup = session.unsupervised.score(&x)?;

        let (scores, verdicts, source) = match &session.supervised {
            Some(supervised) => {
                let proba = supervised.predict_proba(&x)?;
                let blended = self.blender.blend(&unsup, Some(&proba))?;
                let verdicts = self.blender.classify(&blended);
                (blended, verdicts, ScoreSource::Ensemble)
            }
            None => {
                let verdicts = session.unsupervised.predict(&x)?;
                (unsup, verdicts, ScoreSource::UnsupervisedOnly)
            }
        };

        let results: Vec<AnomalyResult> = scores
            .iter()
            .zip(&verdicts)
            .map(|(&score, &is_anomaly)| AnomalyResult::new(score, is_anomaly, source, &self.severity))
            .collect();
        tracing::debug!(
            "Scored {} rows, {} anomalous",
            results.len(),
            results.iter().filter(|r| r.is_anomaly).count()
        );
        Ok(results)
    }

    /// Explanations for the given row indices of `raw`, in the order requested
    pub fn explain(&self, raw: &FeatureMatrix, indices: &[usize]) -> Result<Vec<Explanation>> {
        let session = self.session()?;
        let x = session.normalizer.transform(raw)?;
        session.explainer.explain(&x.select_rows(indices)?)
    }

    pub fn waterfall(&self, raw: &FeatureMatrix, index: usize) -> Result<WaterfallData> {
        let session = self.session()?;
        session
            .explainer
            .waterfall(&session.normalizer.transform(raw)?, index)
    }

    pub fn force_plot(&self, raw: &FeatureMatrix, index: usize) -> Result<ForcePlotData> {
        let session = self.session()?;
        session
            .explainer
            .force_plot(&session.normalizer.transform(raw)?, index)
    }

    pub fn global_importance(&self, raw: &FeatureMatrix) -> Result<GlobalImportance> {
        let session = self.session()?;
        session
            .explainer
            .global_importance(&session.normalizer.transform(raw)?)
    }

    pub fn summary_plot(&self, raw: &FeatureMatrix) -> Result<SummaryPlotData> {
        let session = self.session()?;
        session
            .explainer
            .summary_plot(&session.normalizer.transform(raw)?)
    }

    /// Impurity-based importance of the supervised model, if one was fitted
    pub fn supervised_importance(&self) -> Result<Option<IndexMap<String, f64>>> {
        self.session()?
            .supervised
            .as_ref()
            .map(SupervisedScorer::feature_importance)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::severity::Severity;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn small_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.isolation.n_estimators = 40;
        config.supervised.n_estimators = 20;
        config.explainer.params.background_size = 16;
        config
    }

    /// Attack rows (every 10th) have a large `failed_logins`
    fn batch(rows: usize, seed: u64) -> (FeatureMatrix, Vec<bool>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut data = Vec::with_capacity(rows);
        let mut labels = Vec::with_capacity(rows);
        for i in 0..rows {
            let attack = i % 10 == 0;
            let failed: f64 = if attack {
                rng.gen_range(20.0..30.0)
            } else {
                rng.gen_range(0.0..3.0)
            };
            data.push(vec![failed, rng.gen_range(10.0..20.0), rng.gen_range(0.1..0.5)]);
            labels.push(attack);
        }
        let matrix =
            FeatureMatrix::with_names(["failed_logins", "request_rate", "response_time"], data)
                .expect("matrix");
        (matrix, labels)
    }

    #[test]
    fn test_detect_before_fit_fails() {
        let engine = DetectionEngine::new(small_config()).expect("engine");
        let (x, _) = batch(20, 1);
        assert!(!engine.is_fitted());
        assert_eq!(
            engine.detect(&x).expect_err("not fitted"),
            EngineError::NotFitted {
                component: "DetectionEngine"
            }
        );
        assert!(engine.explain(&x, &[0]).is_err());
    }

    #[test]
    fn test_unsupervised_session() {
        let engine = DetectionEngine::new(small_config()).expect("engine");
        let (x, labels) = batch(200, 2);
        let report = engine.fit(&x, None).expect("fit");
        assert_eq!(report.rows, 200);
        assert!(report.supervised_metrics.is_none());
        assert_eq!(report.explain_method, AttributionMethod::ExactTree);

        let results = engine.detect(&x).expect("detect");
        assert_eq!(results.len(), 200);
        assert!(results.iter().all(|r| r.source == ScoreSource::UnsupervisedOnly));
        let caught = results
            .iter()
            .zip(&labels)
            .filter(|(r, &attack)| attack && r.is_anomaly)
            .count();
        assert!(caught >= 7, "caught {caught} of 20 attacks");

        let most = results
            .iter()
            .map(|r| r.anomaly_score)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(most > 0.99);
        assert!(results.iter().any(|r| r.severity == Severity::Critical));
    }

    #[test]
    fn test_supervised_session_blends() {
        let engine = DetectionEngine::new(small_config()).expect("engine");
        let (x, labels) = batch(200, 3);
        let report = engine.fit(&x, Some(&labels)).expect("fit");
        assert!(report.supervised_metrics.is_some());

        let results = engine.detect(&x).expect("detect");
        assert!(results.iter().all(|r| r.source == ScoreSource::Ensemble));
        assert!(results[0].is_anomaly);
        assert!(!results[1].is_anomaly);

        let importance = engine
            .supervised_importance()
            .expect("session")
            .expect("supervised model");
        let failed = importance["failed_logins"];
        assert!(importance.values().all(|&v| v <= failed));
    }

    #[test]
    fn test_extreme_finite_batch_scores_stay_finite() {
        let engine = DetectionEngine::new(small_config()).expect("engine");
        let data = (0..40)
            .map(|i| vec![if i < 20 { 1e308 } else { 9e307 }, f64::from(i), 0.2])
            .collect();
        let x = FeatureMatrix::with_names(["failed_logins", "request_rate", "response_time"], data)
            .expect("matrix");
        engine.fit(&x, None).expect("fit");

        let results = engine.detect(&x).expect("detect");
        assert!(results
            .iter()
            .all(|r| r.anomaly_score.is_finite() && r.confidence.is_finite()));
        let e = &engine.explain(&x, &[0]).expect("explain")[0];
        assert!(e.attributions.values().all(|v| v.is_finite()));
    }

    #[test]
    fn test_label_length_checked() {
        let engine = DetectionEngine::new(small_config()).expect("engine");
        let (x, _) = batch(50, 4);
        assert!(matches!(
            engine.fit(&x, Some(&[true, false])),
            Err(EngineError::ShapeMismatch { .. })
        ));
        assert!(!engine.is_fitted());
    }

    #[test]
    fn test_refit_swaps_session() {
        let engine = DetectionEngine::new(small_config()).expect("engine");
        let (x, _) = batch(100, 5);
        let first = engine.fit(&x, None).expect("fit");
        let (y, _) = batch(60, 6);
        let second = engine.fit(&y, None).expect("refit");
        assert_eq!(first.rows, 100);
        assert_eq!(engine.report().expect("report").rows, second.rows);
    }

    #[test]
    fn test_explanations_follow_engine_schema() {
        let engine = DetectionEngine::new(small_config()).expect("engine");
        let (x, _) = batch(100, 7);
        engine.fit(&x, None).expect("fit");

        let explanations = engine.explain(&x, &[0, 3]).expect("explain");
        assert_eq!(explanations.len(), 2);
        let e = &explanations[0];
        let total: f64 = e.attributions.values().sum();
        assert!((total - (e.prediction - e.base_value)).abs() < 1e-6);

        let waterfall = engine.waterfall(&x, 0).expect("waterfall");
        assert_eq!(waterfall.features.len(), 3);

        let other = FeatureMatrix::with_names(["a", "b", "c"], vec![vec![0.0; 3]])
            .expect("matrix");
        assert!(matches!(
            engine.detect(&other),
            Err(EngineError::SchemaMismatch { .. })
        ));
    }
}
