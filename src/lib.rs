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

//! Anomaly scoring and explainability for security telemetry.
//!
//! Feature batches are standardized, scored by an isolation forest (optionally
//! blended with a supervised attack classifier), bucketed into severities and
//! explained per feature. [`DetectionEngine`] ties the pieces into one session.

pub mod anomaly;
pub mod config;
pub mod core;
pub mod error;
pub mod explain;

pub use anomaly::severity::{Severity, SeverityClassifier, SeverityThresholds};
pub use anomaly::{
    normalize_scores, AnomalyResult, AttackClassifier, ClassificationMetrics, EnsembleBlender,
    IsolationForest, IsolationParams, ScoreSource, ScoringModel, SupervisedParams,
    SupervisedScorer, UnsupervisedScorer,
};
pub use config::{EngineConfig, ExplainTarget};
pub use core::{
    DetectionEngine, FeatureMatrix, FeatureSchema, FitReport, NormalizationState, Normalizer,
};
pub use error::{EngineError, Result};
pub use explain::{
    AttributionDegraded, AttributionMethod, Explainer, ExplainerParams, Explanation,
    ForcePlotData, GlobalImportance, SummaryPlotData, WaterfallData, WaterfallFeature,
};
