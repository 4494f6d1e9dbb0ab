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

pub mod cart;
pub mod isolation;
pub mod scorer;
pub mod severity;
pub mod supervised;
pub mod tree;

use serde::{Deserialize, Serialize};
use severity::{Severity, SeverityClassifier};

pub use isolation::{IsolationForest, IsolationParams, UnsupervisedScorer};
pub use scorer::{EnsembleBlender, ScoringModel};
pub use severity::SeverityThresholds;
pub use supervised::{AttackClassifier, ClassificationMetrics, SupervisedParams, SupervisedScorer};

/// Added to the denominator so a constant batch does not divide by zero
const NORMALIZE_EPSILON: f64 = 1e-10;

/// Min-max rescale raw anomaly scores to [0, 1] across a batch.
///
/// Higher raw score = more anomalous, so the most anomalous row maps to ~1.0
/// and the least anomalous to 0.0. A constant batch maps to all zeros.
#[must_use]
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min_score = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max_score = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|&s| ((s - min_score) / (max_score - min_score + NORMALIZE_EPSILON)).clamp(0.0, 1.0))
        .collect()
}

/// Which models contributed to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    UnsupervisedOnly,
    Ensemble,
}

/// Verdict for one row of a batch, index-aligned with the input
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub severity: Severity,
    pub confidence: f64,
    pub source: ScoreSource,
}

impl AnomalyResult {
    #[must_use]
    pub fn new(
        score: f64,
        is_anomaly: bool,
        source: ScoreSource,
        classifier: &SeverityClassifier,
    ) -> Self {
        let anomaly_score = score.clamp(0.0, 1.0);
        Self {
            is_anomaly,
            anomaly_score,
            severity: classifier.severity(anomaly_score),
            confidence: SeverityClassifier::confidence(anomaly_score),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_scores_bounds() {
        let out = normalize_scores(&[0.4, 0.5, 0.9]);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.2).abs() < 1e-6);
        assert!(out[2] > 0.999_999 && out[2] <= 1.0);
        assert!(normalize_scores(&[]).is_empty());
        assert_eq!(normalize_scores(&[0.3, 0.3]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_result_derives_severity_and_confidence() {
        let classifier = SeverityClassifier::default();
        let r = AnomalyResult::new(0.9, true, ScoreSource::UnsupervisedOnly, &classifier);
        assert_eq!(r.severity, Severity::High);
        assert!((r.confidence - 0.8).abs() < 1e-12);

        let json = serde_json::to_value(r).expect("serialize");
        assert_eq!(json["severity"], "HIGH");
        assert_eq!(json["source"], "unsupervised_only");
    }
}
