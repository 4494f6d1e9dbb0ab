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

use crate::anomaly::severity::{SeverityClassifier, SeverityThresholds};
use crate::anomaly::{EnsembleBlender, IsolationParams, SupervisedParams};
use crate::error::{EngineError, Result};
use crate::explain::ExplainerParams;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration stored as JSON in the config directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seeds every randomized component (trees, splits, background sample)
    pub seed: u64,
    /// Expected share of anomalies in the fit batch
    pub contamination: f64,
    pub isolation: IsolationConfig,
    pub supervised: SupervisedParams,
    pub blend: BlendConfig,
    pub severity: SeverityThresholds,
    pub explainer: ExplainerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    pub n_estimators: usize,
    /// Capped at the batch size
    pub max_samples: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_samples: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    /// Weight of the supervised probability; 0.5 is a plain average
    pub supervised_weight: f64,
    /// Blended scores above this are anomalous when a supervised model is present
    pub threshold: f64,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            supervised_weight: 0.5,
            threshold: 0.5,
        }
    }
}

/// Which fitted model the explainer attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainTarget {
    #[default]
    Unsupervised,
    /// Falls back to the unsupervised model when no labels were given
    Supervised,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    #[serde(flatten)]
    pub params: ExplainerParams,
    pub target: ExplainTarget,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            contamination: 0.05,
            isolation: IsolationConfig::default(),
            supervised: SupervisedParams::default(),
            blend: BlendConfig::default(),
            severity: SeverityThresholds::default(),
            explainer: ExplainerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Get the path to the default config file
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("soc-sentinel").join("config.json"))
    }

    #[must_use]
    pub const fn isolation_params(&self) -> IsolationParams {
        IsolationParams {
            n_estimators: self.isolation.n_estimators,
            max_samples: self.isolation.max_samples,
            contamination: self.contamination,
            seed: self.seed,
        }
    }

    #[must_use]
    pub const fn supervised_params(&self) -> SupervisedParams {
        SupervisedParams {
            seed: self.seed,
            ..self.supervised
        }
    }

    #[must_use]
    pub const fn explainer_params(&self) -> ExplainerParams {
        ExplainerParams {
            seed: self.seed,
            ..self.explainer.params
        }
    }

    pub fn blender(&self) -> Result<EnsembleBlender> {
        EnsembleBlender::new(self.blend.supervised_weight, self.blend.threshold)
    }

    pub fn severity_classifier(&self) -> Result<SeverityClassifier> {
        SeverityClassifier::new(self.severity)
    }

    /// Reject out-of-range values before anything is fitted
    pub fn validate(&self) -> Result<()> {
        if !self.contamination.is_finite() {
            return Err(EngineError::invalid("contamination", "must be finite"));
        }
        self.isolation_params().validate()?;
        self.supervised_params().validate()?;
        self.explainer_params().validate()?;
        self.blender()?;
        self.severity_classifier()?;
        Ok(())
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default config file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::info!("No engine config found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save config to disk, creating the parent directory if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        tracing::info!("Saved engine config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.isolation_params(), IsolationParams::default());
        assert_eq!(config.explainer.params.waterfall_cap, 15);
        assert_eq!(config.explainer.target, ExplainTarget::Unsupervised);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");

        let mut config = EngineConfig::default();
        config.contamination = 0.1;
        config.blend.supervised_weight = 0.7;
        config.explainer.target = ExplainTarget::Supervised;
        config.explainer.params.top_k = 3;
        config.save(&path).expect("save");

        let loaded = EngineConfig::load(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"seed": 7, "explainer": {"top_k": 2}}"#).expect("write");

        let loaded = EngineConfig::load(&path).expect("load");
        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.explainer.params.top_k, 2);
        assert_eq!(loaded.explainer.params.background_size, 100);
        assert_eq!(loaded.severity, SeverityThresholds::default());
        assert_eq!(loaded.explainer_params().seed, 7);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut config = EngineConfig::default();
        config.contamination = 1.5;
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidParameter { name: "contamination", .. })
        ));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"blend": {"supervised_weight": 2.0}}"#).expect("write");
        assert!(EngineConfig::load(&path).is_err());
    }
}
