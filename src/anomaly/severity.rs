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

//! Ordinal severity buckets for triage.
//!
//! Downstream alerting keys off these breakpoints, so the defaults are pinned by tests.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict lower bounds: a score must exceed `critical` to be CRITICAL, and so on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            critical: 0.95,
            high: 0.85,
            medium: 0.70,
        }
    }
}

impl SeverityThresholds {
    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.medium
            && self.medium <= self.high
            && self.high <= self.critical
            && self.critical <= 1.0;
        if ordered {
            Ok(())
        } else {
            Err(EngineError::invalid(
                "severity",
                format!(
                    "breakpoints must satisfy 0 <= medium <= high <= critical <= 1, got {self:?}"
                ),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeverityClassifier {
    thresholds: SeverityThresholds,
}

impl SeverityClassifier {
    pub fn new(thresholds: SeverityThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    #[must_use]
    pub fn severity(&self, score: f64) -> Severity {
        let t = &self.thresholds;
        if score > t.critical {
            Severity::Critical
        } else if score > t.high {
            Severity::High
        } else if score > t.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Distance from the 0.5 decision midpoint, scaled to [0, 1]
    #[must_use]
    pub fn confidence(score: f64) -> f64 {
        ((score - 0.5).abs() * 2.0).clamp(0.0, 1.0)
    }

    #[must_use]
    pub const fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }
}
