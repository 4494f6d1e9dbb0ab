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

//! Error taxonomy of the scoring and explainability engine.
//!
//! Structural errors abort the calling batch. Explanation failures never show up
//! here; they are recovered inside the explainer and surfaced as
//! [`crate::explain::AttributionDegraded`] on the explanation itself.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// transform/score/predict called before the matching `fit`
    #[error("{component} has not been fitted; call fit() first")]
    NotFitted { component: &'static str },

    /// Explainer queried before `initialize`
    #[error("explainer has not been initialized; call initialize() first")]
    NotInitialized,

    #[error("insufficient data for {context}: {reason}")]
    InsufficientData {
        context: &'static str,
        reason: String,
    },

    /// Feature names or their order differ from the fitted schema
    #[error(
        "feature schema mismatch: expected {} features {expected:?}, got {} features {found:?}",
        expected.len(),
        found.len()
    )]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Two index-aligned vectors (scores, labels, rows) disagree in length
    #[error("shape mismatch for {what}: expected {expected}, got {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Failure reported by an opaque scoring model
    #[error("model evaluation failed: {0}")]
    Model(String),
}

impl EngineError {
    pub(crate) fn insufficient(context: &'static str, reason: impl Into<String>) -> Self {
        Self::InsufficientData {
            context,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Fail with [`EngineError::ShapeMismatch`] unless `found == expected`
    pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
        if expected == found {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                what,
                expected,
                found,
            })
        }
    }
}
