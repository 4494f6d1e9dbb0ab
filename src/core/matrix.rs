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

//! Feature schema and row-major feature matrix.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Ordered, immutable list of feature names shared by every batch of a fit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema. Names must be non-empty and unique.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(EngineError::invalid(
                "feature_names",
                "at least one feature is required",
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::invalid(
                    "feature_names",
                    format!("duplicate feature name `{name}`"),
                ));
            }
        }

        Ok(Self { names })
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Fail with [`EngineError::SchemaMismatch`] unless `other` has the same names in the same order
    pub fn ensure_matches(&self, other: &Self) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(EngineError::SchemaMismatch {
                expected: self.names.clone(),
                found: other.names.clone(),
            })
        }
    }
}

/// N rows of F features, stored row-major.
///
/// Non-finite inputs are replaced with `0.0` on construction, so nothing
/// downstream ever sees NaN or infinity.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    schema: Arc<FeatureSchema>,
    values: Vec<f64>,
    n_rows: usize,
}

impl FeatureMatrix {
    /// Build a matrix from per-row vectors. Every row must have one value per feature.
    pub fn new(schema: Arc<FeatureSchema>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let width = schema.len();
        let mut values = Vec::with_capacity(rows.len() * width);
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                tracing::debug!("Row {idx} has {} values, schema has {width}", row.len());
                return Err(EngineError::ShapeMismatch {
                    what: "feature vector length",
                    expected: width,
                    found: row.len(),
                });
            }
            values.extend(row);
        }
        Self::from_flat(schema, values)
    }

    /// Build a matrix from a row-major buffer whose length is a multiple of the schema width.
    pub fn from_flat(schema: Arc<FeatureSchema>, mut values: Vec<f64>) -> Result<Self> {
        let width = schema.len();
        if width == 0 || values.len() % width != 0 {
            return Err(EngineError::ShapeMismatch {
                what: "flat buffer length (multiple of feature count)",
                expected: width,
                found: values.len(),
            });
        }

        let mut replaced = 0usize;
        for v in &mut values {
            if !v.is_finite() {
                *v = 0.0;
                replaced += 1;
            }
        }
        if replaced > 0 {
            tracing::debug!("Sanitized {replaced} non-finite feature values to 0.0");
        }

        let n_rows = values.len() / width;
        Ok(Self {
            schema,
            values,
            n_rows,
        })
    }

    /// Convenience constructor that builds the schema from plain names.
    pub fn with_names<I, S>(names: I, rows: Vec<Vec<f64>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Arc::new(FeatureSchema::new(names)?), rows)
    }

    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    #[must_use]
    pub fn schema_arc(&self) -> Arc<FeatureSchema> {
        Arc::clone(&self.schema)
    }

    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        self.schema.names()
    }

    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub fn n_features(&self) -> usize {
        self.schema.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Row `idx`. Panics on out-of-range indices like slice indexing does.
    #[must_use]
    pub fn row(&self, idx: usize) -> &[f64] {
        let width = self.n_features();
        &self.values[idx * width..(idx + 1) * width]
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        self.values.chunks_exact(self.n_features())
    }

    #[must_use]
    pub fn as_flat(&self) -> &[f64] {
        &self.values
    }

    /// Copy out the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        let width = self.n_features();
        let mut values = Vec::with_capacity(indices.len() * width);
        for &idx in indices {
            if idx >= self.n_rows {
                return Err(EngineError::invalid(
                    "row index",
                    format!("index {idx} out of range for batch of {} rows", self.n_rows),
                ));
            }
            values.extend_from_slice(self.row(idx));
        }
        Ok(Self {
            schema: self.schema_arc(),
            n_rows: indices.len(),
            values,
        })
    }

    /// Fail with [`EngineError::SchemaMismatch`] unless this batch uses `expected`
    pub fn ensure_schema(&self, expected: &FeatureSchema) -> Result<()> {
        expected.ensure_matches(&self.schema)
    }

    /// Same schema, new values. Used by transforms that keep the shape.
    pub(crate) fn with_values(&self, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), self.values.len());
        Self {
            schema: self.schema_arc(),
            values,
            n_rows: self.n_rows,
        }
    }
}
