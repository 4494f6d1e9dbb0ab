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

//! Analyst-facing one-line summaries of an attribution.

use fancy_regex::Regex;
use std::sync::LazyLock;

static FAILURE_KEYWORDS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)failure|error").ok());
static VOLUME_KEYWORDS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)rate|count").ok());
static TIMING_KEYWORDS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)time").ok());

/// Features mentioned in a summary
const SUMMARY_FEATURES: usize = 3;
/// Reasons joined into the final sentence
const SUMMARY_REASONS: usize = 2;

pub const NO_SIGNIFICANT_FEATURES: &str = "No significant features found.";

fn matches(pattern: &LazyLock<Option<Regex>>, name: &str) -> bool {
    pattern
        .as_ref()
        .is_some_and(|re| re.is_match(name).unwrap_or(false))
}

/// Phrase for one feature. `deviation` is the feature value in background std units.
#[must_use]
pub fn describe(name: &str, deviation: f64) -> String {
    let direction = if deviation > 0.0 { "elevated" } else { "depressed" };
    if matches(&FAILURE_KEYWORDS, name) {
        format!("{name} is {direction} ({:.2} std)", deviation.abs())
    } else if matches(&VOLUME_KEYWORDS, name) {
        format!("{name} is {direction}")
    } else if matches(&TIMING_KEYWORDS, name) {
        format!("response {direction}")
    } else {
        format!("{name}: {direction}")
    }
}

/// Summarise ranked `(feature, deviation)` pairs, most important first.
#[must_use]
pub fn summarize<'a, I>(ranked: I) -> String
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let reasons: Vec<String> = ranked
        .into_iter()
        .take(SUMMARY_FEATURES)
        .map(|(name, deviation)| describe(name, deviation))
        .collect();

    if reasons.is_empty() {
        return NO_SIGNIFICANT_FEATURES.to_string();
    }
    let shown = reasons.len().min(SUMMARY_REASONS);
    format!("This alert fired because: {}", reasons[..shown].join(", "))
}
