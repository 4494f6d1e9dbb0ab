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

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use soc_sentinel::{AnomalyResult, DetectionEngine, EngineConfig, Explanation, FeatureMatrix, FitReport};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "ram-profiling")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

#[derive(Parser, Debug)]
#[command(name = "soc-sentinel")]
#[command(author = "SOC Sentinel Team")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
#[command(about = "Score security telemetry features for anomalies and explain the verdicts", long_about = None)]
struct Args {
    /// Engine config file (defaults to the user config directory, then built-in defaults)
    #[arg(long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Path for the DHAT heap profiling output (only used when built with --features ram-profiling)
    #[cfg(feature = "ram-profiling")]
    #[arg(
        long = "profile-output",
        value_name = "PROFILE_FILE",
        default_value = "dhat-heap.json"
    )]
    profile_output: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit on a feature batch, score every row and explain the strongest anomalies
    Detect {
        /// JSON batch: `{"feature_names": [..], "rows": [[..]], "labels": [..]}`
        #[arg(value_name = "BATCH")]
        batch: PathBuf,

        /// Also train the supervised model on the batch's `labels`
        #[arg(long)]
        labels: bool,

        /// Number of highest-scoring anomalies to explain
        #[arg(long, value_name = "N", default_value_t = 5)]
        explain_top: usize,

        /// Pretty-print the JSON report
        #[arg(long)]
        pretty: bool,
    },
    /// Print the effective engine config
    Config {
        /// Write the effective config to the default config path
        #[arg(long)]
        save: bool,
    },
}

#[derive(Debug, Deserialize)]
struct BatchFile {
    feature_names: Vec<String>,
    rows: Vec<Vec<f64>>,
    #[serde(default)]
    labels: Option<Vec<bool>>,
}

#[derive(Debug, Serialize)]
struct ExplainedRow {
    index: usize,
    explanation: Explanation,
}

#[derive(Debug, Serialize)]
struct DetectionReport {
    fit: FitReport,
    anomalies: usize,
    results: Vec<AnomalyResult>,
    explanations: Vec<ExplainedRow>,
}

fn load_batch(path: &Path) -> anyhow::Result<(FeatureMatrix, Option<Vec<bool>>)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch {}", path.display()))?;
    let batch: BatchFile = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse batch {}", path.display()))?;
    let matrix = FeatureMatrix::with_names(batch.feature_names, batch.rows)
        .with_context(|| format!("Invalid feature batch {}", path.display()))?;
    tracing::info!(
        "Loaded {} rows x {} features from {}",
        matrix.n_rows(),
        matrix.n_features(),
        path.display()
    );
    Ok((matrix, batch.labels))
}

fn detect(
    config: EngineConfig,
    batch: &Path,
    use_labels: bool,
    explain_top: usize,
) -> anyhow::Result<DetectionReport> {
    let (matrix, labels) = load_batch(batch)?;
    let labels = match (use_labels, labels) {
        (true, Some(labels)) => Some(labels),
        (true, None) => bail!("--labels given but {} has no `labels`", batch.display()),
        (false, _) => None,
    };

    let engine = DetectionEngine::new(config).context("Invalid engine config")?;
    let fit = engine
        .fit(&matrix, labels.as_deref())
        .context("Failed to fit detection models")?;
    let results = engine.detect(&matrix).context("Failed to score batch")?;

    let mut flagged: Vec<usize> = (0..results.len()).filter(|&i| results[i].is_anomaly).collect();
    flagged.sort_by(|&a, &b| {
        results[b]
            .anomaly_score
            .total_cmp(&results[a].anomaly_score)
    });
    flagged.truncate(explain_top);

    let explanations = engine
        .explain(&matrix, &flagged)
        .context("Failed to explain anomalies")?
        .into_iter()
        .zip(flagged)
        .map(|(explanation, index)| ExplainedRow { index, explanation })
        .collect();

    Ok(DetectionReport {
        fit,
        anomalies: results.iter().filter(|r| r.is_anomaly).count(),
        results,
        explanations,
    })
}

fn main() -> anyhow::Result<()> {
    // Set RUST_LOG environment variable to override (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::info!(
        "SOC Sentinel starting up (version {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    #[cfg(feature = "ram-profiling")]
    let _profiler = {
        tracing::info!("RAM profiling enabled, output: {:?}", args.profile_output);
        dhat::Profiler::builder()
            .file_name(args.profile_output.clone())
            .build()
    };

    #[cfg(feature = "cpu-profiling")]
    {
        tracing::info!("CPU profiling enabled with Tracy - run Tracy profiler to connect");
    }

    let config = EngineConfig::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Detect {
            batch,
            labels,
            explain_top,
            pretty,
        } => {
            let report = detect(config, &batch, labels, explain_top)?;
            let json = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{json}");
        }
        Command::Config { save } => {
            if save {
                let path = EngineConfig::default_path()
                    .context("Could not determine config directory")?;
                config.save(&path)?;
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
