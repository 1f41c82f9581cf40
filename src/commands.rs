//! CLI command handlers.
//!
//! Each handler prints one JSON document to stdout and reports whether a
//! leak was found.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::info;

use sealant_devtools::DevToolsConnector;
use sealant_engine::{
    CaseOptions, Classification, EvaluateAction, LeakSize, MeasureMode, ParsedHeapProfile,
    SealantConfig, TargetOverride, check_leak_with_snapshots, check_leak_with_timeline,
    leak_size, measure_case,
};

use crate::cli::Commands;

/// What a command concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Leak,
}

impl Verdict {
    const fn from_leak(is_leak: bool) -> Self {
        if is_leak { Self::Leak } else { Self::Clean }
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands) -> Result<Verdict> {
    match command {
        Commands::Analyze {
            files,
            step_durations,
            threshold_kb,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(threshold) = threshold_kb {
                config = config.leak_threshold_kb(threshold);
            }
            cmd_analyze(&files, &step_durations, config.leak_threshold_kb)
        }

        Commands::Measure {
            expression,
            name,
            snapshot,
            no_wait,
            ws,
            host,
            port,
            repeat,
            threshold_kb,
            output_dir,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(count) = repeat {
                config = config.repeat_count(count);
            }
            if let Some(threshold) = threshold_kb {
                config = config.leak_threshold_kb(threshold);
            }
            if let Some(dir) = output_dir {
                config = config.output_dir(dir);
            }

            let target = TargetOverride {
                host,
                port,
                websocket_url: ws,
            };
            let options = if snapshot {
                CaseOptions::snapshot()
            } else {
                CaseOptions::timeline()
            }
            .track_activity(!no_wait)
            .target(target);

            cmd_measure(config, &name, options, expression).await
        }
    }
}

/// Configuration from a file when given, otherwise from `SEALANT_*`
/// variables. Variables also override file values.
fn load_config(path: Option<&Path>) -> Result<SealantConfig> {
    match path {
        Some(path) => Ok(SealantConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
            .apply_env()),
        None => Ok(SealantConfig::from_env()),
    }
}

/// Re-classify saved artifacts.
fn cmd_analyze(files: &[PathBuf], step_secs: &[f64], threshold_kb: f64) -> Result<Verdict> {
    let durations = step_secs
        .iter()
        .map(|secs| {
            Duration::try_from_secs_f64(*secs)
                .with_context(|| format!("Invalid step duration: {secs}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let sizes = files
        .iter()
        .map(|file| {
            let profile = ParsedHeapProfile::load(file)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            leak_size(&profile, &durations)
                .with_context(|| format!("Failed to size {}", file.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let (mode, classification) = match sizes.as_slice() {
        [LeakSize::PerStep(steps)] => (
            MeasureMode::Timeline,
            check_leak_with_timeline(durations.len(), steps, threshold_kb)?,
        ),
        _ => {
            let totals = sizes
                .iter()
                .map(|size| match size {
                    LeakSize::Total(kb) => Ok(*kb),
                    LeakSize::PerStep(_) => {
                        bail!("Timelines are analyzed one at a time; got {} files", files.len())
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            (
                MeasureMode::Snapshot,
                check_leak_with_snapshots(&totals, threshold_kb)?,
            )
        }
    };

    info!(
        mode = %mode,
        leak_size_kb = classification.leak_size_kb,
        is_leak = classification.is_leak,
        "Analyzed {} artifact(s)",
        files.len()
    );
    print_analysis(mode, classification, threshold_kb)?;
    Ok(Verdict::from_leak(classification.is_leak))
}

fn print_analysis(mode: MeasureMode, classification: Classification, threshold_kb: f64) -> Result<()> {
    let output = json!({
        "mode": mode,
        "leak_size_kb": classification.leak_size_kb,
        "threshold_kb": threshold_kb,
        "is_leak": classification.is_leak,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Measure one expression against a live target.
async fn cmd_measure(
    config: SealantConfig,
    name: &str,
    options: CaseOptions,
    expression: String,
) -> Result<Verdict> {
    let connector = Arc::new(
        DevToolsConnector::from_config(&config).context("Failed to create DevTools connector")?,
    );
    let mut action = EvaluateAction::new(expression);

    let outcome = measure_case(config, connector, name, options, &mut action)
        .await
        .with_context(|| format!("Measurement of '{name}' failed"))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(Verdict::from_leak(outcome.is_leak()))
}
