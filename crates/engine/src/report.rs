//! Leak persistence: raw artifacts and a JSON report per leaking case.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classifier::MeasureMode;
use crate::config::SealantConfig;
use crate::error::Result;
use crate::session::{MeasurementRound, MetricDelta, Verdict};

/// File name of the report inside a case directory.
pub const REPORT_FILE_NAME: &str = "report.json";

/// Summary written next to the saved artifacts of a leaking case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakReport {
    pub case: String,
    pub mode: MeasureMode,
    pub leak_size_kb: f64,
    pub threshold_kb: f64,
    pub metric_deltas: Vec<MetricDelta>,
    pub rounds: Vec<MeasurementRound>,
    /// File names of the artifacts saved alongside, empty when saving is off.
    pub artifacts: Vec<String>,
    pub generated_at: DateTime<Local>,
}

/// Directory receiving everything saved for `case`.
#[must_use]
pub fn case_dir(output_dir: &Path, case: &str) -> PathBuf {
    let name: String = case
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    output_dir.join(name)
}

/// Save the final round's artifacts and the report as configured.
///
/// Returns the case directory, or `None` when both saving and reporting are
/// turned off.
///
/// # Errors
///
/// Returns `Error::Core` when a directory or file cannot be written.
pub fn persist_leak(
    config: &SealantConfig,
    verdict: &Verdict,
    rounds: &[MeasurementRound],
    artifacts: &[String],
) -> Result<Option<PathBuf>> {
    if !config.save_artifact_on_leak && !config.emit_report_on_leak {
        return Ok(None);
    }

    let dir = case_dir(&config.output_dir, &verdict.case);
    sealant_core::fs::create_dir_all(&dir)?;

    let now = Local::now();
    let mut saved = Vec::new();
    if config.save_artifact_on_leak {
        let stamp = now.format("%H_%M_%S");
        for (n, artifact) in artifacts.iter().enumerate() {
            let name = format!(
                "{stamp}-{}.{}",
                n + 1,
                verdict.mode.artifact_extension()
            );
            sealant_core::fs::write(dir.join(&name), artifact)?;
            saved.push(name);
        }
    }

    if config.emit_report_on_leak {
        let report = LeakReport {
            case: verdict.case.clone(),
            mode: verdict.mode,
            leak_size_kb: verdict.leak_size_kb,
            threshold_kb: config.leak_threshold_kb,
            metric_deltas: verdict.metric_deltas.clone(),
            rounds: rounds.to_vec(),
            artifacts: saved.clone(),
            generated_at: now,
        };
        let json = serde_json::to_string_pretty(&report)?;
        sealant_core::fs::write(dir.join(REPORT_FILE_NAME), json)?;
    }

    info!(
        case = %verdict.case,
        dir = %dir.display(),
        artifacts = saved.len(),
        "Saved leak evidence"
    );
    Ok(Some(dir))
}
