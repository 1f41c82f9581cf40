use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::SessionState;
use crate::classifier::MeasureMode;
use crate::error::{Error, Result};

/// Change of one metric expression per measured repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub label: String,
    pub per_step: f64,
}

/// One full pass of repeats followed by classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRound {
    /// Zero-based round index within the session.
    pub index: usize,
    /// Measured repeats in this round.
    pub step_count: usize,
    /// Whether untimed warm-up repeats preceded the measured ones.
    pub warm_up: bool,
    pub leak_size_kb: f64,
    pub is_leak: bool,
    pub metric_deltas: Vec<MetricDelta>,
}

/// Final result of a session: the verdict of the last round executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub case: String,
    pub mode: MeasureMode,
    pub leak_size_kb: f64,
    pub is_leak: bool,
    pub metric_deltas: Vec<MetricDelta>,
}

impl Verdict {
    pub(crate) fn from_round(case: &str, mode: MeasureMode, round: &MeasurementRound) -> Self {
        Self {
            case: case.to_string(),
            mode,
            leak_size_kb: round.leak_size_kb,
            is_leak: round.is_leak,
            metric_deltas: round.metric_deltas.clone(),
        }
    }
}

/// Everything a session produced.
///
/// A leak verdict is a value here; call [`Outcome::into_result`] to turn it
/// into an `Error::LeakDetected` failure for a test harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub verdict: Verdict,
    pub rounds: Vec<MeasurementRound>,
    /// `Accepted` or `Exhausted`.
    pub final_state: SessionState,
    /// Directory holding saved artifacts and the report, if any were written.
    pub saved_to: Option<PathBuf>,
}

impl Outcome {
    #[must_use]
    pub const fn is_leak(&self) -> bool {
        self.verdict.is_leak
    }

    /// `Ok(self)` unless the verdict is a leak.
    ///
    /// # Errors
    ///
    /// Returns `Error::LeakDetected` carrying the verdict.
    pub fn into_result(self) -> Result<Self> {
        if self.verdict.is_leak {
            Err(Error::leak_detected(self.verdict))
        } else {
            Ok(self)
        }
    }
}
