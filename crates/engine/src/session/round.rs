//! One measurement round: warm-up, measured repeats, classification.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use sealant_core::ResultExt;

use super::outcome::MetricDelta;
use crate::action::{MeasuredAction, StepContext};
use crate::classifier::{
    self, Classification, MeasureMode, bucket_timeline, check_leak_with_snapshots,
    check_leak_with_timeline,
};
use crate::config::SealantConfig;
use crate::error::Result;
use crate::events::SessionActivity;
use crate::heap::ParsedHeapProfile;
use crate::inspector::Inspector;
use crate::quiescence::QuiescenceDetector;

/// Pause before each timeline repeat so neighbouring repeats never share a
/// sample checkpoint.
pub const TIMELINE_STEP_PACING: Duration = Duration::from_millis(100);

/// Raw data gathered by the measured repeats of one round.
#[derive(Debug)]
pub(crate) enum RoundData {
    Timeline {
        artifact: String,
        durations: Vec<Duration>,
    },
    Snapshot {
        artifacts: Vec<String>,
    },
}

impl RoundData {
    pub(crate) fn into_artifacts(self) -> Vec<String> {
        match self {
            Self::Timeline { artifact, .. } => vec![artifact],
            Self::Snapshot { artifacts } => artifacts,
        }
    }
}

/// Metric values keyed by label, in configuration order.
pub(crate) type MetricSample = Vec<(String, f64)>;

/// Borrowed view of a connected session used to drive repeats.
pub(crate) struct RoundRunner<'a> {
    pub inspector: &'a dyn Inspector,
    pub detector: &'a QuiescenceDetector,
    pub activity: &'a SessionActivity,
    pub config: &'a SealantConfig,
    pub mode: MeasureMode,
    pub auto_wait: bool,
}

impl RoundRunner<'_> {
    /// Evaluate every configured metric; failures are logged and skipped.
    pub(crate) async fn sample_metrics(&self) -> MetricSample {
        let mut sample = Vec::with_capacity(self.config.metrics.len());
        for metric in &self.config.metrics {
            let value = self
                .inspector
                .evaluate(&metric.expression)
                .await
                .into_option_logged(&format!("Metric '{}' could not be evaluated", metric.label));

            match value.as_ref().map(serde_json::Value::as_f64) {
                Some(Some(number)) => sample.push((metric.label.clone(), number)),
                Some(None) => warn!(metric = %metric.label, "Metric value is not numeric, skipping"),
                None => {}
            }
        }
        sample
    }

    /// Run the untimed warm-up repeats.
    pub(crate) async fn warm_up(&self, action: &mut dyn MeasuredAction) -> Result<()> {
        for repeat in 0..self.config.warm_up_repeats {
            self.repeat(repeat, true, action).await?;
        }
        Ok(())
    }

    /// Run `step_count` measured repeats and fetch the heap artifacts.
    pub(crate) async fn collect(
        &self,
        step_count: usize,
        action: &mut dyn MeasuredAction,
    ) -> Result<RoundData> {
        match self.mode {
            MeasureMode::Timeline => {
                self.inspector.start_heap_timeline().await?;
                let mut durations = Vec::with_capacity(step_count);
                for repeat in 0..step_count {
                    let started = Instant::now();
                    tokio::time::sleep(TIMELINE_STEP_PACING).await;
                    self.repeat(repeat, false, action).await?;
                    durations.push(started.elapsed());
                }
                let artifact = self.capture(MeasureMode::Timeline).await?;
                Ok(RoundData::Timeline {
                    artifact,
                    durations,
                })
            }
            MeasureMode::Snapshot => {
                let mut artifacts = Vec::with_capacity(step_count);
                for repeat in 0..step_count {
                    self.repeat(repeat, false, action).await?;
                    artifacts.push(self.capture(MeasureMode::Snapshot).await?);
                }
                Ok(RoundData::Snapshot { artifacts })
            }
        }
    }

    /// Parse the round's artifacts and classify them.
    pub(crate) fn classify(&self, step_count: usize, data: &RoundData) -> Result<Classification> {
        let threshold = self.config.leak_threshold_kb;
        let classification = match data {
            RoundData::Timeline {
                artifact,
                durations,
            } => {
                let profile = ParsedHeapProfile::from_json(artifact)?;
                let steps = bucket_timeline(&profile, durations)?.measured_steps_kb();
                debug!(steps = ?steps, "Timeline result (KB/step)");
                check_leak_with_timeline(step_count, &steps, threshold)?
            }
            RoundData::Snapshot { artifacts } => {
                let sizes = artifacts
                    .iter()
                    .map(|artifact| {
                        ParsedHeapProfile::from_json(artifact)
                            .map(|profile| classifier::snapshot_size_kb(&profile))
                    })
                    .collect::<Result<Vec<_>>>()?;
                debug!(sizes = ?sizes, "Snapshot sizes (KB)");
                check_leak_with_snapshots(&sizes, threshold)?
            }
        };

        info!(
            leak_size_kb = classification.leak_size_kb,
            is_leak = classification.is_leak,
            "Round classified"
        );
        Ok(classification)
    }

    async fn repeat(
        &self,
        repeat: usize,
        warm_up: bool,
        action: &mut dyn MeasuredAction,
    ) -> Result<()> {
        self.detector.arm();
        let ctx = StepContext::new(repeat, warm_up, self.inspector, self.detector);
        action.run(&ctx).await?;

        if self.auto_wait {
            self.detector.wait_until_settled().await;
        }

        self.inspector.collect_garbage().await?;
        self.inspector.collect_garbage().await?;
        debug!(repeat, warm_up, "Repeat done");
        Ok(())
    }

    async fn capture(&self, mode: MeasureMode) -> Result<String> {
        self.activity.chunks.begin();
        self.inspector.request_heap_artifact(mode).await?;
        Ok(self
            .activity
            .chunks
            .wait_complete(self.config.capture_quiet_interval)
            .await)
    }
}

/// Per-step change of every metric sampled both before and after a round.
///
/// Metrics that did not change are left out.
pub(crate) fn metric_deltas(
    before: &MetricSample,
    after: &MetricSample,
    step_count: usize,
) -> Vec<MetricDelta> {
    if step_count == 0 {
        return Vec::new();
    }
    before
        .iter()
        .filter_map(|(label, start)| {
            let (_, end) = after.iter().find(|(l, _)| l == label)?;
            let per_step = (end - start) / step_count as f64;
            (per_step != 0.0).then(|| MetricDelta {
                label: label.clone(),
                per_step,
            })
        })
        .collect()
}
