//! Measurement sessions.
//!
//! A session connects to one target, runs rounds of repeats of a single
//! action and stops at the first leak-free round or when the escalation
//! budget is spent:
//!
//! ```text
//! Idle -> Connected -> (WarmUp -> Measuring -> Classifying)+
//!      -> Accepted | Escalating -> ... | Exhausted -> Disconnected
//! ```
//!
//! Every escalation adds two repeats. The verdict of the last round executed
//! is the session's verdict; rounds are never averaged.

mod outcome;
mod round;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sealant_core::ResultExt;

pub use outcome::{MeasurementRound, MetricDelta, Outcome, Verdict};
pub use round::TIMELINE_STEP_PACING;

use crate::action::MeasuredAction;
use crate::classifier::MeasureMode;
use crate::config::SealantConfig;
use crate::error::{Error, Result};
use crate::events::SessionActivity;
use crate::inspector::{Connector, Inspector, Target, TargetOverride};
use crate::quiescence::QuiescenceDetector;
use crate::report;
use round::{RoundRunner, metric_deltas};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Connected,
    WarmUp,
    Measuring,
    Classifying,
    /// A round found no leak.
    Accepted,
    /// A round found a leak and another, longer round follows.
    Escalating,
    /// Every allowed round found a leak.
    Exhausted,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-case settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOptions {
    pub mode: MeasureMode,
    /// Subscribe to network and allocation events. Automatic quiescence
    /// waiting also requires the configuration's `wait_for_quiescence`.
    pub track_activity: bool,
    /// Connection settings that beat the suite's and the configuration's.
    pub target: Option<TargetOverride>,
}

impl Default for CaseOptions {
    fn default() -> Self {
        Self {
            mode: MeasureMode::Timeline,
            track_activity: true,
            target: None,
        }
    }
}

impl CaseOptions {
    #[must_use]
    pub fn timeline() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot() -> Self {
        Self {
            mode: MeasureMode::Snapshot,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn track_activity(mut self, track: bool) -> Self {
        self.track_activity = track;
        self
    }

    #[must_use]
    pub fn target(mut self, target: TargetOverride) -> Self {
        self.target = Some(target);
        self
    }
}

/// Connect, measure, disconnect.
#[async_trait]
pub trait Measurer: Send {
    /// Open the channel and enable the required domains.
    async fn connect(&mut self) -> Result<()>;

    /// Run rounds of `action` until a verdict is reached.
    async fn measure(&mut self, action: &mut dyn MeasuredAction) -> Result<Outcome>;

    /// Close the channel. Safe to call when not connected.
    async fn disconnect(&mut self) -> Result<()>;
}

/// A single case measured against one target.
pub struct MeasurementSession {
    case: String,
    config: SealantConfig,
    options: CaseOptions,
    target: Target,
    connector: Arc<dyn Connector>,
    activity: Arc<SessionActivity>,
    detector: QuiescenceDetector,
    inspector: Option<Box<dyn Inspector>>,
    state: SessionState,
}

impl MeasurementSession {
    pub fn new(
        case: impl Into<String>,
        config: SealantConfig,
        options: CaseOptions,
        target: Target,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let activity = Arc::new(SessionActivity::new());
        let detector = QuiescenceDetector::new(Arc::clone(&activity), config.quiescence);
        Self {
            case: case.into(),
            config,
            options,
            target,
            connector,
            activity,
            detector,
            inspector: None,
            state: SessionState::Idle,
        }
    }

    #[must_use]
    pub fn case(&self) -> &str {
        &self.case
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Shared tracker state fed by the connector.
    #[must_use]
    pub const fn activity(&self) -> &Arc<SessionActivity> {
        &self.activity
    }

    fn set_state(&mut self, state: SessionState) {
        Self::transition(&self.case, &mut self.state, state);
    }

    /// Field-level form of [`Self::set_state`], usable while a round borrows
    /// the rest of the session.
    fn transition(case: &str, current: &mut SessionState, to: SessionState) {
        if *current != to {
            debug!(case, from = %current, to = %to, "Session state");
            *current = to;
        }
    }
}

#[async_trait]
impl Measurer for MeasurementSession {
    async fn connect(&mut self) -> Result<()> {
        self.config.validate()?;

        let inspector = self
            .connector
            .connect(&self.target, Arc::clone(&self.activity))
            .await?;
        inspector.enable_heap_profiler().await?;
        if self.options.track_activity {
            inspector.enable_activity_events().await?;
        }
        self.inspector = Some(inspector);

        info!(case = %self.case, target = %self.target, "Connected");
        self.set_state(SessionState::Connected);
        Ok(())
    }

    async fn measure(&mut self, action: &mut dyn MeasuredAction) -> Result<Outcome> {
        let mode = self.options.mode;
        let rounds_max = self.config.escalation_rounds_max.saturating_add(1);
        let mut step_count = self.config.repeat_count;
        let mut rounds: Vec<MeasurementRound> = Vec::with_capacity(rounds_max);
        let mut last_artifacts = Vec::new();

        for index in 0..rounds_max {
            let inspector = self
                .inspector
                .as_deref()
                .ok_or_else(|| Error::channel("session is not connected"))?;
            let runner = RoundRunner {
                inspector,
                detector: &self.detector,
                activity: &self.activity,
                config: &self.config,
                mode,
                auto_wait: self.options.track_activity && self.config.wait_for_quiescence,
            };

            info!(
                case = %self.case,
                round = index + 1,
                rounds_max,
                step_count,
                mode = %mode,
                "Starting round"
            );

            let warm_up = self.config.warm_up_repeats > 0;
            if warm_up {
                Self::transition(&self.case, &mut self.state, SessionState::WarmUp);
                runner.warm_up(action).await?;
            }

            // sampled after warm-up so deltas cover the measured repeats only
            let before = runner.sample_metrics().await;

            Self::transition(&self.case, &mut self.state, SessionState::Measuring);
            let data = runner.collect(step_count, action).await?;

            Self::transition(&self.case, &mut self.state, SessionState::Classifying);
            let classification = runner.classify(step_count, &data)?;
            let after = runner.sample_metrics().await;

            let round = MeasurementRound {
                index,
                step_count,
                warm_up,
                leak_size_kb: classification.leak_size_kb,
                is_leak: classification.is_leak,
                metric_deltas: metric_deltas(&before, &after, step_count),
            };
            for delta in &round.metric_deltas {
                info!(metric = %delta.label, per_step = delta.per_step, "Metric change");
            }
            rounds.push(round);
            last_artifacts = data.into_artifacts();

            if !classification.is_leak {
                self.set_state(SessionState::Accepted);
                break;
            }
            if index + 1 < rounds_max {
                step_count = step_count.saturating_add(2);
                self.set_state(SessionState::Escalating);
            } else {
                self.set_state(SessionState::Exhausted);
            }
        }

        let last = rounds
            .last()
            .ok_or_else(|| Error::config("escalation allows no rounds"))?;
        let verdict = Verdict::from_round(&self.case, mode, last);

        let saved_to = if verdict.is_leak {
            warn!(
                case = %self.case,
                leak_size_kb = verdict.leak_size_kb,
                threshold_kb = self.config.leak_threshold_kb,
                "Memory leak detected"
            );
            report::persist_leak(&self.config, &verdict, &rounds, &last_artifacts)
                .into_option_logged("Could not save leak artifacts")
                .flatten()
        } else {
            None
        };

        Ok(Outcome {
            verdict,
            rounds,
            final_state: self.state,
            saved_to,
        })
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(inspector) = self.inspector.take() {
            inspector.close().await?;
            info!(case = %self.case, "Disconnected");
        }
        self.set_state(SessionState::Disconnected);
        Ok(())
    }
}

/// Connect, measure and always disconnect.
///
/// A measurement error wins over a disconnect error.
///
/// # Errors
///
/// Propagates connection, round and disconnect errors. A leak verdict is not
/// an error here.
pub async fn drive(
    measurer: &mut dyn Measurer,
    action: &mut dyn MeasuredAction,
) -> Result<Outcome> {
    let measured = match measurer.connect().await {
        Ok(()) => measurer.measure(action).await,
        Err(e) => Err(e),
    };
    let closed = measurer
        .disconnect()
        .await
        .tap_err(|e| warn!(error = %e, "Disconnect failed"));

    let outcome = measured?;
    closed?;
    Ok(outcome)
}

/// Connection and configuration shared by every case of a suite.
#[derive(Clone)]
pub struct Suite {
    config: SealantConfig,
    connector: Arc<dyn Connector>,
    target: Option<TargetOverride>,
}

impl Suite {
    /// Bind a suite to a configuration and a connector.
    pub fn bind(config: SealantConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            target: None,
        }
    }

    /// Connection settings for every case of the suite.
    #[must_use]
    pub fn target(mut self, target: TargetOverride) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SealantConfig {
        &self.config
    }

    /// Build an unconnected session for one case.
    #[must_use]
    pub fn session(&self, case: &str, options: CaseOptions) -> MeasurementSession {
        let target = Target::resolve(&self.config, self.target.as_ref(), options.target.as_ref());
        MeasurementSession::new(
            case,
            self.config.clone(),
            options,
            target,
            Arc::clone(&self.connector),
        )
    }

    /// Measure one case of the suite.
    ///
    /// # Errors
    ///
    /// See [`drive`].
    pub async fn measure(
        &self,
        case: &str,
        options: CaseOptions,
        action: &mut dyn MeasuredAction,
    ) -> Result<Outcome> {
        let mut session = self.session(case, options);
        drive(&mut session, action).await
    }
}

/// Measure a single case without a suite.
///
/// # Errors
///
/// See [`drive`].
pub async fn measure_case(
    config: SealantConfig,
    connector: Arc<dyn Connector>,
    case: &str,
    options: CaseOptions,
    action: &mut dyn MeasuredAction,
) -> Result<Outcome> {
    Suite::bind(config, connector)
        .measure(case, options, action)
        .await
}
