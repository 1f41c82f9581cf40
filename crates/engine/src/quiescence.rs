//! Quiescence detection.
//!
//! After an action the page keeps loading data and allocating for a while.
//! The detector polls the session's trackers and reports the page settled
//! once all four activity signals are off, or gives up after a hard timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::QuiescenceSettings;
use crate::events::SessionActivity;

/// Multiplier applied to the memory threshold for the recent window.
const RECENT_WINDOW_FACTOR: u64 = 10;

/// How a quiescence wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Every activity signal went quiet.
    Quiet { waited: Duration },
    /// The hard timeout elapsed first; measurement proceeds anyway.
    TimedOut { waited: Duration },
}

impl Settled {
    #[must_use]
    pub const fn waited(self) -> Duration {
        match self {
            Self::Quiet { waited } | Self::TimedOut { waited } => waited,
        }
    }

    #[must_use]
    pub const fn is_timed_out(self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// The four signals evaluated on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivitySignals {
    /// Allocation in the recent window above ten times the threshold.
    pub recent_allocation: bool,
    /// Allocation between the recent and wider windows above the threshold.
    pub wider_allocation: bool,
    /// At least one tracked request has no response yet.
    pub requests_in_flight: bool,
    /// The last response came within the quiet period.
    pub recent_response: bool,
}

impl ActivitySignals {
    #[must_use]
    pub const fn any(self) -> bool {
        self.recent_allocation
            || self.wider_allocation
            || self.requests_in_flight
            || self.recent_response
    }
}

/// Polls the session trackers until the page stops producing activity.
#[derive(Debug, Clone)]
pub struct QuiescenceDetector {
    activity: Arc<SessionActivity>,
    settings: QuiescenceSettings,
}

impl QuiescenceDetector {
    pub const fn new(activity: Arc<SessionActivity>, settings: QuiescenceSettings) -> Self {
        Self { activity, settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &QuiescenceSettings {
        &self.settings
    }

    /// Clear the trackers so the next wait only sees activity from now on.
    ///
    /// The session arms the detector right before invoking the action so that
    /// requests the action issues are tracked from their start.
    pub fn arm(&self) {
        self.activity.reset_trackers();
    }

    /// Evaluate the activity signals at this instant.
    #[must_use]
    pub fn signals(&self) -> ActivitySignals {
        let s = &self.settings;
        let memory = &self.activity.memory;
        let network = &self.activity.network;

        let recent = memory.sum_in_window(Duration::ZERO, s.recent_window);
        let wider = memory.sum_in_window(s.recent_window, s.wider_window);

        ActivitySignals {
            recent_allocation: recent
                > s.memory_threshold_bytes.saturating_mul(RECENT_WINDOW_FACTOR),
            wider_allocation: wider > s.memory_threshold_bytes,
            requests_in_flight: network.active_count() > 0,
            recent_response: network.time_since_last_response() < s.quiet_period,
        }
    }

    /// Poll until every signal is off or the hard timeout elapses.
    ///
    /// The quiet period is counted from the start of the wait, so a slow
    /// action is still followed by a full quiet period. A timeout is logged
    /// and reported as [`Settled::TimedOut`]; it is never an error.
    pub async fn wait_until_settled(&self) -> Settled {
        self.activity.network.restart_quiet_clock();
        let started = Instant::now();
        loop {
            let signals = self.signals();
            let waited = started.elapsed();

            if !signals.any() {
                debug!(waited_ms = waited.as_millis(), "Page settled");
                return Settled::Quiet { waited };
            }
            if waited >= self.settings.hard_timeout {
                warn!(
                    timeout_secs = self.settings.hard_timeout.as_secs(),
                    signals = ?signals,
                    "Page did not settle before the hard timeout, measuring anyway"
                );
                return Settled::TimedOut { waited };
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}
