#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # sealant-engine
//!
//! Memory-leak measurement for long-running pages and script runtimes.
//!
//! An action is repeated against an instrumented runtime while heap artifacts
//! are captured; the growth between repeats is estimated and compared with a
//! threshold. A suspected leak triggers a longer escalation round before the
//! verdict is final.
//!
//! ## Pieces
//!
//! - [`heap`] parses snapshot and timeline artifacts
//! - [`classifier`] turns heap sizes into a leak rate
//! - [`trackers`] and [`quiescence`] decide when a page has settled
//! - [`session`] drives connect / rounds / escalation / disconnect
//!
//! The channel to the runtime is abstracted behind [`Inspector`] and
//! [`Connector`]; `sealant-devtools` implements them over the DevTools
//! protocol.
//!
//! ## Example
//!
//! ```ignore
//! use sealant_engine::{CaseOptions, SealantConfig, Suite, action_fn};
//!
//! let suite = Suite::bind(SealantConfig::default(), connector);
//! let mut action = action_fn(|_repeat| async { open_and_close_dialog().await });
//! suite
//!     .measure("open_dialog", CaseOptions::snapshot(), &mut action)
//!     .await?
//!     .into_result()?;
//! ```

pub mod action;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod heap;
pub mod inspector;
pub mod quiescence;
pub mod report;
pub mod session;
pub mod trackers;

// Re-export commonly used items
pub use action::{ActionFn, EvaluateAction, MeasuredAction, StepContext, action_fn};
pub use capture::HeapChunkCollector;
pub use classifier::{
    Classification, LeakSize, MeasureMode, TimelineBuckets, bucket_timeline,
    check_leak_with_snapshots, check_leak_with_timeline, leak_size, snapshot_size_kb,
};
pub use config::{MetricExpression, QuiescenceSettings, SealantConfig};
pub use error::{Error, Result};
pub use events::{InspectorEvent, SessionActivity};
pub use heap::{HeapNode, ParsedHeapProfile, Sample};
pub use inspector::{Connector, Endpoint, Inspector, Target, TargetOverride};
pub use quiescence::{ActivitySignals, QuiescenceDetector, Settled};
pub use report::LeakReport;
pub use session::{
    CaseOptions, MeasurementRound, MeasurementSession, Measurer, MetricDelta, Outcome,
    SessionState, Suite, Verdict, drive, measure_case,
};
pub use trackers::{FragmentRecord, MemoryAllocationTracker, NetworkActivityTracker};
