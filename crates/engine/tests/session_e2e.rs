//! End-to-end measurement sessions against a scripted in-memory runtime.
//!
//! Tests verify that:
//! - A steady 500 KB/step leak escalates from 3 to 5 snapshot repeats and ends
//!   with a leak verdict of about 500 KB
//! - The timeline estimator reaches the same verdict
//! - Garbage that is collected between repeats is accepted after one round
//! - Leak evidence is written to the output directory
//! - Metric deltas cover the measured repeats, not the warm-up
//! - The channel is closed even when the action fails

#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;

use sealant_engine::report::REPORT_FILE_NAME;
use sealant_engine::{
    CaseOptions, Connector, Error, EvaluateAction, Inspector, InspectorEvent, LeakReport,
    MeasureMode, MetricExpression, Result, SealantConfig, SessionActivity, SessionState, Suite,
    Target, TargetOverride, action_fn, measure_case,
};

const LEAK_PER_STEP: u64 = 500_000;
const CHURN_PER_STEP: u64 = 800_000;

/// Observations shared between the test and the fake runtime.
#[derive(Default)]
struct Runtime {
    closed: AtomicBool,
    actions: AtomicUsize,
    gc_passes: AtomicUsize,
    refuse_connection: AtomicBool,
    last_target: Mutex<Option<Target>>,
}

struct FakeConnector {
    runtime: Arc<Runtime>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        target: &Target,
        activity: Arc<SessionActivity>,
    ) -> Result<Box<dyn Inspector>> {
        if self.runtime.refuse_connection.load(Ordering::SeqCst) {
            return Err(Error::channel("connection refused"));
        }
        *self.runtime.last_target.lock() = Some(target.clone());
        Ok(Box::new(FakeInspector::new(
            Arc::clone(&self.runtime),
            activity,
        )))
    }
}

#[derive(Debug, Clone, Copy)]
struct FakeNode {
    size: u64,
    transient: bool,
}

struct Tracking {
    started: Instant,
    samples: Vec<(u64, u64)>,
}

struct Heap {
    next_id: u64,
    nodes: BTreeMap<u64, FakeNode>,
    tracking: Option<Tracking>,
    requests: u64,
}

impl Heap {
    fn new() -> Self {
        let nodes = (1..=3)
            .map(|id| {
                (
                    id,
                    FakeNode {
                        size: 1_000,
                        transient: false,
                    },
                )
            })
            .collect();
        Self {
            next_id: 4,
            nodes,
            tracking: None,
            requests: 0,
        }
    }

    fn last_id(&self) -> u64 {
        self.next_id - 1
    }

    fn allocate(&mut self, size: u64, transient: bool) {
        self.nodes.insert(self.next_id, FakeNode { size, transient });
        self.next_id += 1;
        self.sample();
    }

    fn sample(&mut self) {
        let last_id = self.last_id();
        if let Some(tracking) = self.tracking.as_mut() {
            let elapsed = u64::try_from(tracking.started.elapsed().as_micros()).unwrap();
            tracking.samples.push((elapsed, last_id));
        }
    }

    fn retained_leaks(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.size == LEAK_PER_STEP && !n.transient)
            .count()
    }

    fn artifact(&self, samples: &[(u64, u64)]) -> String {
        let nodes: Vec<u64> = self
            .nodes
            .iter()
            .flat_map(|(id, node)| [0, 0, *id, node.size, 0, 0])
            .collect();
        let samples: Vec<u64> = samples.iter().flat_map(|(ts, id)| [*ts, *id]).collect();
        json!({ "nodes": nodes, "samples": samples }).to_string()
    }
}

struct FakeInspector {
    runtime: Arc<Runtime>,
    activity: Arc<SessionActivity>,
    heap: Mutex<Heap>,
}

impl FakeInspector {
    fn new(runtime: Arc<Runtime>, activity: Arc<SessionActivity>) -> Self {
        Self {
            runtime,
            activity,
            heap: Mutex::new(Heap::new()),
        }
    }

    fn stream(&self, artifact: &str) {
        for chunk in artifact.as_bytes().chunks(64) {
            self.activity
                .dispatch(InspectorEvent::HeapChunk(String::from_utf8_lossy(chunk).into_owned()));
        }
    }

    /// A request that resolves two seconds after the action issued it.
    fn issue_request(&self) {
        let request_id = {
            let mut heap = self.heap.lock();
            heap.requests += 1;
            heap.requests.to_string()
        };
        self.activity.dispatch(InspectorEvent::RequestSent {
            request_id: request_id.clone(),
            dedup_key: Some("SaveItem".into()),
        });
        let activity = Arc::clone(&self.activity);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            activity.dispatch(InspectorEvent::RequestResolved { request_id });
        });
    }
}

#[async_trait]
impl Inspector for FakeInspector {
    async fn enable_heap_profiler(&self) -> Result<()> {
        Ok(())
    }

    async fn enable_activity_events(&self) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        match expression {
            "leak()" => {
                self.runtime.actions.fetch_add(1, Ordering::SeqCst);
                self.heap.lock().allocate(LEAK_PER_STEP, false);
                self.activity
                    .dispatch(InspectorEvent::AllocationUpdate(vec![(1, LEAK_PER_STEP)]));
                self.issue_request();
                Ok(Value::Null)
            }
            "churn()" => {
                self.runtime.actions.fetch_add(1, Ordering::SeqCst);
                self.heap.lock().allocate(CHURN_PER_STEP, true);
                Ok(Value::Null)
            }
            "dom_count()" => Ok(json!(self.heap.lock().retained_leaks() * 10)),
            "document.title" => Ok(json!("fake page")),
            "broken()" => Err(Error::channel("evaluation failed")),
            _ => Ok(Value::Null),
        }
    }

    async fn collect_garbage(&self) -> Result<()> {
        self.runtime.gc_passes.fetch_add(1, Ordering::SeqCst);
        self.heap.lock().nodes.retain(|_, node| !node.transient);
        Ok(())
    }

    async fn start_heap_timeline(&self) -> Result<()> {
        let mut heap = self.heap.lock();
        let last_id = heap.last_id();
        heap.tracking = Some(Tracking {
            started: Instant::now(),
            samples: vec![(0, last_id)],
        });
        Ok(())
    }

    async fn request_heap_artifact(&self, mode: MeasureMode) -> Result<()> {
        let artifact = {
            let mut heap = self.heap.lock();
            match mode {
                MeasureMode::Snapshot => heap.artifact(&[]),
                MeasureMode::Timeline => {
                    heap.sample();
                    let tracking = heap
                        .tracking
                        .take()
                        .ok_or_else(|| Error::channel("heap tracking was not started"))?;
                    heap.artifact(&tracking.samples)
                }
            }
        };
        self.stream(&artifact);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.runtime.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn config(output_dir: &std::path::Path) -> SealantConfig {
    SealantConfig::default()
        .repeat_count(3)
        .output_dir(output_dir)
        .metrics(vec![
            MetricExpression::new("DOM elements", "dom_count()"),
            MetricExpression::new("Title", "document.title"),
            MetricExpression::new("Broken", "broken()"),
        ])
}

fn connector(runtime: &Arc<Runtime>) -> Arc<dyn Connector> {
    Arc::new(FakeConnector {
        runtime: Arc::clone(runtime),
    })
}

#[tokio::test(start_paused = true)]
async fn steady_snapshot_leak_escalates_and_stays_a_leak() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = EvaluateAction::new("leak()");

    let outcome = measure_case(
        config(tmp.path()).leak_threshold_kb(400.0),
        connector(&runtime),
        "add_item",
        CaseOptions::snapshot(),
        &mut action,
    )
    .await
    .unwrap();

    assert_eq!(outcome.rounds.len(), 2);
    assert_eq!(outcome.rounds[0].step_count, 3);
    assert!(outcome.rounds[0].is_leak);
    assert_eq!(outcome.rounds[1].step_count, 5);
    assert_eq!(outcome.final_state, SessionState::Exhausted);

    assert!(outcome.verdict.is_leak);
    assert!((outcome.verdict.leak_size_kb - 500.0).abs() < 1e-6);
    assert_eq!(outcome.verdict.metric_deltas.len(), 1);
    assert_eq!(outcome.verdict.metric_deltas[0].label, "DOM elements");
    assert!((outcome.verdict.metric_deltas[0].per_step - 10.0).abs() < 1e-9);

    assert_eq!(runtime.actions.load(Ordering::SeqCst), 8);
    assert_eq!(runtime.gc_passes.load(Ordering::SeqCst), 16);
    assert!(runtime.closed.load(Ordering::SeqCst));

    let err = outcome.into_result().unwrap_err();
    assert!(matches!(err, Error::LeakDetected { .. }));
    assert!((err.verdict().unwrap().leak_size_kb - 500.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn steady_timeline_leak_is_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = EvaluateAction::new("leak()");

    let outcome = measure_case(
        config(tmp.path()).repeat_count(5).without_persistence(),
        connector(&runtime),
        "add_item_timeline",
        CaseOptions::timeline(),
        &mut action,
    )
    .await
    .unwrap();

    let steps: Vec<usize> = outcome.rounds.iter().map(|r| r.step_count).collect();
    assert_eq!(steps, vec![5, 7]);
    assert!(outcome.is_leak());
    assert_eq!(outcome.verdict.mode, MeasureMode::Timeline);
    assert!((outcome.verdict.leak_size_kb - 500.0).abs() < 1e-6);
    assert!(outcome.saved_to.is_none());
}

#[tokio::test(start_paused = true)]
async fn collected_garbage_is_accepted_after_one_round() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = EvaluateAction::new("churn()");

    for options in [CaseOptions::snapshot(), CaseOptions::timeline()] {
        let outcome = measure_case(
            config(tmp.path()).repeat_count(5),
            connector(&runtime),
            "open_close",
            options,
            &mut action,
        )
        .await
        .unwrap();

        assert_eq!(outcome.rounds.len(), 1);
        assert_eq!(outcome.final_state, SessionState::Accepted);
        assert!(!outcome.is_leak());
        assert!(outcome.verdict.leak_size_kb.abs() < 1e-6);
        assert!(outcome.verdict.metric_deltas.is_empty());
        assert!(outcome.into_result().is_ok());
    }

    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn leak_evidence_is_saved() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = EvaluateAction::new("leak()");

    let outcome = measure_case(
        config(tmp.path()),
        connector(&runtime),
        "add_item",
        CaseOptions::snapshot(),
        &mut action,
    )
    .await
    .unwrap();

    let dir = outcome.saved_to.clone().unwrap();
    assert_eq!(dir, tmp.path().join("add_item"));

    let report: LeakReport = serde_json::from_str(
        &std::fs::read_to_string(dir.join(REPORT_FILE_NAME)).unwrap(),
    )
    .unwrap();
    assert_eq!(report.case, "add_item");
    assert_eq!(report.rounds.len(), 2);
    assert_eq!(report.artifacts.len(), 5);
    for name in &report.artifacts {
        assert!(name.ends_with(".heapsnapshot"));
        assert!(dir.join(name).is_file());
    }
}

#[tokio::test(start_paused = true)]
async fn warm_up_repeats_run_before_every_round() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = EvaluateAction::new("churn()");

    let outcome = measure_case(
        config(tmp.path()).warm_up_repeats(2),
        connector(&runtime),
        "warm",
        CaseOptions::snapshot(),
        &mut action,
    )
    .await
    .unwrap();

    assert!(outcome.rounds[0].warm_up);
    assert_eq!(runtime.actions.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn metric_deltas_exclude_warm_up_repeats() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = EvaluateAction::new("leak()");

    let outcome = measure_case(
        config(tmp.path())
            .warm_up_repeats(3)
            .escalation_rounds_max(0),
        connector(&runtime),
        "warm_leak",
        CaseOptions::snapshot(),
        &mut action,
    )
    .await
    .unwrap();

    assert_eq!(runtime.actions.load(Ordering::SeqCst), 6);
    let round = &outcome.rounds[0];
    assert_eq!(round.metric_deltas.len(), 1);
    assert_eq!(round.metric_deltas[0].label, "DOM elements");
    assert!((round.metric_deltas[0].per_step - 10.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn channel_is_closed_when_action_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = action_fn(|repeat| async move {
        if repeat == 1 {
            Err(Error::action("button not found"))
        } else {
            Ok(())
        }
    });

    let result = measure_case(
        config(tmp.path()),
        connector(&runtime),
        "broken",
        CaseOptions::snapshot().track_activity(false),
        &mut action,
    )
    .await;

    assert!(matches!(result, Err(Error::Action { .. })));
    assert!(runtime.closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn refused_connection_surfaces_channel_error() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    runtime.refuse_connection.store(true, Ordering::SeqCst);
    let mut action = EvaluateAction::new("leak()");

    let err = measure_case(
        config(tmp.path()),
        connector(&runtime),
        "unreachable",
        CaseOptions::snapshot(),
        &mut action,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Channel { .. }));
    assert!(err.is_fatal_to_session());
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected_before_connecting() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let mut action = EvaluateAction::new("leak()");

    let err = measure_case(
        config(tmp.path()).repeat_count(1),
        connector(&runtime),
        "too_short",
        CaseOptions::snapshot(),
        &mut action,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Config { .. }));
    assert!(runtime.last_target.lock().is_none());
}

#[tokio::test(start_paused = true)]
async fn case_target_beats_suite_target() {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(Runtime::default());
    let suite = Suite::bind(config(tmp.path()), connector(&runtime))
        .target(TargetOverride::default().host("http://suite-host").port(9000));
    let mut action = EvaluateAction::new("churn()");

    suite
        .measure("suite_default", CaseOptions::snapshot(), &mut action)
        .await
        .unwrap();
    let target = runtime.last_target.lock().clone().unwrap();
    assert_eq!(target.host, "http://suite-host");
    assert_eq!(target.port, 9000);

    let case = TargetOverride::default().websocket_url("ws://127.0.0.1:9229/abc");
    suite
        .measure("case_override", CaseOptions::snapshot().target(case), &mut action)
        .await
        .unwrap();
    let target = runtime.last_target.lock().clone().unwrap();
    assert_eq!(target.websocket_url.as_deref(), Some("ws://127.0.0.1:9229/abc"));
    assert_eq!(target.port, 9000);
}
