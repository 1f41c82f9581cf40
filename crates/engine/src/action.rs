//! The code under measurement.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::inspector::Inspector;
use crate::quiescence::{QuiescenceDetector, Settled};

/// What an action can see and do during one repeat.
pub struct StepContext<'a> {
    repeat: usize,
    warm_up: bool,
    inspector: &'a dyn Inspector,
    detector: &'a QuiescenceDetector,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        repeat: usize,
        warm_up: bool,
        inspector: &'a dyn Inspector,
        detector: &'a QuiescenceDetector,
    ) -> Self {
        Self {
            repeat,
            warm_up,
            inspector,
            detector,
        }
    }

    /// Zero-based index of this repeat within its round.
    #[must_use]
    pub const fn repeat(&self) -> usize {
        self.repeat
    }

    /// Whether this repeat is an untimed warm-up.
    #[must_use]
    pub const fn is_warm_up(&self) -> bool {
        self.warm_up
    }

    /// Evaluate an expression in the page.
    ///
    /// # Errors
    ///
    /// Propagates the inspector's error.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.inspector.evaluate(expression).await
    }

    /// Wait for the page to settle at a point the action chooses.
    ///
    /// Useful when automatic waiting is turned off for the case.
    pub async fn wait_until_settled(&self) -> Settled {
        self.detector.wait_until_settled().await
    }
}

/// An action repeated by a measurement session.
#[async_trait]
pub trait MeasuredAction: Send {
    /// Perform the action once.
    async fn run(&mut self, ctx: &StepContext<'_>) -> Result<()>;
}

/// Adapter returned by [`action_fn`].
pub struct ActionFn<F>(F);

/// Wrap an async closure taking the repeat index as a [`MeasuredAction`].
pub const fn action_fn<F, Fut>(f: F) -> ActionFn<F>
where
    F: FnMut(usize) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    ActionFn(f)
}

#[async_trait]
impl<F, Fut> MeasuredAction for ActionFn<F>
where
    F: FnMut(usize) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn run(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        (self.0)(ctx.repeat()).await
    }
}

/// Evaluates a fixed expression in the page on every repeat.
#[derive(Debug, Clone)]
pub struct EvaluateAction {
    expression: String,
}

impl EvaluateAction {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}

#[async_trait]
impl MeasuredAction for EvaluateAction {
    async fn run(&mut self, ctx: &StepContext<'_>) -> Result<()> {
        ctx.evaluate(&self.expression).await.map(drop)
    }
}
