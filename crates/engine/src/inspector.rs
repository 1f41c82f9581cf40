//! Capability interfaces to the instrumented runtime.
//!
//! The engine never talks to a browser directly. A [`Connector`] opens an
//! [`Inspector`] for a [`Target`] and feeds the events it receives into the
//! session's [`SessionActivity`] from its own task.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::MeasureMode;
use crate::config::SealantConfig;
use crate::error::Result;
use crate::events::SessionActivity;

/// Commands the engine issues to an instrumented runtime.
///
/// Methods take `&self` so that a measured action can evaluate expressions
/// while the session holds the same inspector.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Enable the heap profiler domain.
    async fn enable_heap_profiler(&self) -> Result<()>;

    /// Subscribe to network and allocation events used for quiescence.
    async fn enable_activity_events(&self) -> Result<()>;

    /// Evaluate an expression in the page and return its value.
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Force one garbage collection pass.
    async fn collect_garbage(&self) -> Result<()>;

    /// Start continuous heap object tracking for a timeline.
    async fn start_heap_timeline(&self) -> Result<()>;

    /// Ask for a heap artifact; its chunks arrive as
    /// [`crate::events::InspectorEvent::HeapChunk`] events.
    ///
    /// For [`MeasureMode::Timeline`] this stops the tracking started by
    /// [`Inspector::start_heap_timeline`].
    async fn request_heap_artifact(&self, mode: MeasureMode) -> Result<()>;

    /// Close the channel. Further calls fail.
    async fn close(&self) -> Result<()>;
}

/// Opens inspectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `target`, dispatching decoded events into `activity`.
    async fn connect(
        &self,
        target: &Target,
        activity: Arc<SessionActivity>,
    ) -> Result<Box<dyn Inspector>>;
}

/// Partial connection settings supplied by a suite or a single case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOverride {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub websocket_url: Option<String>,
}

impl TargetOverride {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub websocket_url: Option<String>,
}

/// How a [`Target`] is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Connect to this WebSocket URL directly.
    WebSocket(String),
    /// Fetch this listing URL and use its first debugger URL.
    Discover(String),
}

impl Target {
    /// Merge settings field by field: case overrides beat suite overrides,
    /// which beat the configuration.
    #[must_use]
    pub fn resolve(
        config: &SealantConfig,
        suite: Option<&TargetOverride>,
        case: Option<&TargetOverride>,
    ) -> Self {
        let pick = |field: fn(&TargetOverride) -> Option<&String>| {
            case.and_then(field)
                .or_else(|| suite.and_then(field))
                .cloned()
        };

        Self {
            host: pick(|o| o.host.as_ref()).unwrap_or_else(|| config.host.clone()),
            port: case
                .and_then(|o| o.port)
                .or_else(|| suite.and_then(|o| o.port))
                .unwrap_or(config.port),
            websocket_url: pick(|o| o.websocket_url.as_ref())
                .or_else(|| config.websocket_url.clone())
                .filter(|url| !url.is_empty()),
        }
    }

    /// A WebSocket URL wins over host and port.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        match &self.websocket_url {
            Some(url) => Endpoint::WebSocket(url.clone()),
            None => Endpoint::Discover(format!(
                "{}:{}/json",
                self.host.trim_end_matches('/'),
                self.port
            )),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.websocket_url {
            Some(url) => write!(f, "{url}"),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
