//! Session configuration.
//!
//! A [`SealantConfig`] is an explicit value handed to every session; nothing
//! is read from globals once a session starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a measurement session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealantConfig {
    /// Measured repeats in the first round.
    #[serde(default = "default_repeat_count")]
    pub repeat_count: usize,

    /// Extra rounds allowed after a round reports a leak.
    #[serde(default = "default_escalation_rounds_max")]
    pub escalation_rounds_max: usize,

    /// Untimed repeats run at the start of every round.
    #[serde(default)]
    pub warm_up_repeats: usize,

    /// Request header whose value identifies repeated requests of one kind.
    #[serde(default = "default_dedup_header_name")]
    pub dedup_header_name: String,

    /// Instrumentation host, including the scheme.
    #[serde(default = "default_host")]
    pub host: String,

    /// Instrumentation port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Direct WebSocket URL; bypasses host/port discovery when set.
    #[serde(default)]
    pub websocket_url: Option<String>,

    /// Leak rate above which a round reports a leak, in KB per repeat.
    #[serde(default = "default_leak_threshold_kb")]
    pub leak_threshold_kb: f64,

    /// Wait for quiescence after every repeat.
    #[serde(default = "default_true")]
    pub wait_for_quiescence: bool,

    #[serde(default)]
    pub quiescence: QuiescenceSettings,

    /// Time without a new heap chunk after which an artifact is complete.
    #[serde(with = "duration_secs", default = "default_capture_quiet_interval", rename = "capture_quiet_interval_secs")]
    pub capture_quiet_interval: Duration,

    /// Save the final round's artifacts when the verdict is a leak.
    #[serde(default = "default_true")]
    pub save_artifact_on_leak: bool,

    /// Write a JSON report when the verdict is a leak.
    #[serde(default = "default_true")]
    pub emit_report_on_leak: bool,

    /// Directory that receives per-case leak artifacts and reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Page expressions evaluated before and after each round.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricExpression>,
}

/// Thresholds of the quiescence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuiescenceSettings {
    #[serde(with = "duration_secs", default = "default_recent_window", rename = "recent_window_secs")]
    pub recent_window: Duration,

    #[serde(with = "duration_secs", default = "default_wider_window", rename = "wider_window_secs")]
    pub wider_window: Duration,

    /// Allocation volume that counts as activity in the wider window; ten
    /// times this counts as activity in the recent window.
    #[serde(default = "default_memory_threshold_bytes")]
    pub memory_threshold_bytes: u64,

    /// Time since the last network response required to settle.
    #[serde(with = "duration_secs", default = "default_quiet_period", rename = "quiet_period_secs")]
    pub quiet_period: Duration,

    #[serde(with = "duration_secs", default = "default_hard_timeout", rename = "hard_timeout_secs")]
    pub hard_timeout: Duration,

    #[serde(with = "duration_millis", default = "default_poll_interval", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
}

impl Default for QuiescenceSettings {
    fn default() -> Self {
        Self {
            recent_window: default_recent_window(),
            wider_window: default_wider_window(),
            memory_threshold_bytes: default_memory_threshold_bytes(),
            quiet_period: default_quiet_period(),
            hard_timeout: default_hard_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// A labelled page expression with a numeric result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricExpression {
    pub label: String,
    pub expression: String,
}

impl MetricExpression {
    pub fn new(label: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            expression: expression.into(),
        }
    }
}

impl Default for SealantConfig {
    fn default() -> Self {
        Self {
            repeat_count: default_repeat_count(),
            escalation_rounds_max: default_escalation_rounds_max(),
            warm_up_repeats: 0,
            dedup_header_name: default_dedup_header_name(),
            host: default_host(),
            port: default_port(),
            websocket_url: None,
            leak_threshold_kb: default_leak_threshold_kb(),
            wait_for_quiescence: true,
            quiescence: QuiescenceSettings::default(),
            capture_quiet_interval: default_capture_quiet_interval(),
            save_artifact_on_leak: true,
            emit_report_on_leak: true,
            output_dir: default_output_dir(),
            metrics: default_metrics(),
        }
    }
}

impl SealantConfig {
    /// Set the number of measured repeats in the first round.
    #[must_use]
    pub const fn repeat_count(mut self, count: usize) -> Self {
        self.repeat_count = count;
        self
    }

    /// Set how many extra rounds a suspected leak may trigger.
    #[must_use]
    pub const fn escalation_rounds_max(mut self, rounds: usize) -> Self {
        self.escalation_rounds_max = rounds;
        self
    }

    /// Set the number of untimed warm-up repeats per round.
    #[must_use]
    pub const fn warm_up_repeats(mut self, repeats: usize) -> Self {
        self.warm_up_repeats = repeats;
        self
    }

    /// Set the leak threshold in KB per repeat.
    #[must_use]
    pub const fn leak_threshold_kb(mut self, threshold: f64) -> Self {
        self.leak_threshold_kb = threshold;
        self
    }

    /// Enable or disable the automatic quiescence wait.
    #[must_use]
    pub const fn wait_for_quiescence(mut self, wait: bool) -> Self {
        self.wait_for_quiescence = wait;
        self
    }

    /// Connect straight to a WebSocket URL.
    #[must_use]
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Set the leak output directory.
    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Replace the metric expressions.
    #[must_use]
    pub fn metrics(mut self, metrics: Vec<MetricExpression>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Turn off artifact saving and report emission.
    #[must_use]
    pub const fn without_persistence(mut self) -> Self {
        self.save_artifact_on_leak = false;
        self.emit_report_on_leak = false;
        self
    }

    /// Defaults overridden by `SEALANT_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Override fields from `SEALANT_*` environment variables.
    ///
    /// Values that do not parse are ignored.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Ok(host) = std::env::var("SEALANT_HOST") {
            self.host = host;
        }

        if let Some(port) = env_parsed("SEALANT_PORT") {
            self.port = port;
        }

        if let Ok(url) = std::env::var("SEALANT_WS_URL") {
            self.websocket_url = Some(url);
        }

        if let Some(count) = env_parsed("SEALANT_REPEAT_COUNT") {
            self.repeat_count = count;
        }

        if let Some(threshold) = env_parsed("SEALANT_LEAK_THRESHOLD_KB") {
            self.leak_threshold_kb = threshold;
        }

        if let Ok(dir) = std::env::var("SEALANT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }

        self
    }

    /// Load configuration from a file: JSON for `.json`, TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns `Error::Core` if the file cannot be read and `Error::Config` if
    /// it cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = sealant_core::fs::read_to_string(path)?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::config(format!("Failed to parse config: {e}")))
        } else {
            toml::from_str(&content).map_err(|e| Error::config(format!("Failed to parse config: {e}")))
        }
    }

    /// Reject configurations no session can run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.repeat_count < 2 {
            return Err(Error::config(format!(
                "repeat_count must be at least 2, got {}",
                self.repeat_count
            )));
        }
        if self.leak_threshold_kb.is_nan() || self.leak_threshold_kb < 0.0 {
            return Err(Error::config(format!(
                "leak_threshold_kb must be non-negative, got {}",
                self.leak_threshold_kb
            )));
        }
        if self.quiescence.wider_window <= self.quiescence.recent_window {
            return Err(Error::config(
                "quiescence.wider_window must be longer than quiescence.recent_window",
            ));
        }
        if self.quiescence.poll_interval.is_zero() {
            return Err(Error::config("quiescence.poll_interval must be non-zero"));
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

const fn default_repeat_count() -> usize {
    5
}

const fn default_escalation_rounds_max() -> usize {
    1
}

fn default_dedup_header_name() -> String {
    "unique_header".to_string()
}

fn default_host() -> String {
    "http://localhost".to_string()
}

const fn default_port() -> u16 {
    9222
}

const fn default_leak_threshold_kb() -> f64 {
    400.0
}

const fn default_true() -> bool {
    true
}

const fn default_recent_window() -> Duration {
    Duration::from_secs(2)
}

const fn default_wider_window() -> Duration {
    Duration::from_secs(7)
}

const fn default_memory_threshold_bytes() -> u64 {
    10_000
}

const fn default_quiet_period() -> Duration {
    Duration::from_secs(7)
}

const fn default_hard_timeout() -> Duration {
    Duration::from_secs(300)
}

const fn default_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

const fn default_capture_quiet_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("leaks")
}

fn default_metrics() -> Vec<MetricExpression> {
    vec![
        MetricExpression::new("DOM elements", "document.getElementsByTagName('*').length"),
        MetricExpression::new(
            "Click listeners",
            "Array.from(document.querySelectorAll('*'))\
             .reduce((n, el) => n + ((getEventListeners(el).click || []).length), 0)",
        ),
    ]
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialization helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]

    use super::*;

    #[test]
    fn test_default_config() {
        let config = SealantConfig::default();
        assert_eq!(config.repeat_count, 5);
        assert_eq!(config.escalation_rounds_max, 1);
        assert_eq!(config.dedup_header_name, "unique_header");
        assert_eq!(config.port, 9222);
        assert_eq!(config.leak_threshold_kb, 400.0);
        assert_eq!(config.quiescence.hard_timeout, Duration::from_secs(300));
        assert_eq!(config.metrics.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = SealantConfig::default()
            .repeat_count(3)
            .escalation_rounds_max(2)
            .leak_threshold_kb(50.0)
            .websocket_url("ws://127.0.0.1:9222/devtools/page/1")
            .output_dir("/tmp/leaks")
            .without_persistence();

        assert_eq!(config.repeat_count, 3);
        assert_eq!(config.escalation_rounds_max, 2);
        assert_eq!(config.leak_threshold_kb, 50.0);
        assert_eq!(
            config.websocket_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/1")
        );
        assert_eq!(config.output_dir, PathBuf::from("/tmp/leaks"));
        assert!(!config.save_artifact_on_leak);
        assert!(!config.emit_report_on_leak);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealant.toml");
        std::fs::write(
            &path,
            "repeat_count = 3\n\n[quiescence]\nquiet_period_secs = 1\npoll_interval_ms = 250\n",
        )
        .unwrap();

        let config = SealantConfig::from_file(&path).unwrap();
        assert_eq!(config.repeat_count, 3);
        assert_eq!(config.quiescence.quiet_period, Duration::from_secs(1));
        assert_eq!(config.quiescence.poll_interval, Duration::from_millis(250));
        assert_eq!(config.quiescence.wider_window, Duration::from_secs(7));
        assert_eq!(config.host, "http://localhost");
    }

    #[test]
    fn test_json_config_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealant.json");
        std::fs::write(
            &path,
            r#"{"leak_threshold_kb": 12.5, "metrics": [{"label": "nodes", "expression": "1"}]}"#,
        )
        .unwrap();

        let config = SealantConfig::from_file(&path).unwrap();
        assert_eq!(config.leak_threshold_kb, 12.5);
        assert_eq!(config.metrics, vec![MetricExpression::new("nodes", "1")]);
    }

    #[test]
    fn test_unparseable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "repeat_count = \"many\"").unwrap();

        assert!(matches!(
            SealantConfig::from_file(&path),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SealantConfig::default().repeat_count(1).validate().is_err());
        assert!(
            SealantConfig::default()
                .leak_threshold_kb(-1.0)
                .validate()
                .is_err()
        );
        assert!(
            SealantConfig::default()
                .leak_threshold_kb(f64::NAN)
                .validate()
                .is_err()
        );

        let mut config = SealantConfig::default();
        config.quiescence.wider_window = config.quiescence.recent_window;
        assert!(config.validate().is_err());
    }
}
