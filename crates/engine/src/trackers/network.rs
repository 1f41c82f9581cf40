use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Counts requests still awaiting a response, once per distinct request kind.
///
/// A request joins the active set only if its de-duplication key (the value
/// of a configured header, or the request id when the header is absent) has
/// never been seen by this tracker. Repeated polling of the same endpoint
/// therefore does not keep the page looking busy forever.
#[derive(Debug)]
pub struct NetworkActivityTracker {
    state: Mutex<NetworkState>,
}

#[derive(Debug)]
struct NetworkState {
    active: HashSet<String>,
    seen_keys: HashSet<String>,
    last_response: Instant,
}

impl Default for NetworkActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkActivityTracker {
    /// Create an empty tracker whose last response is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NetworkState {
                active: HashSet::new(),
                seen_keys: HashSet::new(),
                last_response: Instant::now(),
            }),
        }
    }

    /// Record an outgoing request.
    pub fn on_request_sent(&self, request_id: &str, dedup_key: Option<&str>) {
        let key = dedup_key.unwrap_or(request_id);
        let mut state = self.state.lock();
        if state.seen_keys.insert(key.to_owned()) {
            state.active.insert(request_id.to_owned());
            trace!(request_id, key, "Tracking request");
        }
    }

    /// Record that a request finished or failed.
    ///
    /// Unknown ids are ignored.
    pub fn on_request_resolved(&self, request_id: &str) {
        let mut state = self.state.lock();
        if state.active.remove(request_id) {
            state.last_response = Instant::now();
            trace!(request_id, "Request resolved");
        }
    }

    /// Number of requests still in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Time elapsed since the last tracked response (or since the last reset).
    #[must_use]
    pub fn time_since_last_response(&self) -> Duration {
        self.state.lock().last_response.elapsed()
    }

    /// Count the quiet period from now, keeping tracked requests.
    pub fn restart_quiet_clock(&self) {
        self.state.lock().last_response = Instant::now();
    }

    /// Forget every request and key and restart the response clock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.active.clear();
        state.seen_keys.clear();
        state.last_response = Instant::now();
    }
}
