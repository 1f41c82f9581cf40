//! Activity trackers fed by instrumentation events.
//!
//! Both trackers are shared between the event dispatcher (writer) and the
//! quiescence detector (reader), so each guards its state with a
//! [`parking_lot::Mutex`] and exposes only `&self` methods.
//!
//! Timestamps come from [`tokio::time::Instant`] so that tests can drive the
//! clock with a paused runtime.

mod memory;
mod network;

pub use memory::{FragmentRecord, MemoryAllocationTracker};
pub use network::NetworkActivityTracker;
