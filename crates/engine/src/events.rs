//! Decoded instrumentation events and the shared state they feed.

use tracing::trace;

use crate::capture::HeapChunkCollector;
use crate::trackers::{MemoryAllocationTracker, NetworkActivityTracker};

/// An instrumentation event the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectorEvent {
    /// A network request left the page.
    RequestSent {
        request_id: String,
        dedup_key: Option<String>,
    },
    /// A network request finished or failed.
    RequestResolved { request_id: String },
    /// Latest sizes of heap fragments as `(fragment_id, size_bytes)`.
    AllocationUpdate(Vec<(u64, u64)>),
    /// One chunk of a heap artifact being streamed.
    HeapChunk(String),
}

/// Everything the event-dispatch side writes and the session side reads.
///
/// A connector receives this behind an `Arc` and calls [`dispatch`] for every
/// decoded event from its own task while the session polls the trackers.
///
/// [`dispatch`]: SessionActivity::dispatch
#[derive(Debug, Default)]
pub struct SessionActivity {
    pub network: NetworkActivityTracker,
    pub memory: MemoryAllocationTracker,
    pub chunks: HeapChunkCollector,
}

impl SessionActivity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one event to the tracker or collector that owns it.
    pub fn dispatch(&self, event: InspectorEvent) {
        match event {
            InspectorEvent::RequestSent {
                request_id,
                dedup_key,
            } => self
                .network
                .on_request_sent(&request_id, dedup_key.as_deref()),
            InspectorEvent::RequestResolved { request_id } => {
                self.network.on_request_resolved(&request_id);
            }
            InspectorEvent::AllocationUpdate(batch) => {
                trace!(fragments = batch.len(), "Allocation update");
                self.memory.on_allocation_update(batch);
            }
            InspectorEvent::HeapChunk(chunk) => self.chunks.push(&chunk),
        }
    }

    /// Clear both trackers ahead of a quiescence wait.
    pub fn reset_trackers(&self) {
        self.network.reset();
        self.memory.reset();
    }
}
