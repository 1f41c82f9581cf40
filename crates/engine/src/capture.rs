//! Heap artifact capture.
//!
//! Artifacts are streamed as a sequence of text chunks with no explicit
//! end-of-stream marker. Completion is inferred once no chunk has arrived
//! for a fixed quiet interval, so a channel that stalls for longer than that
//! interval yields a truncated artifact (which then fails to parse).

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Buffers the chunks of the artifact currently being captured.
#[derive(Debug, Default)]
pub struct HeapChunkCollector {
    state: Mutex<CaptureState>,
}

#[derive(Debug, Default)]
struct CaptureState {
    capturing: bool,
    buffer: String,
    chunks: usize,
    last_chunk: Option<Instant>,
}

impl HeapChunkCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new capture, discarding anything buffered before.
    ///
    /// Call this before requesting the artifact so early chunks are kept.
    pub fn begin(&self) {
        let mut state = self.state.lock();
        state.capturing = true;
        state.buffer.clear();
        state.chunks = 0;
        state.last_chunk = Some(Instant::now());
    }

    /// Append a chunk to the capture in progress.
    pub fn push(&self, chunk: &str) {
        let mut state = self.state.lock();
        if !state.capturing {
            trace!("Dropping heap chunk received outside a capture");
            return;
        }
        state.buffer.push_str(chunk);
        state.chunks += 1;
        state.last_chunk = Some(Instant::now());
    }

    /// Wait until no chunk has arrived for `quiet`, then return the artifact.
    pub async fn wait_complete(&self, quiet: Duration) -> String {
        loop {
            {
                let mut state = self.state.lock();
                let idle = state
                    .last_chunk
                    .is_none_or(|last| last.elapsed() >= quiet);
                if idle {
                    state.capturing = false;
                    debug!(
                        chunks = state.chunks,
                        bytes = state.buffer.len(),
                        "Heap artifact received"
                    );
                    return std::mem::take(&mut state.buffer);
                }
            }
            tokio::time::sleep(CAPTURE_POLL_INTERVAL.min(quiet)).await;
        }
    }
}
