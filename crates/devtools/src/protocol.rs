//! DevTools wire format.
//!
//! Commands are `{"id", "method", "params"}` objects. Incoming frames are
//! either responses (carrying the command `id` and a `result` or `error`) or
//! events (carrying `method` and `params`). Only the events the engine's
//! trackers consume are decoded; everything else is ignored.

use serde::Deserialize;
use serde_json::{Value, json};

use sealant_engine::InspectorEvent;

use crate::error::{Error, Result};

/// Error object of a failed command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// One decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Response {
        id: u64,
        result: std::result::Result<Value, RpcError>,
    },
    Event {
        method: String,
        params: Value,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Encode a command frame.
#[must_use]
pub fn command(id: u64, method: &str, params: &Value) -> String {
    json!({ "id": id, "method": method, "params": params }).to_string()
}

/// Decode an incoming text frame.
///
/// # Errors
///
/// Returns `Error::InvalidFrame` for non-JSON text or a frame that is neither
/// a response nor an event.
pub fn decode_frame(text: &str) -> Result<Frame> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| Error::invalid_frame(e.to_string()))?;

    match (raw.id, raw.method) {
        (Some(id), _) => Ok(Frame::Response {
            id,
            result: match raw.error {
                Some(error) => Err(error),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            },
        }),
        (None, Some(method)) => Ok(Frame::Event {
            method,
            params: raw.params,
        }),
        (None, None) => Err(Error::invalid_frame("frame has neither id nor method")),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestWillBeSent {
    request_id: String,
    #[serde(default)]
    request: Option<RequestInfo>,
}

#[derive(Deserialize)]
struct RequestInfo {
    #[serde(default)]
    headers: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestDone {
    request_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeapStatsUpdate {
    stats_update: Vec<u64>,
}

#[derive(Deserialize)]
struct HeapSnapshotChunk {
    chunk: String,
}

/// Translate a protocol event into an engine event.
///
/// `dedup_header` names the request header whose value identifies repeated
/// requests; the request id is used when it is absent. Unknown methods and
/// events whose parameters do not match the expected shape yield `None`.
#[must_use]
pub fn decode_event(method: &str, params: Value, dedup_header: Option<&str>) -> Option<InspectorEvent> {
    match method {
        "Network.requestWillBeSent" => {
            let sent: RequestWillBeSent = serde_json::from_value(params).ok()?;
            let dedup_key = dedup_header.and_then(|name| {
                sent.request
                    .as_ref()
                    .and_then(|r| r.headers.get(name))
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            });
            Some(InspectorEvent::RequestSent {
                request_id: sent.request_id,
                dedup_key,
            })
        }
        "Network.loadingFinished" | "Network.loadingFailed" => {
            let done: RequestDone = serde_json::from_value(params).ok()?;
            Some(InspectorEvent::RequestResolved {
                request_id: done.request_id,
            })
        }
        "HeapProfiler.heapStatsUpdate" => {
            let update: HeapStatsUpdate = serde_json::from_value(params).ok()?;
            // triplets of (fragment index, object count, size)
            let batch = update
                .stats_update
                .chunks_exact(3)
                .filter_map(|triplet| match triplet {
                    [fragment, _count, size] => Some((*fragment, *size)),
                    _ => None,
                })
                .collect();
            Some(InspectorEvent::AllocationUpdate(batch))
        }
        "HeapProfiler.addHeapSnapshotChunk" => {
            let chunk: HeapSnapshotChunk = serde_json::from_value(params).ok()?;
            Some(InspectorEvent::HeapChunk(chunk.chunk))
        }
        _ => None,
    }
}

/// Pull the value out of a `Runtime.evaluate` result.
///
/// # Errors
///
/// Returns `Error::EvaluationFailed` if the expression threw.
pub fn evaluation_value(result: Value) -> Result<Value> {
    if let Some(details) = result.get("exceptionDetails") {
        let reason = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("unknown exception");
        return Err(Error::EvaluationFailed {
            reason: reason.to_string(),
        });
    }

    Ok(result
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;

    #[test]
    fn test_command_frame() {
        let frame: Value =
            serde_json::from_str(&command(7, "HeapProfiler.collectGarbage", &json!({}))).unwrap();
        assert_eq!(frame["id"], 7);
        assert_eq!(frame["method"], "HeapProfiler.collectGarbage");
    }

    #[test]
    fn test_decode_response_and_error() {
        assert_eq!(
            decode_frame(r#"{"id": 3, "result": {"ok": true}}"#).unwrap(),
            Frame::Response {
                id: 3,
                result: Ok(json!({"ok": true}))
            }
        );

        let frame = decode_frame(r#"{"id": 4, "error": {"code": -32601, "message": "nope"}}"#).unwrap();
        assert!(matches!(
            frame,
            Frame::Response { id: 4, result: Err(RpcError { code: -32601, .. }) }
        ));
    }

    #[test]
    fn test_decode_event_frame() {
        let frame = decode_frame(r#"{"method": "Network.loadingFinished", "params": {"requestId": "9"}}"#)
            .unwrap();
        assert!(matches!(frame, Frame::Event { ref method, .. } if method == "Network.loadingFinished"));
    }

    #[test]
    fn test_decode_garbage_frame() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame("{}").is_err());
    }

    #[test]
    fn test_request_sent_uses_dedup_header() {
        let params = json!({
            "requestId": "1000.1",
            "request": {"url": "https://app/api", "headers": {"unique_header": "GetUsers"}}
        });
        assert_eq!(
            decode_event("Network.requestWillBeSent", params.clone(), Some("unique_header")),
            Some(InspectorEvent::RequestSent {
                request_id: "1000.1".into(),
                dedup_key: Some("GetUsers".into()),
            })
        );
        assert_eq!(
            decode_event("Network.requestWillBeSent", params, Some("x-other")),
            Some(InspectorEvent::RequestSent {
                request_id: "1000.1".into(),
                dedup_key: None,
            })
        );
    }

    #[test]
    fn test_loading_failed_resolves() {
        assert_eq!(
            decode_event("Network.loadingFailed", json!({"requestId": "5"}), None),
            Some(InspectorEvent::RequestResolved {
                request_id: "5".into()
            })
        );
    }

    #[test]
    fn test_heap_stats_triplets() {
        let event = decode_event(
            "HeapProfiler.heapStatsUpdate",
            json!({"statsUpdate": [0, 12, 4096, 1, 3, 512]}),
            None,
        );
        assert_eq!(
            event,
            Some(InspectorEvent::AllocationUpdate(vec![(0, 4096), (1, 512)]))
        );
    }

    #[test]
    fn test_snapshot_chunk() {
        assert_eq!(
            decode_event(
                "HeapProfiler.addHeapSnapshotChunk",
                json!({"chunk": "{\"nodes\":"}),
                None
            ),
            Some(InspectorEvent::HeapChunk("{\"nodes\":".into()))
        );
    }

    #[test]
    fn test_unknown_or_malformed_events_ignored() {
        assert_eq!(decode_event("Page.loadEventFired", json!({}), None), None);
        assert_eq!(decode_event("Network.loadingFinished", json!({}), None), None);
    }

    #[test]
    fn test_evaluation_value() {
        let value = evaluation_value(json!({"result": {"type": "number", "value": 42}})).unwrap();
        assert_eq!(value, json!(42));

        let undefined = evaluation_value(json!({"result": {"type": "undefined"}})).unwrap();
        assert_eq!(undefined, Value::Null);

        let thrown = evaluation_value(json!({
            "result": {"type": "object"},
            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "ReferenceError: x is not defined"}}
        }));
        assert!(matches!(thrown, Err(Error::EvaluationFailed { reason }) if reason.contains("ReferenceError")));
    }
}
