//! DevTools WebSocket connection.
//!
//! A reader task owns the receiving half of the socket. Responses are routed
//! to the command awaiting them through a table of oneshot senders keyed by
//! command id; events are decoded and dispatched into the session's
//! [`SessionActivity`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use sealant_engine::{
    Connector, Endpoint, Inspector, MeasureMode, SealantConfig, SessionActivity, Target,
};

use crate::discovery;
use crate::error::{Error, Result};
use crate::protocol::{self, Frame, RpcError};

/// Time a command may wait for its response.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = std::result::Result<Value, RpcError>;
type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// An open DevTools session with one page.
pub struct CdpConnection {
    url: String,
    sink: tokio::sync::Mutex<SplitSink<Socket, Message>>,
    pending: PendingTable,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    command_timeout: Duration,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    /// Open a WebSocket to `url` and start dispatching its events.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionFailed` if the handshake fails.
    pub async fn open(
        url: &str,
        activity: Arc<SessionActivity>,
        dedup_header: Option<String>,
        command_timeout: Duration,
    ) -> Result<Self> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| Error::connection_failed(url, e.to_string()))?;
        let (sink, source) = socket.split();

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            source,
            Arc::clone(&pending),
            Arc::clone(&closed),
            activity,
            dedup_header,
        ));

        info!(url, "Connected to DevTools endpoint");
        Ok(Self {
            url: url.to_string(),
            sink: tokio::sync::Mutex::new(sink),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            command_timeout,
            reader,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a command and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the channel is gone, `Error::Timeout` if no
    /// response arrives in time and `Error::Protocol` if the runtime reports
    /// an error.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.send_command(method, params, Some(self.command_timeout))
            .await
    }

    /// Send a command whose response may take arbitrarily long.
    ///
    /// Heap artifact requests are answered only after the last chunk has been
    /// streamed, which for a large heap can exceed any command timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the channel is gone and `Error::Protocol` if
    /// the runtime reports an error.
    pub async fn call_unbounded(&self, method: &str, params: Value) -> Result<Value> {
        self.send_command(method, params, None).await
    }

    async fn send_command(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = protocol::command(id, method, &params);
        trace!(id, method, "Sending command");
        if let Err(e) = self.sink.lock().await.send(Message::Text(frame.into())).await {
            self.pending.lock().remove(&id);
            return Err(Error::send_failed(e.to_string()));
        }

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    return Err(Error::Timeout {
                        method: method.to_string(),
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(RpcError { code, message })) => Err(Error::Protocol {
                method: method.to_string(),
                code,
                message,
            }),
            Err(_) => Err(Error::Closed),
        }
    }

    /// Close the socket and stop the reader task.
    ///
    /// # Errors
    ///
    /// Returns `Error::SendFailed` if the close frame cannot be written.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let sent = self.sink.lock().await.close().await;
        self.reader.abort();
        self.pending.lock().clear();
        info!(url = %self.url, "Closed DevTools connection");
        sent.map_err(|e| Error::send_failed(e.to_string()))
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut source: SplitStream<Socket>,
    pending: PendingTable,
    closed: Arc<AtomicBool>,
    activity: Arc<SessionActivity>,
    dedup_header: Option<String>,
) {
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                debug!(?frame, "Endpoint closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "DevTools connection failed");
                break;
            }
        };

        match protocol::decode_frame(text.as_str()) {
            Ok(Frame::Response { id, result }) => {
                let waiter = pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        // the caller may have timed out and dropped the receiver
                        let _ = tx.send(result);
                    }
                    None => trace!(id, "Response for unknown command"),
                }
            }
            Ok(Frame::Event { method, params }) => {
                if let Some(event) = protocol::decode_event(&method, params, dedup_header.as_deref()) {
                    activity.dispatch(event);
                }
            }
            Err(e) => warn!(error = %e, "Skipping undecodable frame"),
        }
    }

    closed.store(true, Ordering::SeqCst);
    // dropping the senders wakes every waiting command with Error::Closed
    pending.lock().clear();
}

#[async_trait]
impl Inspector for CdpConnection {
    async fn enable_heap_profiler(&self) -> sealant_engine::Result<()> {
        self.call("HeapProfiler.enable", json!({})).await?;
        Ok(())
    }

    async fn enable_activity_events(&self) -> sealant_engine::Result<()> {
        self.call("Network.enable", json!({})).await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> sealant_engine::Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "includeCommandLineAPI": true,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        Ok(protocol::evaluation_value(result)?)
    }

    async fn collect_garbage(&self) -> sealant_engine::Result<()> {
        self.call("HeapProfiler.collectGarbage", json!({})).await?;
        Ok(())
    }

    async fn start_heap_timeline(&self) -> sealant_engine::Result<()> {
        self.call("HeapProfiler.startTrackingHeapObjects", json!({}))
            .await?;
        Ok(())
    }

    async fn request_heap_artifact(&self, mode: MeasureMode) -> sealant_engine::Result<()> {
        let method = match mode {
            MeasureMode::Timeline => "HeapProfiler.stopTrackingHeapObjects",
            MeasureMode::Snapshot => "HeapProfiler.takeHeapSnapshot",
        };
        debug!(method, "Requesting heap artifact");
        self.call_unbounded(method, json!({ "reportProgress": false }))
            .await?;
        Ok(())
    }

    async fn close(&self) -> sealant_engine::Result<()> {
        self.shutdown().await?;
        Ok(())
    }
}

/// Opens [`CdpConnection`]s, discovering the debugger URL when needed.
#[derive(Debug, Clone)]
pub struct DevToolsConnector {
    http: reqwest::Client,
    dedup_header: Option<String>,
    command_timeout: Duration,
}

impl DevToolsConnector {
    /// Create a connector using `dedup_header` to identify repeated requests.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built.
    pub fn new(dedup_header: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_COMMAND_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            dedup_header: dedup_header.filter(|h| !h.is_empty()),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Create a connector from the session configuration.
    ///
    /// # Errors
    ///
    /// See [`DevToolsConnector::new`].
    pub fn from_config(config: &SealantConfig) -> Result<Self> {
        Self::new(Some(config.dedup_header_name.clone()))
    }

    /// Set the per-command timeout.
    #[must_use]
    pub const fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Resolve the WebSocket URL of `target`.
    ///
    /// # Errors
    ///
    /// Propagates discovery errors.
    pub async fn websocket_url(&self, target: &Target) -> Result<String> {
        match target.endpoint() {
            Endpoint::WebSocket(url) => Ok(url),
            Endpoint::Discover(listing) => {
                discovery::websocket_debugger_url(&self.http, &listing).await
            }
        }
    }
}

#[async_trait]
impl Connector for DevToolsConnector {
    async fn connect(
        &self,
        target: &Target,
        activity: Arc<SessionActivity>,
    ) -> sealant_engine::Result<Box<dyn Inspector>> {
        let url = self.websocket_url(target).await?;
        let connection =
            CdpConnection::open(&url, activity, self.dedup_header.clone(), self.command_timeout)
                .await?;
        Ok(Box::new(connection))
    }
}
