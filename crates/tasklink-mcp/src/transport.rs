//! Stdio transport for tool server communication.
//!
//! Spawns a child process and multiplexes concurrent JSON-RPC requests over
//! its stdin/stdout using newline-delimited messages. A background reader
//! task routes replies to callers by id; a second task drains stderr into
//! the log.

use crate::config::McpServerConfig;
use crate::correlator::{Completion, Correlator};
use crate::error::McpError;
use crate::framer::{Frame, LineReader, LineWriter};
use crate::jsonrpc::{
    InboundMessage, JsonRpcNotification, JsonRpcRequest, RequestId, parse_inbound,
};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Environment set on every server before the configured overlay.
const BASE_ENV: &[(&str, &str)] = &[("PYTHONIOENCODING", "utf-8"), ("PYTHONUNBUFFERED", "1")];

/// How long a server gets to exit after its stdin closes before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// State touched by both callers and the reader task.
struct Shared {
    correlator: Correlator,
    connected: AtomicBool,
}

/// Async stdio transport for communicating with a tool server process.
pub struct StdioTransport {
    name: String,
    shared: Arc<Shared>,
    writer: Mutex<Option<LineWriter<BoxedWriter>>>,
    child: Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn the configured server and start the background reader tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(name: impl Into<String>, config: &McpServerConfig) -> Result<Self, McpError> {
        let name = name.into();
        let mut cmd = Command::new(&config.command);
        cmd.args(config.command_args());
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(BASE_ENV.iter().copied())
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            command: config.command.clone(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(McpError::Io(std::io::Error::other(
                "MCP server stdio was not piped",
            )));
        };

        tracing::info!(
            server = %name,
            command = %config.command,
            pid = child.id(),
            "Spawned MCP server"
        );

        Ok(Self::start(
            name,
            Some(child),
            stdout,
            Box::new(stdin),
            Some(stderr),
            config.timeout_ms,
        ))
    }

    /// Attach to an already-connected pair of streams instead of a child
    /// process. Used for in-process servers and tests.
    pub fn from_streams<R, W>(name: impl Into<String>, reader: R, writer: W, timeout_ms: u64) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(
            name.into(),
            None,
            reader,
            Box::new(writer),
            None::<ChildStderr>,
            timeout_ms,
        )
    }

    fn start<R, E>(
        name: String,
        child: Option<Child>,
        reader: R,
        writer: BoxedWriter,
        diagnostics: Option<E>,
        timeout_ms: u64,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let span = tracing::info_span!("mcp_session", server = %name);
        let shared = Arc::new(Shared {
            correlator: Correlator::new(),
            connected: AtomicBool::new(true),
        });
        let cancel = CancellationToken::new();

        let mut tasks = vec![tokio::spawn(
            reader_loop(LineReader::new(reader), Arc::clone(&shared), cancel.clone())
                .instrument(span.clone()),
        )];
        if let Some(stderr) = diagnostics {
            tasks.push(tokio::spawn(
                diagnostic_loop(LineReader::new(stderr), cancel.clone()).instrument(span),
            ));
        }

        Self {
            name,
            shared,
            writer: Mutex::new(Some(LineWriter::new(writer))),
            child: Mutex::new(child),
            tasks: Mutex::new(tasks),
            cancel,
            timeout_ms,
        }
    }

    /// Send a JSON-RPC request and wait for its result.
    ///
    /// One deadline covers waiting for the write lock, writing the line and
    /// waiting for the reply, so a server that stops reading its stdin
    /// cannot hold a caller past the timeout. The pending entry is
    /// registered while the write lock is held, so ids hit the wire in
    /// increasing order and a fast reply always finds its handle.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);

        let mut registered = None;
        let sent = tokio::time::timeout_at(
            deadline,
            self.write_request(method, params, &mut registered),
        )
        .await;
        let rx = match sent {
            Ok(Ok(rx)) => rx,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                if let Some(id) = registered {
                    self.shared.correlator.discard(id).await;
                }
                return Err(self.timed_out(method, registered, "write"));
            }
        };
        let id = registered.ok_or(McpError::ConnectionClosed)?;
        tracing::debug!(server = %self.name, id, method, "Sent MCP request");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                // A reply arriving after this point is discarded as unknown
                self.shared.correlator.discard(id).await;
                Err(self.timed_out(method, Some(id), "reply"))
            }
        }
    }

    /// Register a pending entry and write the request under the write lock.
    /// `registered` is filled in as soon as an id is committed, so a caller
    /// that gives up can discard it.
    async fn write_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        registered: &mut Option<RequestId>,
    ) -> Result<oneshot::Receiver<Completion>, McpError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(McpError::ConnectionClosed)?;
        let id = self.shared.correlator.next_id();
        let rx = self.shared.correlator.register(id).await?;
        *registered = Some(id);
        let request = JsonRpcRequest::new(id, method, params);
        if let Err(e) = writer.write_line(&request).await {
            self.shared.correlator.discard(id).await;
            return Err(e);
        }
        Ok(rx)
    }

    fn timed_out(&self, method: &str, id: Option<RequestId>, stage: &str) -> McpError {
        tracing::warn!(
            server = %self.name,
            id = ?id,
            method,
            stage,
            timeout_ms = self.timeout_ms,
            "MCP request timed out"
        );
        McpError::Timeout {
            method: method.to_string(),
            timeout_ms: self.timeout_ms,
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let write = async {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(McpError::ConnectionClosed)?;
            writer.write_line(&notification).await
        };
        match tokio::time::timeout(Duration::from_millis(self.timeout_ms), write).await {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out(method, None, "write")),
        }
        tracing::debug!(server = %self.name, method, "Sent MCP notification");
        Ok(())
    }

    /// Whether the server is still attached. Turns false on `disconnect` or
    /// when the server closes its stdout.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-request timeout in milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Number of requests still awaiting a reply.
    pub async fn pending_requests(&self) -> usize {
        self.shared.correlator.pending_count().await
    }

    /// Tear down the session: stop the background tasks, close stdin, give
    /// the server a grace period to exit, then kill it. Every pending request
    /// is rejected with [`McpError::ConnectionClosed`].
    ///
    /// Safe to call more than once.
    pub async fn disconnect(&self) {
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        let rejected = self.shared.correlator.cancel_all().await;

        // A sender holds the lock for at most its own timeout. One stuck on
        // a full pipe is released by the kill below instead.
        let writer = match tokio::time::timeout(SHUTDOWN_GRACE, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }

        let child = self.child.lock().await.take();
        if let Some(child) = child {
            terminate(&self.name, child).await;
        }
        self.writer.lock().await.take();

        if was_connected || rejected > 0 {
            tracing::info!(server = %self.name, rejected, "Disconnected from MCP server");
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop reaps the child; this stops the reader tasks.
        self.cancel.cancel();
    }
}

async fn terminate(name: &str, mut child: Child) {
    match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(server = %name, %status, "MCP server exited"),
        Ok(Err(e)) => tracing::warn!(server = %name, "Failed to wait for MCP server: {e}"),
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!(server = %name, "Failed to kill MCP server: {e}");
            } else {
                tracing::debug!(server = %name, "Killed MCP server after grace period");
            }
        }
    }
}

/// Reads stdout until EOF or cancellation, routing each message.
async fn reader_loop<R: AsyncRead + Unpin>(
    mut reader: LineReader<R>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = reader.read_line() => frame,
        };
        match frame {
            Ok(Some(Frame::Line(line))) => dispatch(&shared, &line).await,
            Ok(Some(Frame::Oversized(len))) => {
                tracing::warn!(len, "Skipping oversized line from MCP server");
            }
            Ok(None) => {
                tracing::debug!("MCP server closed its output");
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read from MCP server: {e}");
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    let rejected = shared.correlator.cancel_all().await;
    if rejected > 0 {
        tracing::warn!(rejected, "Rejected pending MCP requests after connection closed");
    }
}

async fn dispatch(shared: &Shared, line: &str) {
    if line.trim().is_empty() {
        return;
    }
    match parse_inbound(line) {
        Ok(InboundMessage::Response { id, outcome }) => match outcome {
            Ok(result) => {
                shared.correlator.resolve(id, result).await;
            }
            Err(err) => {
                shared.correlator.reject(id, err).await;
            }
        },
        // No handlers are registered for server-initiated traffic yet.
        Ok(InboundMessage::Notification { method, .. }) => {
            tracing::debug!(method = %method, "Ignoring MCP server notification");
        }
        Ok(InboundMessage::Request { id, method, .. }) => {
            tracing::debug!(%id, method = %method, "Ignoring MCP server request");
        }
        Ok(InboundMessage::Orphan { id, error }) => {
            tracing::warn!(
                id = ?id,
                error = ?error.map(|e| e.message),
                "Discarding MCP response without a usable id"
            );
        }
        Err(e) => {
            tracing::warn!("Skipping malformed line from MCP server: {e}: {line}");
        }
    }
}

/// Forwards stderr lines to the log. Never fails.
async fn diagnostic_loop<E: AsyncRead + Unpin>(
    mut reader: LineReader<E>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = reader.read_line() => frame,
        };
        match frame {
            Ok(Some(Frame::Line(line))) => {
                if !line.trim().is_empty() {
                    tracing::debug!(stderr = %line, "MCP server diagnostic");
                }
            }
            Ok(Some(Frame::Oversized(len))) => {
                tracing::debug!(len, "Dropped oversized MCP server diagnostic line");
            }
            Ok(None) | Err(_) => break,
        }
    }
}
