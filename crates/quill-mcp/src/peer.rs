//! Symmetric JSON-RPC peer: request correlation and inbound dispatch.
//!
//! Both ends of a connection run the same machinery. One reader task per
//! connection demultiplexes frames: responses and errors complete the matching
//! pending call, requests are handed to the [`RequestHandler`] on their own
//! task, notifications are handed over inline.

use crate::error::McpError;
use crate::jsonrpc::{
    self, ErrorKind, ErrorObject, ErrorResponse, Message, Notification, Request, RequestId,
    Response,
};
use crate::transport::{ChildTransport, FrameReader, spawn_writer};
use futures_util::FutureExt;
use quill_types::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a child gets to exit after its stdin is closed.
const GRACEFUL_EXIT: Duration = Duration::from_secs(5);

/// Answers requests and notifications this side did not originate.
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the result for one inbound request. Runs on its own task.
    fn handle_request<'a>(
        &'a self,
        peer: &'a Peer,
        method: &'a str,
        params: Option<Value>,
    ) -> BoxFuture<'a, Result<Value, ErrorObject>>;

    /// React to an inbound notification. Runs on the reader task, so keep it short.
    fn handle_notification(&self, _peer: &Peer, method: &str, _params: Option<Value>) {
        tracing::debug!("Ignoring notification '{method}'");
    }
}

/// Per-connection settings.
#[derive(Debug, Clone, Default)]
pub struct PeerOptions {
    /// Timeout applied by [`Peer::call`]. `None` waits until the connection closes.
    pub default_timeout: Option<Duration>,
}

struct PendingRequest {
    method: String,
    sent_at: Instant,
    completion: oneshot::Sender<Result<Value, McpError>>,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    entries: HashMap<RequestId, PendingRequest>,
}

struct Shared {
    name: String,
    next_id: AtomicU64,
    write_tx: mpsc::Sender<String>,
    pending: Mutex<PendingTable>,
    options: PeerOptions,
    closed: CancellationToken,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        &self,
        id: RequestId,
        method: &str,
        completion: oneshot::Sender<Result<Value, McpError>>,
    ) -> Result<(), McpError> {
        let mut table = self.table();
        if table.closed {
            return Err(McpError::ConnectionLost);
        }
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                sent_at: Instant::now(),
                completion,
            },
        );
        Ok(())
    }

    fn complete(&self, id: &RequestId, outcome: Result<Value, McpError>) {
        let entry = self.table().entries.remove(id);
        match entry {
            Some(pending) => {
                tracing::trace!(
                    "'{}' #{id} answered after {:?}",
                    pending.method,
                    pending.sent_at.elapsed()
                );
                let _ = pending.completion.send(outcome);
            }
            None => {
                tracing::debug!("[{}] Dropping response for unknown or expired request {id}", self.name);
            }
        }
    }

    /// Fail every pending call with `ConnectionLost` and refuse new ones.
    fn close(&self) {
        let drained: Vec<PendingRequest> = {
            let mut table = self.table();
            table.closed = true;
            table.entries.drain().map(|(_, p)| p).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(
                "[{}] Connection closed with {} pending request(s)",
                self.name,
                drained.len()
            );
        }
        for pending in drained {
            let _ = pending.completion.send(Err(McpError::ConnectionLost));
        }
        self.closed.cancel();
    }
}

/// Removes its pending entry when the awaiting call finishes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.table().entries.remove(&self.id);
    }
}

/// Cloneable handle for issuing calls over one connection.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<Shared>,
}

impl Peer {
    /// Name used in log lines.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Call `method` with the connection's default timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.call_with_timeout(method, params, self.shared.options.default_timeout)
            .await
    }

    /// Call `method` and wait for its response, error, the timeout, or connection loss.
    ///
    /// Concurrent calls are independent: each waits only for its own id.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let shared = &*self.shared;
        let id = RequestId::Number(shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        shared.register(id.clone(), method, tx)?;
        let _guard = PendingGuard {
            shared,
            id: id.clone(),
        };

        let frame = jsonrpc::encode(&Message::Request(Request::new(id, method, params)))?;
        shared
            .write_tx
            .send(frame)
            .await
            .map_err(|_| McpError::ConnectionLost)?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(McpError::Timeout {
                        method: method.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        outcome.unwrap_or(Err(McpError::ConnectionLost))
    }

    /// Send a notification (fire-and-forget, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.send(&Message::Notification(Notification::new(method, params)))
            .await
    }

    async fn send(&self, message: &Message) -> Result<(), McpError> {
        let frame = jsonrpc::encode(message)?;
        self.shared
            .write_tx
            .send(frame)
            .await
            .map_err(|_| McpError::ConnectionLost)
    }

    /// Number of calls still waiting for an answer.
    pub fn pending_count(&self) -> usize {
        self.shared.table().entries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Resolves once the connection has closed and all pending calls have failed.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }
}

/// One live connection: a peer handle plus the tasks (and child) behind it.
pub struct Connection {
    peer: Peer,
    stop_writer: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    child: Option<Child>,
}

impl Connection {
    /// Run the protocol over an arbitrary pair of byte streams.
    pub fn new<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        handler: Arc<dyn RequestHandler>,
        options: PeerOptions,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let stop_writer = CancellationToken::new();
        let write_failed = CancellationToken::new();
        let (write_tx, writer_handle) =
            spawn_writer(writer, stop_writer.clone(), write_failed.clone());

        let peer = Peer {
            shared: Arc::new(Shared {
                name: name.into(),
                next_id: AtomicU64::new(1),
                write_tx,
                pending: Mutex::new(PendingTable::default()),
                options,
                closed: CancellationToken::new(),
            }),
        };

        let reader_handle = tokio::spawn(read_loop(
            peer.clone(),
            FrameReader::new(reader),
            handler,
            write_failed,
        ));

        Self {
            peer,
            stop_writer,
            reader: reader_handle,
            writer: writer_handle,
            child: None,
        }
    }

    /// Spawn `command` as a child process and run the protocol over its stdio.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        handler: Arc<dyn RequestHandler>,
        options: PeerOptions,
    ) -> Result<Self, McpError> {
        let transport = ChildTransport::spawn(name, command, args, env)?;
        let mut connection = Self::new(
            name,
            transport.stdout,
            transport.stdin,
            handler,
            options,
        );
        connection.child = Some(transport.child);
        Ok(connection)
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Resolves when the remote side hangs up (or the stream breaks).
    pub async fn closed(&self) {
        self.peer.closed().await
    }

    /// Close the outbound stream, let a child exit (killing it after a grace
    /// period), and fail anything still pending with `ConnectionLost`.
    pub async fn shutdown(mut self) {
        self.stop_writer.cancel();
        if tokio::time::timeout(GRACEFUL_EXIT, &mut self.writer)
            .await
            .is_err()
        {
            self.writer.abort();
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(GRACEFUL_EXIT, child.wait()).await {
                Ok(status) => tracing::debug!("MCP server '{}' exited: {status:?}", self.peer.name()),
                Err(_) => {
                    tracing::warn!(
                        "MCP server '{}' did not exit within {GRACEFUL_EXIT:?}; killing it",
                        self.peer.name()
                    );
                    let _ = child.kill().await;
                }
            }
        }

        self.reader.abort();
        self.peer.shared.close();
    }
}

/// Demultiplex inbound frames until the stream ends, breaks, or the writer fails.
async fn read_loop<R>(
    peer: Peer,
    mut reader: FrameReader<R>,
    handler: Arc<dyn RequestHandler>,
    write_failed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = write_failed.cancelled() => {
                tracing::warn!("[{}] Outbound stream broke; closing connection", peer.name());
                break;
            }
            next = reader.next_frame() => next,
        };
        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("[{}] Peer closed its stream", peer.name());
                break;
            }
            Err(e) => {
                tracing::error!("[{}] Fatal transport error: {e}", peer.name());
                break;
            }
        };

        match jsonrpc::decode(&frame) {
            Ok(Message::Response(response)) => {
                peer.shared.complete(&response.id, Ok(response.result));
            }
            Ok(Message::Error(ErrorResponse { id: Some(id), error })) => {
                peer.shared.complete(&id, Err(error.into()));
            }
            Ok(Message::Error(ErrorResponse { id: None, error })) => {
                tracing::warn!(
                    "[{}] Peer reported an error for an unreadable message: {} ({})",
                    peer.name(),
                    error.message,
                    error.code
                );
            }
            Ok(Message::Request(request)) => {
                dispatch_request(peer.clone(), Arc::clone(&handler), request);
            }
            Ok(Message::Notification(notification)) => {
                handler.handle_notification(&peer, &notification.method, notification.params);
            }
            Err(e) => {
                tracing::warn!(
                    "[{}] Dropping undecodable frame: {e}: {}",
                    peer.name(),
                    quill_types::truncate_str(&frame, 200)
                );
            }
        }
    }

    peer.shared.close();
}

fn dispatch_request(peer: Peer, handler: Arc<dyn RequestHandler>, request: Request) {
    tokio::spawn(async move {
        let Request { id, method, params } = request;
        let outcome = AssertUnwindSafe(handler.handle_request(&peer, &method, params))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!("[{}] Handler for '{method}' panicked", peer.name());
                Err(ErrorObject::new(
                    ErrorKind::InternalError,
                    format!("handler for '{method}' panicked"),
                ))
            });

        let reply = match outcome {
            Ok(result) => Message::Response(Response { id, result }),
            Err(error) => Message::Error(ErrorResponse {
                id: Some(id),
                error,
            }),
        };

        if let Err(e) = peer.send(&reply).await {
            tracing::debug!("[{}] Could not answer '{method}': {e}", peer.name());
        }
    });
}
