//! Newline-delimited framing over async byte streams, plus child-process spawn.
//!
//! A frame is one line of UTF-8 text. Encoded JSON never contains a raw
//! newline, so the delimiter cannot appear inside a frame.

use crate::error::McpError;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Largest frame accepted from a peer. Anything longer is a fatal framing error.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Capacity of the outbound frame queue.
const WRITE_QUEUE: usize = 64;

/// Reads complete frames from a byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next non-blank frame, `Ok(None)` at end of stream.
    ///
    /// Errors are fatal: the stream is no longer aligned on frame boundaries.
    pub async fn next_frame(&mut self) -> Result<Option<String>, McpError> {
        loop {
            self.buf.clear();
            let read = (&mut self.inner)
                .take(MAX_FRAME_BYTES as u64 + 1)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if read == 0 {
                return Ok(None);
            }

            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
            } else if self.buf.len() > MAX_FRAME_BYTES {
                return Err(McpError::Frame(format!(
                    "frame exceeds {MAX_FRAME_BYTES} bytes"
                )));
            } else {
                tracing::warn!(
                    "Stream ended mid-frame; discarding {} trailing bytes",
                    self.buf.len()
                );
                return Ok(None);
            }

            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let frame = String::from_utf8(std::mem::take(&mut self.buf))
                .map_err(|_| McpError::Frame("frame is not valid UTF-8".to_string()))?;
            return Ok(Some(frame));
        }
    }
}

/// Start the writer task: drains the returned channel into `writer`, one frame per line.
///
/// The task ends when every sender is dropped, the write fails, or `stop` fires.
/// On exit the writer is shut down, which the peer observes as end of stream.
/// A failed write also fires `broken`, so the local side can fail its pending calls.
pub fn spawn_writer<W>(
    writer: W,
    stop: CancellationToken,
    broken: CancellationToken,
) -> (mpsc::Sender<String>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (write_tx, mut write_rx) = mpsc::channel::<String>(WRITE_QUEUE);
    let handle = tokio::spawn(async move {
        let mut writer = writer;
        loop {
            let frame = tokio::select! {
                _ = stop.cancelled() => break,
                frame = write_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if let Err(e) = write_frame(&mut writer, &frame).await {
                tracing::debug!("Frame write failed, closing writer: {e}");
                broken.cancel();
                break;
            }
        }
        let _ = writer.shutdown().await;
    });
    (write_tx, handle)
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &str) -> std::io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// A spawned server process with its protocol pipes.
pub struct ChildTransport {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl ChildTransport {
    /// Spawn `command`, piping stdin/stdout for frames.
    ///
    /// The child's stderr is diagnostics only; each line is re-emitted as a
    /// debug event under the `quill_mcp::server_stderr` target.
    pub fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            source: e,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout was not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "quill_mcp::server_stderr", server = %server, "{line}");
                }
            });
        }

        tracing::debug!(
            "Spawned MCP server '{name}' (pid {:?}): {command} {}",
            child.id(),
            args.join(" ")
        );

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }
}
