// src/transport/stdio.rs
// Subprocess transport: newline-delimited JSON over piped stdio

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use super::{Transport, TransportDiagnostics, TransportEvent, TransportErrorKind, event_channel};
use crate::config::sanitized_env;
use crate::error::{BellwetherError, Result};

/// Lines of child stderr retained for diagnostics.
const STDERR_RING_CAPACITY: usize = 200;

/// Depth of the outgoing queue feeding the single serializer task.
const OUTGOING_QUEUE_DEPTH: usize = 64;

/// Stdio transport for spawned MCP server processes.
///
/// Outgoing messages are newline-delimited JSON written by a single
/// serializer task so interleaved sends cannot split a frame. Incoming
/// stdout is parsed line-buffered; non-JSON lines are logged and discarded.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    outgoing: mpsc::Sender<Value>,
    stderr_ring: Arc<Mutex<VecDeque<String>>>,
    discarded: Arc<AtomicU64>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader/writer/stderr tasks.
    ///
    /// The child environment is the parent environment minus the sensitive
    /// deny-list, with `env` entries layered on top (explicit always wins).
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>)> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .env_clear()
            .envs(sanitized_env(env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| BellwetherError::SpawnFailed(format!("{}: {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BellwetherError::SpawnFailed("no stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BellwetherError::SpawnFailed("no stdout pipe".into()))?;
        let stderr = child.stderr.take();

        let (event_tx, event_rx) = event_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Value>(OUTGOING_QUEUE_DEPTH);

        let stderr_ring = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)));
        let discarded = Arc::new(AtomicU64::new(0));

        tokio::spawn(writer_task(stdin, outgoing_rx));
        tokio::spawn(reader_task(stdout, event_tx, Arc::clone(&discarded)));
        if let Some(stderr) = stderr {
            tokio::spawn(stderr_task(stderr, Arc::clone(&stderr_ring)));
        }

        debug!(command = %command, "spawned MCP server process");

        let transport = Arc::new(Self {
            child: Mutex::new(Some(child)),
            outgoing: outgoing_tx,
            stderr_ring,
            discarded,
        });
        Ok((transport, event_rx))
    }
}

/// Single writer: preserves message framing no matter how many callers send.
async fn writer_task(
    mut stdin: tokio::process::ChildStdin,
    mut outgoing: mpsc::Receiver<Value>,
) {
    while let Some(message) = outgoing.recv().await {
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("unserializable outgoing message: {}", e);
                continue;
            }
        };
        if stdin.write_all(line.as_bytes()).await.is_err()
            || stdin.write_all(b"\n").await.is_err()
            || stdin.flush().await.is_err()
        {
            debug!("stdin write failed; stopping writer");
            break;
        }
    }
}

/// Line-buffered stdout reader. Ends with a single `Closed` event.
async fn reader_task(
    stdout: tokio::process::ChildStdout,
    events: mpsc::Sender<TransportEvent>,
    discarded: Arc<AtomicU64>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => {
                        if events.send(TransportEvent::Message(value)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        discarded.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "discarding non-JSON line from server stdout: {} ({})",
                            crate::utils::truncate(trimmed, 120),
                            e
                        );
                        let _ = events
                            .send(TransportEvent::Error {
                                kind: TransportErrorKind::Framing,
                                detail: crate::utils::truncate(trimmed, 200),
                            })
                            .await;
                    }
                }
            }
            Err(e) => {
                let _ = events
                    .send(TransportEvent::Error {
                        kind: TransportErrorKind::Io,
                        detail: e.to_string(),
                    })
                    .await;
                break;
            }
        }
    }
    let _ = events.send(TransportEvent::Closed).await;
}

/// Drain stderr into a bounded ring buffer surfaced in diagnostics.
async fn stderr_task(
    stderr: tokio::process::ChildStderr,
    ring: Arc<Mutex<VecDeque<String>>>,
) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let trimmed = line.trim_end().to_string();
                debug!("[server:stderr] {}", trimmed);
                let mut ring = ring.lock().await;
                if ring.len() == STDERR_RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(trimmed);
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Value) -> Result<()> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| BellwetherError::TransportClosed)
    }

    async fn close(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            debug!("killing server process");
            let _ = child.kill().await;
        }
    }

    fn diagnostics(&self) -> TransportDiagnostics {
        let stderr_tail = self
            .stderr_ring
            .try_lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default();
        TransportDiagnostics {
            stderr_tail,
            discarded_frames: self.discarded.load(Ordering::Relaxed),
        }
    }
}
