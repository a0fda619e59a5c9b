// src/transport/mod.rs
// Transport layer for MCP communication (stdio, SSE, streaming HTTP)

pub mod http;
pub mod sse;
pub mod stdio;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// Depth of the transport event channel. Sends block when the consumer
/// falls this far behind.
pub const EVENT_CHANNEL_DEPTH: usize = 256;

/// Events every transport emits toward the session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete inbound JSON value.
    Message(Value),
    /// A non-terminal fault. The session logs these; only `Closed` ends the run.
    Error {
        kind: TransportErrorKind,
        detail: String,
    },
    /// Terminal closure. No further events follow.
    Closed,
}

/// Fault classification: server-bug-shaped vs environment-shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Malformed framing (non-JSON line, bad SSE chunk). Likely a server bug.
    Framing,
    /// A response id we never issued or already resolved. Likely a server bug.
    DuplicateId,
    /// Connection refused / reset. Environment.
    ConnectionRefused,
    /// Network-level timeout. Environment.
    Timeout,
    /// HTTP 401/403 or TLS failure. Environment.
    Auth,
    /// Everything else I/O-shaped. Environment.
    Io,
}

impl TransportErrorKind {
    /// Whether this fault points at the server implementation rather than
    /// the environment between us and it.
    pub fn is_server_bug(&self) -> bool {
        matches!(self, TransportErrorKind::Framing | TransportErrorKind::DuplicateId)
    }
}

/// Diagnostics surfaced after a run (stderr tail, discard counters).
#[derive(Debug, Clone, Default)]
pub struct TransportDiagnostics {
    /// Last lines of the child's stderr (stdio transport only).
    pub stderr_tail: Vec<String>,
    /// Count of inbound lines/chunks discarded as non-JSON.
    pub discarded_frames: u64,
}

/// Send side of a transport. The receive side is the `TransportEvent`
/// channel handed out at construction; the session is its sole consumer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue one outgoing JSON value. Blocks when the underlying pipe or
    /// outgoing queue is full.
    async fn send(&self, message: Value) -> Result<()>;

    /// Initiate shutdown. Idempotent; the event channel ends with `Closed`.
    async fn close(&self);

    /// Post-run diagnostics.
    fn diagnostics(&self) -> TransportDiagnostics;
}

/// Channel pair used by every transport constructor.
pub fn event_channel() -> (mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(EVENT_CHANNEL_DEPTH)
}

/// Construct the transport selected by the server config.
///
/// For subprocess servers a mandatory warmup window elapses before this
/// returns, so the first request never races a package-runner that is still
/// installing itself.
pub async fn connect(
    server: &crate::config::ServerConfig,
    resolver: &dyn crate::config::CredentialResolver,
) -> Result<(std::sync::Arc<dyn Transport>, mpsc::Receiver<TransportEvent>)> {
    use crate::config::TransportKind;
    use crate::error::BellwetherError;

    let auth = server
        .auth
        .token_env
        .as_deref()
        .and_then(|name| resolver.resolve(name));

    match server.transport_kind()? {
        TransportKind::Stdio => {
            let command = server.command.as_deref().ok_or_else(|| {
                BellwetherError::ConfigInvalid("stdio transport needs server.command".into())
            })?;
            let (transport, events) =
                StdioTransport::spawn(command, &server.args, &server.env).await?;
            tokio::time::sleep(std::time::Duration::from_millis(server.warmup_ms)).await;
            Ok((transport as std::sync::Arc<dyn Transport>, events))
        }
        TransportKind::Sse => {
            let url = server.url.as_deref().ok_or_else(|| {
                BellwetherError::ConfigInvalid("sse transport needs server.url".into())
            })?;
            let (transport, events) = SseTransport::connect(url, auth).await?;
            Ok((transport as std::sync::Arc<dyn Transport>, events))
        }
        TransportKind::Http => {
            let url = server.url.as_deref().ok_or_else(|| {
                BellwetherError::ConfigInvalid("http transport needs server.url".into())
            })?;
            let (transport, events) = HttpTransport::connect(url, auth, 10_000)?;
            Ok((transport as std::sync::Arc<dyn Transport>, events))
        }
    }
}
