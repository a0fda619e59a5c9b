// src/transport/http.rs
// Streaming HTTP transport: one POST per request, JSON or chunked-stream replies

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Transport, TransportDiagnostics, TransportEvent, TransportErrorKind, event_channel};
use crate::config::Secret;
use crate::error::{BellwetherError, Result};

/// Session header defined by the streamable HTTP flavor of the protocol.
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Streaming HTTP transport. Each outgoing request is an independent POST;
/// the response body may be a single JSON object or a chunked stream of JSON
/// objects (newline-delimited or SSE-framed), all forwarded as `Message`
/// events.
pub struct HttpTransport {
    client: reqwest::Client,
    url: reqwest::Url,
    session_id: Arc<RwLock<Option<String>>>,
    auth: Option<Secret>,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    discarded: Arc<AtomicU64>,
}

impl HttpTransport {
    pub fn connect(
        url: &str,
        auth: Option<Secret>,
        timeout_ms: u64,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>)> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| BellwetherError::ConfigInvalid(format!("bad HTTP url '{}': {}", url, e)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_millis(timeout_ms.min(10_000)))
            .build()
            .map_err(BellwetherError::Http)?;

        let (event_tx, event_rx) = event_channel();
        let transport = Arc::new(Self {
            client,
            url,
            session_id: Arc::new(RwLock::new(None)),
            auth,
            events: event_tx,
            cancel: CancellationToken::new(),
            discarded: Arc::new(AtomicU64::new(0)),
        });
        Ok((transport, event_rx))
    }

    async fn forward_json(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                let _ = self.events.send(TransportEvent::Message(value)).await;
            }
            Err(e) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                warn!("discarding non-JSON response chunk: {}", e);
                let _ = self
                    .events
                    .send(TransportEvent::Error {
                        kind: TransportErrorKind::Framing,
                        detail: crate::utils::truncate(text, 200),
                    })
                    .await;
            }
        }
    }

    /// Consume a chunked response body. Handles both newline-delimited JSON
    /// and SSE framing (`data: {...}` lines separated by blank lines).
    async fn consume_stream(self: Arc<Self>, response: reqwest::Response) {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => break,
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = self.events.send(TransportEvent::Error {
                            kind: classify_reqwest(&e),
                            detail: e.to_string(),
                        }).await;
                        break;
                    }
                    None => break,
                },
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(&line);
                if payload.starts_with("event:") || payload.starts_with("id:") {
                    continue;
                }
                self.forward_json(payload).await;
            }
        }
        let tail = buffer.trim();
        if !tail.is_empty() {
            let payload = tail.strip_prefix("data:").map(str::trim).unwrap_or(tail);
            self.forward_json(payload).await;
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: Value) -> Result<()> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header("Accept", "application/json, text/event-stream")
            .json(&message);
        if let Some(session) = self.session_id.read().await.as_ref() {
            request = request.header(SESSION_HEADER, session);
        }
        if let Some(secret) = &self.auth {
            request = request.bearer_auth(secret.expose());
        }

        let response = request.send().await.map_err(|e| match classify_reqwest(&e) {
            TransportErrorKind::ConnectionRefused => BellwetherError::ConnectRefused(e.to_string()),
            TransportErrorKind::Auth => BellwetherError::AuthFailed(e.to_string()),
            _ => BellwetherError::Http(e),
        })?;

        if let Some(session) = response.headers().get(SESSION_HEADER)
            && let Ok(session) = session.to_str()
        {
            *self.session_id.write().await = Some(session.to_string());
        }

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BellwetherError::AuthFailed(format!("POST returned {}", status)));
        }
        if status == reqwest::StatusCode::ACCEPTED {
            // Notification acknowledged, no body expected.
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BellwetherError::FramingError(format!(
                "POST returned {}: {}",
                status,
                crate::utils::truncate(&body, 200)
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            debug!("streaming response body");
            let this = Arc::new(self.clone_for_stream());
            tokio::spawn(this.consume_stream(response));
        } else {
            let text = response.text().await.map_err(BellwetherError::Http)?;
            if !text.trim().is_empty() {
                self.forward_json(text.trim()).await;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
        let _ = self.events.send(TransportEvent::Closed).await;
    }

    fn diagnostics(&self) -> TransportDiagnostics {
        TransportDiagnostics {
            stderr_tail: Vec::new(),
            discarded_frames: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl HttpTransport {
    /// Cheap handle clone for the body-consumer task.
    fn clone_for_stream(&self) -> Self {
        Self {
            client: self.client.clone(),
            url: self.url.clone(),
            session_id: Arc::clone(&self.session_id),
            auth: self.auth.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            discarded: Arc::clone(&self.discarded),
        }
    }
}

/// Map a reqwest error onto the transport fault taxonomy.
pub(crate) fn classify_reqwest(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::ConnectionRefused
    } else if error
        .status()
        .is_some_and(|s| s == reqwest::StatusCode::UNAUTHORIZED || s == reqwest::StatusCode::FORBIDDEN)
    {
        TransportErrorKind::Auth
    } else {
        TransportErrorKind::Io
    }
}
