// src/transport/sse.rs
// SSE transport: POST for outgoing requests, long-lived GET stream for inbound

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Transport, TransportDiagnostics, TransportEvent, TransportErrorKind, event_channel};
use crate::config::Secret;
use crate::error::{BellwetherError, Result};

/// Header used to correlate POSTs with the event stream when the server
/// does not hand out an endpoint of its own.
const SESSION_HEADER: &str = "X-MCP-Session-Id";

/// SSE transport. The event stream is opened once at connect time; outgoing
/// requests POST to either the server-assigned endpoint (from the `endpoint`
/// event) or the base URL.
pub struct SseTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
    post_url: Arc<RwLock<Option<reqwest::Url>>>,
    session_id: String,
    auth: Option<Secret>,
    cancel: CancellationToken,
    discarded: Arc<AtomicU64>,
}

impl SseTransport {
    /// Open the event stream and wait for it to become live.
    pub async fn connect(
        url: &str,
        auth: Option<Secret>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>)> {
        let base_url = reqwest::Url::parse(url)
            .map_err(|e| BellwetherError::ConfigInvalid(format!("bad SSE url '{}': {}", url, e)))?;
        let client = reqwest::Client::new();
        let session_id = uuid::Uuid::new_v4().to_string();

        let (event_tx, event_rx) = event_channel();
        let post_url = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();
        let discarded = Arc::new(AtomicU64::new(0));

        let mut request = client
            .get(base_url.clone())
            .header(SESSION_HEADER, &session_id);
        if let Some(secret) = &auth {
            request = request.bearer_auth(secret.expose());
        }

        let transport = Arc::new(Self {
            client,
            base_url: base_url.clone(),
            post_url: Arc::clone(&post_url),
            session_id,
            auth,
            cancel: cancel.clone(),
            discarded: Arc::clone(&discarded),
        });

        let source = EventSource::new(request)
            .map_err(|e| BellwetherError::ConnectRefused(e.to_string()))?;
        tokio::spawn(stream_task(
            source, base_url, post_url, event_tx, cancel, discarded,
        ));

        Ok((transport, event_rx))
    }
}

async fn stream_task(
    mut source: EventSource,
    base_url: reqwest::Url,
    post_url: Arc<RwLock<Option<reqwest::Url>>>,
    events: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
    discarded: Arc<AtomicU64>,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = source.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            Ok(Event::Open) => debug!("SSE stream open"),
            Ok(Event::Message(msg)) if msg.event == "endpoint" => {
                // Server-assigned POST endpoint, possibly relative.
                match base_url.join(msg.data.trim()) {
                    Ok(url) => {
                        debug!(endpoint = %url, "server assigned POST endpoint");
                        *post_url.write().await = Some(url);
                    }
                    Err(e) => warn!("unusable endpoint event '{}': {}", msg.data, e),
                }
            }
            Ok(Event::Message(msg)) => match serde_json::from_str::<Value>(&msg.data) {
                Ok(value) => {
                    if events.send(TransportEvent::Message(value)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    discarded.fetch_add(1, Ordering::Relaxed);
                    warn!("discarding non-JSON SSE event: {}", e);
                    let _ = events
                        .send(TransportEvent::Error {
                            kind: TransportErrorKind::Framing,
                            detail: crate::utils::truncate(&msg.data, 200),
                        })
                        .await;
                }
            },
            Err(reqwest_eventsource::Error::StreamEnded) => break,
            Err(e) => {
                let kind = classify_sse_error(&e);
                let _ = events
                    .send(TransportEvent::Error {
                        kind,
                        detail: e.to_string(),
                    })
                    .await;
                // Connection-level faults end the stream; framing faults don't.
                if !kind.is_server_bug() {
                    break;
                }
            }
        }
    }
    source.close();
    let _ = events.send(TransportEvent::Closed).await;
}

fn classify_sse_error(error: &reqwest_eventsource::Error) -> TransportErrorKind {
    use reqwest_eventsource::Error;
    match error {
        Error::InvalidStatusCode(status, _) => {
            if *status == reqwest::StatusCode::UNAUTHORIZED
                || *status == reqwest::StatusCode::FORBIDDEN
            {
                TransportErrorKind::Auth
            } else {
                TransportErrorKind::Io
            }
        }
        Error::Transport(e) => super::http::classify_reqwest(e),
        Error::Utf8(_) | Error::Parser(_) | Error::InvalidContentType(_, _) => {
            TransportErrorKind::Framing
        }
        _ => TransportErrorKind::Io,
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: Value) -> Result<()> {
        let url = self
            .post_url
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.base_url.clone());

        let mut request = self
            .client
            .post(url)
            .header(SESSION_HEADER, &self.session_id)
            .json(&message);
        if let Some(secret) = &self.auth {
            request = request.bearer_auth(secret.expose());
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BellwetherError::AuthFailed(format!("POST returned {}", status)));
        }
        if !status.is_success() && status != reqwest::StatusCode::ACCEPTED {
            return Err(BellwetherError::FramingError(format!(
                "POST returned {}",
                status
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        self.cancel.cancel();
    }

    fn diagnostics(&self) -> TransportDiagnostics {
        TransportDiagnostics {
            stderr_tail: Vec::new(),
            discarded_frames: self.discarded.load(Ordering::Relaxed),
        }
    }
}

fn map_send_error(e: reqwest::Error) -> BellwetherError {
    match super::http::classify_reqwest(&e) {
        TransportErrorKind::ConnectionRefused => BellwetherError::ConnectRefused(e.to_string()),
        TransportErrorKind::Timeout => BellwetherError::Timeout {
            method: "transport".into(),
            ms: 0,
        },
        TransportErrorKind::Auth => BellwetherError::AuthFailed(e.to_string()),
        _ => BellwetherError::Http(e),
    }
}
