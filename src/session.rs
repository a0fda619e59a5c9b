// src/session.rs
// MCP session: request correlation, timeouts, state machine, close handling

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{BellwetherError, Result};
use crate::protocol::{InboundMessage, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{Transport, TransportEvent};

/// Session lifecycle. Transitions only move rightward:
/// Connecting → Handshaking → Ready → Closing → Closed, with the shortcut
/// Handshaking → Closed on a failed initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

/// A server-initiated notification surfaced to subscribers.
#[derive(Debug, Clone)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

type PendingSender = oneshot::Sender<Result<Value>>;

struct Pending {
    tx: PendingSender,
    method: String,
}

/// Shared multiplexing state between the caller side and the router task.
struct Shared {
    pending: Mutex<HashMap<i64, Pending>>,
    /// Set before pendings are rejected at close, so a late inbound response
    /// racing the shutdown is discarded instead of resolving a dead entry.
    cleaning_up: AtomicBool,
    state: Mutex<SessionState>,
}

impl Shared {
    /// Fail every pending request with the given error constructor.
    fn fail_all(&self, make_error: impl Fn() -> BellwetherError) {
        self.cleaning_up.store(true, Ordering::SeqCst);
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(_, p)| p).collect()
        };
        for entry in drained {
            let _ = entry.tx.send(Err(make_error()));
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An MCP session over one transport.
///
/// The session is the only component that talks to the transport; assigns
/// monotone request ids; pairs inbound responses to pending requests by id;
/// broadcasts notifications; fails all pendings when the transport closes.
pub struct Session {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    next_id: AtomicI64,
    notifications: broadcast::Sender<Notification>,
}

impl Session {
    /// Wire a session onto a transport's event stream.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            cleaning_up: AtomicBool::new(false),
            state: Mutex::new(SessionState::Connecting),
        });
        let (notif_tx, _) = broadcast::channel(64);

        let session = Arc::new(Self {
            transport,
            shared: Arc::clone(&shared),
            next_id: AtomicI64::new(1),
            notifications: notif_tx.clone(),
        });

        tokio::spawn(router_task(events, shared, notif_tx));
        session
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Lifecycle transitions are driven by discovery (handshake) and the
    /// run driver (close); the router task only ever forces `Closed`.
    pub fn mark_handshaking(&self) {
        self.shared.set_state(SessionState::Handshaking);
    }

    pub fn mark_ready(&self) {
        self.shared.set_state(SessionState::Ready);
    }

    /// A failed initialize drops straight to Closed and clears all pendings.
    pub fn fail_initialize(&self, reason: &str) {
        let reason = reason.to_string();
        self.shared
            .fail_all(move || BellwetherError::InitializeFailed(reason.clone()));
        self.shared.set_state(SessionState::Closed);
    }

    /// Subscribe to server-initiated notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Issue a request and await its response.
    ///
    /// Resolves with the server's `result` object, or fails with one of
    /// timeout, transport_closed, protocol_error(code,msg), cancelled.
    pub async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        match self.state() {
            SessionState::Closing | SessionState::Closed => {
                return Err(BellwetherError::TransportClosed);
            }
            _ => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.insert(
                id,
                Pending {
                    tx,
                    method: method.to_string(),
                },
            );
        }

        let request = JsonRpcRequest::new(id, method, params);
        debug!(method = %method, id, "-> request");
        if let Err(e) = self
            .transport
            .send(serde_json::to_value(&request)?)
            .await
        {
            self.remove_pending(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BellwetherError::TransportClosed),
            Err(_) => {
                // Invariant: the entry is deleted before the caller observes
                // the timeout, so a late response cannot resolve it.
                self.remove_pending(id);
                Err(BellwetherError::Timeout {
                    method: method.to_string(),
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire a notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let request = JsonRpcRequest::notification(method, params);
        debug!(method = %method, "-> notification");
        self.transport.send(serde_json::to_value(&request)?).await
    }

    /// Graceful shutdown: fail pendings, close the transport.
    pub async fn close(&self) {
        if matches!(self.state(), SessionState::Closed) {
            return;
        }
        self.shared.set_state(SessionState::Closing);
        self.shared.fail_all(|| BellwetherError::TransportClosed);
        self.transport.close().await;
        self.shared.set_state(SessionState::Closed);
    }

    /// Transport diagnostics for the final report.
    pub fn diagnostics(&self) -> crate::transport::TransportDiagnostics {
        self.transport.diagnostics()
    }

    fn remove_pending(&self, id: i64) {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        pending.remove(&id);
    }
}

/// Routes transport events to pending requests and notification subscribers.
async fn router_task(
    mut events: mpsc::Receiver<TransportEvent>,
    shared: Arc<Shared>,
    notifications: broadcast::Sender<Notification>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Message(value) => match InboundMessage::parse(value) {
                Some(InboundMessage::Response(response)) => {
                    dispatch_response(&shared, response);
                }
                Some(InboundMessage::Notification { method, params }) => {
                    debug!(method = %method, "<- notification");
                    let _ = notifications.send(Notification { method, params });
                }
                None => warn!("inbound message is neither response nor notification"),
            },
            TransportEvent::Error { kind, detail } => {
                if kind.is_server_bug() {
                    warn!(?kind, detail = %detail, "server-side transport fault");
                } else {
                    warn!(?kind, detail = %detail, "environment transport fault");
                }
            }
            TransportEvent::Closed => {
                debug!("transport closed; failing pendings");
                shared.fail_all(|| BellwetherError::TransportClosed);
                shared.set_state(SessionState::Closed);
                break;
            }
        }
    }
}

fn dispatch_response(shared: &Shared, response: JsonRpcResponse) {
    let Some(id) = response.id else {
        warn!("response without id discarded");
        return;
    };

    let entry = {
        let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&id)
    };

    let Some(entry) = entry else {
        if shared.cleaning_up.load(Ordering::SeqCst) {
            // Close race: a response arriving after cleanup is dropped silently.
            return;
        }
        warn!(id, "response with unknown or duplicate id");
        return;
    };

    debug!(method = %entry.method, id, "<- response");
    let outcome = if let Some(error) = response.error {
        Err(BellwetherError::Protocol {
            code: error.code,
            message: error.message,
        })
    } else {
        Ok(response.result.unwrap_or(Value::Null))
    };
    let _ = entry.tx.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportDiagnostics;
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    /// Transport double that records sends and lets tests inject events.
    struct FakeTransport {
        sent: AsyncMutex<Vec<Value>>,
        events: mpsc::Sender<TransportEvent>,
    }

    impl FakeTransport {
        fn pair() -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    sent: AsyncMutex::new(Vec::new()),
                    events: tx,
                }),
                rx,
            )
        }

        async fn inject(&self, value: Value) {
            self.events
                .send(TransportEvent::Message(value))
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, message: Value) -> Result<()> {
            self.sent.lock().await.push(message);
            Ok(())
        }

        async fn close(&self) {
            let _ = self.events.send(TransportEvent::Closed).await;
        }

        fn diagnostics(&self) -> TransportDiagnostics {
            TransportDiagnostics::default()
        }
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport.clone(), events);

        let handle = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.call("tools/list", None, Duration::from_secs(1)).await }
        });
        // Let the request go out, then answer it by id.
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport
            .inject(serde_json::json!({
                "jsonrpc": "2.0", "id": 1, "result": {"tools": []}
            }))
            .await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result["tools"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_protocol_error_surfaces() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport.clone(), events);

        let handle = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.call("tools/call", None, Duration::from_secs(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport
            .inject(serde_json::json!({
                "jsonrpc": "2.0", "id": 1,
                "error": {"code": -32601, "message": "Method not found"}
            }))
            .await;

        match handle.await.unwrap() {
            Err(BellwetherError::Protocol { code, .. }) => assert_eq!(code, -32601),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_removes_pending() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport.clone(), events);

        let result = session
            .call("tools/call", None, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(BellwetherError::Timeout { .. })));

        // A late response for the timed-out id must be discarded quietly.
        transport
            .inject(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_close_fails_pendings() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport.clone(), events);

        let handle = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.call("tools/call", None, Duration::from_secs(5)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.close().await;

        assert!(matches!(
            handle.await.unwrap(),
            Err(BellwetherError::TransportClosed)
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_call_after_close_rejected() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport, events);
        session.close().await;
        let result = session.call("ping", None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BellwetherError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_monotone_ids() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport.clone(), events);

        for expected_id in 1..=3i64 {
            let handle = tokio::spawn({
                let session = Arc::clone(&session);
                async move { session.call("ping", None, Duration::from_secs(1)).await }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            transport
                .inject(serde_json::json!({"jsonrpc": "2.0", "id": expected_id, "result": {}}))
                .await;
            handle.await.unwrap().unwrap();
        }

        let sent = transport.sent.lock().await;
        let ids: Vec<i64> = sent.iter().map(|m| m["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_notifications_broadcast() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport.clone(), events);
        let mut subscriber = session.notifications();

        transport
            .inject(serde_json::json!({
                "jsonrpc": "2.0",
                "method": "notifications/tools/list_changed"
            }))
            .await;

        let notification = subscriber.recv().await.unwrap();
        assert_eq!(notification.method, "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_initialize_failure_clears_state() {
        let (transport, events) = FakeTransport::pair();
        let session = Session::new(transport, events);
        session.mark_handshaking();
        session.fail_initialize("server rejected protocol version");
        assert_eq!(session.state(), SessionState::Closed);
    }
}
