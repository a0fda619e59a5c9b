// tests/mock_server.rs
// In-process scriptable MCP server used by the end-to-end tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use bellwether::error::Result;
use bellwether::transport::{
    Transport, TransportDiagnostics, TransportEvent, event_channel,
};

type Handler = Box<dyn Fn(&Value) -> ToolBehavior + Send + Sync>;

/// What a mocked tool does when called.
pub enum ToolBehavior {
    /// Reply with a text content block holding this JSON payload.
    Json(Value),
    /// Reply with an isError envelope carrying this message.
    Error(String),
    /// Never reply; the caller's timeout decides.
    Hang,
}

/// A scriptable MCP server that lives behind the `Transport` trait, so the
/// whole session/discovery/executor stack runs against it unmodified.
pub struct MockServer {
    tools: Vec<Value>,
    handlers: HashMap<String, Handler>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    pub calls: Mutex<Vec<(String, Value)>>,
    protocol_version: String,
}

pub struct MockServerBuilder {
    tools: Vec<Value>,
    handlers: HashMap<String, Handler>,
    protocol_version: String,
}

impl MockServerBuilder {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            handlers: HashMap::new(),
            protocol_version: "2025-06-18".to_string(),
        }
    }

    /// Register a tool definition plus its behavior.
    pub fn tool(
        mut self,
        definition: Value,
        handler: impl Fn(&Value) -> ToolBehavior + Send + Sync + 'static,
    ) -> Self {
        let name = definition["name"].as_str().unwrap_or_default().to_string();
        self.tools.push(definition);
        self.handlers.insert(name, Box::new(handler));
        self
    }

    pub fn protocol_version(mut self, version: &str) -> Self {
        self.protocol_version = version.to_string();
        self
    }

    pub fn build(self) -> (Arc<MockServer>, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = event_channel();
        let server = Arc::new(MockServer {
            tools: self.tools,
            handlers: self.handlers,
            events: Mutex::new(Some(tx)),
            calls: Mutex::new(Vec::new()),
            protocol_version: self.protocol_version,
        });
        (server, rx)
    }
}

impl MockServer {
    async fn respond(&self, id: i64, result: Value) {
        let events = self.events.lock().await;
        if let Some(events) = events.as_ref() {
            let _ = events
                .send(TransportEvent::Message(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": result,
                })))
                .await;
        }
    }

    async fn respond_error(&self, id: i64, code: i64, message: &str) {
        let events = self.events.lock().await;
        if let Some(events) = events.as_ref() {
            let _ = events
                .send(TransportEvent::Message(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": message},
                })))
                .await;
        }
    }

    /// Calls recorded for one tool, in order.
    pub async fn calls_for(&self, tool: &str) -> Vec<Value> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockServer {
    async fn send(&self, message: Value) -> Result<()> {
        let method = message["method"].as_str().unwrap_or_default().to_string();
        let id = message["id"].as_i64();

        match (method.as_str(), id) {
            ("initialize", Some(id)) => {
                self.respond(
                    id,
                    json!({
                        "protocolVersion": self.protocol_version,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock-server", "version": "1.0.0"},
                    }),
                )
                .await;
            }
            ("tools/list", Some(id)) => {
                self.respond(id, json!({"tools": self.tools})).await;
            }
            ("tools/call", Some(id)) => {
                let name = message["params"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let args = message["params"]["arguments"].clone();
                self.calls.lock().await.push((name.clone(), args.clone()));

                match self.handlers.get(&name) {
                    Some(handler) => match handler(&args) {
                        ToolBehavior::Json(payload) => {
                            self.respond(
                                id,
                                json!({
                                    "content": [{"type": "text", "text": payload.to_string()}],
                                }),
                            )
                            .await;
                        }
                        ToolBehavior::Error(msg) => {
                            self.respond(
                                id,
                                json!({
                                    "content": [{"type": "text", "text": msg}],
                                    "isError": true,
                                }),
                            )
                            .await;
                        }
                        ToolBehavior::Hang => {}
                    },
                    None => {
                        self.respond_error(id, -32602, "unknown tool").await;
                    }
                }
            }
            (_, Some(id)) => {
                self.respond_error(id, -32601, "method not found").await;
            }
            // Notifications need no reply.
            (_, None) => {}
        }
        Ok(())
    }

    async fn close(&self) {
        let mut events = self.events.lock().await;
        if let Some(events) = events.take() {
            let _ = events.send(TransportEvent::Closed).await;
        }
    }

    fn diagnostics(&self) -> TransportDiagnostics {
        TransportDiagnostics::default()
    }
}

/// A tool that validates its required string argument the way a typical
/// server would: missing or non-string input is a tool error.
pub fn weather_tool() -> Value {
    json!({
        "name": "get_weather",
        "description": "Returns the forecast for a location",
        "inputSchema": {
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        }
    })
}

pub fn weather_behavior(args: &Value) -> ToolBehavior {
    match args.get("location").and_then(|v| v.as_str()) {
        Some(location) if !location.is_empty() => ToolBehavior::Json(json!({
            "location": location,
            "forecast": "sunny",
            "temperature": 21,
        })),
        _ => ToolBehavior::Error("location is required".to_string()),
    }
}

/// Standard run options for tests: small, fast, single worker unless a test
/// raises it.
pub fn test_run_options() -> bellwether::executor::RunOptions {
    bellwether::executor::RunOptions {
        parallel_tools: 2,
        request_timeout: Duration::from_millis(500),
        run_deadline: None,
        warmup_scenarios: 0,
        include_warmup_in_fingerprint: false,
        max_skipped_categories: 3,
        max_fingerprint_age_hours: 24,
        decision_log: None,
    }
}
