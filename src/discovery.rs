// src/discovery.rs
// Initialize handshake, protocol version negotiation, capability discovery

use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{BellwetherError, Result};
use crate::protocol::{
    McpCapabilities, McpPrompt, McpResource, McpResourceTemplate, McpTool, ServerInfo,
};
use crate::session::Session;

/// Protocol revisions this client knows, newest first. The request always
/// carries the newest; the server's reply decides what is actually active.
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

static VERSION_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap_or_else(|_| unreachable!()));

/// Feature flags active for a negotiated protocol version.
///
/// Purely a function of the version string: protocol revisions are dated, so
/// ordinary string comparison orders them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolFeatures {
    pub server_instructions: bool,
    pub tool_annotations: bool,
    pub completions: bool,
    pub entity_titles: bool,
    pub structured_output: bool,
    pub version_header: bool,
    pub tasks: bool,
    pub icons: bool,
}

impl ProtocolFeatures {
    pub fn for_version(version: &str) -> Self {
        let mut features = Self {
            server_instructions: version >= "2024-11-05",
            ..Self::default()
        };
        if version >= "2025-03-26" {
            features.tool_annotations = true;
            features.completions = true;
        }
        if version >= "2025-06-18" {
            features.entity_titles = true;
            features.structured_output = true;
            features.version_header = true;
        }
        if version >= "2025-11-25" {
            features.tasks = true;
            features.icons = true;
        }
        features
    }

    /// Names of the active flags, sorted, for display and baselines.
    pub fn active(&self) -> Vec<&'static str> {
        let mut active = Vec::new();
        if self.server_instructions {
            active.push("server_instructions");
        }
        if self.tool_annotations {
            active.push("tool_annotations");
        }
        if self.completions {
            active.push("completions");
        }
        if self.entity_titles {
            active.push("entity_titles");
        }
        if self.structured_output {
            active.push("structured_output");
        }
        if self.version_header {
            active.push("version_header");
        }
        if self.tasks {
            active.push("tasks");
        }
        if self.icons {
            active.push("icons");
        }
        active.sort_unstable();
        active
    }
}

/// Everything learned from the handshake and the list calls.
#[derive(Debug, Clone)]
pub struct DiscoveredServer {
    pub server: ServerInfo,
    pub protocol_version: String,
    pub features: ProtocolFeatures,
    pub capabilities: McpCapabilities,
    pub instructions: Option<String>,
    pub tools: Vec<McpTool>,
    pub prompts: Vec<McpPrompt>,
    pub resources: Vec<McpResource>,
    pub resource_templates: Vec<McpResourceTemplate>,
}

/// Run the initialize handshake and enumerate the server's surface.
pub async fn discover(session: &Session, timeout: Duration) -> Result<DiscoveredServer> {
    session.mark_handshaking();

    let params = json!({
        "protocolVersion": SUPPORTED_VERSIONS[0],
        "capabilities": {},
        "clientInfo": {
            "name": "bellwether",
            "version": env!("CARGO_PKG_VERSION"),
        }
    });

    let result = match session.call("initialize", Some(params), timeout).await {
        Ok(result) => result,
        Err(e) => {
            session.fail_initialize(&e.to_string());
            return Err(BellwetherError::InitializeFailed(e.to_string()));
        }
    };

    let protocol_version = result
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if !VERSION_SHAPE.is_match(&protocol_version) {
        session.fail_initialize(&format!("unrecognized protocol version '{protocol_version}'"));
        return Err(BellwetherError::UnsupportedVersion(protocol_version));
    }
    if protocol_version.as_str() < SUPPORTED_VERSIONS[SUPPORTED_VERSIONS.len() - 1] {
        session.fail_initialize(&format!("protocol version too old: {protocol_version}"));
        return Err(BellwetherError::UnsupportedVersion(protocol_version));
    }

    let features = ProtocolFeatures::for_version(&protocol_version);
    let capabilities: McpCapabilities = result
        .get("capabilities")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();
    let server: ServerInfo = result
        .get("serverInfo")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();
    let instructions = if features.server_instructions {
        result
            .get("instructions")
            .and_then(|v| v.as_str())
            .map(String::from)
    } else {
        None
    };

    session.notify("notifications/initialized", None).await?;
    session.mark_ready();

    info!(
        server = %server.name,
        version = %server.version,
        protocol = %protocol_version,
        "initialized"
    );

    let tools = if capabilities.tools.is_some() {
        list_paginated(session, "tools/list", "tools", timeout).await?
    } else {
        Vec::new()
    };
    let prompts = if capabilities.prompts.is_some() {
        list_paginated(session, "prompts/list", "prompts", timeout)
            .await
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    let (resources, resource_templates) = if capabilities.resources.is_some() {
        let resources = list_paginated(session, "resources/list", "resources", timeout)
            .await
            .unwrap_or_default();
        let templates =
            list_paginated(session, "resources/templates/list", "resourceTemplates", timeout)
                .await
                .unwrap_or_default();
        (resources, templates)
    } else {
        (Vec::new(), Vec::new())
    };

    debug!(
        tools = tools.len(),
        prompts = prompts.len(),
        resources = resources.len(),
        "discovery complete"
    );

    Ok(DiscoveredServer {
        server,
        protocol_version,
        features,
        capabilities,
        instructions,
        tools,
        prompts,
        resources,
        resource_templates,
    })
}

/// Drain a cursor-paginated list method into one vector. Items that fail to
/// deserialize are logged and skipped rather than failing the listing.
async fn list_paginated<T: serde::de::DeserializeOwned>(
    session: &Session,
    method: &str,
    field: &str,
    timeout: Duration,
) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = cursor.as_ref().map(|c| json!({"cursor": c}));
        let result = session.call(method, params, timeout).await?;

        if let Some(array) = result.get(field).and_then(|v| v.as_array()) {
            for raw in array {
                match serde_json::from_value::<T>(raw.clone()) {
                    Ok(item) => items.push(item),
                    Err(e) => warn!(method = %method, "skipping undeserializable item: {}", e),
                }
            }
        }

        cursor = result
            .get("nextCursor")
            .and_then(|v| v.as_str())
            .map(String::from);
        if cursor.is_none() {
            break;
        }
    }
    Ok(items)
}

/// Fetch one prompt body. Exercised by deep discovery.
pub async fn get_prompt(
    session: &Session,
    name: &str,
    timeout: Duration,
) -> Result<Value> {
    session
        .call("prompts/get", Some(json!({"name": name, "arguments": {}})), timeout)
        .await
}

/// Read one resource. Exercised by deep discovery.
pub async fn read_resource(session: &Session, uri: &str, timeout: Duration) -> Result<Value> {
    session
        .call("resources/read", Some(json!({"uri": uri})), timeout)
        .await
}
