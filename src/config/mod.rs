// src/config/mod.rs
// Configuration loading and validation

pub mod env;

pub use env::{CredentialResolver, EnvCredentialResolver, Secret, sanitized_env};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{BellwetherError, Result};

/// Top-level config structure, loaded from YAML or JSON.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BellwetherConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub diff: DiffPolicy,
    /// Workflow YAML files to execute after the per-tool catalog.
    #[serde(default)]
    pub workflows: Vec<PathBuf>,
    /// Where baselines are written and read.
    #[serde(default = "default_baseline_path")]
    pub baseline_path: PathBuf,
    /// Where golden tool-output snapshots live.
    #[serde(default = "default_golden_dir")]
    pub golden_dir: PathBuf,
}

fn default_baseline_path() -> PathBuf {
    PathBuf::from("bellwether-baseline.json")
}

fn default_golden_dir() -> PathBuf {
    PathBuf::from(".bellwether/golden")
}

/// How to reach the server under test.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ServerConfig {
    /// Command to spawn for the stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child. Always wins over the sanitizer.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL for the SSE or streaming-HTTP transports.
    #[serde(default)]
    pub url: Option<String>,
    /// Transport selection; inferred from command/url when omitted.
    #[serde(default)]
    pub transport: Option<TransportKind>,
    /// Authentication for HTTP-based transports.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Minimum delay after spawn before the first request is sent.
    /// Package-runner servers routinely take seconds to become responsive.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
}

fn default_warmup_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Sse,
    Http,
}

impl ServerConfig {
    /// Resolve the transport: explicit selection wins, then command → stdio,
    /// then url → streaming HTTP.
    pub fn transport_kind(&self) -> Result<TransportKind> {
        if let Some(kind) = self.transport {
            return Ok(kind);
        }
        if self.command.is_some() {
            return Ok(TransportKind::Stdio);
        }
        if self.url.is_some() {
            return Ok(TransportKind::Http);
        }
        Err(BellwetherError::ConfigInvalid(
            "server config needs either 'command' or 'url'".into(),
        ))
    }

    /// One-line rendering of the server command for baseline metadata.
    pub fn command_line(&self) -> String {
        match (&self.command, &self.url) {
            (Some(cmd), _) if self.args.is_empty() => cmd.clone(),
            (Some(cmd), _) => format!("{} {}", cmd, self.args.join(" ")),
            (None, Some(url)) => url.clone(),
            (None, None) => String::new(),
        }
    }
}

/// Authentication configuration. The secret value itself never lives in the
/// config file; only the name of the env var that holds it.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuthConfig {
    /// Name of the environment variable holding the bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Inline token. Rejected at validation time.
    #[serde(default)]
    pub token: Option<String>,
}

/// Knobs for the scheduler and pruner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// How many tools may run concurrently.
    #[serde(default = "RunConfig::default_parallel_tools")]
    pub parallel_tools: usize,
    /// Per-request deadline.
    #[serde(default = "RunConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional global run deadline.
    #[serde(default)]
    pub run_deadline_ms: Option<u64>,
    /// Happy-path warmup calls issued before the catalog proper.
    #[serde(default)]
    pub warmup_scenarios: usize,
    /// Whether warmup results count toward the fingerprint.
    #[serde(default)]
    pub include_warmup_in_fingerprint: bool,
    /// Cap on categories the pruner may skip per tool.
    #[serde(default = "RunConfig::default_max_skipped_categories")]
    pub max_skipped_categories: usize,
    /// Incremental skip: tools with an unchanged schema tested within this
    /// window are carried forward without re-testing.
    #[serde(default = "RunConfig::default_max_fingerprint_age_hours")]
    pub max_fingerprint_age_hours: u64,
}

impl RunConfig {
    fn default_parallel_tools() -> usize {
        4
    }
    fn default_request_timeout_ms() -> u64 {
        30_000
    }
    fn default_max_skipped_categories() -> usize {
        3
    }
    fn default_max_fingerprint_age_hours() -> u64 {
        24
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel_tools: Self::default_parallel_tools(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            run_deadline_ms: None,
            warmup_scenarios: 0,
            include_warmup_in_fingerprint: false,
            max_skipped_categories: Self::default_max_skipped_categories(),
            max_fingerprint_age_hours: Self::default_max_fingerprint_age_hours(),
        }
    }
}

/// Deadlines for state-probe snapshots.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    #[serde(default = "SnapshotConfig::default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "SnapshotConfig::default_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

impl SnapshotConfig {
    fn default_probe_timeout_ms() -> u64 {
        5_000
    }
    fn default_total_timeout_ms() -> u64 {
        30_000
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: Self::default_probe_timeout_ms(),
            total_timeout_ms: Self::default_total_timeout_ms(),
        }
    }
}

/// Configurable diff policies. Both default to the non-breaking reading.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DiffPolicy {
    /// Treat a newly-added optional parameter without a default as breaking.
    #[serde(default)]
    pub optional_add_breaking: bool,
    /// Treat enum value additions as breaking (for clients that pin values).
    #[serde(default)]
    pub enum_add_breaking: bool,
    /// Permit diffing across baseline format major versions.
    #[serde(default)]
    pub allow_version_mismatch: bool,
    /// Permit diffing a baseline produced by a cancelled run.
    #[serde(default)]
    pub allow_cancelled: bool,
}

impl BellwetherConfig {
    /// Load from a YAML or JSON file; extension decides the parser, with a
    /// YAML fallback for unknown extensions.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BellwetherError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| BellwetherError::ConfigInvalid(e.to_string()))?,
            _ => serde_yaml::from_str(&content)
                .map_err(|e| BellwetherError::ConfigInvalid(e.to_string()))?,
        };
        debug!(path = %path.display(), "loaded config");
        config.validate()?;
        Ok(config)
    }

    /// Structural validation, run before any network activity.
    pub fn validate(&self) -> Result<()> {
        self.server.transport_kind()?;

        if self.server.auth.token.is_some() {
            return Err(BellwetherError::SecretInConfig("server.auth.token".into()));
        }
        for key in self.server.env.keys() {
            if env::looks_sensitive(key)
                && self.server.env.get(key).is_some_and(|v| !v.is_empty())
            {
                // Explicit env is allowed through to the child, but flag values
                // that were clearly pasted in rather than referenced.
                tracing::warn!(var = %key, "sensitive-looking variable set inline in config");
            }
        }

        if self.run.parallel_tools == 0 {
            return Err(BellwetherError::ConfigInvalid(
                "run.parallel_tools must be at least 1".into(),
            ));
        }
        if self.run.request_timeout_ms == 0 {
            return Err(BellwetherError::ConfigInvalid(
                "run.request_timeout_ms must be non-zero".into(),
            ));
        }
        if self.snapshot.probe_timeout_ms > self.snapshot.total_timeout_ms {
            return Err(BellwetherError::ConfigInvalid(
                "snapshot.probe_timeout_ms exceeds snapshot.total_timeout_ms".into(),
            ));
        }

        Ok(())
    }
}
