// src/error.rs
// Standardized error types for Bellwether

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Bellwether library.
///
/// The variants form a closed taxonomy: transport, protocol, call-level,
/// configuration, baseline, and internal. Transport and protocol errors are
/// fatal for the run; call-level errors are captured in scenario results and
/// never stop the run.
#[derive(Error, Debug)]
pub enum BellwetherError {
    // Transport
    #[error("failed to spawn server process: {0}")]
    SpawnFailed(String),

    #[error("connection refused: {0}")]
    ConnectRefused(String),

    #[error("TLS handshake failed: {0}")]
    TlsFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("framing error: {0}")]
    FramingError(String),

    // Protocol
    #[error("initialize handshake failed: {0}")]
    InitializeFailed(String),

    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    // Call-level
    #[error("request '{method}' timed out after {ms}ms")]
    Timeout { method: String, ms: u64 },

    #[error("tool returned an error")]
    ToolError(serde_json::Value),

    #[error("unresolved step reference: {0}")]
    UnresolvedReference(String),

    // Configuration
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("config contains an inline secret at '{0}'; use an env reference instead")]
    SecretInConfig(String),

    // Baseline
    #[error("baseline format version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: u32, theirs: u32 },

    #[error("baseline integrity check failed: expected hash {expected}, computed {actual}")]
    IntegrityFailed { expected: String, actual: String },

    #[error("invalid baseline format: {0}")]
    FormatInvalid(String),

    #[error("baseline was produced by a cancelled run; pass --allow-cancelled to compare anyway")]
    CancelledBaseline,

    // Internal
    #[error("run cancelled")]
    Cancelled,

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unknown error: {0}")]
    Other(String),
}

/// Convenience type alias for Result using BellwetherError
pub type Result<T> = std::result::Result<T, BellwetherError>;

impl BellwetherError {
    /// Whether this error terminates the whole run when surfaced from the
    /// session (transport and protocol faults) as opposed to being recorded
    /// in the scenario result (call-level faults).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BellwetherError::SpawnFailed(_)
                | BellwetherError::ConnectRefused(_)
                | BellwetherError::TlsFailed(_)
                | BellwetherError::AuthFailed(_)
                | BellwetherError::TransportClosed
                | BellwetherError::FramingError(_)
                | BellwetherError::InitializeFailed(_)
                | BellwetherError::UnsupportedVersion(_)
        )
    }

    /// Short machine-readable kind used in scenario records and decision logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BellwetherError::SpawnFailed(_) => "spawn_failed",
            BellwetherError::ConnectRefused(_) => "connect_refused",
            BellwetherError::TlsFailed(_) => "tls_failed",
            BellwetherError::AuthFailed(_) => "auth_failed",
            BellwetherError::TransportClosed => "transport_closed",
            BellwetherError::FramingError(_) => "framing_error",
            BellwetherError::InitializeFailed(_) => "initialize_failed",
            BellwetherError::Protocol { .. } => "protocol_error",
            BellwetherError::UnsupportedVersion(_) => "unsupported_version",
            BellwetherError::Timeout { .. } => "timeout",
            BellwetherError::ToolError(_) => "tool_error",
            BellwetherError::UnresolvedReference(_) => "unresolved_reference",
            BellwetherError::ConfigNotFound(_) => "config_not_found",
            BellwetherError::ConfigInvalid(_) => "config_invalid",
            BellwetherError::SecretInConfig(_) => "secret_in_config",
            BellwetherError::VersionMismatch { .. } => "version_mismatch",
            BellwetherError::IntegrityFailed { .. } => "integrity_failed",
            BellwetherError::FormatInvalid(_) => "format_invalid",
            BellwetherError::CancelledBaseline => "cancelled_baseline",
            BellwetherError::Cancelled => "cancelled",
            BellwetherError::BudgetExceeded(_) => "budget_exceeded",
            BellwetherError::Io(_) => "io",
            BellwetherError::Json(_) => "json",
            BellwetherError::Yaml(_) => "yaml",
            BellwetherError::Http(_) => "http",
            BellwetherError::Other(_) => "other",
        }
    }
}

impl From<String> for BellwetherError {
    fn from(s: String) -> Self {
        BellwetherError::Other(s)
    }
}

impl From<tokio::task::JoinError> for BellwetherError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            BellwetherError::Cancelled
        } else {
            BellwetherError::Other(err.to_string())
        }
    }
}
