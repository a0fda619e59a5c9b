// src/config/env.rs
// Sanitized child environment and credential resolution

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Variables never forwarded to a spawned server, matched by exact name.
const DENY_EXACT: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "NPM_TOKEN",
    "DATABASE_URL",
    "SSH_AUTH_SOCK",
];

/// Name families never forwarded, matched by regex.
static DENY_FAMILIES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^.+_API_KEY$",
        r"^.+_SECRET$",
        r"^.+_TOKEN$",
        r"^.+_PASSWORD$",
        r"^.+_CREDENTIALS$",
        r"^SECRET_.+$",
        r"^PRIVATE_.+$",
        r"^AWS_.+$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|_| unreachable!("static pattern")))
    .collect()
});

/// Whether a variable name matches the deny-list.
pub fn looks_sensitive(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    DENY_EXACT.contains(&upper.as_str()) || DENY_FAMILIES.iter().any(|re| re.is_match(&upper))
}

/// Build the child environment: the parent environment minus the deny-list,
/// with the explicitly-provided entries layered on top. Explicit entries
/// always win, including for names the filter would drop.
pub fn sanitized_env(explicit: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(name, _)| !looks_sensitive(name))
        .collect();

    let dropped = std::env::vars().filter(|(n, _)| looks_sensitive(n)).count();
    if dropped > 0 {
        debug!(count = dropped, "filtered sensitive variables from child environment");
    }

    for (k, v) in explicit {
        env.insert(k.clone(), v.clone());
    }
    env
}

/// An opaque secret. Redacts itself in Debug and Display and is deliberately
/// not serializable.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw value at the single point of use (auth header).
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Resolves a named credential to an opaque secret.
///
/// Resolution priority: explicit config value → named env var → project
/// `.env` → user-home `.env`. A system-keychain resolver can be substituted
/// behind the same trait.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Secret>;
}

/// Default resolver backed by the process environment and `.env` files.
pub struct EnvCredentialResolver {
    project_dir: Option<std::path::PathBuf>,
}

impl EnvCredentialResolver {
    pub fn new(project_dir: Option<&Path>) -> Self {
        Self {
            project_dir: project_dir.map(|p| p.to_path_buf()),
        }
    }

    fn from_dotenv(path: &Path, name: &str) -> Option<Secret> {
        let vars = dotenvy::from_path_iter(path).ok()?;
        for entry in vars {
            let (key, value) = entry.ok()?;
            if key == name && !value.trim().is_empty() {
                return Some(Secret::new(value));
            }
        }
        None
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, name: &str) -> Option<Secret> {
        if let Ok(value) = std::env::var(name)
            && !value.trim().is_empty()
        {
            return Some(Secret::new(value));
        }

        if let Some(dir) = &self.project_dir
            && let Some(secret) = Self::from_dotenv(&dir.join(".env"), name)
        {
            return Some(secret);
        }

        if let Some(home) = dirs::home_dir()
            && let Some(secret) = Self::from_dotenv(&home.join(".bellwether/.env"), name)
        {
            return Some(secret);
        }

        None
    }
}
