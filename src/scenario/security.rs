// src/scenario/security.rs
// Fixed security payload tables used by the synthesizer

use super::ExpectedOutcome;
use std::fmt;

/// Payload families injected into string parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
    Ssrf,
}

impl SecurityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityCategory::SqlInjection => "sql_injection",
            SecurityCategory::Xss => "xss",
            SecurityCategory::PathTraversal => "path_traversal",
            SecurityCategory::CommandInjection => "command_injection",
            SecurityCategory::Ssrf => "ssrf",
        }
    }
}

impl fmt::Display for SecurityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the fixed payload table.
#[derive(Debug, Clone, Copy)]
pub struct SecurityPayload {
    pub category: SecurityCategory,
    pub payload: &'static str,
    pub expected: ExpectedOutcome,
}

/// The complete table. Order is fixed so scenario ids stay stable between
/// runs.
pub const PAYLOADS: &[SecurityPayload] = &[
    SecurityPayload {
        category: SecurityCategory::SqlInjection,
        payload: "' OR '1'='1",
        expected: ExpectedOutcome::Reject,
    },
    SecurityPayload {
        category: SecurityCategory::SqlInjection,
        payload: "1; DROP TABLE users--",
        expected: ExpectedOutcome::Reject,
    },
    SecurityPayload {
        category: SecurityCategory::Xss,
        payload: "<script>alert(1)</script>",
        expected: ExpectedOutcome::Sanitize,
    },
    SecurityPayload {
        category: SecurityCategory::Xss,
        payload: "\"><img src=x onerror=alert(1)>",
        expected: ExpectedOutcome::Sanitize,
    },
    SecurityPayload {
        category: SecurityCategory::PathTraversal,
        payload: "../../../etc/passwd",
        expected: ExpectedOutcome::Reject,
    },
    SecurityPayload {
        category: SecurityCategory::PathTraversal,
        payload: "..\\..\\..\\windows\\system32\\config\\sam",
        expected: ExpectedOutcome::Reject,
    },
    SecurityPayload {
        category: SecurityCategory::CommandInjection,
        payload: "; cat /etc/passwd",
        expected: ExpectedOutcome::Reject,
    },
    SecurityPayload {
        category: SecurityCategory::CommandInjection,
        payload: "$(id)",
        expected: ExpectedOutcome::Reject,
    },
    SecurityPayload {
        category: SecurityCategory::Ssrf,
        payload: "http://169.254.169.254/latest/meta-data/",
        expected: ExpectedOutcome::Reject,
    },
    SecurityPayload {
        category: SecurityCategory::Ssrf,
        payload: "http://localhost:6379/",
        expected: ExpectedOutcome::Reject,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_represented() {
        for category in [
            SecurityCategory::SqlInjection,
            SecurityCategory::Xss,
            SecurityCategory::PathTraversal,
            SecurityCategory::CommandInjection,
            SecurityCategory::Ssrf,
        ] {
            assert!(
                PAYLOADS.iter().any(|p| p.category == category),
                "no payload for {}",
                category
            );
        }
    }

    #[test]
    fn test_expected_behavior_is_reject_or_sanitize() {
        for payload in PAYLOADS {
            assert!(matches!(
                payload.expected,
                ExpectedOutcome::Reject | ExpectedOutcome::Sanitize
            ));
        }
    }
}
