//! Suppression rules for CSP reports that are known noise.
//!
//! Browser extensions, `data:`/`blob:` sources and developers testing on
//! localhost account for most CSP reports and are never actionable.

use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

/// `blocked-uri` values that are dropped outright.
pub const SUPPRESSED_BLOCKED_URIS: [&str; 5] = [
    "self",
    "blob",
    "chrome-extension://",
    "safari-extension://",
    "data",
];

static LOCAL_DOCUMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://localhost").expect("valid localhost pattern"));

/// Why a report was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    BlockedUri(String),
    LocalDocument(String),
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suppression::BlockedUri(uri) => write!(f, "ignored blocked-uri '{uri}'"),
            Suppression::LocalDocument(uri) => write!(f, "localhost document-uri '{uri}'"),
        }
    }
}

/// The immutable rule set, built once at startup.
#[derive(Debug, Clone)]
pub struct SuppressionRules {
    blocked_uris: Vec<&'static str>,
    local_document: &'static Regex,
}

impl Default for SuppressionRules {
    fn default() -> Self {
        Self {
            blocked_uris: SUPPRESSED_BLOCKED_URIS.to_vec(),
            local_document: &LOCAL_DOCUMENT,
        }
    }
}

impl SuppressionRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the CSP report should be dropped without recording.
    pub fn should_suppress(&self, report: &Map<String, Value>) -> bool {
        self.check(report).is_some()
    }

    /// The first rule matching `report`, if any.
    ///
    /// `blocked-uri` must equal a sentinel exactly; `document-uri` matches on
    /// prefix. Missing or non-string fields never match.
    pub fn check(&self, report: &Map<String, Value>) -> Option<Suppression> {
        if let Some(blocked) = report.get("blocked-uri").and_then(Value::as_str)
            && self.blocked_uris.iter().any(|sentinel| *sentinel == blocked)
        {
            return Some(Suppression::BlockedUri(blocked.to_owned()));
        }

        if let Some(document) = report.get("document-uri").and_then(Value::as_str)
            && self.local_document.is_match(document)
        {
            return Some(Suppression::LocalDocument(document.to_owned()));
        }

        None
    }
}
