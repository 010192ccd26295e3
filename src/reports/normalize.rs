//! Turns a parsed report body into the record written to the report log.

use axum::http::{HeaderMap, header};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Envelope key browsers wrap CSP violations in.
pub const CSP_ENVELOPE: &str = "csp-report";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Report body must be a JSON object")]
    NotAnObject,
}

/// Request details merged into every record.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub remote_addr: Option<IpAddr>,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

impl RequestMeta {
    /// Capture metadata for a request arriving now.
    pub fn capture(remote_addr: Option<IpAddr>, headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        Self {
            remote_addr,
            user_agent,
            timestamp: Utc::now(),
        }
    }

    /// ISO-8601 in UTC with millisecond precision and no zone suffix,
    /// e.g. `2026-10-19T08:15:30.123`.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// A normalized report, ready to be appended to the report log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReportRecord(Map<String, Value>);

impl ReportRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }
}

/// Build a [`ReportRecord`] from a report body and its request metadata.
///
/// Metadata fields are merged over the body, then the members of a nested
/// `csp-report` object are hoisted to the top level and the envelope key is
/// removed. `body` is left untouched.
pub fn normalize(body: &Value, meta: &RequestMeta) -> Result<ReportRecord, NormalizeError> {
    let Value::Object(fields) = body else {
        return Err(NormalizeError::NotAnObject);
    };

    let mut record = fields.clone();
    record.insert("timestamp".to_owned(), meta.timestamp_string().into());
    record.insert(
        "remote_addr".to_owned(),
        meta.remote_addr.map(|ip| ip.to_string()).into(),
    );
    record.insert("user-agent".to_owned(), meta.user_agent.clone().into());

    match record.remove(CSP_ENVELOPE) {
        Some(Value::Object(report)) => record.extend(report),
        Some(other) => {
            record.insert(CSP_ENVELOPE.to_owned(), other);
        }
        None => {}
    }

    let source = record
        .get("remote_addr")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let message = format!("New report-uri report from {source}");
    record.insert("message".to_owned(), message.into());

    Ok(ReportRecord(record))
}
