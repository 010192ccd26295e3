//! Report intake endpoints.
//!
//! Browsers send reports with `Content-Type: application/csp-report`,
//! `application/reports+json` or `application/json` depending on vendor and
//! mechanism, so the body is taken as raw bytes and parsed manually
//! regardless of content type.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::reports::{CSP_ENVELOPE, RequestMeta, normalize};
use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::middleware::client_ip::ClientIp;

const EXPECT_CT_ENVELOPE: &str = "expect-ct-report";

/// Body of every successful intake response.
#[derive(Debug, Serialize)]
pub struct Acknowledgement {
    result: &'static str,
}

impl Acknowledgement {
    pub const RECORDED: Self = Self {
        result: "Report recorded",
    };
    pub const SKIPPED: Self = Self {
        result: "Skipped recording",
    };
}

type Accepted = (StatusCode, Json<Acknowledgement>);

fn accepted(ack: Acknowledgement) -> Accepted {
    (StatusCode::CREATED, Json(ack))
}

/// `POST /csp` -- Content-Security-Policy violation reports.
pub(crate) async fn csp_report(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Accepted, ApiError> {
    let payload = parse_body(&body)?;
    state.schemas.validate(&state.csp_schema, &payload)?;

    let suppression = payload
        .get(CSP_ENVELOPE)
        .and_then(Value::as_object)
        .and_then(|report| state.suppression.check(report));
    if let Some(reason) = suppression {
        debug!(client_ip = %ip, %reason, "Skipping CSP report");
        return Ok(accepted(Acknowledgement::SKIPPED));
    }

    let record = normalize(&payload, &RequestMeta::capture(Some(ip), &headers))?;
    state.report_log.record(&record);
    Ok(accepted(Acknowledgement::RECORDED))
}

/// `POST /hpkp` -- HTTP Public-Key-Pinning failure reports.
pub(crate) async fn hpkp_report(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Accepted, ApiError> {
    let payload = parse_body(&body)?;
    state.schemas.validate(&state.hpkp_schema, &payload)?;

    let record = normalize(&payload, &RequestMeta::capture(Some(ip), &headers))?;
    state.report_log.record(&record);
    Ok(accepted(Acknowledgement::RECORDED))
}

/// `POST /ct` -- Expect-CT failure reports.
pub(crate) async fn expect_ct_report(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Accepted, ApiError> {
    let payload = parse_body(&body)?;
    if !payload.get(EXPECT_CT_ENVELOPE).is_some_and(is_truthy) {
        debug!(client_ip = %ip, "Expect-CT report without a report body");
        return Err(ApiError::InvalidExpectCtReport);
    }

    let record = normalize(&payload, &RequestMeta::capture(Some(ip), &headers))?;
    state.report_log.record(&record);
    Ok(accepted(Acknowledgement::RECORDED))
}

/// Parse a request body that must be a JSON object.
fn parse_body(body: &[u8]) -> Result<Value, ApiError> {
    let payload: Value = serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Malformed report body");
        ApiError::MalformedBody(format!("Malformed JSON body: {e}"))
    })?;

    if !payload.is_object() {
        return Err(ApiError::MalformedBody(
            "Report body must be a JSON object".to_owned(),
        ));
    }
    Ok(payload)
}

/// JSON truthiness: null, false, zero and empty containers are all "absent".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
