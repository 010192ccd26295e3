//! Per-request tracing spans with upstream-aware request IDs.
//!
//! Reuses an `X-Request-Id` supplied by the reverse proxy so diagnostics
//! correlate with its access log; otherwise generates a ULID. The resolved ID
//! is echoed on the response.

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::utils::fmt_duration;

pub static REQUEST_ID: &str = "x-request-id";
const MAX_UPSTREAM_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, B> Service<Request> for RequestIdService<S>
where
    S: Service<Request, Response = Response<B>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let req_id = resolve_request_id(req.headers());

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let content_length = req
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let span = tracing::info_span!("request", req_id = %req_id);
        let start = Instant::now();

        let future = self.inner.call(req);

        let header_value = HeaderValue::from_str(&req_id).ok();

        Box::pin(
            async move {
                let mut result = future.await;

                let duration = fmt_duration(start.elapsed());

                match &result {
                    Ok(response) => {
                        log_response(&method, &path, response.status(), content_length, &duration)
                    }
                    Err(e) => {
                        tracing::error!(method = %method, path = %path, error = ?e, duration, "Request failed");
                    }
                }

                if let Ok(ref mut response) = result
                    && let Some(value) = header_value
                {
                    response.headers_mut().insert(REQUEST_ID, value);
                }

                result
            }
            .instrument(span),
        )
    }
}

/// 2xx/3xx at debug, 4xx at info, everything else at warn.
fn log_response(
    method: &Method,
    path: &str,
    status: StatusCode,
    content_length: u64,
    duration: &str,
) {
    let status = status.as_u16();
    match status {
        200..=399 => {
            tracing::debug!(%method, path, status, content_length, duration, "Response");
        }
        400..=499 => {
            tracing::info!(%method, path, status, content_length, duration, "Response");
        }
        _ => {
            tracing::warn!(%method, path, status, content_length, duration, "Response");
        }
    }
}

/// Reuse the upstream ID when it is usable, otherwise mint a ULID.
fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_UPSTREAM_ID_LEN)
        .map(String::from)
        .unwrap_or_else(|| ulid::Ulid::new().to_string())
}
