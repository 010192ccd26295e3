//! Fixed headers stamped onto every response, including errors and fallbacks.

use axum::extract::Request;
use axum::http::header::{HeaderName, REFERRER_POLICY, SERVER};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

static EXPECT_CT: HeaderName = HeaderName::from_static("expect-ct");

/// The header set sent by the collector on every response.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(SERVER, HeaderValue::from_static("Coffee-Powered"));
    headers.insert(
        EXPECT_CT.clone(),
        HeaderValue::from_static("enforce, max-age=2592000"),
    );
    headers
}

/// Overwrites any same-named header the handler set.
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    headers: Arc<HeaderMap>,
}

impl SecurityHeadersLayer {
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers: Arc::new(headers),
        }
    }
}

impl Default for SecurityHeadersLayer {
    fn default() -> Self {
        Self::new(default_headers())
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            headers: self.headers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    headers: Arc<HeaderMap>,
}

impl<S, B> Service<Request> for SecurityHeadersService<S>
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
        let fixed = self.headers.clone();
        let future = self.inner.call(req);

        Box::pin(async move {
            let mut response = future.await?;
            let headers = response.headers_mut();
            for (name, value) in fixed.iter() {
                headers.insert(name.clone(), value.clone());
            }
            Ok(response)
        })
    }
}
