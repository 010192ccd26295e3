//! Inbound rate limiting for the report intake routes, per client IP.
//!
//! Two windows are checked on every report (first rejection wins, the longest
//! wait is reported):
//!
//! 1. **Burst** -- `burst` reports per 5 seconds
//! 2. **Sustained** -- `per_minute` reports per minute
//!
//! A misbehaving page can make a browser emit a report per DOM mutation; this
//! keeps one client from filling the report log.
//!
//! Limiter state is one entry per client IP. [`spawn_pruner`] periodically
//! drops entries whose buckets have fully refilled.

use crate::web::error::ApiError;
use crate::web::middleware::client_ip::{ProxyTrust, peer_addr, resolve_client_ip};
use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter, clock::Clock};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower::{Layer, Service};
use tracing::{debug, warn};

const BURST_WINDOW: Duration = Duration::from_secs(5);
const SUSTAINED_WINDOW: Duration = Duration::from_secs(60);
/// How often idle per-IP entries are evicted.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Keyed limiters for both windows.
pub struct RateLimitState {
    burst: DefaultKeyedRateLimiter<IpAddr>,
    sustained: DefaultKeyedRateLimiter<IpAddr>,
}

/// Quota helper: `count` requests per `period` with burst = count.
fn quota(count: u32, period: Duration) -> Quota {
    let count = NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period / count.get())
        .unwrap_or_else(|| Quota::per_second(count))
        .allow_burst(count)
}

impl RateLimitState {
    pub fn new(burst: u32, per_minute: u32) -> Self {
        Self::with_windows((burst, BURST_WINDOW), (per_minute, SUSTAINED_WINDOW))
    }

    /// Limiters over arbitrary `(count, window)` pairs.
    pub fn with_windows(burst: (u32, Duration), sustained: (u32, Duration)) -> Self {
        Self {
            burst: RateLimiter::keyed(quota(burst.0, burst.1)),
            sustained: RateLimiter::keyed(quota(sustained.0, sustained.1)),
        }
    }

    /// Drop clients whose buckets have fully refilled in both windows.
    pub fn prune(&self) {
        for limiter in [&self.burst, &self.sustained] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Number of tracked client IPs.
    pub fn len(&self) -> usize {
        self.burst.len().max(self.sustained.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `Ok(())` if allowed, or `Err(retry_after_secs)` with the
    /// longest wait across rejecting windows.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let mut max_wait: Option<Duration> = None;
        let mut rejected = false;

        for limiter in [&self.burst, &self.sustained] {
            if let Err(not_until) = limiter.check_key(&ip) {
                let wait = not_until.wait_time_from(governor::clock::DefaultClock::default().now());
                if wait > max_wait.unwrap_or(Duration::ZERO) {
                    max_wait = Some(wait);
                }
                rejected = true;
            }
        }

        if rejected {
            Err(max_wait.map(|d| d.as_secs().max(1)).unwrap_or(1))
        } else {
            Ok(())
        }
    }
}

pub type SharedRateLimitState = Arc<RateLimitState>;

/// Evict idle clients every `every` until the returned task is aborted.
pub fn spawn_pruner(state: SharedRateLimitState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let before = state.len();
            state.prune();
            debug!(before, after = state.len(), "Pruned rate limiter state");
        }
    })
}

// -- Tower Layer + Service --

#[derive(Clone)]
pub struct RateLimitLayer {
    state: SharedRateLimitState,
    trust: ProxyTrust,
}

impl RateLimitLayer {
    pub fn new(state: SharedRateLimitState, trust: ProxyTrust) -> Self {
        Self { state, trust }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
            trust: self.trust,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: SharedRateLimitState,
    trust: ProxyTrust,
}

impl<S, ResBody> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response<ResBody>> + Send + Clone + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug + Send,
    ResBody: Send + 'static,
    Body: Into<ResBody>,
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
        let peer = peer_addr(req.extensions());

        let Some(ip) = resolve_client_ip(req.headers(), peer, self.trust) else {
            // Cannot determine IP -- allow; the handler rejects it anyway.
            return Box::pin(self.inner.call(req));
        };

        match self.state.check(ip) {
            Ok(()) => Box::pin(self.inner.call(req)),
            Err(retry_after) => {
                warn!(
                    client_ip = %ip,
                    path = %req.uri().path(),
                    retry_after_secs = retry_after,
                    "Rate limit exceeded"
                );
                let resp = ApiError::RateLimited(retry_after)
                    .into_response()
                    .map(Into::into);
                Box::pin(async move { Ok(resp) })
            }
        }
    }
}
