//! Per-client token bucket rate limiting.
//!
//! Each client key owns a bucket holding up to `burst` tokens that refills
//! at `per_second`. A request spends one token; an empty bucket yields 429.
//! The limiter lives in [`AppState`](crate::AppState) rather than in a global.
//!
//! Clients are keyed by peer address. `x-forwarded-for` is only honoured when
//! `trust_forwarded_for` is set, i.e. when the server sits behind a proxy that
//! overwrites the header.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::AppError;

/// Key shared by every request that carries no client address.
const SHARED_KEY: &str = "ip:unknown";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens refilled per second.
    pub per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
    /// Key clients on the first `x-forwarded-for` hop instead of the peer address.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 10.0,
            burst: 20,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter keyed by client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<DashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Number of clients currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    /// Spend one token for `key`. Returns `false` when the bucket is empty.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let capacity = self.capacity();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
        });

        bucket.tokens = self.refilled(&bucket, now);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have refilled to capacity. A dropped bucket is
    /// indistinguishable from a fresh one, so eviction never loosens a limit.
    pub fn cleanup_expired(&self) {
        self.cleanup_expired_at(Instant::now());
    }

    fn cleanup_expired_at(&self, now: Instant) {
        let capacity = self.capacity();
        self.buckets.retain(|_, bucket| self.refilled(bucket, now) < capacity);
    }

    fn capacity(&self) -> f64 {
        f64::from(self.config.burst)
    }

    fn refilled(&self, bucket: &Bucket, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        (bucket.tokens + elapsed * self.config.per_second).min(self.capacity())
    }

    /// Client key for `request`: the forwarded-for hop when trusted, else the
    /// peer address, else a shared key.
    pub fn client_key(&self, request: &Request) -> String {
        if self.config.trust_forwarded_for
            && let Some(ip) = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        {
            return format!("ip:{ip}");
        }
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
            .unwrap_or_else(|| SHARED_KEY.to_string())
    }
}

/// Evict full buckets every `interval`. Runs until the task is dropped.
pub async fn start_cleanup_task(limiter: RateLimiter, interval: Duration) {
    let mut timer = tokio::time::interval(interval);
    loop {
        timer.tick().await;
        limiter.cleanup_expired();
        debug!(clients = limiter.tracked_clients(), "rate limiter cleanup completed");
    }
}

/// Axum middleware rejecting requests whose client bucket is empty.
pub async fn enforce(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = state.rate_limiter.client_key(&request);
    if !state.rate_limiter.try_acquire(&key) {
        warn!(%key, "rate limit exceeded");
        return Err(AppError::TooManyRequests);
    }
    Ok(next.run(request).await)
}
