//! Per-address request rate limiting
//!
//! Each client address gets a token bucket: `burst` tokens of capacity,
//! refilled at `per_second`. Buckets live in a bounded cache and are evicted
//! once an address has been idle for `idle`, so address churn cannot grow the
//! table without limit.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use moka::sync::Cache;

use crate::core::error::AppError;

/// Limiter settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Steady refill rate
    pub per_second: f64,
    /// Bucket capacity
    pub burst: u32,
    /// Most addresses tracked at once
    pub max_clients: u64,
    /// Evict an address after this long without requests
    pub idle: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_second: 5.0,
            burst: 20,
            max_clients: 10_000,
            idle: Duration::from_secs(600),
        }
    }
}

/// Token bucket
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Start full with `capacity` tokens, refilling `per_second`
    pub fn new(capacity: u32, per_second: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_rate: per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token if available
    pub fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens available now
    pub fn available(&mut self) -> u32 {
        self.refill();
        self.tokens as u32
    }
}

/// Buckets keyed by client address
pub struct IpRateLimiter {
    buckets: Cache<IpAddr, Arc<Mutex<TokenBucket>>>,
    config: RateLimitConfig,
}

impl IpRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let buckets = Cache::builder()
            .max_capacity(config.max_clients)
            .time_to_idle(config.idle)
            .build();

        Self { buckets, config }
    }

    /// Count one request from `ip`; false when its bucket is empty
    pub fn check(&self, ip: IpAddr) -> bool {
        let bucket = self.buckets.get_with(ip, || {
            Arc::new(Mutex::new(TokenBucket::new(
                self.config.burst,
                self.config.per_second,
            )))
        });

        let mut bucket = bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        bucket.try_acquire()
    }

    /// Addresses currently tracked (approximate until pending evictions run)
    pub fn tracked_clients(&self) -> u64 {
        self.buckets.run_pending_tasks();
        self.buckets.entry_count()
    }
}

/// Peer address from the connection, or the unspecified address when the
/// server was not started with connect info (e.g. in-process tests)
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Middleware rejecting requests over the limit with 429
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<IpRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);

    if !limiter.check(ip) {
        tracing::warn!(client = %ip, "rate limit exceeded");
        return AppError::TooManyRequests.into_response();
    }

    next.run(request).await
}
