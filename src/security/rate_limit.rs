//! Per-client rate limiting with a token bucket.
//!
//! Buckets live in a `DashMap` keyed by client IP. A request holds the
//! shard's read lock plus its own bucket's mutex only for the refill and
//! consume arithmetic. The idle sweep takes shard write locks, so it can
//! never evict a bucket that a request is in the middle of updating.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::LimiterConfig;
use crate::http::error::ApiError;
use crate::observability::metrics;

/// Token bucket for one client.
#[derive(Debug)]
pub struct ClientState {
    tokens: f64,
    last_refill: Instant,
}

impl ClientState {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }
}

/// Shared limiter state, created once per server and injected into the middleware.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    refill_rate: f64,
    capacity: f64,
    sweep_interval: Duration,
    idle_timeout: Duration,
    clients: DashMap<IpAddr, Mutex<ClientState>>,
}

impl RateLimiter {
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            enabled: config.enabled,
            refill_rate: config.requests_per_second,
            capacity: f64::from(config.burst),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            clients: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Admit or reject one request from `client`.
    pub fn check(&self, client: IpAddr) -> bool {
        self.check_at(client, Instant::now())
    }

    pub(crate) fn check_at(&self, client: IpAddr, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }

        let bucket = match self.clients.get(&client) {
            Some(bucket) => bucket,
            None => self
                .clients
                .entry(client)
                .or_insert_with(|| Mutex::new(ClientState::new(self.capacity, now)))
                .downgrade(),
        };

        let mut state = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        state.try_acquire(now, self.capacity, self.refill_rate)
    }

    /// Drop clients idle longer than the configured timeout. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, bucket| {
            // The shard write lock is held, so no request can be inside this bucket.
            let state = bucket.get_mut().unwrap_or_else(PoisonError::into_inner);
            state.idle_for(now) <= self.idle_timeout
        });
        before.saturating_sub(self.clients.len())
    }

    /// Start the background sweep. Returns `None` when limiting is disabled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }

        let limiter = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = time::interval(limiter.sweep_interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep();
                        if evicted > 0 {
                            tracing::debug!(
                                evicted,
                                remaining = limiter.tracked_clients(),
                                "Swept idle rate limit clients"
                            );
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        }))
    }
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if !limiter.enabled() {
        return Ok(next.run(request).await);
    }

    let client = client_ip(&request)?;
    if limiter.check(client) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        metrics::record_rate_limited();
        Err(ApiError::RateLimitExceeded)
    }
}

/// Resolve the peer address recorded by the server for this connection.
///
/// A missing address means the server was not set up to record peers,
/// which is a deployment fault rather than anything the client did.
fn client_ip(request: &Request<Body>) -> Result<IpAddr, ApiError> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .ok_or_else(|| ApiError::Internal("client address unavailable for rate limiting".into()))
}
