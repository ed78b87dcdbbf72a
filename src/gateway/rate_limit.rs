//! Per-client request ceiling
//!
//! Sliding-window log keyed by client address: a request is admitted when
//! fewer than `limit` requests from the same address fall inside the window.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;

use crate::server::ServiceError;

pub const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    hits: DashMap<IpAddr, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            hits: DashMap::new(),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, WINDOW)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    /// Admit or reject a request at `now`; on rejection returns how long
    /// until the oldest request leaves the window
    pub fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let mut hits = self.hits.entry(client).or_default();

        while let Some(&oldest) = hits.front() {
            if now.duration_since(oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.limit as usize {
            let retry_after = hits
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        hits.push_back(now);
        Ok(())
    }

    /// Drop clients with no request inside the window
    pub fn prune(&self, now: Instant) {
        let window = self.window;
        self.hits.retain(|_, hits| {
            hits.back()
                .is_some_and(|&latest| now.duration_since(latest) < window)
        });
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.hits.len()
    }
}

/// Peer address set by `into_make_service_with_connect_info`
pub fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn limit_by_ip(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let client = client_ip(&request);
    if let Err(retry_after) = limiter.check(client) {
        tracing::debug!("Rejecting request from {}", client);
        return Err(ServiceError::RateLimited {
            limit: limiter.limit(),
            retry_after,
        });
    }
    Ok(next.run(request).await)
}
