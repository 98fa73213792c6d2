//! # Rate Limiting
//!
//! Per-IP GCRA limiter (governor) applied to `/api/*`, with processor and
//! auth-provider webhooks exempt. The client IP is taken from the proxy
//! headers first (`CF-Connecting-IP`, `X-Forwarded-For`, `X-Real-IP`), then
//! from the connection.

use crate::config::RateLimitConfig;
use crate::error::AppError;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use market_core::{MarketError, MarketResult};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

type KeyedLimiter =
    RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock, StateInformationMiddleware>;

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow { remaining: u32 },
    Deny { retry_after_secs: u64 },
}

pub struct ApiRateLimiter {
    limiter: KeyedLimiter,
    limit: u32,
}

impl ApiRateLimiter {
    pub fn new(config: RateLimitConfig) -> MarketResult<Self> {
        let positive = |name: &str, v: u32| {
            NonZeroU32::new(v)
                .ok_or_else(|| MarketError::Configuration(format!("{name} must be positive")))
        };
        let quota = Quota::per_minute(positive("RATE_LIMIT_PER_MINUTE", config.per_minute)?)
            .allow_burst(positive("RATE_LIMIT_BURST", config.burst)?);

        Ok(Self {
            limiter: RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>(),
            limit: config.burst,
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn check(&self, ip: IpAddr) -> Decision {
        match self.limiter.check_key(&ip) {
            Ok(snapshot) => Decision::Allow {
                remaining: snapshot.remaining_burst_capacity(),
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.limiter.clock().now());
                // Round up: a client that waits the advertised time must get through
                let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                Decision::Deny {
                    retry_after_secs: secs.max(1),
                }
            }
        }
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

pub fn client_ip(req: &Request) -> IpAddr {
    let headers = req.headers();
    header_ip(headers, "cf-connecting-ip")
        .or_else(|| header_ip(headers, "x-forwarded-for"))
        .or_else(|| header_ip(headers, "x-real-ip"))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn is_limited_path(path: &str) -> bool {
    path.starts_with("/api/") && !path.starts_with("/api/webhooks/")
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`
pub async fn rate_limit(
    State(limiter): State<Arc<ApiRateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if !is_limited_path(req.uri().path()) {
        return next.run(req).await;
    }

    let ip = client_ip(&req);
    match limiter.check(ip) {
        Decision::Allow { remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            set_header(headers, "x-ratelimit-limit", limiter.limit());
            set_header(headers, "x-ratelimit-remaining", remaining);
            response
        }
        Decision::Deny { retry_after_secs } => {
            warn!(%ip, path = %req.uri().path(), "Rate limit exceeded");
            let mut response =
                AppError(MarketError::RateLimited { retry_after_secs }).into_response();
            let headers = response.headers_mut();
            set_header(headers, "x-ratelimit-limit", limiter.limit());
            set_header(headers, "x-ratelimit-remaining", 0);
            set_header(headers, "x-ratelimit-reset", retry_after_secs);
            response
        }
    }
}
