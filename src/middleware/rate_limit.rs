// src/middleware/rate_limit.rs
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use tracing::{debug, warn};

use crate::error::AppError;

/// Per-client request budget for one route, keyed by peer IP.
#[derive(Clone)]
pub struct UploadLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    per_minute: u32,
}

impl UploadLimiter {
    /// `None` when `per_minute` is 0, which disables limiting.
    pub fn per_minute(per_minute: u32) -> Option<Self> {
        let rate = NonZeroU32::new(per_minute)?;
        Some(Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(rate))),
            per_minute,
        })
    }

    /// Drops idle per-IP state.
    pub fn shrink(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    fn check(&self, ip: IpAddr) -> Result<(), AppError> {
        match self.limiter.check_key(&ip) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Err(AppError::RateLimitExceeded {
                    retry_after: wait.as_secs().max(1),
                    limit: self.per_minute,
                })
            }
        }
    }
}

/// Rejects requests over the client's budget with 429.
///
/// Requests without connection info (in-process callers) share one bucket.
pub async fn limit_uploads(
    State(limiter): State<Option<UploadLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(limiter) = limiter else {
        return Ok(next.run(request).await);
    };

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(ip) {
        Ok(()) => {
            debug!(%ip, path = %request.uri().path(), "Rate limit check passed");
            Ok(next.run(request).await)
        }
        Err(err) => {
            warn!(%ip, path = %request.uri().path(), limit = limiter.per_minute, "Rate limit exceeded");
            Err(err)
        }
    }
}
