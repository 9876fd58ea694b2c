use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use parley_shared::UserId;

use crate::api::AppState;
use crate::auth::gateway_verified_user;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Who a bucket belongs to: the gateway-verified caller, else the peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    User(UserId),
    Ip(IpAddr),
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKey::User(id) => write!(f, "user:{}", id.short()),
            ClientKey::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, key: ClientKey) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(key) = client_key(&req, state.config.gateway_token.as_deref()) {
        if !state.rate_limiter.check(key.clone()).await {
            warn!(client = %key, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Rate-limit by caller only when the gateway vouched for it; a bare
/// `X-User-Id` is client-controlled and falls back to the peer address.
fn client_key<B>(req: &Request<B>, gateway_token: Option<&str>) -> Option<ClientKey> {
    if let Some(user) = gateway_verified_user(req.headers(), req.uri(), gateway_token) {
        return Some(ClientKey::User(user));
    }
    extract_client_ip(req).map(ClientKey::Ip)
}

/// Try ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> ClientKey {
        ClientKey::Ip(s.parse().unwrap())
    }

    fn user(s: &str) -> ClientKey {
        ClientKey::User(UserId::parse(s).unwrap())
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_burst() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let key = user("alice");

        for _ in 0..5 {
            assert!(limiter.check(key.clone()).await);
        }

        assert!(!limiter.check(key).await);
    }

    #[tokio::test]
    async fn test_rate_limiter_separate_keys() {
        let limiter = RateLimiter::new(10.0, 2.0);

        assert!(limiter.check(ip("10.0.0.1")).await);
        assert!(limiter.check(ip("10.0.0.1")).await);
        assert!(!limiter.check(ip("10.0.0.1")).await);

        assert!(limiter.check(ip("10.0.0.2")).await);
        assert!(limiter.check(user("10.0.0.1")).await);
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let limiter = RateLimiter::new(10.0, 5.0);
        assert!(limiter.check(ip("192.168.1.1")).await);

        limiter.purge_stale(0.0).await;

        let buckets = limiter.buckets.lock().await;
        assert!(buckets.is_empty());
    }

    #[test]
    fn test_client_key_trusts_user_only_behind_gateway() {
        let req = Request::builder()
            .uri("/conversations")
            .header("x-user-id", "alice")
            .header("authorization", "Bearer s3cret")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_key(&req, Some("s3cret")), Some(user("alice")));
        assert_eq!(client_key(&req, None), Some(ip("203.0.113.7")));
        assert_eq!(client_key(&req, Some("other")), Some(ip("203.0.113.7")));
    }

    #[tokio::test]
    async fn test_rotating_user_header_shares_ip_bucket() {
        let limiter = RateLimiter::new(0.001, 2.0);
        let mut allowed = 0;
        for n in 0..50 {
            let req = Request::builder()
                .uri("/users")
                .header("x-user-id", format!("user-{n}"))
                .header("x-forwarded-for", "203.0.113.7")
                .body(())
                .unwrap();
            let key = client_key(&req, None).unwrap();
            if limiter.check(key).await {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 2);
        assert_eq!(limiter.buckets.lock().await.len(), 1);
    }
}
