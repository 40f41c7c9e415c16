//! Rate Limiting Service
//!
//! Sliding-window request budgets per tier:
//!
//! | Tier       | Default | Applies to                                  |
//! |------------|---------|---------------------------------------------|
//! | `strict`   | 5/min   | registration, key rotation                  |
//! | `task`     | 20/min  | publish, claim, submit, settle, cancel      |
//! | `standard` | 30/min  | authenticated reads                         |
//! | `public`   | 100/min | public reads                                |
//!
//! Buckets are in-process; each tier keeps its own budget per identifier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;
use crate::error::{AuthError, AuthResult};

/// Rate-limit tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateTier {
    Strict,
    Standard,
    Public,
    Task,
}

impl RateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Public => "public",
            Self::Task => "task",
        }
    }
}

/// Rate limiter service
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<RwLock<HashMap<(RateTier, String), RateBucket>>>,
}

/// Request timestamps within the window
#[derive(Debug, Clone, Default)]
struct RateBucket {
    requests: Vec<Instant>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Budget per window for a tier
    pub fn limit_for(&self, tier: RateTier) -> u32 {
        match tier {
            RateTier::Strict => self.config.strict,
            RateTier::Standard => self.config.standard,
            RateTier::Public => self.config.public,
            RateTier::Task => self.config.task,
        }
    }

    /// Admit or reject one request from `identifier` under `tier`
    pub async fn check(&self, tier: RateTier, identifier: &str) -> AuthResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let limit = self.limit_for(tier) as usize;
        let window = self.config.window;
        let now = Instant::now();

        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry((tier, identifier.to_string()))
            .or_default();

        bucket.requests.retain(|&t| now.duration_since(t) < window);

        if bucket.requests.len() >= limit {
            let retry_after = bucket
                .requests
                .first()
                .map(|&oldest| window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(window);
            tracing::debug!(
                tier = tier.as_str(),
                identifier = identifier,
                "Rate limit exceeded"
            );
            return Err(AuthError::rate_limited(retry_after));
        }

        bucket.requests.push(now);
        Ok(())
    }

    /// Requests left in the current window
    pub async fn remaining(&self, tier: RateTier, identifier: &str) -> u32 {
        let limit = self.limit_for(tier);
        let now = Instant::now();
        let buckets = self.buckets.read().await;
        let used = buckets
            .get(&(tier, identifier.to_string()))
            .map(|b| {
                b.requests
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.config.window)
                    .count() as u32
            })
            .unwrap_or(0);
        limit.saturating_sub(used)
    }

    /// Drop buckets with no request in the current window
    pub async fn cleanup(&self) {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();
        let window = self.config.window;
        buckets.retain(|_, bucket| {
            bucket
                .requests
                .last()
                .map(|&t| now.duration_since(t) < window)
                .unwrap_or(false)
        });
    }

    /// Sweep period suited to the configured window
    pub fn cleanup_interval(&self) -> Duration {
        self.config.window.max(Duration::from_secs(1)) * 2
    }
}

/// Client address claimed by `X-Forwarded-For` (first hop) or `X-Real-IP`
///
/// Clients can set these headers freely; treat the result as a hint unless the
/// peer is a known proxy.
pub fn forwarded_client_ip(headers: &http::HeaderMap) -> Option<String> {
    let forwarded_for = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    forwarded_for.or_else(|| {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Extract the client address used as the rate-limit identifier
pub fn extract_client_ip(
    headers: &http::HeaderMap,
    peer_addr: Option<std::net::SocketAddr>,
) -> String {
    // Priority: X-Forwarded-For > X-Real-IP > peer addr
    forwarded_client_ip(headers)
        .or_else(|| peer_addr.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            window: Duration::from_secs(60),
            strict: 5,
            standard: 30,
            public: 100,
            task: 20,
        }
    }

    #[tokio::test]
    async fn test_strict_tier_limit() {
        let limiter = RateLimiter::new(test_config());

        for _ in 0..5 {
            assert!(limiter.check(RateTier::Strict, "1.2.3.4").await.is_ok());
        }

        let result = limiter.check(RateTier::Strict, "1.2.3.4").await;
        assert!(matches!(result, Err(AuthError::RateLimitExceeded { .. })));

        // Different identifier should still work
        assert!(limiter.check(RateTier::Strict, "1.2.3.5").await.is_ok());
    }

    #[tokio::test]
    async fn test_tiers_are_independent() {
        let limiter = RateLimiter::new(test_config());

        for _ in 0..5 {
            limiter.check(RateTier::Strict, "agent").await.unwrap();
        }
        assert!(limiter.check(RateTier::Strict, "agent").await.is_err());
        assert!(limiter.check(RateTier::Task, "agent").await.is_ok());
        assert_eq!(limiter.remaining(RateTier::Task, "agent").await, 19);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let mut config = test_config();
        config.window = Duration::from_millis(50);
        config.strict = 1;
        let limiter = RateLimiter::new(config);

        limiter.check(RateTier::Strict, "k").await.unwrap();
        assert!(limiter.check(RateTier::Strict, "k").await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check(RateTier::Strict, "k").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_rate_limiting() {
        let mut config = test_config();
        config.enabled = false;
        let limiter = RateLimiter::new(config);

        for _ in 0..100 {
            assert!(limiter.check(RateTier::Strict, "user1").await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_buckets() {
        let mut config = test_config();
        config.window = Duration::from_millis(20);
        let limiter = RateLimiter::new(config);

        limiter.check(RateTier::Public, "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        limiter.cleanup().await;
        assert!(limiter.buckets.read().await.is_empty());
    }

    #[test]
    fn test_extract_client_ip() {
        use http::HeaderMap;

        let headers = HeaderMap::new();
        let peer: std::net::SocketAddr = "9.9.9.9:443".parse().unwrap();
        assert_eq!(extract_client_ip(&headers, Some(peer)), "9.9.9.9");
        assert_eq!(extract_client_ip(&headers, None), "unknown");

        let mut headers = HeaderMap::new();
        headers.insert("X-Real-IP", "10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, None), "10.0.0.1");

        headers.insert("X-Forwarded-For", "1.2.3.4, 5.6.7.8".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, None), "1.2.3.4");
    }
}
