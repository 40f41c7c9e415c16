//! Authentication configuration
//!
//! Secure defaults for credential hashing, request rate limiting and the
//! shared-secret guard on scheduler endpoints.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum cron secret length accepted in production
pub const MIN_CRON_SECRET_LEN: usize = 32;

/// Main authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Credential hashing configuration
    pub hashing: HashConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Scheduler trigger configuration
    pub cron: CronConfig,
}

/// Credential hashing configuration (Argon2id)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Memory cost in KiB (OWASP recommends 19456 KiB = 19 MiB minimum)
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
    /// Output hash length in bytes
    pub hash_length: u32,
    /// Server-side pepper appended before hashing (optional)
    pub pepper: Option<String>,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_cost: 19456,
            time_cost: 2,
            parallelism: 1,
            hash_length: 32,
            pepper: None,
        }
    }
}

impl HashConfig {
    /// Cheap parameters for test suites
    pub fn fast() -> Self {
        Self {
            memory_cost: 256,
            time_cost: 1,
            parallelism: 1,
            hash_length: 32,
            pepper: None,
        }
    }
}

/// Request budget per rate-limit tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Sliding window length shared by all tiers
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Registration and key rotation
    pub strict: u32,
    /// Authenticated reads
    pub standard: u32,
    /// Unauthenticated public reads
    pub public: u32,
    /// Publish, claim, submit, settle, cancel
    pub task: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(60),
            strict: 5,
            standard: 30,
            public: 100,
            task: 20,
        }
    }
}

/// Scheduler trigger guard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Shared secret expected as `Authorization: Bearer <secret>`
    pub secret: Option<String>,
    /// Source addresses or CIDR ranges allowed in production
    pub allowed_ips: Vec<String>,
    /// Reverse proxies whose `X-Forwarded-For` is believed; any other peer is
    /// checked by its own socket address
    pub trusted_proxies: Vec<String>,
    /// Enforce production rules (secret strength, source allowlist)
    pub production: bool,
}

impl AuthConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.hashing.memory_cost < 8 * self.hashing.parallelism {
            errors.push("Argon2 memory cost must be at least 8 KiB per lane".to_string());
        }
        if self.hashing.time_cost < 1 {
            errors.push("Argon2 time cost must be at least 1".to_string());
        }
        if self.rate_limit.window.is_zero() {
            errors.push("Rate limit window must be non-zero".to_string());
        }
        for range in self.cron.allowed_ips.iter().chain(&self.cron.trusted_proxies) {
            if range.parse::<ipnetwork::IpNetwork>().is_err() {
                errors.push(format!("Invalid cron allowlist entry: {}", range));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers() {
        let config = RateLimitConfig::default();
        assert_eq!(config.strict, 5);
        assert_eq!(config.standard, 30);
        assert_eq!(config.public, 100);
        assert_eq!(config.task, 20);
        assert_eq!(config.window, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_bad_cidr() {
        let mut config = AuthConfig::default();
        config.cron.allowed_ips = vec!["10.0.0.0/8".into(), "not-an-ip".into()];
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("not-an-ip"));
    }
}
