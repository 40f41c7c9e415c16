//! Mycelio Authentication
//!
//! Identity and access control for the task marketplace:
//!
//! - **Credentials**: two-tier API keys (admin, worker) hashed with Argon2id
//!   and located through a SHA-256 lookup prefix
//! - **Authentication**: bearer credential to `{agent_id, tier}` with
//!   uniform failure cost
//! - **Rate Limiting**: per-tier sliding windows
//! - **Scheduler Guard**: shared secret plus production source allowlist
//!
//! # Security Properties
//!
//! - Plaintext credentials are returned once and wiped from memory on drop
//! - Only hashes and lookup prefixes are persisted
//! - Error messages never reveal which check failed

pub mod authenticator;
pub mod config;
pub mod credential;
pub mod cron;
pub mod error;
pub mod rate_limit;

pub use authenticator::{parse_bearer, AuthenticatedAgent, KeyAuthenticator};
pub use config::{AuthConfig, CronConfig, HashConfig, RateLimitConfig, MIN_CRON_SECRET_LEN};
pub use credential::{CredentialService, IssuedKey, KEY_BODY_LEN, LOOKUP_PREFIX_LEN};
pub use cron::CronGuard;
pub use error::{AuthError, AuthResult};
pub use rate_limit::{extract_client_ip, forwarded_client_ip, RateLimiter, RateTier};
