//! Application state shared across handlers

use std::sync::Arc;

use mycelio_auth::{
    AuthConfig, AuthResult, CredentialService, CronGuard, KeyAuthenticator, RateLimiter, RateTier,
};
use mycelio_core::{AutoSettler, EscrowEngine, TimeoutReclaimer};

use crate::error::ApiResult;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Task lifecycle and escrow engine
    pub engine: Arc<EscrowEngine>,
    /// Bearer credential verification
    pub authenticator: KeyAuthenticator,
    /// Per-tier request budgets
    pub rate_limiter: RateLimiter,
    /// Scheduler trigger guard
    pub cron: CronGuard,
    pub reclaimer: TimeoutReclaimer,
    pub settler: AutoSettler,
}

impl AppState {
    /// Assemble the state around an engine
    ///
    /// `credentials` must be the service the engine issues keys with, so that
    /// the pepper and parameters agree.
    pub fn new(
        engine: Arc<EscrowEngine>,
        credentials: CredentialService,
        auth: AuthConfig,
    ) -> AuthResult<Self> {
        Ok(Self {
            authenticator: KeyAuthenticator::new(engine.store().clone(), credentials),
            rate_limiter: RateLimiter::new(auth.rate_limit),
            cron: CronGuard::new(auth.cron)?,
            reclaimer: TimeoutReclaimer::new(engine.clone()),
            settler: AutoSettler::new(engine.clone()),
            engine,
        })
    }

    /// Charge one request against `tier` for `client`
    pub async fn throttle(&self, tier: RateTier, client: &str) -> ApiResult<()> {
        self.rate_limiter.check(tier, client).await?;
        Ok(())
    }
}
