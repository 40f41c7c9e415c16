//! Key Authenticator
//!
//! Resolves a bearer credential to `{agent_id, tier}`:
//!
//! 1. recognise the tier from the credential prefix
//! 2. derive the lookup prefix and fetch at most eight candidate agents
//! 3. verify the credential against each candidate's Argon2id hash
//!
//! Any failure, including a malformed credential, performs one dummy
//! verification against a reference hash so that failure latency does not
//! reveal which step rejected the credential. Read-only.

use std::sync::Arc;

use mycelio_db::{Store, MAX_PREFIX_CANDIDATES};
use mycelio_types::{AgentId, CredentialTier};
use serde::Serialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::credential::CredentialService;
use crate::error::{AuthError, AuthResult};

/// An authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthenticatedAgent {
    pub agent_id: AgentId,
    pub tier: CredentialTier,
}

impl AuthenticatedAgent {
    /// Account administration requires the admin tier
    pub fn require_admin(&self) -> AuthResult<()> {
        match self.tier {
            CredentialTier::Admin => Ok(()),
            CredentialTier::Worker => Err(AuthError::Forbidden),
        }
    }
}

/// Extract the credential from an `Authorization: Bearer <credential>` value
pub fn parse_bearer(header: Option<&str>) -> Option<&str> {
    let value = header?.strip_prefix("Bearer ")?.trim();
    (!value.is_empty()).then_some(value)
}

/// Verifies bearer credentials against the identity store
#[derive(Clone)]
pub struct KeyAuthenticator {
    store: Arc<dyn Store>,
    credentials: CredentialService,
}

impl KeyAuthenticator {
    pub fn new(store: Arc<dyn Store>, credentials: CredentialService) -> Self {
        Self { store, credentials }
    }

    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    /// Authenticate a raw credential
    pub async fn authenticate(&self, credential: &str) -> AuthResult<AuthenticatedAgent> {
        let credential = Zeroizing::new(credential.to_string());

        let Some(tier) = CredentialService::parse_tier(&credential) else {
            self.burn(credential).await;
            return Err(AuthError::Unauthorized);
        };

        let prefix = CredentialService::lookup_prefix(&credential);
        let candidates = self
            .store
            .find_agents_by_key_prefix(tier, &prefix, MAX_PREFIX_CANDIDATES)
            .await?;

        let hashes: Vec<(AgentId, String)> = candidates
            .into_iter()
            .map(|record| (record.id(), record.key_hash(tier).to_string()))
            .collect();

        let service = self.credentials.clone();
        let matched = tokio::task::spawn_blocking(move || -> AuthResult<Option<AgentId>> {
            for (agent_id, hash) in &hashes {
                if service.verify(&credential, hash)? {
                    return Ok(Some(*agent_id));
                }
            }
            service.dummy_verify(&credential);
            Ok(None)
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verification task failed: {}", e)))??;

        match matched {
            Some(agent_id) => {
                debug!(agent_id = %agent_id, tier = %tier, "Credential verified");
                Ok(AuthenticatedAgent { agent_id, tier })
            }
            None => Err(AuthError::Unauthorized),
        }
    }

    /// Authenticate an `Authorization` header value
    pub async fn authenticate_header(&self, header: Option<&str>) -> AuthResult<AuthenticatedAgent> {
        match parse_bearer(header) {
            Some(credential) => self.authenticate(credential).await,
            None => {
                self.burn(Zeroizing::new(String::new())).await;
                Err(AuthError::Unauthorized)
            }
        }
    }

    async fn burn(&self, credential: Zeroizing<String>) {
        let service = self.credentials.clone();
        let _ = tokio::task::spawn_blocking(move || service.dummy_verify(&credential)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer(Some("Bearer sk-myc_abc")), Some("sk-myc_abc"));
        assert_eq!(parse_bearer(Some("Bearer   ")), None);
        assert_eq!(parse_bearer(Some("Basic abc")), None);
        assert_eq!(parse_bearer(Some("sk-myc_abc")), None);
        assert_eq!(parse_bearer(None), None);
    }

    #[test]
    fn test_require_admin() {
        let admin = AuthenticatedAgent { agent_id: AgentId::new(), tier: CredentialTier::Admin };
        let worker = AuthenticatedAgent { agent_id: AgentId::new(), tier: CredentialTier::Worker };
        assert!(admin.require_admin().is_ok());
        assert!(matches!(worker.require_admin(), Err(AuthError::Forbidden)));
    }
}
