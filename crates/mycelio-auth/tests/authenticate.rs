//! Credential authentication against the in-memory store

use std::sync::Arc;

use chrono::Utc;
use mycelio_auth::{AuthError, CredentialService, HashConfig, IssuedKey, KeyAuthenticator};
use mycelio_db::{AgentRecord, MemoryStore, Store, StoreTx};
use mycelio_types::{Agent, AgentId, CredentialTier, Karma};

struct Registered {
    agent_id: AgentId,
    admin: IssuedKey,
    worker: IssuedKey,
}

async fn register(store: &MemoryStore, credentials: &CredentialService) -> Registered {
    let admin = credentials.issue(CredentialTier::Admin).unwrap();
    let worker = credentials.issue(CredentialTier::Worker).unwrap();
    let now = Utc::now();
    let record = AgentRecord {
        agent: Agent {
            agent_id: AgentId::new(),
            alias: Some("tester".into()),
            capabilities: vec![],
            balance: Karma::new(100),
            escrow: Karma::ZERO,
            created_at: now,
            updated_at: now,
        },
        admin_key_hash: admin.hash.clone(),
        admin_key_prefix: admin.prefix.clone(),
        worker_key_hash: worker.hash.clone(),
        worker_key_prefix: worker.prefix.clone(),
    };

    let mut tx = store.begin().await.unwrap();
    tx.insert_agent(&record).await.unwrap();
    tx.commit().await.unwrap();

    Registered {
        agent_id: record.id(),
        admin,
        worker,
    }
}

fn setup() -> (MemoryStore, KeyAuthenticator) {
    let store = MemoryStore::new();
    let credentials = CredentialService::new(HashConfig::fast()).unwrap();
    let authenticator = KeyAuthenticator::new(Arc::new(store.clone()), credentials);
    (store, authenticator)
}

#[tokio::test]
async fn both_tiers_resolve_to_the_agent() {
    let (store, auth) = setup();
    let agent = register(&store, auth.credentials()).await;

    let admin = auth.authenticate(&agent.admin.credential).await.unwrap();
    assert_eq!(admin.agent_id, agent.agent_id);
    assert_eq!(admin.tier, CredentialTier::Admin);
    assert!(admin.require_admin().is_ok());

    let header = format!("Bearer {}", agent.worker.credential.as_str());
    let worker = auth.authenticate_header(Some(&header)).await.unwrap();
    assert_eq!(worker.agent_id, agent.agent_id);
    assert_eq!(worker.tier, CredentialTier::Worker);
    assert!(matches!(worker.require_admin(), Err(AuthError::Forbidden)));
}

#[tokio::test]
async fn unknown_and_malformed_credentials_are_rejected() {
    let (store, auth) = setup();
    register(&store, auth.credentials()).await;

    let stranger = CredentialService::generate(CredentialTier::Worker);
    assert!(matches!(auth.authenticate(&stranger).await, Err(AuthError::Unauthorized)));
    assert!(matches!(auth.authenticate("sk-myc_short").await, Err(AuthError::Unauthorized)));
    assert!(matches!(auth.authenticate("").await, Err(AuthError::Unauthorized)));
    assert!(matches!(auth.authenticate_header(None).await, Err(AuthError::Unauthorized)));
    assert!(matches!(
        auth.authenticate_header(Some("Token abc")).await,
        Err(AuthError::Unauthorized)
    ));
}

#[tokio::test]
async fn tier_prefix_must_match_the_stored_key() {
    let (store, auth) = setup();
    let agent = register(&store, auth.credentials()).await;

    // Worker body presented under the admin prefix
    let body = &agent.worker.credential["sk-myc_".len()..];
    let swapped = format!("admin-myc_{}", body);
    assert!(matches!(auth.authenticate(&swapped).await, Err(AuthError::Unauthorized)));
}

#[tokio::test]
async fn rotated_worker_key_replaces_the_old_one() {
    let (store, auth) = setup();
    let agent = register(&store, auth.credentials()).await;

    let fresh = auth.credentials().issue(CredentialTier::Worker).unwrap();
    let mut tx = store.begin().await.unwrap();
    let mut record = tx.lock_agent(agent.agent_id).await.unwrap().unwrap();
    record.worker_key_hash = fresh.hash.clone();
    record.worker_key_prefix = fresh.prefix.clone();
    tx.update_agent(&record).await.unwrap();
    tx.commit().await.unwrap();

    assert!(matches!(
        auth.authenticate(&agent.worker.credential).await,
        Err(AuthError::Unauthorized)
    ));
    let resolved = auth.authenticate(&fresh.credential).await.unwrap();
    assert_eq!(resolved.agent_id, agent.agent_id);

    // Admin key is untouched by a worker rotation
    assert!(auth.authenticate(&agent.admin.credential).await.is_ok());
}
