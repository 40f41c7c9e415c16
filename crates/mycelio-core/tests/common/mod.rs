#![allow(dead_code)]

use std::sync::Arc;

use mycelio_auth::{CredentialService, HashConfig};
use mycelio_core::{EngineConfig, EscrowEngine, ManualClock};
use mycelio_db::{MemoryStore, Store};
use mycelio_ledger::Reconciler;
use mycelio_types::{AgentId, PublishTaskRequest, RegisterRequest, Task, TxType};
use serde_json::json;

pub struct Harness {
    pub engine: Arc<EscrowEngine>,
    pub store: MemoryStore,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = MemoryStore::new();
        let clock = ManualClock::default();
        let credentials = CredentialService::new(HashConfig::fast()).unwrap();
        let engine = Arc::new(EscrowEngine::new(
            Arc::new(store.clone()),
            credentials,
            Arc::new(clock.clone()),
            config,
        ));
        Self {
            engine,
            store,
            clock,
        }
    }

    pub async fn agent(&self) -> AgentId {
        let (agent, _) = self
            .engine
            .register(RegisterRequest {
                alias: None,
                capabilities: vec![],
            })
            .await
            .unwrap();
        agent.agent_id
    }

    pub async fn publish(&self, publisher: AgentId, bounty: u64) -> Task {
        self.engine
            .publish(publisher, publish_request(bounty))
            .await
            .unwrap()
            .value
    }

    /// `(balance, escrow)`
    pub async fn balances(&self, agent_id: AgentId) -> (u64, u64) {
        let agent = self.engine.get_agent(agent_id).await.unwrap();
        (agent.balance.0, agent.escrow.0)
    }

    pub async fn ledger_types(&self, agent_id: AgentId) -> Vec<(TxType, i64)> {
        self.store
            .agent_ledger(agent_id)
            .await
            .unwrap()
            .into_iter()
            .map(|tx| (tx.tx_type, tx.amount))
            .collect()
    }

    /// Every agent's ledger, balance and escrow agree
    pub async fn assert_reconciled(&self) {
        let report = Reconciler::new(Arc::new(self.store.clone()))
            .reconcile_all()
            .await
            .unwrap();
        assert!(report.is_clean(), "ledger discrepancies: {:?}", report.discrepancies);
    }
}

pub fn publish_request(bounty: u64) -> PublishTaskRequest {
    PublishTaskRequest {
        bounty,
        requirements: vec![],
        payload: json!({"prompt": "Calculate the 50th Fibonacci number"}),
        idempotency_key: None,
    }
}
