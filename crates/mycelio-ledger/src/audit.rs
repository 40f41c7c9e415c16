//! Ledger reconciliation
//!
//! Recomputes each agent's balance and escrow from first principles and
//! compares them with the stored values:
//!
//! - `sum(amount)` over the agent's entries must equal `balance`
//! - the bounties of the agent's OPEN, LOCKED and SUBMITTED tasks must equal
//!   `escrow`
//! - entries must chain: the first starts at zero, each starts where the
//!   previous one ended, and each satisfies `before + amount == after`
//!
//! Reads are not taken under a single snapshot; run against a quiescent store
//! for an exact answer.

use std::sync::Arc;

use mycelio_db::Store;
use mycelio_types::{AgentId, Karma, TxId};
use serde::Serialize;
use tracing::{info, warn};

use crate::{LedgerError, Result};

/// Reconciliation result for one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentAudit {
    pub agent_id: AgentId,
    pub balance: Karma,
    pub escrow: Karma,
    pub ledger_sum: i64,
    pub live_escrow: u64,
    pub entries: usize,
    /// Entries that break the running-balance chain
    pub broken_links: Vec<TxId>,
}

impl AgentAudit {
    pub fn balance_matches(&self) -> bool {
        i128::from(self.ledger_sum) == i128::from(self.balance.0)
    }

    pub fn escrow_matches(&self) -> bool {
        self.live_escrow == self.escrow.0
    }

    pub fn is_clean(&self) -> bool {
        self.balance_matches() && self.escrow_matches() && self.broken_links.is_empty()
    }
}

/// Reconciliation result for every agent
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub agents_checked: usize,
    pub discrepancies: Vec<AgentAudit>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Checks ledger invariants against the store
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Reconcile one agent
    pub async fn reconcile_agent(&self, agent_id: AgentId) -> Result<AgentAudit> {
        let record = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| LedgerError::DatabaseError {
                message: format!("agent {} not found", agent_id),
            })?;

        let entries = self.store.agent_ledger(agent_id).await?;
        let ledger_sum = self.store.ledger_sum(agent_id).await?;
        let live_escrow = self.store.live_escrow(agent_id).await?;

        let mut broken_links = Vec::new();
        let mut running = Karma::ZERO;
        for entry in &entries {
            if !entry.is_consistent() || entry.balance_before != running {
                broken_links.push(entry.tx_id);
            }
            running = entry.balance_after;
        }

        Ok(AgentAudit {
            agent_id,
            balance: record.agent.balance,
            escrow: record.agent.escrow,
            ledger_sum,
            live_escrow,
            entries: entries.len(),
            broken_links,
        })
    }

    /// Reconcile every agent, collecting the ones that do not balance
    pub async fn reconcile_all(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();
        for agent_id in self.store.agent_ids().await? {
            let audit = self.reconcile_agent(agent_id).await?;
            report.agents_checked += 1;
            if !audit.is_clean() {
                warn!(
                    agent_id = %agent_id,
                    balance = audit.balance.0,
                    ledger_sum = audit.ledger_sum,
                    escrow = audit.escrow.0,
                    live_escrow = audit.live_escrow,
                    broken_links = audit.broken_links.len(),
                    "Ledger discrepancy"
                );
                report.discrepancies.push(audit);
            }
        }
        info!(
            agents_checked = report.agents_checked,
            discrepancies = report.discrepancies.len(),
            "Ledger reconciliation complete"
        );
        Ok(report)
    }
}
