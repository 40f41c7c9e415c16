//! Database models - mapped from PostgreSQL tables
//!
//! `Db*` rows use signed integers and text columns as stored; conversion into
//! the domain types rejects any value that violates a domain invariant.

use chrono::{DateTime, Utc};
use mycelio_types::{
    Agent, AgentId, Capability, CredentialTier, Karma, Requirement, Task, TaskId, TaskStatus,
    Transaction, TxId, TxType,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{DbError, DbResult};

// ============================================================================
// Identity
// ============================================================================

/// An agent together with its credential material
///
/// Only one-way hashes and lookup prefixes are stored, never a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub agent: Agent,
    pub admin_key_hash: String,
    pub admin_key_prefix: String,
    pub worker_key_hash: String,
    pub worker_key_prefix: String,
}

impl AgentRecord {
    pub fn id(&self) -> AgentId {
        self.agent.agent_id
    }

    /// Stored hash for a credential tier
    pub fn key_hash(&self, tier: CredentialTier) -> &str {
        match tier {
            CredentialTier::Admin => &self.admin_key_hash,
            CredentialTier::Worker => &self.worker_key_hash,
        }
    }

    /// Stored lookup prefix for a credential tier
    pub fn key_prefix(&self, tier: CredentialTier) -> &str {
        match tier {
            CredentialTier::Admin => &self.admin_key_prefix,
            CredentialTier::Worker => &self.worker_key_prefix,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbAgent {
    pub agent_id: Uuid,
    pub alias: Option<String>,
    pub capabilities: serde_json::Value,
    pub balance: i64,
    pub escrow: i64,
    pub admin_key_hash: String,
    pub admin_key_prefix: String,
    pub worker_key_hash: String,
    pub worker_key_prefix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAgent> for AgentRecord {
    type Error = DbError;

    fn try_from(row: DbAgent) -> DbResult<Self> {
        let capabilities: Vec<Capability> = serde_json::from_value(row.capabilities)?;
        Ok(Self {
            agent: Agent {
                agent_id: AgentId(row.agent_id),
                alias: row.alias,
                capabilities,
                balance: karma_column("balance", row.balance)?,
                escrow: karma_column("escrow", row.escrow)?,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            admin_key_hash: row.admin_key_hash,
            admin_key_prefix: row.admin_key_prefix,
            worker_key_hash: row.worker_key_hash,
            worker_key_prefix: row.worker_key_prefix,
        })
    }
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbTask {
    pub task_id: Uuid,
    pub publisher_id: Uuid,
    pub solver_id: Option<Uuid>,
    pub bounty: i64,
    pub requirements: serde_json::Value,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub status: String,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub claim_deadline: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub settle_deadline: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbTask> for Task {
    type Error = DbError;

    fn try_from(row: DbTask) -> DbResult<Self> {
        let requirements: Vec<Requirement> = serde_json::from_value(row.requirements)?;
        let status: TaskStatus = row.status.parse().map_err(DbError::Serialization)?;
        Ok(Self {
            task_id: TaskId(row.task_id),
            publisher_id: AgentId(row.publisher_id),
            solver_id: row.solver_id.map(AgentId),
            bounty: karma_column("bounty", row.bounty)?,
            requirements,
            payload: row.payload,
            result: row.result,
            status,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            locked_at: row.locked_at,
            claim_deadline: row.claim_deadline,
            submitted_at: row.submitted_at,
            settle_deadline: row.settle_deadline,
            settled_at: row.settled_at,
        })
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbTransaction {
    pub tx_id: Uuid,
    pub agent_id: Uuid,
    pub task_id: Option<Uuid>,
    pub tx_type: String,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbTransaction> for Transaction {
    type Error = DbError;

    fn try_from(row: DbTransaction) -> DbResult<Self> {
        let tx_type: TxType = row.tx_type.parse().map_err(DbError::Serialization)?;
        Ok(Self {
            tx_id: TxId(row.tx_id),
            agent_id: AgentId(row.agent_id),
            task_id: row.task_id.map(TaskId),
            tx_type,
            amount: row.amount,
            balance_before: karma_column("balance_before", row.balance_before)?,
            balance_after: karma_column("balance_after", row.balance_after)?,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

/// Leaderboard aggregate row
#[derive(Debug, Clone, FromRow)]
pub struct DbLeaderboardRow {
    pub agent_id: Uuid,
    pub alias: Option<String>,
    pub karma_earned: i64,
    pub tasks_solved: i64,
}

/// Activity feed row (ledger entry joined with the agent alias)
#[derive(Debug, Clone, FromRow)]
pub struct DbActivityRow {
    pub tx_id: Uuid,
    pub tx_type: String,
    pub amount: i64,
    pub agent_id: Uuid,
    pub alias: Option<String>,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

fn karma_column(column: &str, value: i64) -> DbResult<Karma> {
    Karma::from_i64(value)
        .ok_or_else(|| DbError::Constraint(format!("{column} is negative: {value}")))
}

/// Convert a domain amount into its BIGINT column value
pub fn karma_to_i64(column: &str, value: Karma) -> DbResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| DbError::InvalidInput(format!("{column} exceeds BIGINT range")))
}
