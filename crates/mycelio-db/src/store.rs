//! Transactional store abstraction
//!
//! [`Store`] exposes unlocked reads and opens [`StoreTx`] units of work. A
//! `StoreTx` takes exclusive row locks as it reads (`lock_*`), stages writes,
//! and publishes all of them on [`StoreTx::commit`]. Dropping an uncommitted
//! transaction discards every staged write and releases its locks.
//!
//! Callers that lock more than one row must do so in a fixed global order:
//! the task row first, then agent rows in ascending id order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mycelio_types::{
    ActivityEntry, AgentId, AgentStats, CredentialTier, LeaderboardEntry, PublicStats, Task,
    TaskId, Transaction,
};

use crate::{AgentRecord, DbResult};

/// Upper bound on agents returned by a credential prefix lookup
pub const MAX_PREFIX_CANDIDATES: usize = 8;

/// Shared persistence for agents, tasks and the ledger
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Open a unit of work
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>>;

    // =========================================================================
    // Identity
    // =========================================================================

    async fn get_agent(&self, id: AgentId) -> DbResult<Option<AgentRecord>>;

    /// Agents whose stored prefix for `tier` equals `prefix`, at most `limit`
    async fn find_agents_by_key_prefix(
        &self,
        tier: CredentialTier,
        prefix: &str,
        limit: usize,
    ) -> DbResult<Vec<AgentRecord>>;

    /// Every agent id, ascending
    async fn agent_ids(&self) -> DbResult<Vec<AgentId>>;

    // =========================================================================
    // Tasks
    // =========================================================================

    async fn get_task(&self, id: TaskId) -> DbResult<Option<Task>>;

    async fn find_task_by_idempotency_key(
        &self,
        publisher: AgentId,
        key: &str,
    ) -> DbResult<Option<Task>>;

    /// LOCKED tasks whose claim deadline is before `now`, oldest first
    async fn expired_locked_tasks(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<TaskId>>;

    /// SUBMITTED tasks whose settle deadline is before `now`, oldest first
    async fn expired_submitted_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DbResult<Vec<TaskId>>;

    /// Sum of bounties of OPEN, LOCKED and SUBMITTED tasks published by `id`
    async fn live_escrow(&self, id: AgentId) -> DbResult<u64>;

    // =========================================================================
    // Ledger
    // =========================================================================

    /// An agent's entries, newest first
    async fn agent_transactions(
        &self,
        id: AgentId,
        limit: u32,
        offset: u32,
    ) -> DbResult<Vec<Transaction>>;

    /// An agent's entries in append order
    async fn agent_ledger(&self, id: AgentId) -> DbResult<Vec<Transaction>>;

    /// Sum of `amount` over an agent's entries
    async fn ledger_sum(&self, id: AgentId) -> DbResult<i64>;

    // =========================================================================
    // Aggregates
    // =========================================================================

    async fn agent_stats(&self, id: AgentId) -> DbResult<AgentStats>;

    async fn public_stats(&self, now: DateTime<Utc>) -> DbResult<PublicStats>;

    async fn leaderboard(&self, limit: u32, offset: u32) -> DbResult<Vec<LeaderboardEntry>>;

    async fn recent_activity(&self, limit: u32) -> DbResult<Vec<ActivityEntry>>;

    async fn health_check(&self) -> DbResult<bool>;
}

/// A unit of work holding row locks
#[async_trait]
pub trait StoreTx: Send {
    /// Lock an agent row for the rest of the transaction
    async fn lock_agent(&mut self, id: AgentId) -> DbResult<Option<AgentRecord>>;

    /// Lock a task row for the rest of the transaction
    async fn lock_task(&mut self, id: TaskId) -> DbResult<Option<Task>>;

    async fn insert_agent(&mut self, record: &AgentRecord) -> DbResult<()>;

    /// Replace a locked agent row (profile, balances, credential material)
    async fn update_agent(&mut self, record: &AgentRecord) -> DbResult<()>;

    /// Insert a task; an idempotency key already used by the same publisher
    /// fails with `DbError::Duplicate`, at the latest on commit
    async fn insert_task(&mut self, task: &Task) -> DbResult<()>;

    /// Replace a locked task row
    async fn update_task(&mut self, task: &Task) -> DbResult<()>;

    async fn append_transaction(&mut self, entry: &Transaction) -> DbResult<()>;

    async fn commit(self: Box<Self>) -> DbResult<()>;
}
