//! Escrow Engine
//!
//! Executes every balance-affecting operation as one store transaction:
//!
//! 1. lock the task row (if any) and re-check its status
//! 2. lock the agent rows to be mutated, in ascending id order
//! 3. apply the posting rules and stage the ledger entries
//! 4. commit
//!
//! Any error before commit drops the transaction, which discards every staged
//! write and releases the locks. Retried requests whose effect already holds
//! return the current task with `replayed = true` and write nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mycelio_auth::{AuthenticatedAgent, CredentialService, IssuedKey};
use mycelio_db::{AgentRecord, DbError, Store, StoreTx};
use mycelio_ledger as ledger;
use mycelio_types::{
    ActivityEntry, Agent, AgentId, AgentStats, CredentialTier, IssuedCredentials, Karma,
    LeaderboardEntry, Page, Pagination, PublicStats, PublishTaskRequest, RegisterRequest, Task,
    TaskId, TaskStatus, Transaction, UpdateProfileRequest,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use validator::Validate;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EscrowError, EscrowResult};
use crate::lifecycle::{self, Actor, Step};
use crate::telemetry as metrics;

/// Result of an operation that may have been answered from current state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub value: T,
    /// True when the effect already held and nothing was written
    pub replayed: bool,
}

impl<T> Outcome<T> {
    fn applied(value: T) -> Self {
        Self {
            value,
            replayed: false,
        }
    }

    fn replayed(value: T) -> Self {
        Self {
            value,
            replayed: true,
        }
    }
}

/// The task lifecycle and escrow engine
pub struct EscrowEngine {
    store: Arc<dyn Store>,
    credentials: CredentialService,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl EscrowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        credentials: CredentialService,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn observe<T>(&self, operation: &'static str, result: &EscrowResult<Outcome<T>>) {
        match result {
            Ok(outcome) => metrics::transition(operation, outcome.replayed),
            Err(err) => metrics::rejection(operation, err.error_code().as_str()),
        }
    }

    async fn issue(&self, tier: CredentialTier) -> EscrowResult<IssuedKey> {
        let service = self.credentials.clone();
        let issued = tokio::task::spawn_blocking(move || service.issue(tier))
            .await
            .map_err(|e| EscrowError::Internal(format!("credential task failed: {}", e)))??;
        Ok(issued)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Create an agent with both credentials and the initial grant
    ///
    /// The plaintext credentials are only ever present in the return value.
    pub async fn register(&self, request: RegisterRequest) -> EscrowResult<(Agent, IssuedCredentials)> {
        request.check()?;

        let admin = self.issue(CredentialTier::Admin).await?;
        let worker = self.issue(CredentialTier::Worker).await?;
        let now = self.clock.now();

        let mut record = AgentRecord {
            agent: Agent {
                agent_id: AgentId::new(),
                alias: request.alias,
                capabilities: request.capabilities,
                balance: Karma::ZERO,
                escrow: Karma::ZERO,
                created_at: now,
                updated_at: now,
            },
            admin_key_hash: admin.hash,
            admin_key_prefix: admin.prefix,
            worker_key_hash: worker.hash,
            worker_key_prefix: worker.prefix,
        };
        let grant = ledger::grant(&mut record.agent, Karma(self.config.initial_grant), now)?;

        let mut tx = self.store.begin().await?;
        tx.insert_agent(&record).await?;
        tx.append_transaction(&grant).await?;
        tx.commit().await?;

        metrics::transition("register", false);
        metrics::karma_moved("grant", self.config.initial_grant);
        info!(
            agent_id = %record.id(),
            grant = self.config.initial_grant,
            "Agent registered"
        );

        let credentials = IssuedCredentials {
            agent_id: record.id(),
            admin_key: Some(admin.credential.to_string()),
            worker_key: worker.credential.to_string(),
        };
        Ok((record.agent, credentials))
    }

    /// Replace the worker credential; the old one stops verifying on commit
    pub async fn rotate_worker_key(&self, caller: AuthenticatedAgent) -> EscrowResult<IssuedCredentials> {
        caller.require_admin()?;

        let fresh = self.issue(CredentialTier::Worker).await?;
        let now = self.clock.now();

        let mut tx = self.store.begin().await?;
        let mut record = tx
            .lock_agent(caller.agent_id)
            .await?
            .ok_or(EscrowError::AgentNotFound)?;
        record.worker_key_hash = fresh.hash;
        record.worker_key_prefix = fresh.prefix;
        record.agent.updated_at = now;
        tx.update_agent(&record).await?;
        tx.commit().await?;

        metrics::transition("rotate_key", false);
        info!(agent_id = %caller.agent_id, "Worker key rotated");

        Ok(IssuedCredentials {
            agent_id: caller.agent_id,
            admin_key: None,
            worker_key: fresh.credential.to_string(),
        })
    }

    pub async fn get_agent(&self, agent_id: AgentId) -> EscrowResult<Agent> {
        self.store
            .get_agent(agent_id)
            .await?
            .map(|record| record.agent)
            .ok_or(EscrowError::AgentNotFound)
    }

    /// Update alias and/or capabilities of the caller's own profile
    pub async fn update_profile(
        &self,
        agent_id: AgentId,
        request: UpdateProfileRequest,
    ) -> EscrowResult<Agent> {
        request.check()?;

        let mut tx = self.store.begin().await?;
        let mut record = tx.lock_agent(agent_id).await?.ok_or(EscrowError::AgentNotFound)?;
        if let Some(alias) = request.alias {
            record.agent.alias = Some(alias);
        }
        if let Some(capabilities) = request.capabilities {
            record.agent.capabilities = capabilities;
        }
        record.agent.updated_at = self.clock.now();
        tx.update_agent(&record).await?;
        tx.commit().await?;

        debug!(agent_id = %agent_id, "Profile updated");
        Ok(record.agent)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Escrow the bounty and create an OPEN task
    pub async fn publish(
        &self,
        publisher: AgentId,
        request: PublishTaskRequest,
    ) -> EscrowResult<Outcome<Task>> {
        let result = self.publish_inner(publisher, request).await;
        self.observe("publish", &result);
        result
    }

    async fn publish_inner(
        &self,
        publisher: AgentId,
        request: PublishTaskRequest,
    ) -> EscrowResult<Outcome<Task>> {
        request.check()?;
        if !request.payload.is_object() {
            return Err(EscrowError::validation("payload must be a JSON object"));
        }
        lifecycle::check_payload_size(&request.payload, self.config.max_payload_bytes)?;
        if request.bounty < self.config.min_bounty {
            return Err(EscrowError::BountyTooLow {
                bounty: request.bounty,
                min: self.config.min_bounty,
            });
        }
        if request.bounty > self.config.max_bounty {
            return Err(EscrowError::validation(format!(
                "bounty must not exceed {}",
                self.config.max_bounty
            )));
        }

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self.store.find_task_by_idempotency_key(publisher, key).await? {
                return Ok(Outcome::replayed(existing));
            }
        }

        let now = self.clock.now();
        let task = Task {
            task_id: TaskId::new(),
            publisher_id: publisher,
            solver_id: None,
            bounty: Karma(request.bounty),
            requirements: request.requirements,
            payload: request.payload,
            result: None,
            status: TaskStatus::Open,
            idempotency_key: request.idempotency_key,
            created_at: now,
            locked_at: None,
            claim_deadline: None,
            submitted_at: None,
            settle_deadline: None,
            settled_at: None,
        };

        if !self.commit_publish(&task, now).await? {
            // A concurrent request with the same idempotency key won
            let key = task.idempotency_key.as_deref().unwrap_or_default();
            return self
                .store
                .find_task_by_idempotency_key(publisher, key)
                .await?
                .map(Outcome::replayed)
                .ok_or_else(|| EscrowError::Internal("idempotency key clash without task".to_string()));
        }

        metrics::karma_moved("freeze", task.bounty.0);
        info!(
            task_id = %task.task_id,
            agent_id = %publisher,
            bounty = task.bounty.0,
            "Task published"
        );
        Ok(Outcome::applied(task))
    }

    /// Returns false when the publisher already used the idempotency key
    async fn commit_publish(&self, task: &Task, now: DateTime<Utc>) -> EscrowResult<bool> {
        let mut tx = self.store.begin().await?;
        let mut record = lock_agent(tx.as_mut(), task.publisher_id).await?;
        let entry = ledger::freeze(&mut record.agent, task.task_id, task.bounty, now)?;

        match tx.insert_task(task).await {
            Err(DbError::Duplicate(_)) => return Ok(false),
            other => other?,
        }
        tx.update_agent(&record).await?;
        tx.append_transaction(&entry).await?;
        match tx.commit().await {
            Err(DbError::Duplicate(_)) => Ok(false),
            other => other.map(|()| true).map_err(EscrowError::from),
        }
    }

    /// Take an OPEN task
    pub async fn claim(&self, worker: AgentId, task_id: TaskId) -> EscrowResult<Outcome<Task>> {
        let result = self.claim_inner(worker, task_id).await;
        self.observe("claim", &result);
        result
    }

    async fn claim_inner(&self, worker: AgentId, task_id: TaskId) -> EscrowResult<Outcome<Task>> {
        let mut tx = self.store.begin().await?;
        let mut task = tx.lock_task(task_id).await?.ok_or(EscrowError::TaskNotFound(task_id))?;

        let now = self.clock.now();
        if lifecycle::claim(&mut task, worker, now, self.config.claim_window)? == Step::Replay {
            return Ok(Outcome::replayed(task));
        }
        tx.update_task(&task).await?;
        tx.commit().await?;

        info!(task_id = %task_id, agent_id = %worker, bounty = task.bounty.0, "Task claimed");
        Ok(Outcome::applied(task))
    }

    /// Deliver a result for a LOCKED task
    pub async fn submit(
        &self,
        solver: AgentId,
        task_id: TaskId,
        result: Value,
    ) -> EscrowResult<Outcome<Task>> {
        let outcome = self.submit_inner(solver, task_id, result).await;
        self.observe("submit", &outcome);
        outcome
    }

    async fn submit_inner(
        &self,
        solver: AgentId,
        task_id: TaskId,
        result: Value,
    ) -> EscrowResult<Outcome<Task>> {
        lifecycle::check_payload_size(&result, self.config.max_payload_bytes)?;

        let mut tx = self.store.begin().await?;
        let mut task = tx.lock_task(task_id).await?.ok_or(EscrowError::TaskNotFound(task_id))?;

        let now = self.clock.now();
        if lifecycle::submit(&mut task, solver, result, now, self.config.settle_window)?
            == Step::Replay
        {
            return Ok(Outcome::replayed(task));
        }
        tx.update_task(&task).await?;
        tx.commit().await?;

        info!(task_id = %task_id, agent_id = %solver, "Task submitted");
        Ok(Outcome::applied(task))
    }

    /// Accept (pay the solver) or reject (refund the publisher)
    pub async fn settle(
        &self,
        publisher: AgentId,
        task_id: TaskId,
        accept: bool,
    ) -> EscrowResult<Outcome<Task>> {
        let result = self.settle_as(Actor::Agent(publisher), task_id, accept).await;
        self.observe("settle", &result);
        result
    }

    async fn settle_as(&self, actor: Actor, task_id: TaskId, accept: bool) -> EscrowResult<Outcome<Task>> {
        let mut tx = self.store.begin().await?;
        let mut task = tx.lock_task(task_id).await?.ok_or(EscrowError::TaskNotFound(task_id))?;

        let now = self.clock.now();
        if lifecycle::settle(&mut task, actor, accept, now)? == Step::Replay {
            return Ok(Outcome::replayed(task));
        }
        self.post_settlement(tx.as_mut(), &task, accept, now).await?;
        tx.update_task(&task).await?;
        tx.commit().await?;

        metrics::karma_moved(if accept { "transfer" } else { "refund" }, task.bounty.0);
        info!(
            task_id = %task_id,
            agent_id = %task.publisher_id,
            solver_id = ?task.solver_id,
            bounty = task.bounty.0,
            accept,
            auto = matches!(actor, Actor::System),
            "Task settled"
        );
        Ok(Outcome::applied(task))
    }

    /// Lock the affected agents in ascending order and stage the postings
    async fn post_settlement(
        &self,
        tx: &mut dyn StoreTx,
        task: &Task,
        accept: bool,
        now: DateTime<Utc>,
    ) -> EscrowResult<()> {
        let solver_id = task
            .solver_id
            .ok_or_else(|| EscrowError::Internal(format!("task {} settled without solver", task.task_id)))?;

        if !accept {
            let mut publisher = lock_agent(tx, task.publisher_id).await?;
            let entry = ledger::refund(&mut publisher.agent, task.task_id, task.bounty, now)?;
            tx.update_agent(&publisher).await?;
            tx.append_transaction(&entry).await?;
            return Ok(());
        }

        let (mut publisher, mut solver) = if task.publisher_id < solver_id {
            let publisher = lock_agent(tx, task.publisher_id).await?;
            let solver = lock_agent(tx, solver_id).await?;
            (publisher, solver)
        } else {
            let solver = lock_agent(tx, solver_id).await?;
            let publisher = lock_agent(tx, task.publisher_id).await?;
            (publisher, solver)
        };

        ledger::release_escrow(&mut publisher.agent, task.bounty, now)?;
        let entry = ledger::transfer(&mut solver.agent, task.task_id, task.bounty, now)?;
        tx.update_agent(&publisher).await?;
        tx.update_agent(&solver).await?;
        tx.append_transaction(&entry).await?;
        Ok(())
    }

    /// Withdraw an OPEN task and return its bounty
    pub async fn cancel(&self, publisher: AgentId, task_id: TaskId) -> EscrowResult<Outcome<Task>> {
        let result = self.cancel_inner(publisher, task_id).await;
        self.observe("cancel", &result);
        result
    }

    async fn cancel_inner(&self, publisher: AgentId, task_id: TaskId) -> EscrowResult<Outcome<Task>> {
        let mut tx = self.store.begin().await?;
        let mut task = tx.lock_task(task_id).await?.ok_or(EscrowError::TaskNotFound(task_id))?;

        if lifecycle::cancel(&mut task, publisher)? == Step::Replay {
            return Ok(Outcome::replayed(task));
        }

        let now = self.clock.now();
        let mut record = lock_agent(tx.as_mut(), publisher).await?;
        let entry = ledger::unfreeze(&mut record.agent, task_id, task.bounty, now)?;
        tx.update_agent(&record).await?;
        tx.append_transaction(&entry).await?;
        tx.update_task(&task).await?;
        tx.commit().await?;

        metrics::karma_moved("unfreeze", task.bounty.0);
        info!(task_id = %task_id, agent_id = %publisher, bounty = task.bounty.0, "Task cancelled");
        Ok(Outcome::applied(task))
    }

    // =========================================================================
    // Sweep primitives
    // =========================================================================

    /// Return one expired LOCKED task to OPEN
    ///
    /// Re-checks under the task lock; returns false when a Submit (or a fresh
    /// claim) got there first.
    pub async fn reclaim_task(&self, task_id: TaskId) -> EscrowResult<bool> {
        let mut tx = self.store.begin().await?;
        let Some(mut task) = tx.lock_task(task_id).await? else {
            return Ok(false);
        };
        let previous_solver = task.solver_id;
        if !lifecycle::reclaim(&mut task, self.clock.now()) {
            return Ok(false);
        }
        tx.update_task(&task).await?;
        tx.commit().await?;

        metrics::transition("reclaim", false);
        info!(task_id = %task_id, solver_id = ?previous_solver, "Task reclaimed");
        Ok(true)
    }

    /// Accept one SUBMITTED task whose settle deadline has passed
    pub async fn auto_settle_task(&self, task_id: TaskId) -> EscrowResult<bool> {
        let now = self.clock.now();
        match self.store.get_task(task_id).await? {
            Some(task) if lifecycle::settle_overdue(&task, now) => {}
            _ => return Ok(false),
        }
        let result = self.settle_as(Actor::System, task_id, true).await;
        self.observe("auto_settle", &result);
        match result {
            Ok(outcome) => Ok(!outcome.replayed),
            // Settled by its publisher in the meantime
            Err(EscrowError::TaskNotSettlable { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_task(&self, task_id: TaskId) -> EscrowResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or(EscrowError::TaskNotFound(task_id))
    }

    pub async fn agent_stats(&self, agent_id: AgentId) -> EscrowResult<AgentStats> {
        Ok(self.store.agent_stats(agent_id).await?)
    }

    /// Ledger entries of one agent, newest first
    pub async fn agent_transactions(
        &self,
        agent_id: AgentId,
        page: Pagination,
    ) -> EscrowResult<Page<Transaction>> {
        page.validate()?;
        let items = self
            .store
            .agent_transactions(agent_id, page.limit, page.offset)
            .await?;
        Ok(Page {
            items,
            limit: page.limit,
            offset: page.offset,
        })
    }

    pub async fn public_stats(&self) -> EscrowResult<PublicStats> {
        Ok(self.store.public_stats(self.clock.now()).await?)
    }

    pub async fn leaderboard(&self, page: Pagination) -> EscrowResult<Page<LeaderboardEntry>> {
        page.validate()?;
        let items = self.store.leaderboard(page.limit, page.offset).await?;
        Ok(Page {
            items,
            limit: page.limit,
            offset: page.offset,
        })
    }

    pub async fn recent_activity(&self, page: Pagination) -> EscrowResult<Vec<ActivityEntry>> {
        page.validate()?;
        Ok(self.store.recent_activity(page.limit).await?)
    }
}

async fn lock_agent(tx: &mut dyn StoreTx, agent_id: AgentId) -> EscrowResult<AgentRecord> {
    tx.lock_agent(agent_id)
        .await?
        .ok_or(EscrowError::AgentNotFound)
}
