//! In-process store with per-row locks
//!
//! Every agent and task row sits behind its own async mutex. A [`MemoryTx`]
//! holds owned guards for the rows it locked and stages its writes; commit
//! publishes them under a short synchronous gate so readers never observe half
//! of a transaction. Dropping the transaction discards the staged writes and
//! releases the guards.
//!
//! Used by the test suites and for single-node development.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use mycelio_types::{
    ActivityEntry, AgentId, AgentStats, CredentialTier, Karma, LeaderboardEntry, PublicStats, Task,
    TaskId, TaskStatus, Transaction, TxType,
};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{AgentRecord, DbError, DbResult, Store, StoreTx};

struct Row<T> {
    lock: Arc<Mutex<()>>,
    data: RwLock<T>,
}

impl<T> Row<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            lock: Arc::new(Mutex::new(())),
            data: RwLock::new(value),
        })
    }
}

#[derive(Default)]
struct Inner {
    agents: DashMap<AgentId, Arc<Row<AgentRecord>>>,
    tasks: DashMap<TaskId, Arc<Row<Task>>>,
    idempotency: DashMap<(AgentId, String), TaskId>,
    key_index: DashMap<(CredentialTier, String), Vec<AgentId>>,
    ledger: RwLock<Vec<Transaction>>,
    /// Writers hold it while publishing a commit; multi-row readers hold it shared
    commit_gate: RwLock<()>,
}

impl Inner {
    fn index_key(&self, tier: CredentialTier, prefix: &str, id: AgentId) {
        let mut ids = self.key_index.entry((tier, prefix.to_string())).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn unindex_key(&self, tier: CredentialTier, prefix: &str, id: AgentId) {
        let key = (tier, prefix.to_string());
        let emptied = match self.key_index.get_mut(&key) {
            Some(mut ids) => {
                ids.retain(|other| *other != id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            self.key_index.remove_if(&key, |_, ids| ids.is_empty());
        }
    }

    fn alias_of(&self, id: AgentId) -> Option<String> {
        self.agents
            .get(&id)
            .and_then(|row| row.data.read().agent.alias.clone())
    }
}

/// In-process [`Store`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let _gate = self.inner.commit_gate.read();
        f(&self.inner)
    }

    fn tasks_snapshot(&self) -> Vec<Task> {
        self.read(|inner| {
            inner
                .tasks
                .iter()
                .map(|row| row.data.read().clone())
                .collect()
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            guards: HashMap::new(),
            agents: BTreeMap::new(),
            tasks: BTreeMap::new(),
            entries: Vec::new(),
        }))
    }

    async fn get_agent(&self, id: AgentId) -> DbResult<Option<AgentRecord>> {
        Ok(self.read(|inner| inner.agents.get(&id).map(|row| row.data.read().clone())))
    }

    async fn find_agents_by_key_prefix(
        &self,
        tier: CredentialTier,
        prefix: &str,
        limit: usize,
    ) -> DbResult<Vec<AgentRecord>> {
        Ok(self.read(|inner| {
            let ids = inner
                .key_index
                .get(&(tier, prefix.to_string()))
                .map(|ids| ids.value().clone())
                .unwrap_or_default();
            ids.into_iter()
                .filter_map(|id| inner.agents.get(&id).map(|row| row.data.read().clone()))
                .take(limit)
                .collect()
        }))
    }

    async fn agent_ids(&self) -> DbResult<Vec<AgentId>> {
        let mut ids: Vec<AgentId> = self.read(|inner| inner.agents.iter().map(|r| *r.key()).collect());
        ids.sort();
        Ok(ids)
    }

    async fn get_task(&self, id: TaskId) -> DbResult<Option<Task>> {
        Ok(self.read(|inner| inner.tasks.get(&id).map(|row| row.data.read().clone())))
    }

    async fn find_task_by_idempotency_key(
        &self,
        publisher: AgentId,
        key: &str,
    ) -> DbResult<Option<Task>> {
        Ok(self.read(|inner| {
            let id = inner
                .idempotency
                .get(&(publisher, key.to_string()))
                .map(|id| *id.value())?;
            inner.tasks.get(&id).map(|row| row.data.read().clone())
        }))
    }

    async fn expired_locked_tasks(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<TaskId>> {
        let mut expired: Vec<(DateTime<Utc>, TaskId)> = self
            .tasks_snapshot()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Locked)
            .filter_map(|t| t.claim_deadline.filter(|d| *d < now).map(|d| (d, t.task_id)))
            .collect();
        expired.sort();
        Ok(expired.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn expired_submitted_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DbResult<Vec<TaskId>> {
        let mut expired: Vec<(DateTime<Utc>, TaskId)> = self
            .tasks_snapshot()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Submitted)
            .filter_map(|t| t.settle_deadline.filter(|d| *d < now).map(|d| (d, t.task_id)))
            .collect();
        expired.sort();
        Ok(expired.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn live_escrow(&self, id: AgentId) -> DbResult<u64> {
        Ok(self
            .tasks_snapshot()
            .iter()
            .filter(|t| t.publisher_id == id && t.status.holds_escrow())
            .map(|t| t.bounty.0)
            .sum())
    }

    async fn agent_transactions(
        &self,
        id: AgentId,
        limit: u32,
        offset: u32,
    ) -> DbResult<Vec<Transaction>> {
        Ok(self.read(|inner| {
            inner
                .ledger
                .read()
                .iter()
                .rev()
                .filter(|e| e.agent_id == id)
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect()
        }))
    }

    async fn agent_ledger(&self, id: AgentId) -> DbResult<Vec<Transaction>> {
        Ok(self.read(|inner| {
            inner
                .ledger
                .read()
                .iter()
                .filter(|e| e.agent_id == id)
                .cloned()
                .collect()
        }))
    }

    async fn ledger_sum(&self, id: AgentId) -> DbResult<i64> {
        Ok(self.read(|inner| {
            inner
                .ledger
                .read()
                .iter()
                .filter(|e| e.agent_id == id)
                .map(|e| e.amount)
                .sum()
        }))
    }

    async fn agent_stats(&self, id: AgentId) -> DbResult<AgentStats> {
        let mut stats = AgentStats::default();
        for task in self.tasks_snapshot() {
            if task.publisher_id == id {
                stats.tasks_published += 1;
                if task.status == TaskStatus::Completed {
                    stats.tasks_completed_as_publisher += 1;
                }
            }
            if task.is_solver(id) {
                match task.status {
                    TaskStatus::Completed => stats.tasks_solved += 1,
                    TaskStatus::Locked | TaskStatus::Submitted => stats.tasks_in_progress += 1,
                    _ => {}
                }
            }
        }
        let earned: i64 = self.read(|inner| {
            inner
                .ledger
                .read()
                .iter()
                .filter(|e| e.agent_id == id && e.tx_type == TxType::Transfer)
                .map(|e| e.amount)
                .sum()
        });
        stats.karma_earned = Karma::from_i64(earned).unwrap_or_default();
        Ok(stats)
    }

    async fn public_stats(&self, now: DateTime<Utc>) -> DbResult<PublicStats> {
        let since = now - Duration::hours(24);
        let (total_agents, active_agents_24h, circulation) = self.read(|inner| {
            let mut total = 0u64;
            let mut active = 0u64;
            let mut circulation = 0u64;
            for row in inner.agents.iter() {
                let record = row.data.read();
                total += 1;
                if record.agent.updated_at > since {
                    active += 1;
                }
                circulation = circulation.saturating_add(record.agent.total_karma().0);
            }
            (total, active, circulation)
        });

        let tasks = self.tasks_snapshot();
        let total_tasks = tasks.len() as u64;
        let completed_tasks = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count() as u64;
        let open_tasks = tasks.iter().filter(|t| t.status == TaskStatus::Open).count() as u64;

        Ok(PublicStats {
            total_agents,
            active_agents_24h,
            total_tasks,
            completed_tasks,
            open_tasks,
            karma_in_circulation: Karma(circulation),
            completion_rate: PublicStats::completion_rate_of(completed_tasks, total_tasks),
        })
    }

    async fn leaderboard(&self, limit: u32, offset: u32) -> DbResult<Vec<LeaderboardEntry>> {
        Ok(self.read(|inner| {
            let mut earned: HashMap<AgentId, (i64, u64)> = HashMap::new();
            for entry in inner.ledger.read().iter() {
                if entry.tx_type == TxType::Transfer {
                    let slot = earned.entry(entry.agent_id).or_default();
                    slot.0 += entry.amount;
                    slot.1 += 1;
                }
            }
            let mut ranked: Vec<(AgentId, i64, u64)> =
                earned.into_iter().map(|(id, (k, n))| (id, k, n)).collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

            ranked
                .into_iter()
                .enumerate()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|(i, (agent_id, karma, solved))| LeaderboardEntry {
                    rank: i as u32 + 1,
                    agent_id,
                    alias: inner.alias_of(agent_id),
                    karma_earned: Karma::from_i64(karma).unwrap_or_default(),
                    tasks_solved: solved,
                })
                .collect()
        }))
    }

    async fn recent_activity(&self, limit: u32) -> DbResult<Vec<ActivityEntry>> {
        Ok(self.read(|inner| {
            inner
                .ledger
                .read()
                .iter()
                .rev()
                .take(limit as usize)
                .map(|e| ActivityEntry {
                    tx_id: e.tx_id,
                    tx_type: e.tx_type,
                    amount: e.amount,
                    agent_id: e.agent_id,
                    alias: inner.alias_of(e.agent_id),
                    task_id: e.task_id,
                    created_at: e.created_at,
                })
                .collect()
        }))
    }

    async fn health_check(&self) -> DbResult<bool> {
        Ok(true)
    }
}

enum Staged<T> {
    Insert(T),
    Update(T),
}

impl<T> Staged<T> {
    fn value(&self) -> &T {
        match self {
            Staged::Insert(v) | Staged::Update(v) => v,
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
enum RowKey {
    Agent(AgentId),
    Task(TaskId),
}

/// Unit of work over a [`MemoryStore`]
pub struct MemoryTx {
    inner: Arc<Inner>,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    agents: BTreeMap<AgentId, Staged<AgentRecord>>,
    tasks: BTreeMap<TaskId, Staged<Task>>,
    entries: Vec<Transaction>,
}

impl MemoryTx {
    async fn acquire(&mut self, key: RowKey, lock: Arc<Mutex<()>>) {
        if !self.guards.contains_key(&key) {
            let guard = lock.lock_owned().await;
            self.guards.insert(key, guard);
        }
    }

    fn stage<K: Ord, T>(
        map: &mut BTreeMap<K, Staged<T>>,
        locked: bool,
        id: K,
        value: T,
        what: &str,
    ) -> DbResult<()> {
        match map.get_mut(&id) {
            Some(Staged::Insert(v)) | Some(Staged::Update(v)) => {
                *v = value;
                Ok(())
            }
            None if locked => {
                map.insert(id, Staged::Update(value));
                Ok(())
            }
            None => Err(DbError::Transaction(format!("{what} row not locked"))),
        }
    }

    fn publish(self) -> DbResult<()> {
        let inner = self.inner.clone();
        let _gate = inner.commit_gate.write();

        for staged in self.tasks.values() {
            if let Staged::Insert(task) = staged {
                if let Some(key) = &task.idempotency_key {
                    if inner.idempotency.contains_key(&(task.publisher_id, key.clone())) {
                        return Err(DbError::Duplicate(format!("idempotency key {key}")));
                    }
                }
            }
        }

        for (id, staged) in self.agents {
            match staged {
                Staged::Insert(record) => {
                    for tier in [CredentialTier::Admin, CredentialTier::Worker] {
                        inner.index_key(tier, record.key_prefix(tier), id);
                    }
                    inner.agents.insert(id, Row::new(record));
                }
                Staged::Update(record) => {
                    let row = inner
                        .agents
                        .get(&id)
                        .map(|r| r.value().clone())
                        .ok_or_else(|| DbError::NotFound(format!("agent {id}")))?;
                    let mut current = row.data.write();
                    for tier in [CredentialTier::Admin, CredentialTier::Worker] {
                        if current.key_prefix(tier) != record.key_prefix(tier) {
                            inner.unindex_key(tier, current.key_prefix(tier), id);
                            inner.index_key(tier, record.key_prefix(tier), id);
                        }
                    }
                    *current = record;
                }
            }
        }

        for (id, staged) in self.tasks {
            match staged {
                Staged::Insert(task) => {
                    if let Some(key) = &task.idempotency_key {
                        inner.idempotency.insert((task.publisher_id, key.clone()), id);
                    }
                    inner.tasks.insert(id, Row::new(task));
                }
                Staged::Update(task) => {
                    let row = inner
                        .tasks
                        .get(&id)
                        .map(|r| r.value().clone())
                        .ok_or_else(|| DbError::NotFound(format!("task {id}")))?;
                    *row.data.write() = task;
                }
            }
        }

        inner.ledger.write().extend(self.entries);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_agent(&mut self, id: AgentId) -> DbResult<Option<AgentRecord>> {
        if let Some(staged) = self.agents.get(&id) {
            return Ok(Some(staged.value().clone()));
        }
        let row = self.inner.agents.get(&id).map(|r| r.value().clone());
        let Some(row) = row else {
            return Ok(None);
        };
        self.acquire(RowKey::Agent(id), row.lock.clone()).await;
        let record = row.data.read().clone();
        Ok(Some(record))
    }

    async fn lock_task(&mut self, id: TaskId) -> DbResult<Option<Task>> {
        if let Some(staged) = self.tasks.get(&id) {
            return Ok(Some(staged.value().clone()));
        }
        let row = self.inner.tasks.get(&id).map(|r| r.value().clone());
        let Some(row) = row else {
            return Ok(None);
        };
        self.acquire(RowKey::Task(id), row.lock.clone()).await;
        let task = row.data.read().clone();
        Ok(Some(task))
    }

    async fn insert_agent(&mut self, record: &AgentRecord) -> DbResult<()> {
        let id = record.id();
        if self.agents.contains_key(&id) || self.inner.agents.contains_key(&id) {
            return Err(DbError::Duplicate(format!("agent {id}")));
        }
        self.agents.insert(id, Staged::Insert(record.clone()));
        Ok(())
    }

    async fn update_agent(&mut self, record: &AgentRecord) -> DbResult<()> {
        let id = record.id();
        let locked = self.guards.contains_key(&RowKey::Agent(id));
        Self::stage(&mut self.agents, locked, id, record.clone(), "agent")
    }

    async fn insert_task(&mut self, task: &Task) -> DbResult<()> {
        let id = task.task_id;
        if self.tasks.contains_key(&id) || self.inner.tasks.contains_key(&id) {
            return Err(DbError::Duplicate(format!("task {id}")));
        }
        if let Some(key) = &task.idempotency_key {
            let staged_clash = self.tasks.values().any(|s| {
                let other = s.value();
                other.publisher_id == task.publisher_id && other.idempotency_key.as_ref() == Some(key)
            });
            if staged_clash
                || self
                    .inner
                    .idempotency
                    .contains_key(&(task.publisher_id, key.clone()))
            {
                return Err(DbError::Duplicate(format!("idempotency key {key}")));
            }
        }
        self.tasks.insert(id, Staged::Insert(task.clone()));
        Ok(())
    }

    async fn update_task(&mut self, task: &Task) -> DbResult<()> {
        let id = task.task_id;
        let locked = self.guards.contains_key(&RowKey::Task(id));
        Self::stage(&mut self.tasks, locked, id, task.clone(), "task")
    }

    async fn append_transaction(&mut self, entry: &Transaction) -> DbResult<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        (*self).publish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mycelio_types::{Agent, TxId};
    use serde_json::json;

    fn record(prefix: &str) -> AgentRecord {
        let now = Utc::now();
        AgentRecord {
            agent: Agent {
                agent_id: AgentId::new(),
                alias: Some("tester".into()),
                capabilities: vec![],
                balance: Karma(100),
                escrow: Karma(0),
                created_at: now,
                updated_at: now,
            },
            admin_key_hash: "admin-hash".into(),
            admin_key_prefix: format!("a{prefix}"),
            worker_key_hash: "worker-hash".into(),
            worker_key_prefix: format!("w{prefix}"),
        }
    }

    fn task(publisher: AgentId, key: Option<&str>) -> Task {
        Task {
            task_id: TaskId::new(),
            publisher_id: publisher,
            solver_id: None,
            bounty: Karma(10),
            requirements: vec![],
            payload: json!({}),
            result: None,
            status: TaskStatus::Open,
            idempotency_key: key.map(str::to_string),
            created_at: Utc::now(),
            locked_at: None,
            claim_deadline: None,
            submitted_at: None,
            settle_deadline: None,
            settled_at: None,
        }
    }

    async fn insert(store: &MemoryStore, rec: &AgentRecord) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_agent(rec).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible_and_discarded() {
        let store = MemoryStore::new();
        let rec = record("1");
        insert(&store, &rec).await;

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_agent(rec.id()).await.unwrap().unwrap();
        locked.agent.balance = Karma(5);
        tx.update_agent(&locked).await.unwrap();
        tx.append_transaction(&Transaction {
            tx_id: TxId::new(),
            agent_id: rec.id(),
            task_id: None,
            tx_type: TxType::Freeze,
            amount: -95,
            balance_before: Karma(100),
            balance_after: Karma(5),
            description: "staged".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let seen = store.get_agent(rec.id()).await.unwrap().unwrap();
        assert_eq!(seen.agent.balance, Karma(100));
        drop(tx);

        let seen = store.get_agent(rec.id()).await.unwrap().unwrap();
        assert_eq!(seen.agent.balance, Karma(100));
        assert_eq!(store.ledger_sum(rec.id()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_requires_lock() {
        let store = MemoryStore::new();
        let rec = record("2");
        insert(&store, &rec).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.update_agent(&rec).await.unwrap_err();
        assert!(matches!(err, DbError::Transaction(_)));
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_transaction_until_release() {
        let store = MemoryStore::new();
        let rec = record("3");
        insert(&store, &rec).await;

        let mut first = store.begin().await.unwrap();
        first.lock_agent(rec.id()).await.unwrap();

        let contender = {
            let store = store.clone();
            let id = rec.id();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                second.lock_agent(id).await.unwrap().unwrap().agent.balance
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        let mut locked = first.lock_agent(rec.id()).await.unwrap().unwrap();
        locked.agent.balance = Karma(42);
        first.update_agent(&locked).await.unwrap();
        first.commit().await.unwrap();

        assert_eq!(contender.await.unwrap(), Karma(42));
    }

    #[tokio::test]
    async fn test_prefix_index_follows_key_rotation() {
        let store = MemoryStore::new();
        let rec = record("4");
        insert(&store, &rec).await;

        let found = store
            .find_agents_by_key_prefix(CredentialTier::Worker, "w4", 8)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let mut tx = store.begin().await.unwrap();
        let mut locked = tx.lock_agent(rec.id()).await.unwrap().unwrap();
        locked.worker_key_prefix = "w4-rotated".into();
        tx.update_agent(&locked).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store
            .find_agents_by_key_prefix(CredentialTier::Worker, "w4", 8)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .find_agents_by_key_prefix(CredentialTier::Worker, "w4-rotated", 8)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_idempotency_key_unique_per_publisher() {
        let store = MemoryStore::new();
        let a = record("5");
        let b = record("6");
        insert(&store, &a).await;
        insert(&store, &b).await;

        let mut tx1 = store.begin().await.unwrap();
        tx1.insert_task(&task(a.id(), Some("k1"))).await.unwrap();
        let mut tx2 = store.begin().await.unwrap();
        tx2.insert_task(&task(a.id(), Some("k1"))).await.unwrap();

        tx1.commit().await.unwrap();
        assert!(matches!(tx2.commit().await, Err(DbError::Duplicate(_))));

        // Same key under another publisher is independent
        let mut tx3 = store.begin().await.unwrap();
        tx3.insert_task(&task(b.id(), Some("k1"))).await.unwrap();
        tx3.commit().await.unwrap();

        assert!(store
            .find_task_by_idempotency_key(a.id(), "k1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_expired_locked_tasks_ordered_and_limited() {
        let store = MemoryStore::new();
        let publisher = record("7");
        insert(&store, &publisher).await;
        let now = Utc::now();

        let mut ids = Vec::new();
        for minutes in [3i64, 1, 2, -5] {
            let mut t = task(publisher.id(), None);
            t.status = TaskStatus::Locked;
            t.solver_id = Some(AgentId::new());
            t.claim_deadline = Some(now - Duration::minutes(minutes));
            ids.push(t.task_id);
            let mut tx = store.begin().await.unwrap();
            tx.insert_task(&t).await.unwrap();
            tx.commit().await.unwrap();
        }

        let expired = store.expired_locked_tasks(now, 2).await.unwrap();
        assert_eq!(expired, vec![ids[0], ids[2]]);
        let all = store.expired_locked_tasks(now, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(!all.contains(&ids[3]));
    }
}
