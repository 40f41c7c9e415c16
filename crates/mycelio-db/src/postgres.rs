//! PostgreSQL store
//!
//! Each [`PgTx`] wraps one `sqlx` transaction; `lock_*` reads use
//! `SELECT ... FOR UPDATE` so competing transitions on the same row serialise
//! at the database.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mycelio_types::{
    ActivityEntry, AgentId, AgentStats, CredentialTier, Karma, LeaderboardEntry, PublicStats, Task,
    TaskId, Transaction, TxId, TxType,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row};
use tracing::info;
use uuid::Uuid;

use crate::models::{karma_to_i64, DbActivityRow, DbAgent, DbLeaderboardRow, DbTask, DbTransaction};
use crate::{AgentRecord, DatabaseConfig, DbError, DbResult, Store, StoreTx};

const AGENT_COLUMNS: &str = "agent_id, alias, capabilities, balance, escrow, \
     admin_key_hash, admin_key_prefix, worker_key_hash, worker_key_prefix, created_at, updated_at";

const TASK_COLUMNS: &str = "task_id, publisher_id, solver_id, bounty, requirements, payload, \
     result, status, idempotency_key, created_at, locked_at, claim_deadline, submitted_at, \
     settle_deadline, settled_at";

const TX_COLUMNS: &str = "tx_id, agent_id, task_id, tx_type, amount, balance_before, \
     balance_after, description, created_at";

/// PostgreSQL-backed [`Store`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pool = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        let store = Self { pool };
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn count(row: &sqlx::postgres::PgRow, column: &str) -> DbResult<u64> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|_| DbError::Constraint(format!("{column} is negative")))
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_agent(&self, id: AgentId) -> DbResult<Option<AgentRecord>> {
        let row = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AgentRecord::try_from).transpose()
    }

    async fn find_agents_by_key_prefix(
        &self,
        tier: CredentialTier,
        prefix: &str,
        limit: usize,
    ) -> DbResult<Vec<AgentRecord>> {
        let column = match tier {
            CredentialTier::Admin => "admin_key_prefix",
            CredentialTier::Worker => "worker_key_prefix",
        };
        let rows = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE {column} = $1 LIMIT $2"
        ))
        .bind(prefix)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AgentRecord::try_from).collect()
    }

    async fn agent_ids(&self) -> DbResult<Vec<AgentId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT agent_id FROM agents ORDER BY agent_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(AgentId).collect())
    }

    async fn get_task(&self, id: TaskId) -> DbResult<Option<Task>> {
        let row = sqlx::query_as::<_, DbTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn find_task_by_idempotency_key(
        &self,
        publisher: AgentId,
        key: &str,
    ) -> DbResult<Option<Task>> {
        let row = sqlx::query_as::<_, DbTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE publisher_id = $1 AND idempotency_key = $2"
        ))
        .bind(publisher.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn expired_locked_tasks(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<TaskId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT task_id FROM tasks
            WHERE status = 'LOCKED' AND claim_deadline < $1
            ORDER BY claim_deadline
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(TaskId).collect())
    }

    async fn expired_submitted_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DbResult<Vec<TaskId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT task_id FROM tasks
            WHERE status = 'SUBMITTED' AND settle_deadline < $1
            ORDER BY settle_deadline
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(TaskId).collect())
    }

    async fn live_escrow(&self, id: AgentId) -> DbResult<u64> {
        let sum: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(bounty), 0)::BIGINT FROM tasks
            WHERE publisher_id = $1 AND status IN ('OPEN', 'LOCKED', 'SUBMITTED')
            "#,
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;

        u64::try_from(sum).map_err(|_| DbError::Constraint("negative escrow sum".to_string()))
    }

    async fn agent_transactions(
        &self,
        id: AgentId,
        limit: u32,
        offset: u32,
    ) -> DbResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, DbTransaction>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE agent_id = $1 \
             ORDER BY seq DESC LIMIT $2 OFFSET $3"
        ))
        .bind(id.0)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn agent_ledger(&self, id: AgentId) -> DbResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, DbTransaction>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE agent_id = $1 ORDER BY seq"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn ledger_sum(&self, id: AgentId) -> DbResult<i64> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM transactions WHERE agent_id = $1",
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn agent_stats(&self, id: AgentId) -> DbResult<AgentStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE publisher_id = $1) AS published,
                COUNT(*) FILTER (WHERE publisher_id = $1 AND status = 'COMPLETED') AS completed_as_publisher,
                COUNT(*) FILTER (WHERE solver_id = $1 AND status = 'COMPLETED') AS solved,
                COUNT(*) FILTER (WHERE solver_id = $1 AND status IN ('LOCKED', 'SUBMITTED')) AS in_progress
            FROM tasks
            WHERE publisher_id = $1 OR solver_id = $1
            "#,
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;

        let earned: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM transactions \
             WHERE agent_id = $1 AND tx_type = 'TRANSFER'",
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(AgentStats {
            tasks_published: count(&row, "published")?,
            tasks_completed_as_publisher: count(&row, "completed_as_publisher")?,
            tasks_solved: count(&row, "solved")?,
            tasks_in_progress: count(&row, "in_progress")?,
            karma_earned: Karma::from_i64(earned).unwrap_or_default(),
        })
    }

    async fn public_stats(&self, now: DateTime<Utc>) -> DbResult<PublicStats> {
        let agents = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE updated_at > $1 - INTERVAL '24 hours') AS active,
                COALESCE(SUM(balance + escrow), 0)::BIGINT AS circulation
            FROM agents
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let tasks = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed,
                COUNT(*) FILTER (WHERE status = 'OPEN') AS open
            FROM tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_tasks = count(&tasks, "total")?;
        let completed_tasks = count(&tasks, "completed")?;

        Ok(PublicStats {
            total_agents: count(&agents, "total")?,
            active_agents_24h: count(&agents, "active")?,
            total_tasks,
            completed_tasks,
            open_tasks: count(&tasks, "open")?,
            karma_in_circulation: Karma(count(&agents, "circulation")?),
            completion_rate: PublicStats::completion_rate_of(completed_tasks, total_tasks),
        })
    }

    async fn leaderboard(&self, limit: u32, offset: u32) -> DbResult<Vec<LeaderboardEntry>> {
        let rows = sqlx::query_as::<_, DbLeaderboardRow>(
            r#"
            SELECT t.agent_id, a.alias,
                   SUM(t.amount)::BIGINT AS karma_earned,
                   COUNT(*) AS tasks_solved
            FROM transactions t
            JOIN agents a ON a.agent_id = t.agent_id
            WHERE t.tx_type = 'TRANSFER'
            GROUP BY t.agent_id, a.alias
            ORDER BY karma_earned DESC, t.agent_id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .enumerate()
            .map(|(i, row)| {
                Ok(LeaderboardEntry {
                    rank: offset + i as u32 + 1,
                    agent_id: AgentId(row.agent_id),
                    alias: row.alias,
                    karma_earned: Karma::from_i64(row.karma_earned).unwrap_or_default(),
                    tasks_solved: u64::try_from(row.tasks_solved).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn recent_activity(&self, limit: u32) -> DbResult<Vec<ActivityEntry>> {
        let rows = sqlx::query_as::<_, DbActivityRow>(
            r#"
            SELECT t.tx_id, t.tx_type, t.amount, t.agent_id, a.alias, t.task_id, t.created_at
            FROM transactions t
            JOIN agents a ON a.agent_id = t.agent_id
            ORDER BY t.seq DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let tx_type: TxType = row.tx_type.parse().map_err(DbError::Serialization)?;
                Ok(ActivityEntry {
                    tx_id: TxId(row.tx_id),
                    tx_type,
                    amount: row.amount,
                    agent_id: AgentId(row.agent_id),
                    alias: row.alias,
                    task_id: row.task_id.map(TaskId),
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> DbResult<bool> {
        Ok(sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok())
    }
}

/// Unit of work over a [`PgStore`]
pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_agent(&mut self, id: AgentId) -> DbResult<Option<AgentRecord>> {
        let row = sqlx::query_as::<_, DbAgent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(AgentRecord::try_from).transpose()
    }

    async fn lock_task(&mut self, id: TaskId) -> DbResult<Option<Task>> {
        let row = sqlx::query_as::<_, DbTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn insert_agent(&mut self, record: &AgentRecord) -> DbResult<()> {
        let agent = &record.agent;
        sqlx::query(
            r#"
            INSERT INTO agents
                (agent_id, alias, capabilities, balance, escrow,
                 admin_key_hash, admin_key_prefix, worker_key_hash, worker_key_prefix,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(agent.agent_id.0)
        .bind(&agent.alias)
        .bind(serde_json::to_value(&agent.capabilities)?)
        .bind(karma_to_i64("balance", agent.balance)?)
        .bind(karma_to_i64("escrow", agent.escrow)?)
        .bind(&record.admin_key_hash)
        .bind(&record.admin_key_prefix)
        .bind(&record.worker_key_hash)
        .bind(&record.worker_key_prefix)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_write(e, "agent"))?;
        Ok(())
    }

    async fn update_agent(&mut self, record: &AgentRecord) -> DbResult<()> {
        let agent = &record.agent;
        let result = sqlx::query(
            r#"
            UPDATE agents SET
                alias = $2, capabilities = $3, balance = $4, escrow = $5,
                admin_key_hash = $6, admin_key_prefix = $7,
                worker_key_hash = $8, worker_key_prefix = $9,
                updated_at = $10
            WHERE agent_id = $1
            "#,
        )
        .bind(agent.agent_id.0)
        .bind(&agent.alias)
        .bind(serde_json::to_value(&agent.capabilities)?)
        .bind(karma_to_i64("balance", agent.balance)?)
        .bind(karma_to_i64("escrow", agent.escrow)?)
        .bind(&record.admin_key_hash)
        .bind(&record.admin_key_prefix)
        .bind(&record.worker_key_hash)
        .bind(&record.worker_key_prefix)
        .bind(agent.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_write(e, "agent"))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("agent {}", agent.agent_id)));
        }
        Ok(())
    }

    async fn insert_task(&mut self, task: &Task) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, publisher_id, solver_id, bounty, requirements, payload, result,
                 status, idempotency_key, created_at, locked_at, claim_deadline,
                 submitted_at, settle_deadline, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(task.task_id.0)
        .bind(task.publisher_id.0)
        .bind(task.solver_id.map(|id| id.0))
        .bind(karma_to_i64("bounty", task.bounty)?)
        .bind(serde_json::to_value(&task.requirements)?)
        .bind(&task.payload)
        .bind(&task.result)
        .bind(task.status.as_str())
        .bind(&task.idempotency_key)
        .bind(task.created_at)
        .bind(task.locked_at)
        .bind(task.claim_deadline)
        .bind(task.submitted_at)
        .bind(task.settle_deadline)
        .bind(task.settled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_write(e, "task idempotency key"))?;
        Ok(())
    }

    async fn update_task(&mut self, task: &Task) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                solver_id = $2, result = $3, status = $4,
                locked_at = $5, claim_deadline = $6, submitted_at = $7,
                settle_deadline = $8, settled_at = $9
            WHERE task_id = $1
            "#,
        )
        .bind(task.task_id.0)
        .bind(task.solver_id.map(|id| id.0))
        .bind(&task.result)
        .bind(task.status.as_str())
        .bind(task.locked_at)
        .bind(task.claim_deadline)
        .bind(task.submitted_at)
        .bind(task.settle_deadline)
        .bind(task.settled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_write(e, "task"))?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("task {}", task.task_id)));
        }
        Ok(())
    }

    async fn append_transaction(&mut self, entry: &Transaction) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (tx_id, agent_id, task_id, tx_type, amount, balance_before, balance_after,
                 description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.tx_id.0)
        .bind(entry.agent_id.0)
        .bind(entry.task_id.map(|id| id.0))
        .bind(entry.tx_type.as_str())
        .bind(entry.amount)
        .bind(karma_to_i64("balance_before", entry.balance_before)?)
        .bind(karma_to_i64("balance_after", entry.balance_after)?)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_write(e, "transaction"))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::from_write(e, "commit"))
    }
}
