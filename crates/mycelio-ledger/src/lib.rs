//! Mycelio Ledger - Karma bookkeeping for the task marketplace
//!
//! Every change to an agent's available balance is recorded as one
//! append-only [`Transaction`]. The ledger is:
//! - Agent-keyed (one running balance per agent)
//! - Signed (`amount` is the delta applied to the available balance)
//! - Chained (`balance_before + amount == balance_after`, and each entry
//!   starts where the previous one ended)
//! - Immutable (entries are never edited or deleted)
//!
//! # Posting rules
//!
//! | Event        | balance   | escrow    | entry              |
//! |--------------|-----------|-----------|--------------------|
//! | registration | +grant    |           | INITIAL_GRANT +g   |
//! | publish      | -bounty   | +bounty   | FREEZE -b          |
//! | cancel       | +bounty   | -bounty   | UNFREEZE +b        |
//! | reject       | +bounty   | -bounty   | REFUND +b          |
//! | accept       | solver +b | pub -b    | TRANSFER +b solver |
//!
//! The posting functions mutate an in-memory [`Agent`] and return the entry
//! to append; the caller persists both inside the same store transaction.
//!
//! # Invariants
//!
//! 1. No negative balances or escrow
//! 2. Sum of an agent's entry amounts equals its balance
//! 3. Escrow equals the bounties of the agent's live tasks

pub mod audit;

use chrono::{DateTime, Utc};
use mycelio_types::{Agent, ErrorCode, Karma, TaskId, Transaction, TxId, TxType};
use thiserror::Error;

pub use audit::{AgentAudit, AuditReport, Reconciler};

/// Errors that can occur in ledger operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: u64, required: u64 },

    #[error("Insufficient escrow: have {available}, need {required}")]
    InsufficientEscrow { available: u64, required: u64 },

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Database error: {message}")]
    DatabaseError { message: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InsufficientBalance { .. } => ErrorCode::InsufficientKarma,
            Self::InsufficientEscrow { .. } | Self::InvalidAmount { .. } => {
                ErrorCode::InternalError
            }
            Self::DatabaseError { .. } => ErrorCode::DatabaseError,
        }
    }
}

impl From<mycelio_db::DbError> for LedgerError {
    fn from(err: mycelio_db::DbError) -> Self {
        Self::DatabaseError {
            message: err.to_string(),
        }
    }
}

fn signed(amount: Karma) -> Result<i64> {
    amount.as_i64().ok_or_else(|| LedgerError::InvalidAmount {
        message: format!("{} exceeds the signed range", amount),
    })
}

fn non_zero(amount: Karma) -> Result<()> {
    if amount.is_zero() {
        return Err(LedgerError::InvalidAmount {
            message: "Amount must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn overflow() -> LedgerError {
    LedgerError::InvalidAmount {
        message: "Balance overflow".to_string(),
    }
}

fn entry(
    agent: &Agent,
    task_id: Option<TaskId>,
    tx_type: TxType,
    amount: i64,
    before: Karma,
    description: String,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        tx_id: TxId::new(),
        agent_id: agent.agent_id,
        task_id,
        tx_type,
        amount,
        balance_before: before,
        balance_after: agent.balance,
        description,
        created_at: now,
    }
}

/// Credit the registration grant
pub fn grant(agent: &mut Agent, amount: Karma, now: DateTime<Utc>) -> Result<Transaction> {
    non_zero(amount)?;
    let delta = signed(amount)?;
    let before = agent.balance;
    agent.balance = before.checked_add(amount).ok_or_else(overflow)?;
    agent.updated_at = now;
    Ok(entry(
        agent,
        None,
        TxType::InitialGrant,
        delta,
        before,
        "Initial Karma grant".to_string(),
        now,
    ))
}

/// Move a bounty from the publisher's balance into escrow
pub fn freeze(
    agent: &mut Agent,
    task_id: TaskId,
    bounty: Karma,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    non_zero(bounty)?;
    let delta = signed(bounty)?;
    let before = agent.balance;
    let balance = before
        .checked_sub(bounty)
        .ok_or(LedgerError::InsufficientBalance {
            available: before.0,
            required: bounty.0,
        })?;
    let escrow = agent.escrow.checked_add(bounty).ok_or_else(overflow)?;

    agent.balance = balance;
    agent.escrow = escrow;
    agent.updated_at = now;
    Ok(entry(
        agent,
        Some(task_id),
        TxType::Freeze,
        -delta,
        before,
        format!("Bounty escrowed for task {}", task_id),
        now,
    ))
}

fn release_to_balance(
    agent: &mut Agent,
    task_id: TaskId,
    bounty: Karma,
    tx_type: TxType,
    description: String,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    non_zero(bounty)?;
    let delta = signed(bounty)?;
    let escrow = agent
        .escrow
        .checked_sub(bounty)
        .ok_or(LedgerError::InsufficientEscrow {
            available: agent.escrow.0,
            required: bounty.0,
        })?;
    let before = agent.balance;
    let balance = before.checked_add(bounty).ok_or_else(overflow)?;

    agent.balance = balance;
    agent.escrow = escrow;
    agent.updated_at = now;
    Ok(entry(agent, Some(task_id), tx_type, delta, before, description, now))
}

/// Return a cancelled task's bounty from escrow to the publisher
pub fn unfreeze(
    agent: &mut Agent,
    task_id: TaskId,
    bounty: Karma,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    release_to_balance(
        agent,
        task_id,
        bounty,
        TxType::Unfreeze,
        format!("Task {} cancelled, bounty returned", task_id),
        now,
    )
}

/// Return a rejected task's bounty from escrow to the publisher
pub fn refund(
    agent: &mut Agent,
    task_id: TaskId,
    bounty: Karma,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    release_to_balance(
        agent,
        task_id,
        bounty,
        TxType::Refund,
        format!("Task {} rejected, bounty refunded", task_id),
        now,
    )
}

/// Drop a paid-out bounty from the publisher's escrow
///
/// The publisher's available balance is untouched, so no entry is written.
pub fn release_escrow(agent: &mut Agent, bounty: Karma, now: DateTime<Utc>) -> Result<()> {
    non_zero(bounty)?;
    agent.escrow = agent
        .escrow
        .checked_sub(bounty)
        .ok_or(LedgerError::InsufficientEscrow {
            available: agent.escrow.0,
            required: bounty.0,
        })?;
    agent.updated_at = now;
    Ok(())
}

/// Credit an accepted task's bounty to the solver
pub fn transfer(
    solver: &mut Agent,
    task_id: TaskId,
    bounty: Karma,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    non_zero(bounty)?;
    let delta = signed(bounty)?;
    let before = solver.balance;
    solver.balance = before.checked_add(bounty).ok_or_else(overflow)?;
    solver.updated_at = now;
    Ok(entry(
        solver,
        Some(task_id),
        TxType::Transfer,
        delta,
        before,
        format!("Bounty earned for task {}", task_id),
        now,
    ))
}
