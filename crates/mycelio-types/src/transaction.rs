//! Ledger transactions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, Karma, TaskId, TxId};

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    /// Registration grant
    InitialGrant,
    /// Bounty moved from balance into escrow on publish
    Freeze,
    /// Bounty returned from escrow on cancel
    Unfreeze,
    /// Bounty paid from publisher escrow to the solver
    Transfer,
    /// Bounty returned from escrow on rejection
    Refund,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialGrant => "INITIAL_GRANT",
            Self::Freeze => "FREEZE",
            Self::Unfreeze => "UNFREEZE",
            Self::Transfer => "TRANSFER",
            Self::Refund => "REFUND",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIAL_GRANT" => Ok(Self::InitialGrant),
            "FREEZE" => Ok(Self::Freeze),
            "UNFREEZE" => Ok(Self::Unfreeze),
            "TRANSFER" => Ok(Self::Transfer),
            "REFUND" => Ok(Self::Refund),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

/// An append-only ledger entry
///
/// `amount` is the signed change applied to the agent's available balance.
/// Entries are never edited or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: TxId,
    pub agent_id: AgentId,
    pub task_id: Option<TaskId>,
    pub tx_type: TxType,
    pub amount: i64,
    pub balance_before: Karma,
    pub balance_after: Karma,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// `balance_before + amount == balance_after`
    pub fn is_consistent(&self) -> bool {
        i128::from(self.balance_before.0) + i128::from(self.amount)
            == i128::from(self.balance_after.0)
    }
}
