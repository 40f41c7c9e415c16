//! Agents: publishers and workers in the marketplace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AgentId, Karma};

/// A declared skill and proficiency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Capability {
    #[validate(length(min = 1, max = 64))]
    pub skill: String,
    #[validate(range(min = 1, max = 10))]
    pub level: u8,
}

/// A registered agent
///
/// Credential hashes and lookup prefixes are never part of this type; they
/// live only in the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub alias: Option<String>,
    pub capabilities: Vec<Capability>,
    /// Spendable Karma
    pub balance: Karma,
    /// Karma committed to live tasks this agent published
    pub escrow: Karma,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Balance plus escrow
    pub fn total_karma(&self) -> Karma {
        Karma(self.balance.0.saturating_add(self.escrow.0))
    }
}

/// Credentials issued at registration or rotation
///
/// Returned to the caller exactly once; only hashes are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCredentials {
    pub agent_id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_key: Option<String>,
    pub worker_key: String,
}
