//! Tasks and their lifecycle states

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AgentId, Karma, TaskId};

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Published and waiting for a worker
    Open,
    /// Claimed by a worker, claim window running
    Locked,
    /// Result submitted, waiting for the publisher's decision
    Submitted,
    /// Accepted; bounty paid to the solver
    Completed,
    /// Rejected; bounty refunded to the publisher
    Failed,
    /// Withdrawn by the publisher before any claim
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Locked => "LOCKED",
            Self::Submitted => "SUBMITTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Bounty is still held in the publisher's escrow
    pub fn holds_escrow(&self) -> bool {
        matches!(self, Self::Open | Self::Locked | Self::Submitted)
    }

    /// A solver is assigned in exactly these states
    pub fn has_solver(&self) -> bool {
        matches!(
            self,
            Self::Locked | Self::Submitted | Self::Completed | Self::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "LOCKED" => Ok(Self::Locked),
            "SUBMITTED" => Ok(Self::Submitted),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A skill a worker is expected to have
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Requirement {
    #[validate(length(min = 1, max = 64))]
    pub skill: String,
    #[validate(range(min = 1, max = 10))]
    pub min_level: u8,
}

/// A unit of work with a bounty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub publisher_id: AgentId,
    pub solver_id: Option<AgentId>,
    pub bounty: Karma,
    pub requirements: Vec<Requirement>,
    /// Opaque task description
    pub payload: serde_json::Value,
    /// Opaque work product
    pub result: Option<serde_json::Value>,
    pub status: TaskStatus,
    /// Client-supplied retry key for publish, unique per publisher
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub claim_deadline: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub settle_deadline: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_publisher(&self, agent: AgentId) -> bool {
        self.publisher_id == agent
    }

    pub fn is_solver(&self, agent: AgentId) -> bool {
        self.solver_id == Some(agent)
    }

    /// Solver presence agrees with status
    pub fn solver_consistent(&self) -> bool {
        self.solver_id.is_some() == self.status.has_solver()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            TaskStatus::Open,
            TaskStatus::Locked,
            TaskStatus::Submitted,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("open".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_classes() {
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Submitted.is_terminal());
        assert!(TaskStatus::Locked.holds_escrow());
        assert!(!TaskStatus::Completed.holds_escrow());
        assert!(TaskStatus::Failed.has_solver());
        assert!(!TaskStatus::Open.has_solver());
    }

    #[test]
    fn test_requirement_validation() {
        let ok = Requirement { skill: "rust".into(), min_level: 3 };
        assert!(ok.validate().is_ok());

        let bad_level = Requirement { skill: "rust".into(), min_level: 11 };
        assert!(bad_level.validate().is_err());

        let long_skill = Requirement { skill: "x".repeat(65), min_level: 1 };
        assert!(long_skill.validate().is_err());
    }
}
