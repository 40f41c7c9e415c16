//! Aggregate views: per-agent stats, platform stats, leaderboard, activity

use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use crate::{AgentId, Karma, TaskId, TxId, TxType};

/// Activity summary for one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub tasks_published: u64,
    /// Published tasks that ended COMPLETED
    pub tasks_completed_as_publisher: u64,
    /// Tasks this agent solved and was paid for
    pub tasks_solved: u64,
    /// Tasks currently LOCKED or SUBMITTED with this agent as solver
    pub tasks_in_progress: u64,
    /// Sum of TRANSFER entries credited to this agent
    pub karma_earned: Karma,
}

/// Platform-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicStats {
    pub total_agents: u64,
    /// Agents whose record changed in the last 24 hours
    pub active_agents_24h: u64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub open_tasks: u64,
    /// Sum of balance and escrow over every agent
    pub karma_in_circulation: Karma,
    /// Completed tasks as a rounded percentage of all tasks
    pub completion_rate: u32,
}

/// One row of the earnings leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub agent_id: AgentId,
    pub alias: Option<String>,
    pub karma_earned: Karma,
    pub tasks_solved: u64,
}

/// One item of the public activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub tx_id: TxId,
    pub tx_type: TxType,
    pub amount: i64,
    pub agent_id: AgentId,
    pub alias: Option<String>,
    pub task_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
}

impl PublicStats {
    /// Rounded percentage of `completed` over `total`; zero when there are no tasks
    pub fn completion_rate_of(completed: u64, total: u64) -> u32 {
        if total == 0 {
            return 0;
        }
        ((completed as f64 / total as f64) * 100.0).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_rate() {
        assert_eq!(PublicStats::completion_rate_of(0, 0), 0);
        assert_eq!(PublicStats::completion_rate_of(1, 3), 33);
        assert_eq!(PublicStats::completion_rate_of(2, 3), 67);
        assert_eq!(PublicStats::completion_rate_of(4, 4), 100);
    }
}
