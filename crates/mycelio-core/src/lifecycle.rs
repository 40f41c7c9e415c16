//! Task state machine
//!
//! ```text
//!   OPEN ──claim──▶ LOCKED ──submit──▶ SUBMITTED ──settle(accept)──▶ COMPLETED
//!    │  ◀─reclaim──    │                    └──────settle(reject)──▶ FAILED
//!    └──cancel──▶ CANCELLED
//! ```
//!
//! These functions only decide and mutate a [`Task`] value. The engine calls
//! them on a row it has locked, so the status they check is authoritative.
//! A request whose effect already holds yields [`Step::Replay`] and leaves the
//! task untouched.

use chrono::{DateTime, Utc};
use mycelio_types::{AgentId, Task, TaskStatus};
use serde_json::Value;

use crate::error::{EscrowError, EscrowResult};

/// What a transition did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The task was mutated and must be written back
    Apply,
    /// The requested effect already holds
    Replay,
}

/// Who is settling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Agent(AgentId),
    /// The auto-settle sweep, acting for a silent publisher
    System,
}

fn deadline(now: DateTime<Utc>, window: std::time::Duration) -> EscrowResult<DateTime<Utc>> {
    let window = chrono::Duration::from_std(window)
        .map_err(|e| EscrowError::Internal(format!("window out of range: {}", e)))?;
    now.checked_add_signed(window)
        .ok_or_else(|| EscrowError::Internal("deadline overflow".to_string()))
}

/// Serialized size of a JSON value, rejecting anything over `max`
pub fn check_payload_size(value: &Value, max: usize) -> EscrowResult<usize> {
    let size = serde_json::to_vec(value)
        .map_err(|e| EscrowError::Internal(format!("payload serialization: {}", e)))?
        .len();
    if size > max {
        return Err(EscrowError::PayloadTooLarge { size, max });
    }
    Ok(size)
}

/// OPEN → LOCKED
pub fn claim(
    task: &mut Task,
    worker: AgentId,
    now: DateTime<Utc>,
    claim_window: std::time::Duration,
) -> EscrowResult<Step> {
    if task.status == TaskStatus::Locked && task.is_solver(worker) {
        return Ok(Step::Replay);
    }
    if task.status != TaskStatus::Open {
        return Err(EscrowError::TaskAlreadyClaimed {
            task_id: task.task_id,
            status: task.status,
        });
    }
    if task.is_publisher(worker) {
        return Err(EscrowError::Forbidden);
    }

    task.claim_deadline = Some(deadline(now, claim_window)?);
    task.solver_id = Some(worker);
    task.status = TaskStatus::Locked;
    task.locked_at = Some(now);
    Ok(Step::Apply)
}

/// LOCKED → SUBMITTED
pub fn submit(
    task: &mut Task,
    solver: AgentId,
    result: Value,
    now: DateTime<Utc>,
    settle_window: std::time::Duration,
) -> EscrowResult<Step> {
    if !task.is_solver(solver) {
        return Err(EscrowError::Forbidden);
    }
    match task.status {
        TaskStatus::Submitted => Ok(Step::Replay),
        TaskStatus::Locked => {
            task.settle_deadline = Some(deadline(now, settle_window)?);
            task.result = Some(result);
            task.status = TaskStatus::Submitted;
            task.submitted_at = Some(now);
            Ok(Step::Apply)
        }
        status => Err(EscrowError::TaskNotSubmittable {
            task_id: task.task_id,
            status,
        }),
    }
}

/// SUBMITTED → COMPLETED | FAILED
///
/// Balance effects are applied by the caller once this returns `Apply`.
pub fn settle(task: &mut Task, actor: Actor, accept: bool, now: DateTime<Utc>) -> EscrowResult<Step> {
    if let Actor::Agent(caller) = actor {
        if !task.is_publisher(caller) {
            return Err(EscrowError::Forbidden);
        }
    }
    match (task.status, accept) {
        (TaskStatus::Completed, true) | (TaskStatus::Failed, false) => Ok(Step::Replay),
        (TaskStatus::Submitted, _) => {
            task.status = if accept {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            task.settled_at = Some(now);
            Ok(Step::Apply)
        }
        (status, _) => Err(EscrowError::TaskNotSettlable {
            task_id: task.task_id,
            status,
        }),
    }
}

/// OPEN → CANCELLED
pub fn cancel(task: &mut Task, publisher: AgentId) -> EscrowResult<Step> {
    if !task.is_publisher(publisher) {
        return Err(EscrowError::Forbidden);
    }
    match task.status {
        TaskStatus::Cancelled => Ok(Step::Replay),
        TaskStatus::Open => {
            task.status = TaskStatus::Cancelled;
            Ok(Step::Apply)
        }
        status => Err(EscrowError::TaskNotCancelable {
            task_id: task.task_id,
            status,
        }),
    }
}

/// LOCKED past its claim deadline → OPEN
///
/// Returns false when the task no longer qualifies (submitted, or the
/// deadline was pushed by a fresh claim).
pub fn reclaim(task: &mut Task, now: DateTime<Utc>) -> bool {
    let expired = task.status == TaskStatus::Locked
        && task.claim_deadline.map(|d| d < now).unwrap_or(false);
    if !expired {
        return false;
    }
    task.status = TaskStatus::Open;
    task.solver_id = None;
    task.locked_at = None;
    task.claim_deadline = None;
    true
}

/// SUBMITTED past its settle deadline
pub fn settle_overdue(task: &Task, now: DateTime<Utc>) -> bool {
    task.status == TaskStatus::Submitted && task.settle_deadline.map(|d| d < now).unwrap_or(false)
}
