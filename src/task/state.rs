use std::fmt;

use serde::{Deserialize, Serialize};

use super::result::TaskStatus;
use crate::error::ContractViolation;

/// The four states of a task.
///
/// Each task flows through: CREATED → RUNNING → COMPLETE | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Running,
    Complete,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Created => write!(f, "CREATED"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Complete => write!(f, "COMPLETE"),
            TaskState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Drives a task's [`TaskState`]. Terminal states are final, so a task can
/// never be run twice.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// CREATED → RUNNING.
    pub fn start(task_id: &str, state: &mut TaskState) -> Result<(), ContractViolation> {
        match state {
            TaskState::Created => {
                *state = TaskState::Running;
                Ok(())
            }
            other => Err(Self::invalid(task_id, *other, TaskState::Running)),
        }
    }

    /// RUNNING → COMPLETE | FAILED, chosen by the result status.
    pub fn finish(
        task_id: &str,
        state: &mut TaskState,
        status: TaskStatus,
    ) -> Result<TaskState, ContractViolation> {
        let next = match status {
            TaskStatus::Success => TaskState::Complete,
            TaskStatus::Failure | TaskStatus::Pending => TaskState::Failed,
        };
        match state {
            TaskState::Running => {
                *state = next;
                Ok(next)
            }
            other => Err(Self::invalid(task_id, *other, next)),
        }
    }

    fn invalid(task_id: &str, from: TaskState, to: TaskState) -> ContractViolation {
        ContractViolation::InvalidTransition {
            task_id: task_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
