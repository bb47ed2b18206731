use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaseworkError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A broken core invariant. These are defects in the calling code, not
/// transient tool or filesystem faults, and are never folded into a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("evidence {evidence_id} does not descend from {expected_source} via task {expected_task}")]
    Provenance {
        evidence_id: String,
        expected_source: String,
        expected_task: String,
    },

    #[error("evidence {evidence_id} has no local path")]
    MissingLocalPath { evidence_id: String },

    #[error("result for task {task_id} is already closed")]
    ResultClosed { task_id: String },

    #[error("result for task {task_id} is still open")]
    ResultOpen { task_id: String },

    #[error("result for task {result_task_id} was handed to task {task_id}")]
    ForeignResult {
        task_id: String,
        result_task_id: String,
    },

    #[error("task {task_id} is bound to evidence {expected}, not {actual}")]
    WrongEvidence {
        task_id: String,
        expected: String,
        actual: String,
    },

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("duplicate task id {task_id}")]
    DuplicateTaskId { task_id: String },

    #[error("evidence {evidence_id} has a broken lineage: {reason}")]
    BrokenLineage { evidence_id: String, reason: String },
}

/// Classifies why a task failed. Every kind is recovered inside the task
/// boundary and surfaces only through the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The external tool exited non-zero, failed to start, or timed out.
    ToolExecution,
    /// A declared output file was missing or could not be persisted.
    Persistence,
    /// The task could not prepare its private output directory.
    Setup,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ToolExecution => write!(f, "ToolExecution"),
            FailureKind::Persistence => write!(f, "Persistence"),
            FailureKind::Setup => write!(f, "Setup"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_violation_display() {
        let err = ContractViolation::Provenance {
            evidence_id: "e2".into(),
            expected_source: "e1".into(),
            expected_task: "t1".into(),
        };
        assert_eq!(
            err.to_string(),
            "evidence e2 does not descend from e1 via task t1"
        );
    }

    #[test]
    fn contract_violation_converts_into_casework_error() {
        let err: CaseworkError = ContractViolation::ResultClosed {
            task_id: "abc".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Contract violation: result for task abc is already closed"
        );
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::ToolExecution).unwrap();
        assert_eq!(json, r#""tool_execution""#);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CaseworkError>();
        assert_send_sync::<ContractViolation>();
    }
}
