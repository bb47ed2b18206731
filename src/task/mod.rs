//! Tasks: one job, one piece of evidence, one tool run.

mod plan;
mod result;
mod state;

pub use result::{LogEntry, TaskError, TaskResult, TaskStatus};
pub use state::{TaskState, TaskStateMachine};

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{ExecutionEngine, ProcessRunner};
use crate::error::{ContractViolation, FailureKind};
use crate::evidence::Evidence;
use crate::jobs::{Job, JobKind};

#[derive(Debug, Clone)]
pub struct Task {
    id: String,
    job_id: String,
    kind: JobKind,
    priority: u8,
    program: String,
    evidence_id: String,
    output_dir: PathBuf,
    state: TaskState,
}

impl Task {
    pub(crate) fn new(job: &Job, evidence: &Evidence) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let output_dir = job.output_root().join(&id);
        Self {
            id,
            job_id: job.id().to_string(),
            kind: job.kind(),
            priority: job.priority(),
            program: job.program().to_string(),
            evidence_id: evidence.id.clone(),
            output_dir,
            state: TaskState::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn evidence_id(&self) -> &str {
        &self.evidence_id
    }

    /// The task's private directory, `{output_root}/{id}`.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `{output_dir}/{id}.{extension}`.
    pub fn output_path(&self, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{extension}", self.id))
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// A fresh, open result for this task.
    pub fn new_result(&self) -> TaskResult {
        TaskResult::new(&self.id, self.job_name())
    }

    /// Runs the task's tool against `evidence` and returns the closed result.
    ///
    /// Tool and filesystem problems come back as a FAILURE result. `Err` means
    /// the caller broke the contract: the task already ran, the result
    /// belongs to another task or is closed, or `evidence` is not the
    /// evidence the task was created for.
    pub async fn run<R: ProcessRunner>(
        &mut self,
        evidence: &Evidence,
        mut result: TaskResult,
        engine: &ExecutionEngine<R>,
    ) -> Result<TaskResult, ContractViolation> {
        if result.task_id() != self.id {
            return Err(ContractViolation::ForeignResult {
                task_id: self.id.clone(),
                result_task_id: result.task_id().to_string(),
            });
        }
        if result.is_closed() {
            return Err(ContractViolation::ResultClosed {
                task_id: self.id.clone(),
            });
        }
        if evidence.id != self.evidence_id {
            return Err(ContractViolation::WrongEvidence {
                task_id: self.id.clone(),
                expected: self.evidence_id.clone(),
                actual: evidence.id.clone(),
            });
        }
        let Some(input) = evidence.path() else {
            return Err(ContractViolation::MissingLocalPath {
                evidence_id: evidence.id.clone(),
            });
        };

        TaskStateMachine::start(&self.id, &mut self.state)?;
        info!(task_id = %self.id, job = %self.kind, evidence_id = %evidence.id, "task started");

        let prepared = match utf8_paths(&[input, self.output_dir.as_path()]) {
            Ok(()) => tokio::fs::create_dir_all(&self.output_dir)
                .await
                .map_err(|e| {
                    format!(
                        "failed to create output directory {}: {e}",
                        self.output_dir.display()
                    )
                }),
            Err(message) => Err(message),
        };

        match prepared {
            Ok(()) => {
                let execution = plan::build(self, evidence, input);
                result.log(format!(
                    "Running {} as [{}]",
                    self.kind,
                    execution.invocation.display()
                ))?;
                engine.execute(execution, &mut result).await?;
            }
            Err(message) => {
                warn!(task_id = %self.id, "{message}");
                result.log(message.clone())?;
                result.fail(FailureKind::Setup, message, None)?;
                result.close()?;
            }
        }

        let state = TaskStateMachine::finish(&self.id, &mut self.state, result.status())?;
        info!(task_id = %self.id, job = %self.kind, %state, "task finished");
        Ok(result)
    }
}

// Tool arguments are strings; a lossy conversion would name another file.
fn utf8_paths(paths: &[&Path]) -> Result<(), String> {
    match paths.iter().find(|p| p.to_str().is_none()) {
        Some(path) => Err(format!("path is not valid UTF-8: {}", path.display())),
        None => Ok(()),
    }
}
