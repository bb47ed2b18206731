use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ContractViolation, FailureKind};
use crate::evidence::Evidence;

/// Outcome of a task run. `Pending` until the engine records an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Success,
    Failure,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Success => write!(f, "SUCCESS"),
            TaskStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Structured failure detail, present only on failed results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
    /// Captured stderr or other diagnostic text.
    pub diagnostic: Option<String>,
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)?;
        if let Some(diag) = &self.diagnostic {
            write!(f, " ({})", diag.trim())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Accumulates everything one task run produces.
///
/// Open results accept log lines, saved files, evidence and an outcome.
/// [`close`](TaskResult::close) freezes the result; every later mutation is
/// rejected with [`ContractViolation::ResultClosed`] and leaves it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    task_id: String,
    job_name: String,
    status: TaskStatus,
    log: Vec<LogEntry>,
    error: Option<TaskError>,
    command: Option<Vec<String>>,
    saved_files: Vec<PathBuf>,
    new_evidence: Vec<Evidence>,
    closed: bool,
    started_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    pub fn new(task_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            job_name: job_name.into(),
            status: TaskStatus::Pending,
            log: Vec::new(),
            error: None,
            command: None,
            saved_files: Vec::new(),
            new_evidence: Vec::new(),
            closed: false,
            started_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    pub fn saved_files(&self) -> &[PathBuf] {
        &self.saved_files
    }

    pub fn new_evidence(&self) -> &[Evidence] {
        &self.new_evidence
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.closed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    fn ensure_open(&self) -> Result<(), ContractViolation> {
        if self.closed {
            return Err(ContractViolation::ResultClosed {
                task_id: self.task_id.clone(),
            });
        }
        Ok(())
    }

    /// Appends a timestamped line to the result log.
    pub fn log(&mut self, message: impl Into<String>) -> Result<(), ContractViolation> {
        self.ensure_open()?;
        let message = message.into();
        debug!(task_id = %self.task_id, "{message}");
        self.log.push(LogEntry {
            at: Utc::now(),
            message,
        });
        Ok(())
    }

    pub(crate) fn record_command(&mut self, command: &[String]) -> Result<(), ContractViolation> {
        self.ensure_open()?;
        self.command = Some(command.to_vec());
        Ok(())
    }

    pub(crate) fn add_saved_file(&mut self, path: PathBuf) -> Result<(), ContractViolation> {
        self.ensure_open()?;
        self.saved_files.push(path);
        Ok(())
    }

    /// Attaches evidence produced by this task. Evidence claiming another
    /// producer is refused.
    pub fn add_evidence(&mut self, evidence: Evidence) -> Result<(), ContractViolation> {
        self.ensure_open()?;
        if evidence.produced_by_task_id.as_deref() != Some(self.task_id.as_str()) {
            return Err(ContractViolation::Provenance {
                evidence_id: evidence.id.clone(),
                expected_source: evidence.source_evidence_id.clone().unwrap_or_default(),
                expected_task: self.task_id.clone(),
            });
        }
        self.new_evidence.push(evidence);
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), ContractViolation> {
        self.ensure_open()?;
        self.status = TaskStatus::Success;
        self.error = None;
        Ok(())
    }

    /// Records a failure. Evidence attached so far is dropped, since
    /// artifacts from a failed run are not trusted.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        diagnostic: Option<String>,
    ) -> Result<(), ContractViolation> {
        self.ensure_open()?;
        self.status = TaskStatus::Failure;
        self.new_evidence.clear();
        self.error = Some(TaskError {
            kind,
            message: message.into(),
            diagnostic,
        });
        Ok(())
    }

    /// Freezes the result. A result closed without a recorded outcome is a
    /// failure.
    pub fn close(&mut self) -> Result<(), ContractViolation> {
        self.ensure_open()?;
        if self.status == TaskStatus::Pending {
            self.fail(
                FailureKind::ToolExecution,
                "result closed before an outcome was recorded",
                None,
            )?;
        }
        let status = self.status;
        self.log(format!("Task {} closed with status {status}", self.task_id))?;
        self.closed = true;
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Human-readable failure report: the error, the exact command and the
    /// tail of the log.
    pub fn failure_report(&self, log_lines: usize) -> Option<String> {
        let error = self.error.as_ref()?;
        let mut report = format!("{error}");
        if let Some(cmd) = &self.command {
            report.push_str(&format!("\ncommand: {}", cmd.join(" ")));
        }
        let skip = self.log.len().saturating_sub(log_lines);
        for entry in &self.log[skip..] {
            report.push_str(&format!("\n[{}] {}", entry.at.to_rfc3339(), entry.message));
        }
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceKind;

    fn source() -> Evidence {
        Evidence::with_id("e1", EvidenceKind::RawDisk, Some("/tmp/input.img".into()))
    }

    #[test]
    fn new_result_is_open_and_pending() {
        let result = TaskResult::new("t1", "plaso");
        assert_eq!(result.status(), TaskStatus::Pending);
        assert!(!result.is_closed());
        assert!(result.error().is_none());
        assert!(result.new_evidence().is_empty());
        assert!(result.duration_ms().is_none());
    }

    #[test]
    fn closed_result_rejects_every_mutation() {
        let mut result = TaskResult::new("t1", "plaso");
        result.log("starting").unwrap();
        result.succeed().unwrap();
        result.close().unwrap();
        let before = serde_json::to_string(&result).unwrap();

        let closed = ContractViolation::ResultClosed {
            task_id: "t1".into(),
        };
        assert_eq!(result.log("late").unwrap_err(), closed);
        let e = Evidence::derived(EvidenceKind::PlasoFile, "/o/t1.plaso".into(), &source(), "t1");
        assert_eq!(result.add_evidence(e).unwrap_err(), closed);
        assert_eq!(result.add_saved_file("/o/t1.log".into()).unwrap_err(), closed);
        assert_eq!(result.fail(FailureKind::Setup, "x", None).unwrap_err(), closed);
        assert_eq!(result.close().unwrap_err(), closed);

        assert_eq!(serde_json::to_string(&result).unwrap(), before);
        assert_eq!(result.status(), TaskStatus::Success);
    }

    #[test]
    fn evidence_from_another_task_is_refused() {
        let mut result = TaskResult::new("t1", "plaso");
        let e = Evidence::derived(EvidenceKind::PlasoFile, "/o/t2.plaso".into(), &source(), "t2");
        assert!(matches!(
            result.add_evidence(e),
            Err(ContractViolation::Provenance { .. })
        ));
        assert!(result.new_evidence().is_empty());
    }

    #[test]
    fn failure_drops_attached_evidence() {
        let mut result = TaskResult::new("t1", "plaso");
        let e = Evidence::derived(EvidenceKind::PlasoFile, "/o/t1.plaso".into(), &source(), "t1");
        result.add_evidence(e).unwrap();
        result
            .fail(FailureKind::ToolExecution, "exit 1", Some("boom".into()))
            .unwrap();
        assert!(result.new_evidence().is_empty());
        assert_eq!(result.status(), TaskStatus::Failure);
        assert_eq!(
            result.error().unwrap().to_string(),
            "ToolExecution failure: exit 1 (boom)"
        );
    }

    #[test]
    fn closing_pending_result_marks_failure() {
        let mut result = TaskResult::new("t1", "stat");
        result.close().unwrap();
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.error().is_some());
        assert!(result.closed_at().is_some());
    }

    #[test]
    fn failure_report_includes_command_and_log_tail() {
        let mut result = TaskResult::new("t1", "plaso");
        result.record_command(&["log2timeline.py".into(), "/tmp/x".into()]).unwrap();
        result.log("one").unwrap();
        result.log("two").unwrap();
        result
            .fail(FailureKind::ToolExecution, "exited with status 1", Some("tool not found".into()))
            .unwrap();
        result.close().unwrap();

        let report = result.failure_report(2).unwrap();
        assert!(report.contains("tool not found"));
        assert!(report.contains("command: log2timeline.py /tmp/x"));
        assert!(report.contains("two"));
        assert!(!report.contains("] one"));
    }

    #[test]
    fn result_serialization_roundtrip() {
        let mut result = TaskResult::new("t1", "psort");
        result.log("hello").unwrap();
        result.succeed().unwrap();
        result.close().unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let back: TaskResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id(), "t1");
        assert!(back.is_closed());
        assert_eq!(back.log_entries().len(), result.log_entries().len());
    }
}
