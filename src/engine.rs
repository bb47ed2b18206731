//! Spawning and supervising external analysis tools.
//!
//! [`ExecutionEngine::execute`] is the only place a tool process is started.
//! It runs the command through a [`ProcessRunner`], persists declared output
//! files, attaches declared evidence on success and closes the result. Tool
//! and filesystem faults end up in the result; only broken invariants are
//! returned as `Err`.

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ContractViolation, FailureKind};
use crate::evidence::Evidence;
use crate::storage::DurableStorage;
use crate::task::TaskResult;

/// Upper bound on captured stdout/stderr kept in memory per stream.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// How many trailing lines of captured stdout are copied into the result log.
const STDOUT_LOG_LINES: usize = 20;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long to keep reading a tool's pipes once the tool itself is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A command line plus where its stdout should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: Vec<String>,
    /// When set, stdout is written to this file instead of being captured.
    pub stdout_path: Option<PathBuf>,
}

impl Invocation {
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// How a tool process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process ran to completion. `code` is `None` when it was killed by
    /// a signal.
    Exited {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    SpawnFailed { message: String },
    /// The process was killed at the time limit. `stderr` is what it wrote
    /// before that.
    TimedOut { after: Duration, stderr: String },
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ProcessOutcome::Exited { code: Some(0), .. })
    }
}

/// Starts a tool process and waits for it. Implementations never fail: every
/// problem is described by the returned [`ProcessOutcome`].
pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> impl Future<Output = ProcessOutcome> + Send;
}

/// Runs tools as local child processes with an optional wall-clock limit.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner {
    timeout: Option<Duration>,
}

impl TokioProcessRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> ProcessOutcome {
        let Some((program, args)) = invocation.command.split_first() else {
            return ProcessOutcome::SpawnFailed {
                message: "empty command".into(),
            };
        };

        let stdout = match &invocation.stdout_path {
            Some(path) => match std::fs::File::create(path) {
                Ok(file) => Stdio::from(file),
                Err(e) => {
                    return ProcessOutcome::SpawnFailed {
                        message: format!("failed to create stdout file {}: {e}", path.display()),
                    };
                }
            },
            None => Stdio::piped(),
        };

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down every descendant.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ProcessOutcome::SpawnFailed {
                    message: format!("failed to start {program}: {e}"),
                };
            }
        };

        // Readers run on their own tasks so whatever was captured survives a
        // timeout.
        let stdout_tail = SharedTail::default();
        let stderr_tail = SharedTail::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            readers.push(tokio::spawn(read_into(pipe, Arc::clone(&stdout_tail))));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(tokio::spawn(read_into(pipe, Arc::clone(&stderr_tail))));
        }

        let waited = match self.timeout {
            Some(limit) => {
                let timed = tokio::time::timeout(limit, child.wait()).await;
                match timed {
                    Ok(status) => Ok(status),
                    Err(_) => {
                        kill_tree(&mut child, program).await;
                        Err(limit)
                    }
                }
            }
            None => Ok(child.wait().await),
        };

        drain(readers).await;
        let stdout = lock_tail(&stdout_tail).to_lossy_string();
        let stderr = lock_tail(&stderr_tail).to_lossy_string();

        match waited {
            Ok(Ok(status)) => ProcessOutcome::Exited {
                code: status.code(),
                stdout,
                stderr,
            },
            Ok(Err(e)) => ProcessOutcome::SpawnFailed {
                message: format!("failed to wait for {program}: {e}"),
            },
            Err(after) => ProcessOutcome::TimedOut { after, stderr },
        }
    }
}

/// Kills a timed out child together with its process group.
async fn kill_tree(child: &mut Child, program: &str) {
    signal_group(child, program);
    if let Err(e) = child.kill().await {
        warn!(program = %program, error = %e, "failed to kill timed out process");
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, program: &str) {
    let Some(pid) = child.id() else { return };
    // The child leads its group, so the negated pid addresses the whole group.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        warn!(program = %program, error = %std::io::Error::last_os_error(), "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _program: &str) {}

/// Waits for the pipe readers to hit EOF. A descendant that outlived the
/// child can keep a pipe open, so each wait is bounded by [`DRAIN_GRACE`].
async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            debug!("tool output still open after exit, no longer reading it");
            abort.abort();
        }
    }
}

/// The last [`MAX_CAPTURE_BYTES`] of a stream. Older bytes are dropped as new
/// ones arrive.
#[derive(Debug, Default)]
struct OutputTail {
    bytes: VecDeque<u8>,
}

impl OutputTail {
    fn push(&mut self, chunk: &[u8]) {
        let chunk = &chunk[chunk.len().saturating_sub(MAX_CAPTURE_BYTES)..];
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(MAX_CAPTURE_BYTES);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    fn to_lossy_string(&self) -> String {
        let (front, back) = self.bytes.as_slices();
        let mut buf = Vec::with_capacity(self.bytes.len());
        buf.extend_from_slice(front);
        buf.extend_from_slice(back);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

type SharedTail = Arc<Mutex<OutputTail>>;

fn lock_tail(tail: &SharedTail) -> MutexGuard<'_, OutputTail> {
    tail.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copies a pipe into `tail` chunk by chunk until EOF.
async fn read_into<R: AsyncRead + Unpin>(mut pipe: R, tail: SharedTail) {
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                lock_tail(&tail).push(&chunk[..n]);
            }
            Err(e) => {
                debug!(error = %e, "stopped reading tool output");
                break;
            }
        }
    }
}

/// Everything a task declares about one tool run.
#[derive(Debug, Clone)]
pub struct Execution {
    pub invocation: Invocation,
    /// Files to persist once the tool exits successfully.
    pub save_files: Vec<PathBuf>,
    /// Evidence to attach once the tool exits successfully.
    pub new_evidence: Vec<Evidence>,
    /// The evidence the task was given; every new evidence must descend from it.
    pub source_evidence_id: String,
    /// Close the result after execution.
    pub close: bool,
}

impl Execution {
    pub fn new(command: Vec<String>, source: &Evidence) -> Self {
        Self {
            invocation: Invocation {
                command,
                stdout_path: None,
            },
            save_files: Vec::new(),
            new_evidence: Vec::new(),
            source_evidence_id: source.id.clone(),
            close: true,
        }
    }

    pub fn stdout_to(mut self, path: PathBuf) -> Self {
        self.invocation.stdout_path = Some(path);
        self
    }

    pub fn save_file(mut self, path: PathBuf) -> Self {
        self.save_files.push(path);
        self
    }

    pub fn new_evidence(mut self, evidence: Evidence) -> Self {
        self.new_evidence.push(evidence);
        self
    }

    pub fn close(mut self, close: bool) -> Self {
        self.close = close;
        self
    }
}

pub struct ExecutionEngine<R> {
    runner: R,
    storage: Arc<dyn DurableStorage>,
}

impl<R: ProcessRunner> ExecutionEngine<R> {
    pub fn new(runner: R, storage: Arc<dyn DurableStorage>) -> Self {
        Self { runner, storage }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs `execution` and records the outcome in `result`.
    ///
    /// Steps happen strictly in order: provenance check, spawn, persist saved
    /// files, attach evidence, close. A non-zero exit, spawn failure, timeout
    /// or persistence error becomes a FAILURE result with no evidence
    /// attached. `Err` is only returned for a closed result or evidence that
    /// does not descend from this run.
    pub async fn execute(
        &self,
        execution: Execution,
        result: &mut TaskResult,
    ) -> Result<(), ContractViolation> {
        if result.is_closed() {
            return Err(ContractViolation::ResultClosed {
                task_id: result.task_id().to_string(),
            });
        }
        for evidence in &execution.new_evidence {
            if !evidence.descends_from(&execution.source_evidence_id, result.task_id()) {
                return Err(ContractViolation::Provenance {
                    evidence_id: evidence.id.clone(),
                    expected_source: execution.source_evidence_id.clone(),
                    expected_task: result.task_id().to_string(),
                });
            }
            if evidence.local_path.is_none() {
                return Err(ContractViolation::MissingLocalPath {
                    evidence_id: evidence.id.clone(),
                });
            }
        }

        let Execution {
            invocation,
            save_files,
            new_evidence,
            close,
            ..
        } = execution;

        result.record_command(&invocation.command)?;
        info!(task_id = %result.task_id(), command = %invocation.display(), "executing tool");

        let outcome = self.runner.run(&invocation).await;
        if let ProcessOutcome::Exited { stdout, .. } = &outcome {
            log_stdout_tail(result, stdout)?;
        }

        if outcome.succeeded() {
            result.log(format!("Execution of [{}] succeeded", invocation.display()))?;
            let mut persist_error = None;
            for path in &save_files {
                match self.persist(path).await {
                    Ok(saved) => {
                        result.log(format!("Saved {}", saved.display()))?;
                        result.add_saved_file(saved)?;
                    }
                    Err(message) => {
                        persist_error = Some(message);
                        break;
                    }
                }
            }
            match persist_error {
                None => {
                    for evidence in new_evidence {
                        result.log(format!(
                            "Produced {} evidence {} at {}",
                            evidence.kind,
                            evidence.id,
                            evidence.path().map(|p| p.display().to_string()).unwrap_or_default()
                        ))?;
                        result.add_evidence(evidence)?;
                    }
                    result.succeed()?;
                }
                Some(message) => {
                    warn!(task_id = %result.task_id(), "{message}");
                    result.log(message.clone())?;
                    result.fail(FailureKind::Persistence, message, None)?;
                }
            }
        } else {
            let (message, diagnostic) = describe_failure(&outcome);
            warn!(task_id = %result.task_id(), command = %invocation.display(), "{message}");
            result.log(format!("Execution of [{}] failed: {message}", invocation.display()))?;
            // The tool's own log is what a person will need to debug the run.
            for path in &save_files {
                match self.persist(path).await {
                    Ok(saved) => result.add_saved_file(saved)?,
                    Err(reason) => {
                        warn!(task_id = %result.task_id(), "{reason}");
                        result.log(reason)?;
                    }
                }
            }
            result.fail(FailureKind::ToolExecution, message, diagnostic)?;
        }

        if close {
            result.close()?;
        }
        Ok(())
    }

    async fn persist(&self, path: &Path) -> Result<PathBuf, String> {
        if !path.exists() {
            return Err(format!("declared output {} was not produced", path.display()));
        }
        let storage = Arc::clone(&self.storage);
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || storage.persist(&owned)).await {
            Ok(Ok(saved)) => Ok(saved),
            Ok(Err(e)) => Err(format!("failed to persist {}: {e}", path.display())),
            Err(e) => Err(format!("persisting {} was aborted: {e}", path.display())),
        }
    }
}

fn log_stdout_tail(result: &mut TaskResult, stdout: &str) -> Result<(), ContractViolation> {
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(STDOUT_LOG_LINES);
    for line in &lines[skip..] {
        result.log(format!("stdout: {line}"))?;
    }
    Ok(())
}

fn describe_failure(outcome: &ProcessOutcome) -> (String, Option<String>) {
    match outcome {
        ProcessOutcome::Exited { code, stderr, .. } => {
            let message = match code {
                Some(code) => format!("command exited with status {code}"),
                None => "command was terminated by a signal".to_string(),
            };
            let diagnostic = Some(stderr.trim().to_string()).filter(|s| !s.is_empty());
            (message, diagnostic)
        }
        ProcessOutcome::SpawnFailed { message } => (message.clone(), None),
        ProcessOutcome::TimedOut { after, stderr } => (
            format!("command timed out after {}s", after.as_secs_f64()),
            Some(stderr.trim().to_string()).filter(|s| !s.is_empty()),
        ),
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A runner that never starts a process. It exits with a fixed code,
    /// fills the stdout file if one is requested and, when asked, creates
    /// every `*.log` path found in the command line.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct StubRunner {
        code: i32,
        stdout: String,
        stderr: String,
        touch_logs: bool,
        failing_programs: Vec<String>,
        calls: Arc<Mutex<Vec<Invocation>>>,
    }

    impl StubRunner {
        pub(crate) fn succeeding() -> Self {
            Self::default()
        }

        pub(crate) fn exiting(code: i32, stderr: &str) -> Self {
            Self {
                code,
                stderr: stderr.to_string(),
                ..Self::default()
            }
        }

        pub(crate) fn with_stdout(mut self, stdout: &str) -> Self {
            self.stdout = stdout.to_string();
            self
        }

        pub(crate) fn touching_logs(mut self) -> Self {
            self.touch_logs = true;
            self
        }

        pub(crate) fn failing_program(mut self, program: &str) -> Self {
            self.failing_programs.push(program.to_string());
            self
        }

        pub(crate) fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for StubRunner {
        async fn run(&self, invocation: &Invocation) -> ProcessOutcome {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.touch_logs {
                for arg in invocation.command.iter().filter(|a| a.ends_with(".log")) {
                    let path = Path::new(arg);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).unwrap();
                    }
                    std::fs::write(path, "stub log\n").unwrap();
                }
            }
            let stdout = match &invocation.stdout_path {
                Some(path) => {
                    std::fs::write(path, &self.stdout).unwrap();
                    String::new()
                }
                None => self.stdout.clone(),
            };
            let program = invocation.command.first().cloned().unwrap_or_default();
            let code = if self.failing_programs.contains(&program) {
                1
            } else {
                self.code
            };
            let stderr = if code == 0 {
                String::new()
            } else if self.stderr.is_empty() {
                format!("{program} failed")
            } else {
                self.stderr.clone()
            };
            ProcessOutcome::Exited {
                code: Some(code),
                stdout,
                stderr,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::StubRunner;
    use super::*;
    use crate::evidence::EvidenceKind;
    use crate::storage::{CopyStorage, InPlaceStorage};
    use crate::task::TaskStatus;
    use tempfile::TempDir;

    fn source() -> Evidence {
        Evidence::with_id("e1", EvidenceKind::RawDisk, Some("/tmp/input.img".into()))
    }

    fn engine(runner: StubRunner) -> ExecutionEngine<StubRunner> {
        ExecutionEngine::new(runner, Arc::new(InPlaceStorage))
    }

    #[tokio::test]
    async fn success_persists_files_and_attaches_evidence() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("t1.log");
        let src = source();
        let produced = Evidence::derived(EvidenceKind::PlasoFile, tmp.path().join("t1.plaso"), &src, "t1");
        let execution = Execution::new(
            vec!["log2timeline.py".into(), "--logfile".into(), log.display().to_string()],
            &src,
        )
        .save_file(log.clone())
        .new_evidence(produced.clone());

        let mut result = TaskResult::new("t1", "plaso");
        engine(StubRunner::succeeding().touching_logs())
            .execute(execution, &mut result)
            .await
            .unwrap();

        assert_eq!(result.status(), TaskStatus::Success);
        assert!(result.is_closed());
        assert_eq!(result.saved_files(), &[log]);
        assert_eq!(result.new_evidence(), &[produced]);
        assert_eq!(result.command().unwrap()[0], "log2timeline.py");
    }

    #[tokio::test]
    async fn non_zero_exit_is_contained() {
        let src = source();
        let produced = Evidence::derived(EvidenceKind::PlasoFile, "/o/t1.plaso".into(), &src, "t1");
        let execution = Execution::new(vec!["log2timeline.py".into()], &src).new_evidence(produced);

        let mut result = TaskResult::new("t1", "plaso");
        engine(StubRunner::exiting(1, "tool not found"))
            .execute(execution, &mut result)
            .await
            .unwrap();

        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.is_closed());
        assert!(result.new_evidence().is_empty());
        let error = result.error().unwrap();
        assert_eq!(error.kind, FailureKind::ToolExecution);
        assert_eq!(error.diagnostic.as_deref(), Some("tool not found"));
        assert!(error.to_string().contains("tool not found"));
    }

    #[tokio::test]
    async fn missing_declared_file_is_a_persistence_failure() {
        let tmp = TempDir::new().unwrap();
        let src = source();
        let produced = Evidence::derived(EvidenceKind::PlasoFile, tmp.path().join("t1.plaso"), &src, "t1");
        let execution = Execution::new(vec!["log2timeline.py".into()], &src)
            .save_file(tmp.path().join("t1.log"))
            .new_evidence(produced);

        let mut result = TaskResult::new("t1", "plaso");
        engine(StubRunner::succeeding())
            .execute(execution, &mut result)
            .await
            .unwrap();

        assert_eq!(result.status(), TaskStatus::Failure);
        assert_eq!(result.error().unwrap().kind, FailureKind::Persistence);
        assert!(result.new_evidence().is_empty());
        assert!(result.is_closed());
    }

    #[tokio::test]
    async fn foreign_evidence_fails_fast_without_spawning() {
        let src = source();
        let produced = Evidence::derived(EvidenceKind::PlasoFile, "/o/x.plaso".into(), &src, "other-task");
        let execution = Execution::new(vec!["log2timeline.py".into()], &src).new_evidence(produced);

        let runner = StubRunner::succeeding();
        let engine = engine(runner.clone());
        let mut result = TaskResult::new("t1", "plaso");
        let err = engine.execute(execution, &mut result).await.unwrap_err();

        assert!(matches!(err, ContractViolation::Provenance { .. }));
        assert!(runner.calls().is_empty());
        assert!(!result.is_closed());
    }

    #[tokio::test]
    async fn evidence_from_another_source_fails_fast() {
        let src = source();
        let stranger = Evidence::with_id("e9", EvidenceKind::RawDisk, Some("/tmp/other.img".into()));
        let produced = Evidence::derived(EvidenceKind::PlasoFile, "/o/t1.plaso".into(), &stranger, "t1");
        let execution = Execution::new(vec!["log2timeline.py".into()], &src).new_evidence(produced);

        let mut result = TaskResult::new("t1", "plaso");
        let err = engine(StubRunner::succeeding())
            .execute(execution, &mut result)
            .await
            .unwrap_err();
        assert!(matches!(err, ContractViolation::Provenance { .. }));
    }

    #[tokio::test]
    async fn closed_result_is_rejected() {
        let src = source();
        let mut result = TaskResult::new("t1", "stat");
        result.succeed().unwrap();
        result.close().unwrap();

        let err = engine(StubRunner::succeeding())
            .execute(Execution::new(vec!["stat".into()], &src), &mut result)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::ResultClosed {
                task_id: "t1".into()
            }
        );
    }

    #[tokio::test]
    async fn without_close_the_result_stays_open() {
        let src = source();
        let mut result = TaskResult::new("t1", "stat");
        engine(StubRunner::succeeding().with_stdout("size: 42\n"))
            .execute(Execution::new(vec!["stat".into()], &src).close(false), &mut result)
            .await
            .unwrap();

        assert!(!result.is_closed());
        assert_eq!(result.status(), TaskStatus::Success);
        assert!(result
            .log_entries()
            .iter()
            .any(|e| e.message == "stdout: size: 42"));
        result.close().unwrap();
        assert_eq!(result.status(), TaskStatus::Success);
    }

    #[tokio::test]
    async fn failed_run_still_keeps_the_tool_log() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("t1.log");
        let src = source();
        let execution = Execution::new(
            vec!["psort.py".into(), "--logfile".into(), log.display().to_string()],
            &src,
        )
        .save_file(log.clone());

        let mut result = TaskResult::new("t1", "psort");
        engine(StubRunner::exiting(2, "bad storage file").touching_logs())
            .execute(execution, &mut result)
            .await
            .unwrap();

        assert_eq!(result.status(), TaskStatus::Failure);
        assert_eq!(result.saved_files(), &[log]);
    }

    #[tokio::test]
    async fn failed_run_records_why_the_tool_log_is_missing() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("t1.log");
        let src = source();
        let execution = Execution::new(vec!["psort.py".into()], &src).save_file(log.clone());

        let mut result = TaskResult::new("t1", "psort");
        engine(StubRunner::exiting(2, "bad storage file"))
            .execute(execution, &mut result)
            .await
            .unwrap();

        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.saved_files().is_empty());
        let expected = format!("declared output {} was not produced", log.display());
        assert!(result.log_entries().iter().any(|e| e.message == expected));
    }

    #[derive(Debug)]
    struct ReadOnlyStorage;

    impl DurableStorage for ReadOnlyStorage {
        fn persist(&self, _path: &Path) -> std::io::Result<PathBuf> {
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only volume",
            ))
        }
    }

    #[tokio::test]
    async fn storage_error_is_a_persistence_failure() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("t1.log");
        let src = source();
        let produced = Evidence::derived(EvidenceKind::PlasoFile, tmp.path().join("t1.plaso"), &src, "t1");
        let execution = Execution::new(
            vec!["log2timeline.py".into(), "--logfile".into(), log.display().to_string()],
            &src,
        )
        .save_file(log.clone())
        .new_evidence(produced);

        let engine = ExecutionEngine::new(
            StubRunner::succeeding().touching_logs(),
            Arc::new(ReadOnlyStorage),
        );
        let mut result = TaskResult::new("t1", "plaso");
        engine.execute(execution, &mut result).await.unwrap();

        assert!(log.exists());
        assert_eq!(result.status(), TaskStatus::Failure);
        let error = result.error().unwrap();
        assert_eq!(error.kind, FailureKind::Persistence);
        assert!(error.message.contains("read-only volume"));
        assert!(result.new_evidence().is_empty());
        assert!(result.saved_files().is_empty());
        assert!(result.is_closed());
    }

    #[test]
    fn output_tail_never_grows_past_the_cap() {
        let mut tail = OutputTail::default();
        let chunk = vec![b'a'; 10_000];
        for _ in 0..100 {
            tail.push(&chunk);
            assert!(tail.bytes.len() <= MAX_CAPTURE_BYTES);
        }
        tail.push(b"END");
        assert_eq!(tail.bytes.len(), MAX_CAPTURE_BYTES);
        assert!(tail.to_lossy_string().ends_with("aaEND"));

        tail.push(&vec![b'z'; MAX_CAPTURE_BYTES * 3]);
        assert_eq!(tail.to_lossy_string(), "z".repeat(MAX_CAPTURE_BYTES));
    }

    #[tokio::test]
    async fn reader_streams_into_a_bounded_tail() {
        let data = vec![b'x'; 4 * 1024 * 1024];
        let tail = SharedTail::default();
        read_into(&data[..], Arc::clone(&tail)).await;
        assert_eq!(lock_tail(&tail).bytes.len(), MAX_CAPTURE_BYTES);
    }

    #[tokio::test]
    async fn copy_storage_moves_saved_files() {
        let work = TempDir::new().unwrap();
        let durable = TempDir::new().unwrap();
        let task_dir = work.path().join("t1");
        std::fs::create_dir_all(&task_dir).unwrap();
        let log = task_dir.join("t1.log");
        let src = source();

        let engine = ExecutionEngine::new(
            StubRunner::succeeding().touching_logs(),
            Arc::new(CopyStorage::new(durable.path())),
        );
        let execution = Execution::new(
            vec!["tool".into(), log.display().to_string()],
            &src,
        )
        .save_file(log);
        let mut result = TaskResult::new("t1", "stat");
        engine.execute(execution, &mut result).await.unwrap();

        assert_eq!(result.status(), TaskStatus::Success);
        assert_eq!(result.saved_files(), &[durable.path().join("t1").join("t1.log")]);
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn sh(script: &str) -> Invocation {
            Invocation {
                command: vec!["sh".into(), "-c".into(), script.into()],
                stdout_path: None,
            }
        }

        #[tokio::test]
        async fn captures_exit_code_and_stderr() {
            let outcome = TokioProcessRunner::default()
                .run(&sh("echo out; echo oops >&2; exit 3"))
                .await;
            assert_eq!(
                outcome,
                ProcessOutcome::Exited {
                    code: Some(3),
                    stdout: "out\n".into(),
                    stderr: "oops\n".into(),
                }
            );
            assert!(!outcome.succeeded());
        }

        #[tokio::test]
        async fn redirects_stdout_to_file() {
            let tmp = TempDir::new().unwrap();
            let out = tmp.path().join("t1.stat");
            let mut inv = sh("echo hello");
            inv.stdout_path = Some(out.clone());

            let outcome = TokioProcessRunner::default().run(&inv).await;
            assert!(outcome.succeeded());
            assert_eq!(std::fs::read_to_string(out).unwrap(), "hello\n");
        }

        #[tokio::test]
        async fn times_out_long_running_tools() {
            let runner = TokioProcessRunner::new(Some(Duration::from_millis(100)));
            let outcome = runner.run(&sh("sleep 5")).await;
            assert_eq!(
                outcome,
                ProcessOutcome::TimedOut {
                    after: Duration::from_millis(100),
                    stderr: String::new(),
                }
            );
        }

        #[tokio::test]
        async fn timeout_kills_background_descendants() {
            let tmp = TempDir::new().unwrap();
            let beat = tmp.path().join("beat");
            let script = format!(
                "(while true; do echo x >> '{}'; sleep 0.05; done) & wait",
                beat.display()
            );
            let runner = TokioProcessRunner::new(Some(Duration::from_millis(300)));
            let outcome = runner.run(&sh(&script)).await;
            assert!(matches!(outcome, ProcessOutcome::TimedOut { .. }));

            let size = |p: &Path| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0);
            let before = size(&beat);
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert_eq!(size(&beat), before);
        }

        #[tokio::test]
        async fn large_output_keeps_only_the_tail() {
            let outcome = TokioProcessRunner::default()
                .run(&sh("head -c 1000000 /dev/zero | tr '\\0' a; printf END"))
                .await;
            let ProcessOutcome::Exited { code, stdout, .. } = outcome else {
                panic!("expected the tool to exit");
            };
            assert_eq!(code, Some(0));
            assert_eq!(stdout.len(), MAX_CAPTURE_BYTES);
            assert!(stdout.ends_with("aaaEND"));
        }

        #[tokio::test]
        async fn missing_program_is_a_spawn_failure() {
            let inv = Invocation {
                command: vec!["/definitely/not/a/tool_xyz".into()],
                stdout_path: None,
            };
            let outcome = TokioProcessRunner::default().run(&inv).await;
            assert!(matches!(outcome, ProcessOutcome::SpawnFailed { .. }));
        }

        #[tokio::test]
        async fn timeout_becomes_failure_result() {
            let src = source();
            let engine = ExecutionEngine::new(
                TokioProcessRunner::new(Some(Duration::from_millis(100))),
                Arc::new(InPlaceStorage),
            );
            let produced = Evidence::derived(EvidenceKind::ProcessedArtifact, "/o/t1.out".into(), &src, "t1");
            let execution = Execution::new(
                vec![
                    "sh".into(),
                    "-c".into(),
                    "echo 'fatal: cannot open volume' >&2; exec sleep 5".into(),
                ],
                &src,
            )
            .new_evidence(produced);
            let mut result = TaskResult::new("t1", "stat");
            engine.execute(execution, &mut result).await.unwrap();

            assert_eq!(result.status(), TaskStatus::Failure);
            assert!(result.is_closed());
            assert!(result.new_evidence().is_empty());
            let error = result.error().unwrap();
            assert!(error.message.contains("timed out"));
            assert_eq!(error.diagnostic.as_deref(), Some("fatal: cannot open volume"));
        }
    }

    #[test]
    fn empty_command_is_a_spawn_failure() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let outcome = rt.block_on(TokioProcessRunner::default().run(&Invocation {
            command: vec![],
            stdout_path: None,
        }));
        assert_eq!(
            outcome,
            ProcessOutcome::SpawnFailed {
                message: "empty command".into()
            }
        );
    }
}
