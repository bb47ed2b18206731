use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::CaseworkConfig;
use crate::engine::{ExecutionEngine, ProcessRunner};
use crate::error::{CaseworkError, ContractViolation};
use crate::evidence::{lineage_in, Evidence, EvidenceLedger};
use crate::jobs::{Job, JobRegistry};
use crate::task::{Task, TaskResult, TaskStatus};

/// Scheduling limits for one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Worker slots: tasks running at the same time.
    pub max_concurrent_tasks: usize,
    /// Derived evidence deeper than this many hops is recorded but not
    /// dispatched again.
    pub max_chain_depth: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            max_chain_depth: 8,
        }
    }
}

impl From<&CaseworkConfig> for PipelineOptions {
    fn from(config: &CaseworkConfig) -> Self {
        Self {
            max_concurrent_tasks: config.max_concurrent_tasks.max(1),
            max_chain_depth: config.max_chain_depth,
        }
    }
}

/// A problem the pipeline could not fold into a task result: a broken
/// contract or a task that panicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub task_id: Option<String>,
    pub job_name: Option<String>,
    pub message: String,
}

/// Everything a pipeline run produced. Only closed results are admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub results: Vec<TaskResult>,
    pub evidence: Vec<Evidence>,
    pub defects: Vec<Defect>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Counts for a one-line summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub defects: usize,
    pub evidence: usize,
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            evidence: Vec::new(),
            defects: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl PipelineReport {
    /// Admits a finished result. Open results and reused task ids are refused.
    pub fn accept(&mut self, result: TaskResult) -> Result<(), ContractViolation> {
        if !result.is_closed() {
            return Err(ContractViolation::ResultOpen {
                task_id: result.task_id().to_string(),
            });
        }
        if self.result_for(result.task_id()).is_some() {
            return Err(ContractViolation::DuplicateTaskId {
                task_id: result.task_id().to_string(),
            });
        }
        self.results.push(result);
        Ok(())
    }

    pub fn result_for(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.task_id() == task_id)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .iter()
            .filter(|r| r.status() == TaskStatus::Success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskResult> {
        self.results
            .iter()
            .filter(|r| r.status() == TaskStatus::Failure)
    }

    pub fn is_clean(&self) -> bool {
        self.defects.is_empty() && self.failed().next().is_none()
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            tasks: self.results.len(),
            succeeded: self.succeeded().count(),
            failed: self.failed().count(),
            defects: self.defects.len(),
            evidence: self.evidence.len(),
        }
    }

    /// Checks that every derived evidence is listed by the result of the
    /// task that produced it, and that every lineage ends at a root.
    pub fn verify_provenance(&self) -> Result<(), ContractViolation> {
        let by_id: HashMap<String, Evidence> = self
            .evidence
            .iter()
            .map(|e| (e.id.clone(), e.clone()))
            .collect();
        for evidence in &self.evidence {
            if let Some(task_id) = &evidence.produced_by_task_id {
                let listed = self
                    .result_for(task_id)
                    .is_some_and(|r| r.new_evidence().iter().any(|n| n.id == evidence.id));
                if !listed {
                    return Err(ContractViolation::BrokenLineage {
                        evidence_id: evidence.id.clone(),
                        reason: format!("not listed by the result of task {task_id}"),
                    });
                }
            }
            lineage_in(&by_id, &evidence.id)?;
        }
        Ok(())
    }

    /// Writes the report as pretty JSON to `{dir}/report.json`.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf, CaseworkError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("report.json");
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// A task waiting for a worker slot, ordered by job priority (lower first)
/// and then by submission order.
struct Pending {
    key: (Reverse<u8>, Reverse<u64>),
    task: Task,
    evidence: Evidence,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

struct TaskRun {
    task_id: String,
    job_name: &'static str,
    outcome: Result<TaskResult, ContractViolation>,
}

/// Drives evidence through the enabled jobs until no work is left.
pub struct Pipeline<R> {
    registry: JobRegistry,
    engine: Arc<ExecutionEngine<R>>,
    options: PipelineOptions,
}

impl<R: ProcessRunner + 'static> Pipeline<R> {
    pub fn new(registry: JobRegistry, engine: ExecutionEngine<R>, options: PipelineOptions) -> Self {
        Self {
            registry,
            engine: Arc::new(engine),
            options,
        }
    }

    pub async fn process(&self, roots: Vec<Evidence>) -> Result<PipelineReport, CaseworkError> {
        self.process_observed(roots, |_| {}).await
    }

    /// Processes `roots` and everything derived from them. `on_result` sees
    /// each closed result as it is admitted to the report.
    ///
    /// Task failures and contract violations inside tasks never abort the
    /// run; the latter are reported as [`Defect`]s. `Err` is only returned if
    /// the roots themselves cannot be recorded.
    pub async fn process_observed<F>(
        &self,
        roots: Vec<Evidence>,
        mut on_result: F,
    ) -> Result<PipelineReport, CaseworkError>
    where
        F: FnMut(&TaskResult),
    {
        let ledger = EvidenceLedger::new();
        ledger.record_all(roots.clone())?;

        let jobs = self.registry.list_jobs();
        let mut report = PipelineReport::default();
        let mut pending = BinaryHeap::new();
        let mut seen_tasks = HashSet::new();
        let mut seq = 0u64;

        info!(roots = roots.len(), jobs = jobs.len(), "pipeline started");
        for root in &roots {
            expand(&jobs, root, &mut pending, &mut seen_tasks, &mut seq, &mut report);
        }

        let mut running: JoinSet<TaskRun> = JoinSet::new();
        loop {
            while running.len() < self.options.max_concurrent_tasks.max(1) {
                let Some(next) = pending.pop() else { break };
                let engine = Arc::clone(&self.engine);
                running.spawn(run_one(next.task, next.evidence, engine));
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let run = match joined {
                Ok(run) => run,
                Err(e) => {
                    error!(error = %e, "task aborted");
                    report.defects.push(Defect {
                        task_id: None,
                        job_name: None,
                        message: format!("task aborted: {e}"),
                    });
                    continue;
                }
            };

            let result = match run.outcome {
                Ok(result) => result,
                Err(violation) => {
                    error!(task_id = %run.task_id, job = run.job_name, error = %violation, "contract violation");
                    report.defects.push(Defect {
                        task_id: Some(run.task_id),
                        job_name: Some(run.job_name.to_string()),
                        message: violation.to_string(),
                    });
                    continue;
                }
            };

            on_result(&result);
            for evidence in admit(&mut report, &ledger, run.job_name, result) {
                match ledger.depth(&evidence.id) {
                    Ok(depth) if depth <= self.options.max_chain_depth => {
                        expand(&jobs, &evidence, &mut pending, &mut seen_tasks, &mut seq, &mut report);
                    }
                    Ok(depth) => {
                        warn!(evidence_id = %evidence.id, depth, "chain depth limit reached, not dispatching");
                    }
                    Err(violation) => {
                        report.defects.push(Defect {
                            task_id: evidence.produced_by_task_id.clone(),
                            job_name: Some(run.job_name.to_string()),
                            message: violation.to_string(),
                        });
                    }
                }
            }
        }

        report.evidence = ledger.snapshot();
        report.finished_at = Some(Utc::now());
        let summary = report.summary();
        info!(
            tasks = summary.tasks,
            succeeded = summary.succeeded,
            failed = summary.failed,
            defects = summary.defects,
            evidence = summary.evidence,
            "pipeline finished"
        );
        Ok(report)
    }
}

/// Offers `evidence` to every job and queues the resulting tasks.
fn expand(
    jobs: &[Job],
    evidence: &Evidence,
    pending: &mut BinaryHeap<Pending>,
    seen_tasks: &mut HashSet<String>,
    seq: &mut u64,
    report: &mut PipelineReport,
) {
    if !evidence.is_usable() {
        report.defects.push(Defect {
            task_id: evidence.produced_by_task_id.clone(),
            job_name: None,
            message: format!("evidence {} is not usable as input", evidence.id),
        });
        return;
    }
    for job in jobs {
        let tasks = match job.create_tasks(evidence) {
            Ok(tasks) => tasks,
            Err(violation) => {
                report.defects.push(Defect {
                    task_id: None,
                    job_name: Some(job.name().to_string()),
                    message: violation.to_string(),
                });
                continue;
            }
        };
        for task in tasks {
            if !seen_tasks.insert(task.id().to_string()) {
                report.defects.push(Defect {
                    task_id: Some(task.id().to_string()),
                    job_name: Some(job.name().to_string()),
                    message: ContractViolation::DuplicateTaskId {
                        task_id: task.id().to_string(),
                    }
                    .to_string(),
                });
                continue;
            }
            *seq += 1;
            pending.push(Pending {
                key: (Reverse(job.priority()), Reverse(*seq)),
                task,
                evidence: evidence.clone(),
            });
        }
    }
}

/// Admits a closed result to the report and only then records its evidence
/// in the ledger. Returns the evidence to offer to the jobs again; nothing
/// when either step refuses.
fn admit(
    report: &mut PipelineReport,
    ledger: &EvidenceLedger,
    job_name: &str,
    result: TaskResult,
) -> Vec<Evidence> {
    let task_id = result.task_id().to_string();
    let produced = result.new_evidence().to_vec();
    let admitted = report
        .accept(result)
        .and_then(|()| ledger.record_all(produced.clone()));
    match admitted {
        Ok(()) => produced,
        Err(violation) => {
            error!(task_id = %task_id, job = job_name, error = %violation, "result refused");
            report.defects.push(Defect {
                task_id: Some(task_id),
                job_name: Some(job_name.to_string()),
                message: violation.to_string(),
            });
            Vec::new()
        }
    }
}

/// One worker slot: runs the task to a closed result.
async fn run_one<R: ProcessRunner>(
    mut task: Task,
    evidence: Evidence,
    engine: Arc<ExecutionEngine<R>>,
) -> TaskRun {
    let task_id = task.id().to_string();
    let job_name = task.job_name();
    let result = task.new_result();
    let outcome = task.run(&evidence, result, &engine).await;
    TaskRun {
        task_id,
        job_name,
        outcome,
    }
}
