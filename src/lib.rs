//! Evidence processing pipeline for forensic cases.
//!
//! Evidence goes in, every enabled job that accepts its kind runs an external
//! tool against it, and whatever the tools produce is recorded with its
//! lineage and fed back in.

pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod jobs;
pub mod orchestrator;
pub mod storage;
pub mod task;

pub use config::CaseworkConfig;
pub use engine::{ExecutionEngine, ProcessRunner, TokioProcessRunner};
pub use error::{CaseworkError, ContractViolation, FailureKind};
pub use evidence::{Evidence, EvidenceKind, EvidenceLedger};
pub use jobs::{Job, JobContext, JobKind, JobRegistry};
pub use orchestrator::{Pipeline, PipelineOptions, PipelineReport};
pub use task::{Task, TaskResult, TaskStatus};
