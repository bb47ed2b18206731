//! Jobs decide what work a piece of evidence needs.
//!
//! A [`Job`] never runs anything: [`Job::create_tasks`] only builds
//! [`Task`]s for evidence whose kind the job accepts.

pub mod registry;

pub use registry::{JobContext, JobRegistry};

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ContractViolation;
use crate::evidence::{Evidence, EvidenceKind};
use crate::task::Task;

/// Lowest scheduling preference; also the default.
pub const DEFAULT_PRIORITY: u8 = 100;

/// The built-in analysis jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Records file metadata with `stat`.
    Stat,
    /// Builds a plaso storage file with log2timeline.
    Plaso,
    /// Exports a plaso storage file to a CSV timeline with psort.
    Psort,
    /// Carves features out of a disk image with bulk_extractor.
    BulkExtractor,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Stat,
        JobKind::Plaso,
        JobKind::Psort,
        JobKind::BulkExtractor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JobKind::Stat => "stat",
            JobKind::Plaso => "plaso",
            JobKind::Psort => "psort",
            JobKind::BulkExtractor => "bulk_extractor",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Evidence kinds this job creates tasks for.
    pub fn accepts(self) -> &'static [EvidenceKind] {
        match self {
            JobKind::Stat => &[EvidenceKind::RawDisk, EvidenceKind::ExtractedArtifact],
            JobKind::Plaso => &[EvidenceKind::RawDisk, EvidenceKind::ExtractedArtifact],
            JobKind::Psort => &[EvidenceKind::PlasoFile],
            JobKind::BulkExtractor => &[EvidenceKind::RawDisk],
        }
    }

    pub fn default_program(self) -> &'static str {
        match self {
            JobKind::Stat => "stat",
            JobKind::Plaso => "log2timeline.py",
            JobKind::Psort => "psort.py",
            JobKind::BulkExtractor => "bulk_extractor",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    kind: JobKind,
    priority: u8,
    program: String,
    output_root: PathBuf,
}

impl Job {
    pub fn new(kind: JobKind, program: impl Into<String>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            kind,
            priority: DEFAULT_PRIORITY,
            program: program.into(),
            output_root: output_root.into(),
        }
    }

    /// Sets the scheduling priority, clamped to 0–100 (lower runs first).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(DEFAULT_PRIORITY);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &'static str {
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

    pub fn output_root(&self) -> &std::path::Path {
        &self.output_root
    }

    pub fn accepts(&self, kind: EvidenceKind) -> bool {
        self.kind.accepts().contains(&kind)
    }

    /// Builds the tasks `evidence` needs from this job: one task for an
    /// accepted kind, none otherwise. Accepted evidence without a local path
    /// is malformed.
    pub fn create_tasks(&self, evidence: &Evidence) -> Result<Vec<Task>, ContractViolation> {
        if !self.accepts(evidence.kind) {
            debug!(job = %self.kind, evidence_id = %evidence.id, kind = %evidence.kind, "evidence not accepted");
            return Ok(Vec::new());
        }
        if evidence.local_path.is_none() {
            return Err(ContractViolation::MissingLocalPath {
                evidence_id: evidence.id.clone(),
            });
        }
        Ok(vec![Task::new(self, evidence)])
    }
}
