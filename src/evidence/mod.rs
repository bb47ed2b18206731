//! Evidence descriptors and the provenance ledger.
//!
//! An [`Evidence`] is either a root artifact handed to the pipeline from
//! outside, or a derived artifact produced by a task. Derived evidence is
//! only constructible through [`Evidence::derived`], which fills in both
//! lineage links and the local path at once.

mod ledger;

pub use ledger::EvidenceLedger;
pub(crate) use ledger::lineage_in;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of artifact an [`Evidence`] describes. Jobs declare which kinds
/// they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// A raw disk or partition image.
    RawDisk,
    /// A single file pulled out of a larger artifact.
    ExtractedArtifact,
    /// A plaso storage file written by log2timeline.
    PlasoFile,
    /// A CSV timeline exported from a plaso storage file.
    PlasoCsvFile,
    /// A bulk_extractor feature directory.
    BulkExtractorOutput,
    /// Any other processed output with no dedicated consumer.
    ProcessedArtifact,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvidenceKind::RawDisk => "RawDisk",
            EvidenceKind::ExtractedArtifact => "ExtractedArtifact",
            EvidenceKind::PlasoFile => "PlasoFile",
            EvidenceKind::PlasoCsvFile => "PlasoCsvFile",
            EvidenceKind::BulkExtractorOutput => "BulkExtractorOutput",
            EvidenceKind::ProcessedArtifact => "ProcessedArtifact",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub kind: EvidenceKind,
    pub local_path: Option<PathBuf>,
    pub source_evidence_id: Option<String>,
    pub produced_by_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Root evidence supplied from outside the pipeline.
    pub fn root(kind: EvidenceKind, local_path: Option<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4().simple().to_string(), kind, local_path)
    }

    /// Root evidence with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, kind: EvidenceKind, local_path: Option<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind,
            local_path,
            source_evidence_id: None,
            produced_by_task_id: None,
            created_at: Utc::now(),
        }
    }

    /// Evidence produced by task `task_id` while processing `source`.
    pub fn derived(
        kind: EvidenceKind,
        local_path: PathBuf,
        source: &Evidence,
        task_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            kind,
            local_path: Some(local_path),
            source_evidence_id: Some(source.id.clone()),
            produced_by_task_id: Some(task_id.to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.source_evidence_id.is_none() && self.produced_by_task_id.is_none()
    }

    pub fn path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// Whether this evidence can be handed to a job: it must have bytes on
    /// disk, and derived evidence must carry both lineage links.
    pub fn is_usable(&self) -> bool {
        if self.local_path.is_none() {
            return false;
        }
        self.is_root()
            || (self.source_evidence_id.is_some() && self.produced_by_task_id.is_some())
    }

    /// Whether this evidence was produced by `task_id` out of `source_id`.
    pub fn descends_from(&self, source_id: &str, task_id: &str) -> bool {
        self.source_evidence_id.as_deref() == Some(source_id)
            && self.produced_by_task_id.as_deref() == Some(task_id)
    }
}
