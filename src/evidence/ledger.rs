use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::Evidence;
use crate::error::ContractViolation;

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    by_id: HashMap<String, Evidence>,
}

/// The pipeline's authoritative evidence set.
///
/// Concurrently finishing tasks append here, one append at a time. A derived
/// evidence is only accepted once its source is already recorded, so the
/// provenance graph stays a forest.
#[derive(Debug, Default)]
pub struct EvidenceLedger {
    inner: Mutex<Inner>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a single piece of evidence.
    pub fn record(&self, evidence: Evidence) -> Result<(), ContractViolation> {
        self.record_all(vec![evidence])
    }

    /// Records a batch under one lock. Either the whole batch is accepted or
    /// nothing is.
    pub fn record_all(&self, batch: Vec<Evidence>) -> Result<(), ContractViolation> {
        let mut inner = self.lock();
        for (i, evidence) in batch.iter().enumerate() {
            let duplicate = inner.by_id.contains_key(&evidence.id)
                || batch[..i].iter().any(|e| e.id == evidence.id);
            if duplicate {
                return Err(ContractViolation::BrokenLineage {
                    evidence_id: evidence.id.clone(),
                    reason: "id already recorded".into(),
                });
            }
            if let Some(source) = &evidence.source_evidence_id {
                let known = inner.by_id.contains_key(source)
                    || batch[..i].iter().any(|e| &e.id == source);
                if !known {
                    return Err(ContractViolation::BrokenLineage {
                        evidence_id: evidence.id.clone(),
                        reason: format!("source {source} is not recorded"),
                    });
                }
            }
            let half_linked =
                evidence.source_evidence_id.is_none() != evidence.produced_by_task_id.is_none();
            if half_linked {
                return Err(ContractViolation::BrokenLineage {
                    evidence_id: evidence.id.clone(),
                    reason: "derived evidence is missing a lineage link".into(),
                });
            }
        }
        for evidence in batch {
            debug!(evidence_id = %evidence.id, kind = %evidence.kind, "evidence recorded");
            inner.order.push(evidence.id.clone());
            inner.by_id.insert(evidence.id.clone(), evidence);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All recorded evidence in the order it was recorded.
    pub fn snapshot(&self) -> Vec<Evidence> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// The chain from `id` back to its root, starting with `id` itself.
    pub fn lineage(&self, id: &str) -> Result<Vec<Evidence>, ContractViolation> {
        let inner = self.lock();
        lineage_in(&inner.by_id, id)
    }

    /// Number of derivation hops between `id` and its root.
    pub fn depth(&self, id: &str) -> Result<usize, ContractViolation> {
        Ok(self.lineage(id)?.len().saturating_sub(1))
    }
}

/// Walks source links from `id` to a root. The walk is bounded by the number
/// of known evidence, so a cycle is reported instead of looping.
pub(crate) fn lineage_in(
    by_id: &HashMap<String, Evidence>,
    id: &str,
) -> Result<Vec<Evidence>, ContractViolation> {
    let mut chain = Vec::new();
    let mut current = id.to_string();
    loop {
        let Some(evidence) = by_id.get(&current) else {
            return Err(ContractViolation::BrokenLineage {
                evidence_id: id.to_string(),
                reason: format!("{current} is not recorded"),
            });
        };
        chain.push(evidence.clone());
        if chain.len() > by_id.len() {
            return Err(ContractViolation::BrokenLineage {
                evidence_id: id.to_string(),
                reason: "cycle in source links".into(),
            });
        }
        match &evidence.source_evidence_id {
            Some(source) => current = source.clone(),
            None => return Ok(chain),
        }
    }
}
