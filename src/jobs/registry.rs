use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use super::{Job, JobKind};
use crate::config::{CaseworkConfig, ToolsConfig};
use crate::error::CaseworkError;

/// What every job factory needs to build a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub output_root: PathBuf,
    pub tools: ToolsConfig,
}

impl JobContext {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            tools: ToolsConfig::default(),
        }
    }

    fn job(&self, kind: JobKind) -> Job {
        Job::new(kind, self.tools.program(kind), &self.output_root)
    }
}

type JobFactory = fn(&JobContext) -> Job;

fn stat_job(ctx: &JobContext) -> Job {
    ctx.job(JobKind::Stat)
}

fn plaso_job(ctx: &JobContext) -> Job {
    ctx.job(JobKind::Plaso)
}

fn psort_job(ctx: &JobContext) -> Job {
    ctx.job(JobKind::Psort)
}

fn bulk_extractor_job(ctx: &JobContext) -> Job {
    ctx.job(JobKind::BulkExtractor)
}

/// Every job this build knows how to construct, by name.
const BUILTIN_JOBS: &[(&str, JobFactory)] = &[
    ("stat", stat_job),
    ("plaso", plaso_job),
    ("psort", psort_job),
    ("bulk_extractor", bulk_extractor_job),
];

/// Jobs enabled when the configuration does not say otherwise.
pub const DEFAULT_ENABLED_JOBS: &[&str] = &["stat", "plaso", "psort"];

/// The set of jobs available to one pipeline run.
///
/// Names are resolved against a fixed table when the registry is built, so
/// an unknown name is a configuration error and [`list_jobs`] cannot fail.
///
/// [`list_jobs`]: JobRegistry::list_jobs
#[derive(Debug, Clone)]
pub struct JobRegistry {
    context: JobContext,
    enabled: Vec<(&'static str, JobFactory)>,
    priorities: BTreeMap<String, u8>,
}

impl JobRegistry {
    /// Names of every job that can be enabled.
    pub fn available() -> impl Iterator<Item = &'static str> {
        BUILTIN_JOBS.iter().map(|(name, _)| *name)
    }

    /// The default job set.
    pub fn builtin(context: JobContext) -> Self {
        let enabled = BUILTIN_JOBS
            .iter()
            .filter(|(name, _)| DEFAULT_ENABLED_JOBS.contains(name))
            .copied()
            .collect();
        Self {
            context,
            enabled,
            priorities: BTreeMap::new(),
        }
    }

    /// A registry holding exactly `names`, in order. Duplicates are ignored.
    pub fn with_jobs(names: &[String], context: JobContext) -> Result<Self, CaseworkError> {
        let mut enabled: Vec<(&'static str, JobFactory)> = Vec::with_capacity(names.len());
        for name in names {
            let entry = BUILTIN_JOBS
                .iter()
                .find(|(known, _)| known == name)
                .ok_or_else(|| CaseworkError::UnknownJob(name.clone()))?;
            if !enabled.iter().any(|(n, _)| n == &entry.0) {
                enabled.push(*entry);
            }
        }
        Ok(Self {
            context,
            enabled,
            priorities: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &CaseworkConfig) -> Result<Self, CaseworkError> {
        let context = JobContext {
            output_root: config.output_dir.clone(),
            tools: config.tools.clone(),
        };
        let mut registry = Self::with_jobs(&config.jobs.enabled, context)?;
        for (name, priority) in &config.jobs.priorities {
            registry = registry.with_priority(name, *priority)?;
        }
        debug!(jobs = ?registry.job_names(), "job registry built");
        Ok(registry)
    }

    /// Overrides the priority of job `name`.
    pub fn with_priority(mut self, name: &str, priority: u8) -> Result<Self, CaseworkError> {
        if !Self::available().any(|known| known == name) {
            return Err(CaseworkError::UnknownJob(name.to_string()));
        }
        if priority > super::DEFAULT_PRIORITY {
            return Err(CaseworkError::Config(format!(
                "priority for job {name} must be between 0 and 100, got {priority}"
            )));
        }
        self.priorities.insert(name.to_string(), priority);
        Ok(self)
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.enabled.iter().map(|(name, _)| *name).collect()
    }

    /// Freshly constructed jobs, one per enabled name.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.enabled
            .iter()
            .map(|(name, factory)| {
                let job = factory(&self.context);
                match self.priorities.get(*name) {
                    Some(priority) => job.with_priority(*priority),
                    None => job,
                }
            })
            .collect()
    }
}
