use std::path::Path;

use super::Task;
use crate::engine::Execution;
use crate::evidence::{Evidence, EvidenceKind};
use crate::jobs::JobKind;

/// Builds the tool invocation for `task` against `evidence` at `input`.
///
/// Every output path lives under the task's own output directory and is
/// named after the task id: `{output_dir}/{id}.{ext}` for the primary output,
/// `{output_dir}/{id}.log` for the tool's log.
///
/// Paths are rendered with `display`; callers check beforehand that they are
/// valid UTF-8.
pub(crate) fn build(task: &Task, evidence: &Evidence, input: &Path) -> Execution {
    let program = task.program().to_string();
    let input = input.display().to_string();
    match task.kind() {
        JobKind::Stat => {
            let stat_file = task.output_path("stat");
            Execution::new(vec![program, input], evidence)
                .stdout_to(stat_file.clone())
                .new_evidence(Evidence::derived(
                    EvidenceKind::ProcessedArtifact,
                    stat_file,
                    evidence,
                    task.id(),
                ))
        }
        JobKind::Plaso => {
            let plaso_file = task.output_path("plaso");
            let log_file = task.output_path("log");
            // TODO: take these flags from a per-case processing profile once
            // profiles exist in the config.
            let mut command: Vec<String> = [
                program.as_str(),
                "--status_view",
                "none",
                "--hashers",
                "all",
                "--partition",
                "all",
                "--vss_stores",
                "all",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();
            command.extend([
                "--logfile".to_string(),
                log_file.display().to_string(),
                plaso_file.display().to_string(),
                input,
            ]);
            Execution::new(command, evidence)
                .save_file(log_file)
                .new_evidence(Evidence::derived(
                    EvidenceKind::PlasoFile,
                    plaso_file,
                    evidence,
                    task.id(),
                ))
        }
        JobKind::Psort => {
            let csv_file = task.output_path("csv");
            let log_file = task.output_path("log");
            let command = vec![
                program,
                "--status_view".into(),
                "none".into(),
                "--logfile".into(),
                log_file.display().to_string(),
                "-o".into(),
                "dynamic".into(),
                "-w".into(),
                csv_file.display().to_string(),
                input,
            ];
            Execution::new(command, evidence)
                .save_file(log_file)
                .new_evidence(Evidence::derived(
                    EvidenceKind::PlasoCsvFile,
                    csv_file,
                    evidence,
                    task.id(),
                ))
        }
        JobKind::BulkExtractor => {
            // bulk_extractor refuses an existing output directory, so it gets
            // a fresh one inside the task directory.
            let feature_dir = task.output_path("bulk");
            let log_file = task.output_path("log");
            let command = vec![
                program,
                "-o".into(),
                feature_dir.display().to_string(),
                input,
            ];
            Execution::new(command, evidence)
                .stdout_to(log_file.clone())
                .save_file(log_file)
                .new_evidence(Evidence::derived(
                    EvidenceKind::BulkExtractorOutput,
                    feature_dir,
                    evidence,
                    task.id(),
                ))
        }
    }
}
