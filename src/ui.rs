//! Interface de terminal do casework: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner de progresso e `console` para as cores.
//! O [`PipelineProgress`] acompanha a execução do pipeline no terminal.

use std::path::Path;

use casework::orchestrator::PipelineReport;
use casework::task::{TaskResult, TaskStatus};
use casework::JobRegistry;
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

/// Linhas de log mostradas para cada task que falhou.
const FAILURE_LOG_LINES: usize = 5;

/// Indicador visual de progresso para uma execução do pipeline.
///
/// Exibe um spinner durante o processamento e uma linha colorida por task:
/// sucesso (verde), falha (vermelho) e defeitos (amarelo).
pub struct PipelineProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    finished: usize,
}

impl PipelineProgress {
    /// Inicia o spinner. Com `quiet` nada é desenhado.
    pub fn start(evidence: &Path, quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Processing {}", evidence.display()));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            finished: 0,
        }
    }

    /// Registra uma task concluída acima do spinner.
    pub fn task_finished(&mut self, result: &TaskResult) {
        self.finished += 1;
        let elapsed = result
            .duration_ms()
            .map(|ms| format!(" ({ms} ms)"))
            .unwrap_or_default();
        match result.status() {
            TaskStatus::Success => self.pb.println(format!(
                "  {} {} {}{elapsed}",
                self.green.apply_to("✓"),
                result.job_name(),
                result.task_id()
            )),
            _ => {
                let reason = result
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no error recorded".into());
                self.pb.println(format!(
                    "  {} {} {}: {reason}",
                    self.red.apply_to("✗"),
                    result.job_name(),
                    result.task_id()
                ));
            }
        }
        self.pb.set_message(format!("{} tasks finished", self.finished));
    }

    /// Finaliza o spinner e imprime o resumo da execução.
    pub fn finish(&self, report: &PipelineReport, report_path: &Path) {
        self.pb.finish_and_clear();
        if self.pb.is_hidden() {
            return;
        }
        let summary = report.summary();
        let style = if report.is_clean() { &self.green } else { &self.red };
        println!();
        println!(
            "{}",
            style.apply_to(format!(
                "{} tasks: {} succeeded, {} failed; {} evidence",
                summary.tasks, summary.succeeded, summary.failed, summary.evidence
            ))
        );
        for result in report.failed() {
            if let Some(text) = result.failure_report(FAILURE_LOG_LINES) {
                println!("{}", self.red.apply_to(text));
            }
        }
        for defect in &report.defects {
            println!("  {} {}", self.yellow.apply_to("!"), defect.message);
        }
        println!("Report written to {}", report_path.display());
    }
}

/// Imprime os jobs disponíveis, marcando os habilitados.
pub fn print_jobs(registry: &JobRegistry) {
    let green = Style::new().green().bold();
    let enabled = registry.job_names();
    let jobs = registry.list_jobs();
    for name in JobRegistry::available() {
        match jobs.iter().find(|j| j.name() == name) {
            Some(job) => println!(
                "{} {name:<16} priority {:>3}  {}",
                green.apply_to("*"),
                job.priority(),
                job.program()
            ),
            None => println!("  {name}"),
        }
    }
    println!();
    println!("{} of {} jobs enabled", enabled.len(), JobRegistry::available().count());
}
