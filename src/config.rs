//! Configuração do casework carregada a partir de `casework.toml`.
//!
//! A struct [`CaseworkConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `CASEWORK_OUTPUT_DIR` tem precedência sobre o arquivo.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CaseworkError;
use crate::jobs::registry::DEFAULT_ENABLED_JOBS;
use crate::jobs::JobKind;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "casework.toml";

/// Variável de ambiente que sobrescreve `output_dir`.
pub const OUTPUT_DIR_ENV: &str = "CASEWORK_OUTPUT_DIR";

/// Configuração de nível superior carregada de `casework.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CaseworkConfig {
    /// Diretório onde cada task cria seu subdiretório `{output_dir}/{task_id}`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Armazenamento durável. Quando definido, os arquivos salvos são copiados para cá.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Tempo máximo de execução de uma ferramenta, em segundos (0 = sem limite).
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Número de tasks executadas em paralelo.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Quantos níveis de evidência derivada voltam ao pipeline.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Seleção de jobs e sobrescrita de prioridades.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Jobs habilitados, por nome.
    #[serde(default = "default_enabled_jobs")]
    pub enabled: Vec<String>,

    /// Prioridade por nome de job (0–100, menor = mais prioritário).
    #[serde(default)]
    pub priorities: BTreeMap<String, u8>,
}

/// Executáveis de cada ferramenta de análise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_stat")]
    pub stat: String,
    #[serde(default = "default_log2timeline")]
    pub log2timeline: String,
    #[serde(default = "default_psort")]
    pub psort: String,
    #[serde(default = "default_bulk_extractor")]
    pub bulk_extractor: String,
}

// Valor padrão para o diretório de saída: `<tmp>/casework`.
fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("casework")
}

// Valor padrão para o timeout: 1 hora.
fn default_task_timeout_secs() -> u64 {
    3600
}

// Valor padrão para tasks em paralelo: 4.
fn default_max_concurrent_tasks() -> usize {
    4
}

// Valor padrão para profundidade de encadeamento: 8.
fn default_max_chain_depth() -> usize {
    8
}

fn default_enabled_jobs() -> Vec<String> {
    DEFAULT_ENABLED_JOBS.iter().map(|s| s.to_string()).collect()
}

fn default_stat() -> String {
    JobKind::Stat.default_program().to_string()
}

fn default_log2timeline() -> String {
    JobKind::Plaso.default_program().to_string()
}

fn default_psort() -> String {
    JobKind::Psort.default_program().to_string()
}

fn default_bulk_extractor() -> String {
    JobKind::BulkExtractor.default_program().to_string()
}

impl Default for CaseworkConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            storage_dir: None,
            task_timeout_secs: default_task_timeout_secs(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_chain_depth: default_max_chain_depth(),
            jobs: JobsConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_jobs(),
            priorities: BTreeMap::new(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            stat: default_stat(),
            log2timeline: default_log2timeline(),
            psort: default_psort(),
            bulk_extractor: default_bulk_extractor(),
        }
    }
}

impl ToolsConfig {
    /// Executável configurado para o job.
    pub fn program(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Stat => &self.stat,
            JobKind::Plaso => &self.log2timeline,
            JobKind::Psort => &self.psort,
            JobKind::BulkExtractor => &self.bulk_extractor,
        }
    }
}

impl CaseworkConfig {
    /// Carrega a configuração de `casework.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let config = if path.exists() {
            Self::parse_file(path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Carrega a configuração de um arquivo explícito, que precisa existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        Ok(Self::parse_file(path)?.with_env_overrides())
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<CaseworkConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    // Variável de ambiente tem precedência sobre o arquivo de configuração.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(OUTPUT_DIR_ENV)
            && !dir.is_empty()
        {
            self.output_dir = PathBuf::from(dir);
        }
        self
    }

    /// Timeout por ferramenta; `None` quando desabilitado.
    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    /// Rejeita valores que impediriam o pipeline de progredir.
    pub fn validate(&self) -> Result<(), CaseworkError> {
        if self.max_concurrent_tasks == 0 {
            return Err(CaseworkError::Config(
                "max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(CaseworkError::Config("output_dir must not be empty".into()));
        }
        for (name, priority) in &self.jobs.priorities {
            if *priority > 100 {
                return Err(CaseworkError::Config(format!(
                    "priority for job {name} must be between 0 and 100, got {priority}"
                )));
            }
        }
        Ok(())
    }
}
