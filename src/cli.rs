//! Interface de linha de comando do casework baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (process, jobs)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use casework::EvidenceKind;
use clap::{Parser, Subcommand, ValueEnum};

/// casework: processa evidências forenses com ferramentas externas.
#[derive(Debug, Parser)]
#[command(name = "casework", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: `casework.toml` no diretório atual).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Tipo da evidência raiz aceito pela CLI, mapeado para [`EvidenceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EvidenceArg {
    /// Imagem de disco bruta.
    RawDisk,
    /// Arquivo extraído de uma imagem.
    ExtractedArtifact,
    /// Storage file do plaso já existente.
    PlasoFile,
}

impl From<EvidenceArg> for EvidenceKind {
    fn from(arg: EvidenceArg) -> Self {
        match arg {
            EvidenceArg::RawDisk => EvidenceKind::RawDisk,
            EvidenceArg::ExtractedArtifact => EvidenceKind::ExtractedArtifact,
            EvidenceArg::PlasoFile => EvidenceKind::PlasoFile,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processa uma evidência e tudo o que for derivado dela.
    Process {
        /// Caminho da evidência.
        path: PathBuf,

        /// Tipo da evidência.
        #[arg(long, value_enum, default_value_t = EvidenceArg::RawDisk)]
        kind: EvidenceArg,

        /// Jobs a executar (repetível). Substitui a lista da configuração.
        #[arg(long = "job")]
        jobs: Vec<String>,

        /// Timeout por ferramenta, em segundos (0 = sem limite).
        #[arg(long)]
        timeout: Option<u64>,

        /// Número máximo de tasks em paralelo.
        #[arg(long)]
        max_tasks: Option<usize>,

        /// Diretório de saída.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Imprime o relatório em JSON no stdout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Lista os jobs disponíveis e os habilitados.
    Jobs,
}
