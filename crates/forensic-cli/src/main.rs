//! `forensic`: run evidence case files through the verdict pipeline.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use forensic_core::{assess, schema_value, CaseFileDocument, CriticReport, EvidenceCaseFile, ForensicVerdict};
use forensic_runtime::{Backends, ForensicValidator, RuntimeConfig, ServiceError};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "FORENSIC_LOG";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML runtime configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate case files through auditor and judge
    Validate {
        /// Case files (JSON or YAML)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run inbound validation and deterministic checks only
    Check {
        /// Case file (JSON or YAML)
        file: PathBuf,
    },
    /// Print the JSON Schema of a document type
    Schema {
        #[arg(value_enum)]
        kind: SchemaKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaKind {
    Case,
    Critic,
    Verdict,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("forensic=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_document(doc: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(doc).context("Failed to render output document")?;
    println!("{text}");
    Ok(())
}

/// Inbound rejection document, tagged with the offending file.
fn rejection(path: &Path, err: forensic_core::CaseError) -> Value {
    let mut doc = ServiceError::from(err).to_document();
    if let Value::Object(map) = &mut doc {
        map.insert("file".to_string(), Value::String(path.display().to_string()));
    }
    doc
}

async fn validate(config_path: Option<&Path>, files: &[PathBuf]) -> Result<ExitCode> {
    let config = RuntimeConfig::load(config_path).context("Failed to load configuration")?;
    let backends = Backends::from_config(&config).context("Failed to set up model backends")?;
    let validator = ForensicValidator::from_backends(&backends, &config);

    let mut failed = false;
    let mut cases = Vec::with_capacity(files.len());
    for path in files {
        match EvidenceCaseFile::from_file(path) {
            Ok(case) => cases.push(case),
            Err(err) => {
                warn!(file = %path.display(), error = %err, "Skipping invalid case file");
                print_document(&rejection(path, err))?;
                failed = true;
            }
        }
    }

    info!(cases = cases.len(), "Validating case files");
    let results = validator.validate_many(&cases).await;
    backends.shutdown().await;

    for result in &results {
        failed |= !result.success();
        print_document(&result.to_document())?;
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn check(path: &Path) -> Result<ExitCode> {
    match EvidenceCaseFile::from_file(path) {
        Ok(case) => {
            let assessment = assess(&case);
            let doc = serde_json::to_value(&assessment).context("Failed to render assessment")?;
            print_document(&doc)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_document(&rejection(path, err))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn schema(kind: SchemaKind) -> Result<ExitCode> {
    let doc = match kind {
        SchemaKind::Case => schema_value::<CaseFileDocument>(),
        SchemaKind::Critic => schema_value::<CriticReport>(),
        SchemaKind::Verdict => schema_value::<ForensicVerdict>(),
    };
    print_document(&doc)?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { files } => validate(cli.config.as_deref(), &files).await,
        Commands::Check { file } => check(&file),
        Commands::Schema { kind } => schema(kind),
    }
}
