use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use aegis_core::provider::{LlmProvider, StreamOptions};
use aegis_engine::{
    AuditConfig, AuditLoop, BatchAuditor, DotRenderer, GraphMutationService, NodeAnalyzer,
    VerificationGate,
};
use aegis_llm::{OpenAiConfig, OpenAiProvider, ReliableConfig, ReliableProvider};
use aegis_settings::AegisSettings;
use aegis_store::{AuditEventRepo, Database, RecordRepo, SourceIndex};
use aegis_telemetry::TelemetryConfig;

#[derive(Parser, Debug)]
#[command(name = "aegis", version, about = "Verify candidate attack paths with LLM-guided call-graph auditing")]
struct Cli {
    /// Settings file (defaults to ~/.aegis/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Database file, overriding `storage.databasePath`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import attack-path records from a JSON file.
    ImportRecords { file: PathBuf },
    /// Import a function-body and call-site index from a JSON file.
    ImportIndex { file: PathBuf },
    /// Audit one record, or every pending record.
    Audit {
        #[arg(long)]
        key: Option<String>,
    },
    /// Show which records are concluded and their verdicts.
    Status,
    /// Export the latest revision of every record to a JSON file.
    Export { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_file = cli.settings.clone().unwrap_or_else(aegis_settings::settings_path);
    let settings = aegis_settings::load_settings_from_path(&settings_file)
        .with_context(|| format!("loading settings from {}", settings_file.display()))?;

    let _telemetry = aegis_telemetry::init_telemetry(telemetry_config(&settings));

    let db_path = cli.db.clone().unwrap_or_else(|| settings.storage.database_path.clone());
    let db = open_database(&db_path)?;
    info!(path = %db_path.display(), "database opened");

    match cli.command {
        Command::ImportRecords { file } => {
            let summary = RecordRepo::new(db)
                .import_json(&file)
                .with_context(|| format!("importing records from {}", file.display()))?;
            println!(
                "imported {} records ({} already concluded, {} seeded with sink findings)",
                summary.imported, summary.kept_concluded, summary.seeded_sinks
            );
        }
        Command::ImportIndex { file } => {
            let (functions, calls) = SourceIndex::new(db)
                .import_json(&file)
                .with_context(|| format!("importing source index from {}", file.display()))?;
            println!("indexed {functions} functions and {calls} call sites");
        }
        Command::Status => print_status(&RecordRepo::new(db))?,
        Command::Export { file } => {
            let written = RecordRepo::new(db)
                .export_json(&file)
                .with_context(|| format!("exporting records to {}", file.display()))?;
            println!("exported {written} records to {}", file.display());
        }
        Command::Audit { key } => run_audit(&settings, db, key).await?,
    }
    Ok(())
}

async fn run_audit(settings: &AegisSettings, db: Database, key: Option<String>) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing running sessions");
            on_signal.cancel();
        }
    });

    let reasoning = &settings.reasoning;
    let instruct = provider(settings, &reasoning.instruct_model, &cancel)?;
    let think = provider(settings, &reasoning.think_model, &cancel)?;
    let verifier = provider(settings, reasoning.verifier(), &cancel)?;
    let options = StreamOptions {
        max_tokens: Some(reasoning.max_tokens),
        temperature: Some(f64::from(reasoning.temperature)),
    };

    let audit = &settings.audit;
    let analyzer = NodeAnalyzer::new(instruct.clone(), think.clone(), options.clone())
        .with_max_key_code_lines(audit.max_key_code_lines);
    let service = GraphMutationService::new(
        Arc::new(SourceIndex::new(db.clone())),
        Arc::new(analyzer),
        Arc::new(DotRenderer::new(settings.render.dot_binary.clone())),
    )
    .with_max_inspect_bytes(audit.max_inspect_bytes);
    let audit_loop = AuditLoop::new(
        instruct,
        think,
        VerificationGate::new(verifier, options.clone()),
        service,
        AuditConfig {
            max_steps: audit.max_steps,
            annotate_on_start: audit.annotate_on_start,
            stream_options: options,
        },
    )
    .with_events(AuditEventRepo::new(db.clone()));

    let output_dir = settings.render.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating render directory {}", output_dir.display()))?;
    let batch = BatchAuditor::new(Arc::new(audit_loop), Arc::new(RecordRepo::new(db)), output_dir)
        .with_max_concurrent(audit.max_concurrent_sessions);

    match key {
        Some(key) => {
            let outcome = batch
                .run_one(&key)
                .await
                .with_context(|| format!("auditing {key}"))?;
            println!(
                "{key}: {} after {} steps",
                verdict_label(outcome.verdict.is_vulnerable),
                outcome.steps
            );
        }
        None => {
            let summary = batch.run_pending(cancel).await?;
            println!(
                "concluded {} ({} vulnerable), failed {}, skipped {}",
                summary.concluded, summary.vulnerable, summary.failed, summary.skipped
            );
        }
    }
    Ok(())
}

fn provider(settings: &AegisSettings, model: &str, cancel: &CancellationToken) -> Result<Arc<dyn LlmProvider>> {
    let reasoning = &settings.reasoning;
    let inner = OpenAiProvider::new(OpenAiConfig {
        base_url: reasoning.base_url.clone(),
        api_key: reasoning.api_key.clone().map(SecretString::from),
        model: model.to_string(),
        request_timeout: Duration::from_secs(reasoning.request_timeout_secs),
    })
    .with_context(|| format!("building client for {model}"))?;

    let retry = &settings.retry;
    let config = ReliableConfig {
        max_retries: retry.max_retries,
        base_delay: Duration::from_millis(retry.base_delay_ms),
        max_delay: Duration::from_millis(retry.max_delay_ms),
        circuit_breaker_threshold: retry.circuit_breaker_threshold,
        circuit_breaker_cooldown: Duration::from_secs(retry.circuit_breaker_cooldown_secs),
        ..ReliableConfig::default()
    };
    Ok(Arc::new(ReliableProvider::new(inner, config).with_cancellation(cancel.clone())))
}

fn print_status(records: &RecordRepo) -> Result<()> {
    let rows = records.status()?;
    let concluded = rows.iter().filter(|r| r.conclusion.is_some()).count();
    println!("{} records: {concluded} concluded, {} pending", rows.len(), rows.len() - concluded);
    for row in rows {
        let verdict = match row.conclusion {
            Some(c) => verdict_label(c.is_vulnerable),
            None => "pending",
        };
        println!("  {:<60} edges={:<3} rev={:<3} {verdict}", row.key, row.edge_count, row.revision);
    }
    Ok(())
}

fn verdict_label(is_vulnerable: bool) -> &'static str {
    if is_vulnerable { "vulnerable" } else { "not vulnerable" }
}

fn telemetry_config(settings: &AegisSettings) -> TelemetryConfig {
    let logging = &settings.logging;
    TelemetryConfig {
        log_level: logging.level.parse::<Level>().unwrap_or(Level::INFO),
        json: logging.json,
        log_to_sqlite: logging.log_to_sqlite,
        log_db_path: logging.log_db_path.clone(),
        ..TelemetryConfig::default()
    }
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    Database::open(path).with_context(|| format!("opening database {}", path.display()))
}
