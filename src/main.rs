use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use evidencemap::config::{self, Config};
use evidencemap::db::Db;
use evidencemap::extractor::anthropic::AnthropicExtractor;
use evidencemap::matching::gaps::analyse_gaps;
use evidencemap::matching::{Control, ReviewStatus, ReviewedMatch};
use evidencemap::pipeline::Pipeline;
use evidencemap::pipeline::progress::{ProgressEvent, ProgressReporter};
use evidencemap::pipeline::service::{DocumentStatus, EvidenceService, Upload};
use evidencemap::server;
use evidencemap::storage::FsObjectStore;
use evidencemap::storage::text::{PlainTextExtractor, mime_for_path};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "evidencemap",
    version,
    about = "Map documents to audit questions as reviewable evidence"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse documents against a control; events are printed as JSON lines
    Analyse {
        /// Control definition (JSON with id, title, questions)
        #[arg(long)]
        control: PathBuf,
        /// Declared evidence type of the documents (policy, record, register, ...)
        #[arg(long)]
        evidence_type: Option<String>,
        /// Files or glob patterns
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Analyse a stored document again
    Reanalyse {
        #[arg(long)]
        control: PathBuf,
        document_id: i64,
    },
    /// Print the evidence gap report of a control
    Gaps {
        #[arg(long)]
        control: PathBuf,
    },
    /// Accept or dismiss a suggested match
    Review { match_id: i64, decision: Decision },
    /// List stored documents
    Documents,
    /// Serve the HTTP API
    Serve {
        /// Address to bind, overriding the configuration
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Decision {
    Accept,
    Dismiss,
}

impl From<Decision> for ReviewStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Accept => ReviewStatus::Accepted,
            Decision::Dismiss => ReviewStatus::Dismissed,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Analyse {
            control,
            evidence_type,
            files,
        } => analyse(&config, &control, evidence_type, &files).await,
        Command::Reanalyse {
            control,
            document_id,
        } => reanalyse(&config, &control, document_id).await,
        Command::Gaps { control } => gaps(&config, &control),
        Command::Review { match_id, decision } => {
            let mut db = open_db(&config)?;
            if !db.set_review_status(match_id, decision.into())? {
                bail!("no active match with id {match_id}");
            }
            info!(match_id, "Review recorded");
            Ok(())
        }
        Command::Documents => {
            let db = open_db(&config)?;
            let mut out = std::io::stdout().lock();
            for doc in db.list_documents()? {
                writeln!(out, "{}", serde_json::to_string(&doc)?)?;
            }
            Ok(())
        }
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let service = build_service(&config, None)?;
            server::serve(&bind, service).await
        }
    }
}

// ── Setup ────────────────────────────────────────────────────────────

fn open_db(config: &Config) -> Result<Db> {
    Db::open(&config.db_path).with_context(|| format!("failed to open database {}", config.db_path))
}

fn build_service(
    config: &Config,
    tokens: Option<mpsc::UnboundedSender<String>>,
) -> Result<EvidenceService> {
    let extractor = AnthropicExtractor::from_config(&config.llm)
        .context("failed to configure the semantic extractor")?;
    let mut pipeline = Pipeline::new(Arc::new(extractor), config.pipeline_options());
    if let Some(tokens) = tokens {
        pipeline = pipeline.with_token_sink(tokens);
    }

    Ok(EvidenceService::new(
        Arc::new(TokioMutex::new(open_db(config)?)),
        Arc::new(FsObjectStore::new(&config.storage_dir)),
        Arc::new(PlainTextExtractor),
        pipeline,
    ))
}

fn load_control(path: &Path) -> Result<Control> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read control: {}", path.display()))?;
    let control: Control = serde_json::from_str(&data)
        .with_context(|| format!("invalid control definition: {}", path.display()))?;
    if control.questions.is_empty() {
        warn!(control = %control.id, "Control has no questions");
    }
    Ok(control)
}

fn read_upload(path: &Path, evidence_type_hint: Option<String>) -> Result<Upload> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    Ok(Upload {
        filename,
        mime_type: mime_for_path(path).to_string(),
        bytes,
        evidence_type_hint,
    })
}

// ── Commands ─────────────────────────────────────────────────────────

async fn analyse(
    config: &Config,
    control_path: &Path,
    evidence_type: Option<String>,
    patterns: &[String],
) -> Result<()> {
    let control = load_control(control_path)?;
    let files = config::expand_inputs(patterns)?;
    if files.is_empty() {
        bail!("no input files");
    }
    let uploads = files
        .iter()
        .map(|path| read_upload(path, evidence_type.clone()))
        .collect::<Result<Vec<_>>>()?;

    let (tokens_tx, tokens_rx) = mpsc::unbounded_channel();
    let service = build_service(config, Some(tokens_tx))?;
    let (reporter, events) = ProgressReporter::channel();
    let cancel = CancellationToken::new();

    let batch_cancel = cancel.clone();
    let batch = drive(
        async move {
            service
                .analyse_batch(&control, &uploads, &reporter, &batch_cancel)
                .await
        },
        events,
        tokens_rx,
        &cancel,
    )
    .await?;

    for doc in &batch.documents {
        match &doc.status {
            DocumentStatus::Completed | DocumentStatus::Cancelled => info!(
                document = %doc.filename,
                document_id = doc.document_id,
                reused = doc.reused,
                matches = doc.match_ids.len(),
                "Saved"
            ),
            DocumentStatus::Failed { reason } => {
                warn!(document = %doc.filename, %reason, "Skipped");
            }
            DocumentStatus::Aborted { reason } => bail!("analysis aborted: {reason}"),
        }
    }
    info!(
        calls = batch.usage.calls,
        tokens = batch.usage.tokens_used,
        cancelled = batch.cancelled,
        "Done"
    );
    Ok(())
}

async fn reanalyse(config: &Config, control_path: &Path, document_id: i64) -> Result<()> {
    let control = load_control(control_path)?;
    let (tokens_tx, tokens_rx) = mpsc::unbounded_channel();
    let service = build_service(config, Some(tokens_tx))?;
    let (reporter, events) = ProgressReporter::channel();
    let cancel = CancellationToken::new();

    let run_cancel = cancel.clone();
    let outcome = drive(
        async move {
            service
                .reanalyse_document(document_id, &control, &reporter, &run_cancel)
                .await
        },
        events,
        tokens_rx,
        &cancel,
    )
    .await??;

    if let DocumentStatus::Aborted { reason } | DocumentStatus::Failed { reason } =
        &outcome.status
    {
        bail!("reanalysis failed: {reason}");
    }
    info!(document_id, matches = outcome.match_ids.len(), "Reanalysed");
    Ok(())
}

fn gaps(config: &Config, control_path: &Path) -> Result<()> {
    let control = load_control(control_path)?;
    let db = open_db(config)?;
    let reviewed: Vec<ReviewedMatch> = db
        .list_active_matches(&control.id)?
        .into_iter()
        .map(|m| m.reviewed)
        .collect();
    let report = analyse_gaps(&control.questions, &reviewed);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── Progress output ──────────────────────────────────────────────────

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("  {bar:40.cyan/blue} {pos}/{len} {prefix} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    pb.set_style(style);
    pb
}

/// Run `work` while printing its events as JSON lines on stdout and drawing
/// a progress bar on stderr. Ctrl-C cancels the run; partial results are kept.
async fn drive<T>(
    work: impl Future<Output = T>,
    mut events: UnboundedReceiver<ProgressEvent>,
    mut tokens: UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> Result<T> {
    let pb = progress_bar();
    let output = async {
        let mut out = std::io::stdout().lock();
        let mut streamed = 0usize;
        let mut tokens_open = true;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let ProgressEvent::Progress { current, total, message, .. } = &event {
                        pb.set_length(*total as u64);
                        pb.set_position(*current as u64);
                        pb.set_message(message.clone());
                        streamed = 0;
                    }
                    writeln!(out, "{}", serde_json::to_string(&event)?)?;
                }
                token = tokens.recv(), if tokens_open => match token {
                    Some(text) => {
                        streamed += text.chars().count();
                        pb.set_prefix(format!("[{streamed} chars]"));
                    }
                    None => tokens_open = false,
                },
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    warn!("Interrupted, stopping after the current step");
                    cancel.cancel();
                }
            }
        }
        out.flush()?;
        Ok::<_, anyhow::Error>(())
    };

    let (result, printed) = tokio::join!(work, output);
    pb.finish_and_clear();
    printed?;
    Ok(result)
}
