use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Parser, ValueEnum};
use logsift_indexer::{
    CommandSource, DisplayMode, LogSource, Pipeline, PipelineConfig, ReaderSource,
    ShutdownReport,
};
use logsift_vector_store::{model_dir, Embedder, EmbeddingMode, EmbeddingModel, DEFAULT_MODEL_ID};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

mod interactive;

pub use interactive::{is_exit_command, parse_query_options, render_results, QueryOptions};

#[derive(Parser)]
#[command(name = "logsift")]
#[command(about = "Deduplicate a live log stream and search it semantically", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long)]
    quiet: bool,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override embedding backend in this process
    #[arg(long, value_enum)]
    embed_mode: Option<EmbedMode>,

    /// Override embedding model id
    #[arg(long)]
    embed_model: Option<String>,

    /// Model cache directory (overrides LOGSIFT_MODEL_DIR)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Read log lines from stdin instead of running the source command
    #[arg(long, conflicts_with = "source_file", requires = "queries")]
    stdin: bool,

    /// Read log lines from a file instead of running the source command
    #[arg(long)]
    source_file: Option<PathBuf>,

    /// Source command line, split on whitespace (default: journalctl -f -o short)
    #[arg(long, conflicts_with_all = ["stdin", "source_file"])]
    source_command: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Results per query when no k=<n> is given
    #[arg(long)]
    default_k: Option<usize>,

    #[arg(long)]
    flush_interval_ms: Option<u64>,

    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Most recent records kept searchable
    #[arg(long)]
    max_metadata_len: Option<usize>,

    /// Wait before the first prompt
    #[arg(long)]
    warmup_ms: Option<u64>,

    #[arg(long)]
    shutdown_grace_ms: Option<u64>,

    /// Display mode when no display=<mode> is given
    #[arg(long, value_enum, default_value = "pretty")]
    display: DisplayArg,

    /// Run these queries (same syntax as the prompt) and exit instead of
    /// reading queries interactively
    #[arg(long = "query", value_name = "QUERY")]
    queries: Vec<String>,
}

#[derive(Copy, Clone, ValueEnum)]
enum EmbedMode {
    Fast,
    Stub,
}

impl EmbedMode {
    const fn as_domain(self) -> EmbeddingMode {
        match self {
            EmbedMode::Fast => EmbeddingMode::Fast,
            EmbedMode::Stub => EmbeddingMode::Stub,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum DisplayArg {
    Raw,
    Pretty,
}

impl DisplayArg {
    const fn as_domain(self) -> DisplayMode {
        match self {
            DisplayArg::Raw => DisplayMode::Raw,
            DisplayArg::Pretty => DisplayMode::Pretty,
        }
    }
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli);

    let config = resolve_config(&cli)?;
    let embedder = load_embedder(&cli).context("Failed to initialize embedding model")?;
    let source = open_source(&cli, &config).await?;
    let finite_source = cli.stdin || cli.source_file.is_some();
    let warmup = config.warmup();

    let pipeline =
        Pipeline::start(config, source, embedder).context("Failed to start log pipeline")?;
    println!("Live log embedding started ({}).", source_label(&cli));

    let outcome = if cli.queries.is_empty() {
        println!("Collecting initial logs...");
        tokio::time::sleep(warmup).await;
        interactive::run_interactive(&pipeline, cli.display.as_domain()).await
    } else {
        let settle_limit = if finite_source { None } else { Some(warmup) };
        if !pipeline.wait_until_settled(settle_limit).await {
            log::debug!("Running queries before the source settled");
        }
        run_batch_queries(&pipeline, &cli.queries, cli.display.as_domain()).await
    };

    println!("Shutting down background tasks...");
    let report = pipeline.shutdown().await;
    log_report(&report);
    println!("Shutdown complete.");
    outcome
}

fn init_logger(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    // ort logs every session option at info level
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();
}

/// Defaults, then `--config`, then `LOGSIFT_*`, then flags.
fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env_with(|key| env::var(key).ok());

    if let Some(v) = cli.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = cli.default_k {
        config.default_k = v;
    }
    if let Some(v) = cli.flush_interval_ms {
        config.flush_interval_ms = v;
    }
    if let Some(v) = cli.idle_timeout_ms {
        config.idle_timeout_ms = v;
    }
    if let Some(v) = cli.max_metadata_len {
        config.max_metadata_len = v;
    }
    if let Some(v) = cli.warmup_ms {
        config.warmup_ms = v;
    }
    if let Some(v) = cli.shutdown_grace_ms {
        config.shutdown_grace_ms = v;
    }
    if let Some(raw) = &cli.source_command {
        let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            bail!("--source-command must not be empty");
        }
        config.source_command = argv;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_embedder(cli: &Cli) -> Result<Arc<dyn Embedder>> {
    let mode = match cli.embed_mode {
        Some(mode) => mode.as_domain(),
        None => EmbeddingMode::from_env()?,
    };
    let model_id = cli
        .embed_model
        .clone()
        .or_else(|| env::var("LOGSIFT_EMBEDDING_MODEL").ok())
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
    let dir = cli.model_dir.clone().unwrap_or_else(model_dir);

    println!("Loading embedding model...");
    let model = EmbeddingModel::load(mode, &model_id, &dir)?;
    println!("Model loaded successfully.");
    log::info!(
        "Embedding model {model_id} ({}, dim {})",
        mode.as_str(),
        model.dimension()
    );
    Ok(Arc::new(model))
}

async fn open_source(cli: &Cli, config: &PipelineConfig) -> Result<Box<dyn LogSource>> {
    if cli.stdin {
        let reader = BufReader::new(tokio::io::stdin());
        return Ok(Box::new(ReaderSource::new("stdin", reader)));
    }
    if let Some(path) = &cli.source_file {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        return Ok(Box::new(ReaderSource::new(
            path.display().to_string(),
            BufReader::new(file),
        )));
    }
    let source = CommandSource::spawn(&config.source_command, config.source_kill_timeout())
        .context("Failed to start log source command")?;
    Ok(Box::new(source))
}

fn source_label(cli: &Cli) -> String {
    if cli.stdin {
        "stdin".to_string()
    } else if let Some(path) = &cli.source_file {
        path.display().to_string()
    } else {
        "source command + deduplication".to_string()
    }
}

async fn run_batch_queries(
    pipeline: &Pipeline,
    queries: &[String],
    default_mode: DisplayMode,
) -> Result<()> {
    for query in queries {
        interactive::run_query(pipeline, query, default_mode).await?;
    }
    Ok(())
}

fn log_report(report: &ShutdownReport) {
    let summary = format!(
        "ingest {}, flusher {}, assembler {}",
        report.ingest, report.flusher, report.assembler
    );
    if report.clean() {
        log::info!("Shutdown: {summary}");
    } else {
        log::warn!("Shutdown: {summary}");
    }
    log::info!(
        "Totals: {} lines, {} records flushed, {} indexed, {} dropped, {} evicted",
        report.health.lines_ingested,
        report.health.records_flushed,
        report.health.records_indexed,
        report.health.records_dropped,
        report.health.entries_evicted
    );
}
