//! Command-line interface for grantscrape.
//!
//! Provides commands for running the scraping pipeline, producing change
//! reports, inspecting a source's output directory, and showing the resolved
//! configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::adapters::{EuFundingSource, Source};
use crate::config::{self, ResolvedConfig};
use crate::core::checkpoint::CheckpointStore;
use crate::core::orchestrator::NORMALIZED_FILE;
use crate::core::{load_snapshot, AuditLog, Orchestrator, UpdateReport};
use crate::domain::{NormalizedRecord, RunSummary};

/// Source name that selects every configured source
const ALL_SOURCES: &str = "all";

/// Failed ids listed by `status`
const FAILED_PREVIEW: usize = 10;

/// grantscrape - Resumable funding-opportunity scraper
#[derive(Parser, Debug)]
#[command(name = "grantscrape")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .grantscrape/config.yaml in this or a parent directory)
    #[arg(long, global = true, env = "GRANTSCRAPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root of per-source output directories
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline for one source or all of them
    Run {
        /// Source name (horizon_europe, digital_europe, ...) or "all"
        #[arg(short, long, default_value = ALL_SOURCES)]
        source: String,

        /// Process only the first N ids
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only fetch calls that are currently open
        #[arg(long)]
        open_only: bool,
    },

    /// Run the pipeline and report new, updated and deleted opportunities
    Update {
        /// Source name or "all"
        #[arg(short, long, default_value = ALL_SOURCES)]
        source: String,

        /// Only fetch calls that are currently open
        #[arg(long)]
        open_only: bool,
    },

    /// Show checkpoint, audit and output state for a source
    Status {
        /// Source name or "all"
        #[arg(short, long, default_value = ALL_SOURCES)]
        source: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut cfg = config::load(self.config.as_deref())?;
        if let Some(data_dir) = self.data_dir {
            cfg.data_dir = data_dir;
        }

        match self.command {
            Commands::Run {
                source,
                limit,
                open_only,
            } => run_sources(&cfg, &source, limit, open_only).await,
            Commands::Update { source, open_only } => {
                update_sources(&cfg, &source, open_only).await
            }
            Commands::Status { source } => show_status(&cfg, &source).await,
            Commands::Config => show_config(&cfg),
        }
    }
}

/// Expand "all" to every configured source, or validate a single name
fn select_sources<'a>(cfg: &'a ResolvedConfig, selection: &'a str) -> Result<Vec<&'a str>> {
    if selection == ALL_SOURCES {
        return Ok(cfg.source_names());
    }

    if cfg.sources.contains_key(selection) {
        Ok(vec![selection])
    } else {
        anyhow::bail!(
            "Unknown source '{}'. Known sources: {}, {}",
            selection,
            cfg.source_names().join(", "),
            ALL_SOURCES
        )
    }
}

/// Run one source's pipeline in its own output directory
async fn run_source(
    cfg: &ResolvedConfig,
    name: &str,
    limit: Option<usize>,
    open_only: bool,
) -> Result<RunSummary> {
    let source_config = cfg
        .source(name, open_only)
        .with_context(|| format!("Unknown source: {}", name))?;
    let source: Arc<dyn Source> = Arc::new(EuFundingSource::new(source_config)?);

    let mut orchestrator =
        Orchestrator::open(source, cfg.source_dir(name), cfg.pipeline.clone()).await?;
    orchestrator.run(limit).await
}

/// Run each selected source in turn; one failing source does not stop the rest
async fn run_sources(
    cfg: &ResolvedConfig,
    selection: &str,
    limit: Option<usize>,
    open_only: bool,
) -> Result<()> {
    let mut failed = Vec::new();

    for name in select_sources(cfg, selection)? {
        match run_source(cfg, name, limit, open_only).await {
            Ok(summary) => print_summary(&summary),
            Err(e) => {
                error!(source = name, error = %format!("{:#}", e), "Source failed");
                eprintln!("[{} failed: {:#}]", name, e);
                failed.push(name);
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("{} source(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("Source:    {}", summary.source);
    println!("Run ID:    {}", summary.run_id);
    println!("Duration:  {:.1}s", summary.duration_seconds);
    println!("Completed: {}", summary.completed_ids);
    println!("Failed:    {}", summary.failed_ids);
    println!();
}

/// Snapshot, run, diff, report
async fn update_sources(cfg: &ResolvedConfig, selection: &str, open_only: bool) -> Result<()> {
    let mut failed = Vec::new();

    for name in select_sources(cfg, selection)? {
        match update_source(cfg, name, open_only).await {
            Ok(report) => {
                println!("Source:   {}", report.source);
                println!("Previous: {}", report.previous_count);
                println!("Current:  {}", report.current_count);
                println!("New:      {}", report.changes.new);
                println!("Updated:  {}", report.changes.updated);
                println!("Deleted:  {}", report.changes.deleted);
                println!();
            }
            Err(e) => {
                error!(source = name, error = %format!("{:#}", e), "Update failed");
                eprintln!("[{} update failed: {:#}]", name, e);
                failed.push(name);
            }
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("{} source(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

async fn update_source(cfg: &ResolvedConfig, name: &str, open_only: bool) -> Result<UpdateReport> {
    let out_dir = cfg.source_dir(name);
    let normalized_path = out_dir.join(NORMALIZED_FILE);

    let previous = load_snapshot(&normalized_path).await?;
    info!(source = name, previous = previous.len(), "Loaded previous snapshot");

    run_source(cfg, name, None, open_only).await?;

    let current = load_snapshot(&normalized_path).await?;
    let report = UpdateReport::between(name, &previous, &current);
    let path = report.write(&out_dir).await?;
    info!(source = name, report = %path.display(), "Update report written");

    Ok(report)
}

async fn show_status(cfg: &ResolvedConfig, selection: &str) -> Result<()> {
    for name in select_sources(cfg, selection)? {
        show_source_status(name, &cfg.source_dir(name)).await?;
        println!();
    }
    Ok(())
}

async fn show_source_status(name: &str, out_dir: &Path) -> Result<()> {
    println!("Source: {}", name);
    println!("Directory: {}", out_dir.display());

    if !out_dir.exists() {
        println!("  (no runs yet)");
        return Ok(());
    }

    let checkpoint = CheckpointStore::load(out_dir, 1)
        .await
        .context("Failed to load checkpoint")?;
    let state = checkpoint.state();

    println!("Phase: {}", state.phase);
    if let Some(updated) = state.last_updated {
        println!("Last updated: {}", updated);
    }
    println!("Completed: {}", state.completed_ids.len());
    println!("Failed: {}", state.failed_ids.len());
    for id in state.failed_ids.iter().take(FAILED_PREVIEW) {
        println!("  - {}", id);
    }
    if state.failed_ids.len() > FAILED_PREVIEW {
        println!("  ... and {} more", state.failed_ids.len() - FAILED_PREVIEW);
    }

    let audit = AuditLog::open(out_dir);
    let events = audit.replay().await?;
    println!("\nAudit events:");
    for (event_type, count) in audit.replay_summary().await? {
        println!("  {:<22} {}", event_type, count);
    }

    let errors: Vec<_> = events.iter().filter(|e| e.event_type.is_error()).collect();
    if !errors.is_empty() {
        println!("\nErrors ({}):", errors.len());
        for event in errors.iter().rev().take(FAILED_PREVIEW) {
            println!("  {} {} {}", event.timestamp, event.event_type, event.details);
        }
    }

    let records: Vec<NormalizedRecord> =
        crate::core::fsutil::read_json(&out_dir.join(NORMALIZED_FILE))
            .await?
            .unwrap_or_default();
    if !records.is_empty() {
        println!("\nField completeness ({} records):", records.len());
        for (field, present) in field_completeness(&records) {
            println!(
                "  {:<12} {:>6} ({:.1}%)",
                field,
                present,
                100.0 * present as f64 / records.len() as f64
            );
        }
    }

    Ok(())
}

/// Count of records with a non-empty value per output field
fn field_completeness(records: &[NormalizedRecord]) -> Vec<(&'static str, usize)> {
    let fields: [(&'static str, fn(&NormalizedRecord) -> Option<&str>); 6] = [
        ("title", |r| Some(r.title.as_str())),
        ("url", |r| Some(r.url.as_str())),
        ("status", |r| r.status.as_deref()),
        ("programme", |r| r.programme.as_deref()),
        ("open_date", |r| r.open_date.as_deref()),
        ("close_date", |r| r.close_date.as_deref()),
    ];

    fields
        .into_iter()
        .map(|(name, get)| {
            let present = records
                .iter()
                .filter(|r| get(r).is_some_and(|v| !v.trim().is_empty()))
                .count();
            (name, present)
        })
        .collect()
}

/// Show the resolved configuration (for debugging)
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Config version: {}", cfg.version);
    println!();

    let rendered = serde_yaml::to_string(cfg).context("Failed to render configuration")?;
    println!("{}", rendered);

    Ok(())
}
