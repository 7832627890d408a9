//! cartograph CLI
//!
//! Usage: cartograph <command> [arguments]

mod cli;

use anyhow::{Context, Result};
use cartograph::diagnostics::FileDiagnostic;
use cartograph::graph::{GraphStore, StoreOptions};
use cartograph::summarize;
use cartograph::{ExtractionDocument, Indexer, RunReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cli::{Command, IndexArgs, Verbosity};

fn init_tracing(verbosity: Verbosity) {
    let filter = match verbosity {
        Verbosity::Verbose => EnvFilter::new("debug"),
        Verbosity::Quiet => EnvFilter::new("warn"),
        Verbosity::Default => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Set `flag` on SIGINT or SIGTERM.
fn register_cancel(flag: Arc<AtomicBool>) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::signal;
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([signal::SIGTERM, signal::SIGINT])?;
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                tracing::warn!("interrupt received, finishing current batch");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }
    #[cfg(not(unix))]
    let _ = flag;
    Ok(())
}

fn run_index(args: IndexArgs, json: bool) -> Result<()> {
    let config = args.into_config()?;
    let cancel = Arc::new(AtomicBool::new(false));
    register_cancel(cancel.clone())?;

    let indexer = Indexer::new(config).with_cancel_flag(cancel);
    let report = indexer.run()?;

    for failure in &report.files_failed {
        eprintln!("{}", FileDiagnostic::from(failure).format_stderr());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run {} ({})", report.execution_id, report.outcome());
    println!(
        "  files: {} discovered, {} new, {} modified, {} unchanged, {} deleted, {} failed, {} skipped",
        report.files_discovered,
        report.files_new,
        report.files_modified,
        report.files_unchanged,
        report.files_deleted,
        report.files_failed.len(),
        report.files_skipped
    );
    println!(
        "  nodes: {} created, {} updated, {} deleted",
        report.nodes_created, report.nodes_updated, report.nodes_deleted
    );
    println!(
        "  relationships: {} created, {} updated, {} deleted, {} rejected",
        report.relationships_created,
        report.relationships_updated,
        report.relationships_deleted,
        report.relationships_rejected
    );
    println!(
        "  links: {} resolved, {} unresolved, {} ambiguous",
        report.links_resolved, report.links_unresolved, report.links_ambiguous
    );
    println!("  took {} ms", report.duration_ms);
}

fn open_existing(db_path: &Path, options: StoreOptions) -> Result<GraphStore> {
    if !db_path.exists() {
        anyhow::bail!("no index found at {}", db_path.display());
    }
    GraphStore::open(db_path, options).with_context(|| format!("failed to open {}", db_path.display()))
}

fn run_status(args: IndexArgs, json: bool) -> Result<()> {
    let config = args.into_config()?;
    let db_path = config.db_path();
    let store = open_existing(&db_path, config.store_options())?;
    let last_run = store.last_run()?;
    let graph = store.summary()?;
    let progress = summarize::progress(&store)?;

    if json {
        let report = last_run
            .as_ref()
            .and_then(|r| r.report.as_deref())
            .and_then(|r| serde_json::from_str::<serde_json::Value>(r).ok());
        let out = serde_json::json!({
            "database": db_path.display().to_string(),
            "last_run": last_run,
            "last_report": report,
            "graph": graph,
            "summaries": progress,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Database: {}", db_path.display());
    match &last_run {
        Some(run) => {
            println!(
                "Last run: {} {} (started {})",
                run.execution_id, run.outcome, run.started_at
            );
            if let Some(report) = run
                .report
                .as_deref()
                .and_then(|r| serde_json::from_str::<RunReport>(r).ok())
            {
                print_report(&report);
            }
            if let Some(msg) = &run.error_message {
                println!("  error: {}", msg);
            }
        }
        None => println!("Last run: none"),
    }
    println!(
        "Graph: {} nodes, {} relationships, {} files ({} bytes), {} pending links",
        graph.total_nodes,
        graph.total_relationships,
        graph.file_count,
        graph.total_size,
        graph.pending_links
    );
    for (kind, count) in &graph.nodes_by_kind {
        println!("  {:<16} {}", kind, count);
    }
    for (rel_type, count) in &graph.relationships_by_type {
        println!("  {:<16} {}", rel_type, count);
    }
    println!("Summaries:");
    for level in progress {
        println!("  {:<16} {}/{}", level.kind, level.completed, level.total);
    }
    Ok(())
}

fn run_extract(args: IndexArgs, files: Vec<String>) -> Result<()> {
    let config = args.into_config()?;
    let doc = Indexer::new(config).extract_document(&files)?;
    for path in &doc.metadata.failed_files {
        tracing::warn!(file = %path, "extraction failed");
    }
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn run_ingest(args: IndexArgs, input: PathBuf) -> Result<()> {
    let config = args.into_config()?;
    if config.batch_size == 0 {
        anyhow::bail!("batch_size must be greater than zero");
    }
    let db = config.db_path();

    let text = std::fs::read_to_string(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let (doc, rejected) = ExtractionDocument::parse_lenient(&text)
        .with_context(|| format!("invalid document {}", input.display()))?;
    for error in &rejected {
        tracing::warn!(error = %error, "skipping malformed record");
    }

    let mut store = GraphStore::open(&db, config.store_options())
        .with_context(|| format!("failed to open {}", db.display()))?;
    let outcome = store.apply_document(&doc, config.batch_size);
    let links = store.link()?;

    let out = serde_json::json!({
        "records_rejected": rejected.len(),
        "outcome": outcome,
        "links": links,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn main() -> ExitCode {
    let invocation = match cli::parse_args() {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            cli::print_usage();
            return ExitCode::from(2);
        }
    };
    init_tracing(invocation.verbosity);

    let result = match invocation.command {
        Command::Help => {
            cli::print_usage();
            Ok(())
        }
        Command::Version => {
            println!("cartograph {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Index { args, json } => run_index(args, json),
        Command::Status { args, json } => run_status(args, json),
        Command::Extract { args, files } => run_extract(args, files),
        Command::Ingest { args, input } => run_ingest(args, input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
