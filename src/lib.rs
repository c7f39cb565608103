// src/lib.rs

pub mod cli;
pub mod config;
pub mod content_type;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod logging;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cli::{CliArgs, Command};
use crate::config::loader::{default_document_path, load_and_validate};
use crate::config::model::Document;
use crate::content_type::ContentType;
use crate::engine::{
    ExecutionEngine, GraphRun, GraphScheduler, ScheduledBlock, StatusLevel, StatusLine,
    lane_by_executor, result_channel,
};
use crate::exec::factory::ExecutorFactory;
use crate::exec::{ExecRequest, OutputSink, Registry, RequestHeader};
use crate::graph::{MemoryNodeStore, NodeViewIndex, build_graph};

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    match args.command {
        Command::Run {
            file,
            root,
            dry_run,
            disable_pty,
        } => {
            let path = file.unwrap_or_else(default_document_path);
            let doc = load_and_validate(&path)?;
            run_document(&doc, root.as_deref(), dry_run, disable_pty).await
        }
        Command::Exec {
            content_type,
            file,
            disable_pty,
            content,
        } => {
            let doc = load_optional(file.as_deref())?;
            exec_one(&doc, &content_type, content, disable_pty).await
        }
        Command::List { file } => {
            let doc = load_optional(file.as_deref())?;
            let registry = ExecutorFactory::from_config(&doc.config).registry_for(&doc)?;
            print_executors(&registry);
            Ok(0)
        }
    }
}

/// An explicit path must exist; otherwise fall back to `Aardy.toml` when
/// present, then to an empty document with the default interpreters.
fn load_optional(file: Option<&Path>) -> Result<Document> {
    match file {
        Some(path) => load_and_validate(path),
        None => {
            let path = default_document_path();
            if path.exists() {
                load_and_validate(&path)
            } else {
                debug!(path = ?path, "no snippet document; using default interpreters");
                Ok(Document::default())
            }
        }
    }
}

async fn run_document(
    doc: &Document,
    root: Option<&str>,
    dry_run: bool,
    disable_pty: bool,
) -> Result<i32> {
    let root = match root {
        Some(root) => root.to_string(),
        None => doc
            .default_root()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("snippet document has no nodes"))?,
    };

    let store = MemoryNodeStore::from_document(doc);
    let index = build_graph(&store, &root).with_context(|| format!("building graph from '{root}'"))?;

    let factory = ExecutorFactory::from_config(&doc.config).disable_pty(disable_pty);
    let registry = Arc::new(factory.registry_for(doc)?);

    if dry_run {
        print_dry_run(&root, &index, &registry);
        return Ok(0);
    }

    let (listener, mut results_rx) = result_channel();
    let engine = ExecutionEngine::new(registry.clone())
        .with_result_listener(listener)
        .with_status_listener(Arc::new(|line: &StatusLine| match line.level {
            StatusLevel::Info => info!("{}", line.message),
            StatusLevel::Error => error!("{}", line.message),
        }));
    let (handle, engine_task) = engine.start();

    // Ctrl-C → cancel the run.
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            cancel.cancel();
        })
    };

    let scheduler = GraphScheduler::new(&index, lane_by_executor(registry.clone()));
    let report = GraphRun::new(&handle, &mut results_rx)
        .with_sinks(Box::new(|_: &ScheduledBlock| {
            let stdout: OutputSink = Box::new(io::stdout());
            let stderr: OutputSink = Box::new(io::stderr());
            (Some(stdout), Some(stderr))
        }))
        .run(scheduler, cancel)
        .await;

    handle.stop();
    engine_task.await.context("execution engine task failed")?;
    ctrl_c.abort();

    let summary = report.summary;
    eprintln!(
        "aardy: {} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
    Ok(if summary.is_success() { 0 } else { 1 })
}

async fn exec_one(
    doc: &Document,
    content_type: &str,
    content: String,
    disable_pty: bool,
) -> Result<i32> {
    let content_type: ContentType = content_type
        .parse()
        .with_context(|| format!("invalid content type {content_type:?}"))?;

    let registry = ExecutorFactory::from_config(&doc.config)
        .disable_pty(disable_pty)
        .interrupt_bridge(true)
        .registry_for(doc)?;

    let header = RequestHeader::new(uuid::Uuid::new_v4().to_string(), "exec");
    let request = ExecRequest::new(header, content_type, content)
        .with_stdout(Box::new(io::stdout()))
        .with_stderr(Box::new(io::stderr()));

    let response = registry.dispatch(CancellationToken::new(), request).await;
    registry.shutdown().await;

    match response.err {
        None => Ok(response.exit_status),
        Some(crate::errors::ExecError::NonZeroExit(code)) => Ok(code),
        Some(err) => Err(anyhow!(err)),
    }
}

fn print_executors(registry: &Registry) {
    for executor in registry.executors() {
        let types: Vec<String> = executor
            .content_types()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("{}\t{}", executor.name(), types.join(", "));
    }
}

/// Print the reachable graph and the executor each block resolves to.
fn print_dry_run(root: &str, index: &NodeViewIndex, registry: &Registry) {
    println!("aardy dry-run (root: {root})");
    println!();

    println!("nodes ({}):", index.len());
    for view in index.views() {
        println!("  - {} (depth {})", view.id(), view.depth);
        if !view.node.children.is_empty() {
            println!("      children: {:?}", view.node.children);
        }
        for block in &view.node.blocks {
            let executor = match registry.get(&block.content_type) {
                Ok(executor) => executor.name().to_string(),
                Err(err) => format!("<{err}>"),
            };
            println!("      block {} [{}] -> {}", block.id, block.content_type, executor);
            for line in block.content.lines() {
                println!("        | {line}");
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
