// tests/document_run.rs

mod common;

use std::fs;
use std::sync::Arc;

use clap::Parser;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use aardy::cli::CliArgs;
use aardy::config::Document;
use aardy::engine::{
    ExecutionEngine, GraphRun, GraphScheduler, RunReport, ScheduledBlock, lane_by_executor,
    result_channel,
};
use aardy::exec::SharedBuffer;
use aardy::exec::factory::ExecutorFactory;
use aardy::graph::{MemoryNodeStore, build_graph};

use crate::common::builders::{DocumentBuilder, NodeConfigBuilder};
use crate::common::{init_tracing, with_timeout_secs};

/// Run `doc` from `root`, capturing all block stdout into one buffer.
async fn run_doc(doc: &Document, root: &str) -> (RunReport, String) {
    let registry = Arc::new(
        ExecutorFactory::from_config(&doc.config)
            .registry_for(doc)
            .unwrap(),
    );
    let store = MemoryNodeStore::from_document(doc);
    let index = build_graph(&store, root).unwrap();

    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry.clone())
        .with_result_listener(listener)
        .start();

    let out = SharedBuffer::new();
    let sink_buffer = out.clone();
    let report = GraphRun::new(&handle, &mut results)
        .with_user("tester")
        .with_sinks(Box::new(move |_: &ScheduledBlock| {
            (Some(sink_buffer.sink()), None)
        }))
        .run(
            GraphScheduler::new(&index, lane_by_executor(registry.clone())),
            CancellationToken::new(),
        )
        .await;

    handle.stop();
    task.await.unwrap();
    (report, out.to_string_lossy())
}

#[tokio::test]
async fn children_see_state_left_by_parents() {
    init_tracing();
    let doc = DocumentBuilder::new()
        .disable_pty()
        .with_node(
            NodeConfigBuilder::new("setup")
                .child("greet")
                .block("text/bash", "export GREETING=hello"),
        )
        .with_node(
            NodeConfigBuilder::new("greet")
                .block("text/bash", "echo \"$GREETING from bash\"")
                .block("text/sh", "echo \"[${GREETING}] from sh\""),
        )
        .build()
        .unwrap();

    let (report, output) = with_timeout_secs(15, run_doc(&doc, "setup")).await;

    assert!(report.summary.is_success(), "{:?}", report.results);
    assert_eq!(output, "hello from bash\n[] from sh\n");
    assert_eq!(report.results.len(), 3);
    assert!(report.results.iter().all(|r| r.header.user_id == "tester"));
    assert_eq!(report.results[1].header.block_id, "greet#1");
}

#[tokio::test]
async fn failing_block_stops_its_subtree() {
    init_tracing();
    let doc = DocumentBuilder::new()
        .disable_pty()
        .with_node(
            NodeConfigBuilder::new("root")
                .child("broken")
                .child("fine")
                .block("text/bash", "true"),
        )
        .with_node(
            NodeConfigBuilder::new("broken")
                .child("after")
                .block("text/bash", "(exit 4)")
                .block("text/bash", "echo unreachable"),
        )
        .with_node(NodeConfigBuilder::new("fine").block("text/bash", "echo fine"))
        .with_node(NodeConfigBuilder::new("after").block("text/bash", "echo after"))
        .build()
        .unwrap();

    let (report, output) = with_timeout_secs(15, run_doc(&doc, "root")).await;

    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(output, "fine\n");

    let failed = report.results.iter().find(|r| !r.is_success()).unwrap();
    assert_eq!(failed.header.node_id, "broken");
    assert_eq!(failed.exit_status, 4);
}

const CLI_DOC: &str = r#"
[config]
disable_pty = true

[[node]]
id = "only"

[[node.block]]
content_type = "text/bash"
content = "true"
"#;

#[tokio::test]
async fn cli_run_and_dry_run_report_exit_codes() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("Aardy.toml");
    fs::write(&path, CLI_DOC).unwrap();
    let file = path.to_string_lossy().into_owned();

    let dry = CliArgs::try_parse_from(["aardy", "run", "--file", &file, "--dry-run"]).unwrap();
    assert_eq!(aardy::run(dry).await.unwrap(), 0);

    let real = CliArgs::try_parse_from(["aardy", "run", "--file", &file]).unwrap();
    assert_eq!(with_timeout_secs(15, aardy::run(real)).await.unwrap(), 0);

    let missing_root =
        CliArgs::try_parse_from(["aardy", "run", "--file", &file, "--root", "nope"]).unwrap();
    let err = aardy::run(missing_root).await.unwrap_err();
    assert!(format!("{err:#}").contains("node not found: nope"), "{err:#}");
}

#[tokio::test]
async fn cli_exec_returns_the_snippet_status() {
    init_tracing();
    let args = CliArgs::try_parse_from(["aardy", "exec", "--disable-pty", "(exit 3)"]).unwrap();
    assert_eq!(with_timeout_secs(15, aardy::run(args)).await.unwrap(), 3);
}
