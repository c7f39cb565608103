// tests/engine_fake_executor.rs

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use aardy::engine::{
    ExecutionEngine, GraphRun, GraphScheduler, NodeRunState, RunSummary, StatusLine,
    lane_by_executor, result_channel,
};
use aardy::errors::ExecError;
use aardy::exec::{ExecRequest, Executor, Registry, RequestHeader, SharedBuffer};
use aardy::graph::build_graph;

use crate::common::builders::bash_store;
use crate::common::{FakeExecutor, ct, init_tracing, request, with_timeout};

fn registry(executors: Vec<Arc<dyn Executor>>) -> Arc<Registry> {
    let mut registry = Registry::new();
    for exec in executors {
        registry.register(exec).expect("distinct content types");
    }
    Arc::new(registry)
}

#[tokio::test]
async fn results_reach_listeners_and_index() {
    init_tracing();
    let fake = Arc::new(FakeExecutor::new("bash", "text/bash"));
    let statuses: Arc<Mutex<Vec<StatusLine>>> = Arc::default();

    let (listener, mut results) = result_channel();
    let status_sink = statuses.clone();
    let engine = ExecutionEngine::new(registry(vec![fake.clone() as Arc<dyn Executor>]))
        .with_result_listener(listener)
        .with_status_listener(Arc::new(move |line: &StatusLine| {
            status_sink.lock().unwrap().push(line.clone());
        }));
    let (handle, task) = engine.start();

    let out = SharedBuffer::new();
    let id = handle
        .submit(request("node-a", "text/bash", "echo hi").with_stdout(out.sink()))
        .await
        .unwrap();

    let result = with_timeout(results.recv()).await.unwrap();
    assert_eq!(result.header.request_id, id);
    assert!(result.is_success());
    assert!(result.finished_at >= result.started_at);
    assert_eq!(out.to_string_lossy(), "echo hi\n");
    assert_eq!(handle.results().for_node("node-a").len(), 1);

    handle.stop();
    with_timeout(task).await.unwrap();
    assert_eq!(fake.cleanup_calls(), 1);

    let lines = statuses.lock().unwrap();
    assert_eq!(lines.first(), Some(&StatusLine::info("execution engine started")));
    assert_eq!(lines.last(), Some(&StatusLine::info("execution engine stopped")));
}

#[tokio::test]
async fn cancel_by_request_id() {
    init_tracing();
    let fake = Arc::new(FakeExecutor::new("bash", "text/bash").with_delay(Duration::from_secs(30)));
    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry(vec![fake.clone() as Arc<dyn Executor>]))
        .with_result_listener(listener)
        .start();

    let id = handle.submit(request("n", "text/bash", "sleep")).await.unwrap();
    handle.cancel("not-a-request").await;
    handle.cancel(id.clone()).await;

    let result = with_timeout(results.recv()).await.unwrap();
    assert_eq!(result.header.request_id, id);
    assert_eq!(result.err, Some(ExecError::Cancelled));

    handle.stop();
    with_timeout(task).await.unwrap();
}

#[tokio::test]
async fn cancel_sent_right_after_submit_is_never_dropped() {
    init_tracing();
    let fake = Arc::new(FakeExecutor::new("bash", "text/bash").with_delay(Duration::from_secs(30)));
    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry(vec![fake.clone() as Arc<dyn Executor>]))
        .with_result_listener(listener)
        .start();

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = handle
            .submit(request(&format!("n{i}"), "text/bash", "sleep"))
            .await
            .unwrap();
        handle.cancel(id.clone()).await;
        ids.push(id);
    }

    for _ in 0..ids.len() {
        let result = with_timeout(results.recv()).await.unwrap();
        assert!(ids.contains(&result.header.request_id));
        assert_eq!(result.err, Some(ExecError::Cancelled));
    }

    handle.stop();
    with_timeout(task).await.unwrap();
}

#[tokio::test]
async fn duplicate_request_id_is_rejected_while_in_flight() {
    init_tracing();
    let fake =
        Arc::new(FakeExecutor::new("bash", "text/bash").with_delay(Duration::from_millis(300)));
    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry(vec![fake.clone() as Arc<dyn Executor>]))
        .with_result_listener(listener)
        .start();

    let header = RequestHeader::new("run", "n");
    handle
        .submit(ExecRequest::new(header.clone(), ct("text/bash"), "first"))
        .await
        .unwrap();
    handle
        .submit(ExecRequest::new(header.clone(), ct("text/bash"), "second"))
        .await
        .unwrap();

    let rejected = with_timeout(results.recv()).await.unwrap();
    assert_eq!(rejected.err, Some(ExecError::InProgress));
    let accepted = with_timeout(results.recv()).await.unwrap();
    assert!(accepted.is_success());
    assert_eq!(fake.executed_contents(), vec!["first"]);

    handle.stop();
    with_timeout(task).await.unwrap();
}

#[tokio::test]
async fn unknown_content_type_is_recorded_as_failure() {
    init_tracing();
    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry(vec![]))
        .with_result_listener(listener)
        .start();

    handle.submit(request("n", "text/unknown", "x")).await.unwrap();
    let result = with_timeout(results.recv()).await.unwrap();
    assert_eq!(
        result.err.map(|e| e.to_string()),
        Some("no executor found for contentType=text/unknown".to_string())
    );

    handle.stop();
    with_timeout(task).await.unwrap();
}

#[tokio::test]
async fn stop_cancels_in_flight_work_and_refuses_new_requests() {
    init_tracing();
    let fake = Arc::new(FakeExecutor::new("bash", "text/bash").with_delay(Duration::from_secs(30)));
    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry(vec![fake.clone() as Arc<dyn Executor>]))
        .with_result_listener(listener)
        .start();

    handle.submit(request("n", "text/bash", "slow")).await.unwrap();
    // Let the worker start before stopping.
    while fake.executed().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    handle.stop();
    with_timeout(task).await.unwrap();

    let result = results.recv().await.unwrap();
    assert_eq!(result.err, Some(ExecError::Cancelled));
    assert_eq!(fake.cleanup_calls(), 1);

    let err = handle.submit(request("n", "text/bash", "late")).await.unwrap_err();
    assert_eq!(err, ExecError::EngineStopped);
}

#[tokio::test]
async fn graph_run_follows_edges_and_serialises_lanes() {
    init_tracing();
    let fake =
        Arc::new(FakeExecutor::new("bash", "text/bash").with_delay(Duration::from_millis(20)));
    let registry = registry(vec![fake.clone() as Arc<dyn Executor>]);

    let store = bash_store(&[
        ("root", &["left", "right"], &["r1", "r2"]),
        ("left", &["join"], &["l"]),
        ("right", &["join"], &["r"]),
        ("join", &[], &["j"]),
    ]);
    let index = build_graph(&store, "root").unwrap();

    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry.clone())
        .with_result_listener(listener)
        .start();

    let scheduler = GraphScheduler::new(&index, lane_by_executor(registry.clone()));
    let report = with_timeout(
        GraphRun::new(&handle, &mut results).run(scheduler, CancellationToken::new()),
    )
    .await;

    assert_eq!(
        report.summary,
        RunSummary {
            succeeded: 4,
            failed: 0,
            skipped: 0
        }
    );
    let order = fake.executed_contents();
    assert_eq!(&order[..2], &["r1", "r2"]);
    assert_eq!(order.last().map(String::as_str), Some("j"));
    assert_eq!(order.len(), 5);
    assert_eq!(fake.max_concurrent(), 1);
    assert!(report.results.iter().all(|r| r.header.execution_id == report.execution_id));

    handle.stop();
    with_timeout(task).await.unwrap();
}

#[tokio::test]
async fn failed_block_skips_descendants() {
    init_tracing();
    let fake = Arc::new(FakeExecutor::new("bash", "text/bash").with_exit("boom", 2));
    let registry = registry(vec![fake.clone() as Arc<dyn Executor>]);

    let store = bash_store(&[
        ("root", &["bad", "good"], &["ok"]),
        ("bad", &["below"], &["boom", "never"]),
        ("good", &[], &["fine"]),
        ("below", &[], &["unreached"]),
    ]);
    let index = build_graph(&store, "root").unwrap();

    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry.clone())
        .with_result_listener(listener)
        .start();

    let scheduler = GraphScheduler::new(&index, lane_by_executor(registry.clone()));
    let report = with_timeout(
        GraphRun::new(&handle, &mut results).run(scheduler, CancellationToken::new()),
    )
    .await;

    assert_eq!(
        report.summary,
        RunSummary {
            succeeded: 2,
            failed: 1,
            skipped: 1
        }
    );
    let executed = fake.executed_contents();
    assert!(!executed.contains(&"never".to_string()));
    assert!(!executed.contains(&"unreached".to_string()));

    let failure = report
        .results
        .iter()
        .find(|r| !r.is_success())
        .expect("one failed result");
    assert_eq!(failure.header.node_id, "bad");
    assert_eq!(failure.exit_status, 2);

    handle.stop();
    with_timeout(task).await.unwrap();
}

#[tokio::test]
async fn cancelling_a_graph_run_cancels_in_flight_blocks() {
    init_tracing();
    let fake = Arc::new(FakeExecutor::new("bash", "text/bash").with_delay(Duration::from_secs(30)));
    let registry = registry(vec![fake.clone() as Arc<dyn Executor>]);

    let store = bash_store(&[("root", &["child"], &["slow"]), ("child", &[], &["after"])]);
    let index = build_graph(&store, "root").unwrap();

    let (listener, mut results) = result_channel();
    let (handle, task) = ExecutionEngine::new(registry.clone())
        .with_result_listener(listener)
        .start();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let scheduler = GraphScheduler::new(&index, lane_by_executor(registry.clone()));
    assert_eq!(scheduler.state_of("child"), Some(NodeRunState::Pending));
    let report = with_timeout(GraphRun::new(&handle, &mut results).run(scheduler, cancel)).await;

    assert_eq!(
        report.summary,
        RunSummary {
            succeeded: 0,
            failed: 1,
            skipped: 1
        }
    );
    assert_eq!(report.results[0].err, Some(ExecError::Cancelled));
    assert_eq!(fake.executed_contents(), vec!["slow"]);

    handle.stop();
    with_timeout(task).await.unwrap();
}
