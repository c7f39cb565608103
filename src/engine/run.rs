// src/engine/run.rs

//! Driving a whole node graph through a running engine.

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::exec::{ExecRequest, OutputSink, RequestHeader};
use crate::graph::ExecutionResult;

use super::runtime::EngineHandle;
use super::scheduler::{GraphScheduler, RunSummary, ScheduledBlock};

/// Produces the stdout/stderr sinks for a block about to be submitted.
pub type SinkFactory =
    dyn Fn(&ScheduledBlock) -> (Option<OutputSink>, Option<OutputSink>) + Send + Sync;

/// What a finished graph run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub execution_id: String,
    pub summary: RunSummary,
    /// Results of this run, in completion order.
    pub results: Vec<ExecutionResult>,
}

/// One execution of a scheduled graph.
///
/// `results` must be fed by a result listener of the engine behind `handle`
/// (see [`super::result_channel`]). Results of other executions are ignored.
pub struct GraphRun<'a> {
    handle: &'a EngineHandle,
    results: &'a mut mpsc::UnboundedReceiver<ExecutionResult>,
    execution_id: String,
    user_id: String,
    sinks: Option<Box<SinkFactory>>,
}

impl<'a> GraphRun<'a> {
    pub fn new(
        handle: &'a EngineHandle,
        results: &'a mut mpsc::UnboundedReceiver<ExecutionResult>,
    ) -> Self {
        Self {
            handle,
            results,
            execution_id: Uuid::new_v4().to_string(),
            user_id: String::new(),
            sinks: None,
        }
    }

    pub fn with_sinks(mut self, sinks: Box<SinkFactory>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Run until every node is finished, failed or skipped.
    ///
    /// Cancelling `cancel` cancels every in-flight request and stops
    /// submitting new blocks; the remaining nodes end up skipped.
    pub async fn run(self, mut scheduler: GraphScheduler, cancel: CancellationToken) -> RunReport {
        let Self {
            handle,
            results,
            execution_id,
            user_id,
            sinks,
        } = self;
        info!(execution = %execution_id, "graph run started");

        let submitter = Submitter {
            handle,
            execution_id: &execution_id,
            user_id: &user_id,
            sinks: sinks.as_deref(),
        };

        // request id -> node id
        let mut in_flight: HashMap<String, String> = HashMap::new();
        let mut collected = Vec::new();
        let mut cancelling = false;

        let initial = scheduler.start();
        submitter
            .submit_all(initial, &mut scheduler, &mut in_flight, cancelling)
            .await;

        loop {
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled(), if !cancelling => {
                    info!(execution = %execution_id, in_flight = in_flight.len(), "cancelling graph run");
                    cancelling = true;
                    for request_id in in_flight.keys() {
                        handle.cancel(request_id.clone()).await;
                    }
                }

                result = results.recv() => {
                    let Some(result) = result else {
                        warn!(execution = %execution_id, "result stream closed mid-run");
                        for node_id in in_flight.values() {
                            scheduler.handle_completion(node_id, false);
                        }
                        in_flight.clear();
                        break;
                    };
                    if result.header.execution_id != execution_id {
                        continue;
                    }
                    let Some(node_id) = in_flight.remove(&result.header.request_id) else {
                        debug!(request_id = %result.header.request_id, "result for unknown request");
                        continue;
                    };

                    let next = scheduler.handle_completion(&node_id, result.is_success());
                    collected.push(result);
                    submitter
                        .submit_all(next, &mut scheduler, &mut in_flight, cancelling)
                        .await;
                }
            }
        }

        let abandoned = scheduler.abandon_pending();
        if !abandoned.is_empty() {
            warn!(execution = %execution_id, ?abandoned, "nodes never became ready");
        }

        let summary = scheduler.summary();
        info!(
            execution = %execution_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "graph run finished"
        );

        RunReport {
            execution_id,
            summary,
            results: collected,
        }
    }
}

struct Submitter<'r> {
    handle: &'r EngineHandle,
    execution_id: &'r str,
    user_id: &'r str,
    sinks: Option<&'r SinkFactory>,
}

impl Submitter<'_> {
    /// Submit `ready`, treating blocks that cannot be submitted (or that
    /// become ready while cancelling) as failed.
    async fn submit_all(
        &self,
        ready: Vec<ScheduledBlock>,
        scheduler: &mut GraphScheduler,
        in_flight: &mut HashMap<String, String>,
        cancelling: bool,
    ) {
        let mut queue = VecDeque::from(ready);
        while let Some(block) = queue.pop_front() {
            if cancelling {
                debug!(node = %block.node_id, block = %block.block.id, "run cancelled; not submitting");
                queue.extend(scheduler.handle_completion(&block.node_id, false));
                continue;
            }

            let request = self.request_for(&block);
            match self.handle.submit(request).await {
                Ok(request_id) => {
                    in_flight.insert(request_id, block.node_id);
                }
                Err(err) => {
                    warn!(node = %block.node_id, block = %block.block.id, error = %err, "submit failed");
                    queue.extend(scheduler.handle_completion(&block.node_id, false));
                }
            }
        }
    }

    fn request_for(&self, scheduled: &ScheduledBlock) -> ExecRequest {
        let header = RequestHeader::new(self.execution_id, scheduled.node_id.clone())
            .with_block(scheduled.block.id.clone())
            .with_user(self.user_id);
        let mut request = ExecRequest::new(
            header,
            scheduled.block.content_type.clone(),
            scheduled.block.content.clone(),
        );
        if let Some(factory) = self.sinks {
            let (stdout, stderr) = factory(scheduled);
            request.stdout = stdout;
            request.stderr = stderr;
        }
        request
    }
}
