// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::ExecError;
use crate::exec::{ExecRequest, ExecResponse, Registry, RequestHeader};
use crate::graph::{ExecutionResult, ExecutionResultIndex};

use super::core::EngineCore;
use super::{EngineCommand, EngineEvent, ResultListener, StatusLine, StatusListener};

const QUEUE_CAPACITY: usize = 32;

/// Routes requests to executors through the registry and records results.
///
/// This is the async IO shell around [`EngineCore`]: it owns the queues, spawns
/// one worker per request and applies the commands the core returns.
pub struct ExecutionEngine {
    registry: Arc<Registry>,
    results: Arc<ExecutionResultIndex>,
    result_listeners: Vec<Arc<dyn ResultListener>>,
    status_listeners: Vec<Arc<dyn StatusListener>>,
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("registry", &self.registry)
            .field("results", &self.results.len())
            .field("result_listeners", &self.result_listeners.len())
            .field("status_listeners", &self.status_listeners.len())
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            results: Arc::new(ExecutionResultIndex::new()),
            result_listeners: Vec::new(),
            status_listeners: Vec::new(),
        }
    }

    pub fn with_result_listener(mut self, listener: Arc<dyn ResultListener>) -> Self {
        self.result_listeners.push(listener);
        self
    }

    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.status_listeners.push(listener);
        self
    }

    pub fn results(&self) -> Arc<ExecutionResultIndex> {
        self.results.clone()
    }

    /// Spawn the coordinating loop.
    ///
    /// The loop ends when [`EngineHandle::stop`] is called or every handle is
    /// dropped. On the way out it cancels what is in flight, records the
    /// resulting responses and cleans up every registered executor.
    pub fn start(self) -> (EngineHandle, JoinHandle<()>) {
        let (submit_tx, submit_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (cancel_tx, cancel_rx) = mpsc::channel(QUEUE_CAPACITY);
        let stop = CancellationToken::new();

        let handle = EngineHandle {
            submit_tx,
            cancel_tx,
            stop: stop.clone(),
            results: self.results.clone(),
        };

        let task = tokio::spawn(self.run(submit_rx, cancel_rx, stop));
        (handle, task)
    }

    async fn run(
        self,
        mut submit_rx: mpsc::Receiver<ExecRequest>,
        mut cancel_rx: mpsc::Receiver<String>,
        stop: CancellationToken,
    ) {
        info!("execution engine started");
        self.status(StatusLine::info("execution engine started"));

        let mut core = EngineCore::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<ExecResponse>();
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut headers: HashMap<tokio::task::Id, RequestHeader> = HashMap::new();
        let mut cancel_open = true;

        loop {
            let (event, staged) = tokio::select! {
                biased;

                _ = stop.cancelled() => (EngineEvent::StopRequested, None),

                Some(response) = done_rx.recv() => (EngineEvent::Completed { response }, None),

                Some(joined) = workers.join_next_with_id(), if !workers.is_empty() => {
                    match joined {
                        Ok((id, ())) => {
                            headers.remove(&id);
                            continue;
                        }
                        Err(err) => match Self::lost_worker(&mut headers, err) {
                            Some(response) => (EngineEvent::Completed { response }, None),
                            None => continue,
                        },
                    }
                }

                // A cancel never overtakes the submission it refers to.
                request = submit_rx.recv() => match request {
                    Some(request) => (
                        EngineEvent::Submitted {
                            header: request.header.clone(),
                        },
                        Some(request),
                    ),
                    None => {
                        debug!("all engine handles dropped");
                        (EngineEvent::StopRequested, None)
                    }
                },

                request_id = cancel_rx.recv(), if cancel_open => match request_id {
                    Some(request_id) => (EngineEvent::CancelRequested { request_id }, None),
                    None => {
                        cancel_open = false;
                        continue;
                    }
                },
            };

            let step = core.step(event, SystemTime::now());
            let mut staged = staged;
            for command in step.commands {
                match command {
                    EngineCommand::Dispatch { request_id, cancel } => {
                        let Some(request) = staged.take() else {
                            warn!(request_id = %request_id, "dispatch without a staged request");
                            continue;
                        };
                        let header = request.header.clone();
                        let registry = self.registry.clone();
                        let tx = done_tx.clone();
                        debug!(
                            request_id = %request_id,
                            node = %header.node_id,
                            content_type = %request.content_type,
                            "starting worker"
                        );
                        let abort = workers.spawn(async move {
                            let response = registry.dispatch(cancel, request).await;
                            let _ = tx.send(response);
                        });
                        headers.insert(abort.id(), header);
                    }
                    EngineCommand::Cancel { request_id, cancel } => {
                        info!(request_id = %request_id, "cancelling request");
                        cancel.cancel();
                    }
                    EngineCommand::Record(result) => self.record(result),
                }
            }

            if !step.keep_running {
                break;
            }
        }

        info!(in_flight = core.in_flight(), "execution engine stopping");

        // Cancelled workers still report; record what they send.
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    headers.remove(&id);
                }
                Err(err) => {
                    if let Some(response) = Self::lost_worker(&mut headers, err) {
                        let _ = done_tx.send(response);
                    }
                }
            }
        }
        drop(done_tx);
        while let Some(response) = done_rx.recv().await {
            let step = core.step(EngineEvent::Completed { response }, SystemTime::now());
            for command in step.commands {
                if let EngineCommand::Record(result) = command {
                    self.record(result);
                }
            }
        }

        self.registry.shutdown().await;
        info!(recorded = core.recorded(), "execution engine stopped");
        self.status(StatusLine::info("execution engine stopped"));
    }

    /// A worker that panicked or was aborted never sends its response; make
    /// one up so the request leaves the in-flight set.
    fn lost_worker(
        headers: &mut HashMap<tokio::task::Id, RequestHeader>,
        err: JoinError,
    ) -> Option<ExecResponse> {
        let header = headers.remove(&err.id())?;
        error!(request_id = %header.request_id, error = %err, "worker task failed");
        Some(ExecResponse::failed(
            header,
            ExecError::Io(format!("worker task failed: {err}")),
        ))
    }

    fn record(&self, result: ExecutionResult) {
        if let Some(err) = &result.err {
            warn!(
                request_id = %result.header.request_id,
                node = %result.header.node_id,
                exit_status = result.exit_status,
                error = %err,
                "request failed"
            );
            self.status(StatusLine::error(format!(
                "{} ({}): {err}",
                result.header.node_id, result.header.block_id
            )));
        } else {
            debug!(
                request_id = %result.header.request_id,
                node = %result.header.node_id,
                elapsed_ms = result.duration().as_millis() as u64,
                "request finished"
            );
        }

        self.results.append(result.clone());
        for listener in &self.result_listeners {
            listener.on_result(&result);
        }
    }

    fn status(&self, line: StatusLine) {
        for listener in &self.status_listeners {
            listener.on_status(&line);
        }
    }
}

/// Caller side of a running [`ExecutionEngine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    submit_tx: mpsc::Sender<ExecRequest>,
    cancel_tx: mpsc::Sender<String>,
    stop: CancellationToken,
    results: Arc<ExecutionResultIndex>,
}

impl EngineHandle {
    /// Queue a request; returns its request id.
    pub async fn submit(&self, request: ExecRequest) -> Result<String, ExecError> {
        if self.stop.is_cancelled() {
            return Err(ExecError::EngineStopped);
        }
        let request_id = request.header.request_id.clone();
        self.submit_tx
            .send(request)
            .await
            .map_err(|_| ExecError::EngineStopped)?;
        Ok(request_id)
    }

    /// Ask the engine to cancel a request. Unknown ids are ignored.
    pub async fn cancel(&self, request_id: impl Into<String>) {
        if self.cancel_tx.send(request_id.into()).await.is_err() {
            debug!("cancel after engine stopped");
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn results(&self) -> Arc<ExecutionResultIndex> {
        self.results.clone()
    }
}
