// src/engine/core.rs

//! Pure engine bookkeeping.
//!
//! [`EngineCore`] consumes [`EngineEvent`]s and produces the commands the
//! async shell must carry out. It has no channels and performs no IO; time is
//! passed in, so every transition is deterministic and unit-testable.

use std::collections::HashMap;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::EngineEvent;
use crate::errors::ExecError;
use crate::exec::RequestHeader;
use crate::graph::ExecutionResult;

/// Command produced by the core, executed by the shell.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Start a worker for the submitted request.
    Dispatch {
        request_id: String,
        cancel: CancellationToken,
    },
    /// Fire the cancellation token of a live request.
    Cancel {
        request_id: String,
        cancel: CancellationToken,
    },
    /// Append to the result index and notify listeners.
    Record(ExecutionResult),
}

/// Outcome of handling a single event.
#[derive(Debug, Clone)]
pub struct EngineStep {
    pub commands: Vec<EngineCommand>,
    pub keep_running: bool,
}

impl EngineStep {
    fn run(commands: Vec<EngineCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    header: RequestHeader,
    cancel: CancellationToken,
    started_at: SystemTime,
}

/// Requests currently in flight, keyed by request id.
#[derive(Debug, Default)]
pub struct EngineCore {
    in_flight: HashMap<String, InFlight>,
    recorded: usize,
}

impl EngineCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, request_id: &str) -> bool {
        self.in_flight.contains_key(request_id)
    }

    /// Results recorded so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn step(&mut self, event: EngineEvent, now: SystemTime) -> EngineStep {
        match event {
            EngineEvent::Submitted { header } => self.handle_submitted(header, now),
            EngineEvent::CancelRequested { request_id } => self.handle_cancel(&request_id),
            EngineEvent::Completed { response } => {
                let started_at = match self.in_flight.remove(&response.header.request_id) {
                    Some(entry) => entry.started_at,
                    None => {
                        warn!(
                            request_id = %response.header.request_id,
                            "result for a request that is not in flight"
                        );
                        now
                    }
                };
                self.recorded += 1;
                EngineStep::run(vec![EngineCommand::Record(ExecutionResult::from_response(
                    response, started_at, now,
                ))])
            }
            EngineEvent::StopRequested => {
                let commands = self
                    .in_flight
                    .iter()
                    .map(|(id, entry)| EngineCommand::Cancel {
                        request_id: id.clone(),
                        cancel: entry.cancel.clone(),
                    })
                    .collect();
                EngineStep {
                    commands,
                    keep_running: false,
                }
            }
        }
    }

    fn handle_submitted(&mut self, header: RequestHeader, now: SystemTime) -> EngineStep {
        if self.in_flight.contains_key(&header.request_id) {
            warn!(request_id = %header.request_id, "duplicate request id; rejecting");
            self.recorded += 1;
            return EngineStep::run(vec![EngineCommand::Record(ExecutionResult::rejected(
                header,
                ExecError::InProgress,
                now,
            ))]);
        }

        let request_id = header.request_id.clone();
        let cancel = CancellationToken::new();
        debug!(request_id = %request_id, node = %header.node_id, "request accepted");
        self.in_flight.insert(
            request_id.clone(),
            InFlight {
                header,
                cancel: cancel.clone(),
                started_at: now,
            },
        );
        EngineStep::run(vec![EngineCommand::Dispatch { request_id, cancel }])
    }

    fn handle_cancel(&mut self, request_id: &str) -> EngineStep {
        match self.in_flight.get(request_id) {
            Some(entry) => {
                debug!(request_id, node = %entry.header.node_id, "cancelling request");
                EngineStep::run(vec![EngineCommand::Cancel {
                    request_id: request_id.to_string(),
                    cancel: entry.cancel.clone(),
                }])
            }
            None => {
                debug!(request_id, "cancel for unknown request ignored");
                EngineStep::run(Vec::new())
            }
        }
    }
}
