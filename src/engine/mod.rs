// src/engine/mod.rs

//! Execution engine.
//!
//! This module ties together:
//! - the request bookkeeping (which requests are in flight, how to cancel them)
//! - the single coordinating loop that reacts to:
//!   - submitted requests
//!   - cancellation requests
//!   - worker results
//!   - the stop signal
//! - the graph scheduler that drives a whole snippet graph through the loop
//!
//! The pure bookkeeping state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`scheduler`] decides which blocks may run and
//! [`run`] feeds its decisions through an [`EngineHandle`].

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::exec::{ExecResponse, RequestHeader};
use crate::graph::ExecutionResult;

pub mod core;
pub mod run;
pub mod runtime;
pub mod scheduler;

pub use core::{EngineCommand, EngineCore, EngineStep};
pub use run::{GraphRun, RunReport, SinkFactory};
pub use runtime::{EngineHandle, ExecutionEngine};
pub use scheduler::{
    GraphScheduler, LaneResolver, NodeRunState, RunSummary, ScheduledBlock, lane_by_executor,
};

/// Events flowing into the engine core.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A request was submitted; the shell keeps the request itself.
    Submitted { header: RequestHeader },
    /// Cancel a live request by id. Unknown ids are ignored.
    CancelRequested { request_id: String },
    /// A worker finished.
    Completed { response: ExecResponse },
    /// Stop the loop, cancelling whatever is in flight.
    StopRequested,
}

/// Severity of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// Informational or error line for status listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub level: StatusLevel,
    pub message: String,
}

impl StatusLine {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            message: message.into(),
        }
    }
}

/// Called with every recorded execution result.
pub trait ResultListener: Send + Sync {
    fn on_result(&self, result: &ExecutionResult);
}

impl<F> ResultListener for F
where
    F: Fn(&ExecutionResult) + Send + Sync,
{
    fn on_result(&self, result: &ExecutionResult) {
        self(result)
    }
}

/// Called with status lines.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, line: &StatusLine);
}

impl<F> StatusListener for F
where
    F: Fn(&StatusLine) + Send + Sync,
{
    fn on_status(&self, line: &StatusLine) {
        self(line)
    }
}

/// A listener forwarding results into a channel, plus its receiving end.
pub fn result_channel() -> (Arc<dyn ResultListener>, mpsc::UnboundedReceiver<ExecutionResult>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = move |result: &ExecutionResult| {
        let _ = tx.send(result.clone());
    };
    (Arc::new(listener), rx)
}
