// src/exec/persistent/session.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::errors::ExecError;
use crate::exec::command::InterpreterCommand;
use crate::exec::feeder::CommandFeeder;
use crate::exec::process::{ProcessHandle, WiredProcess};
use crate::exec::proxy::OutputProxy;

/// Outcome of one feed cycle as reported by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub exit_status: i32,
    pub err: Option<ExecError>,
}

impl StatusReport {
    pub fn exited(exit_status: i32) -> Self {
        Self {
            exit_status,
            err: None,
        }
    }

    pub fn failed(err: ExecError) -> Self {
        Self {
            exit_status: crate::exec::EXIT_STATUS_UNKNOWN,
            err: Some(err),
        }
    }

    pub fn into_result(self) -> Result<i32, ExecError> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.exit_status),
        }
    }
}

/// Routes completion reports either to the startup path or to the request
/// currently in flight.
///
/// The skip counter is raised only by [`ResultRouter::expect_probe`], which
/// strategies call right before feeding their own startup probe. While it is
/// positive the next report is treated as the probe's and consumed by the
/// readiness wait, so a user command can never be swallowed as a probe.
#[derive(Debug, Clone)]
pub struct ResultRouter {
    skip: Arc<AtomicUsize>,
    ready_tx: mpsc::UnboundedSender<StatusReport>,
    result_tx: mpsc::UnboundedSender<StatusReport>,
}

impl ResultRouter {
    pub fn expect_probe(&self) {
        self.skip.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pending_probes(&self) -> usize {
        self.skip.load(Ordering::SeqCst)
    }

    pub fn publish(&self, report: StatusReport) {
        let probe = self
            .skip
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let delivered = if probe {
            debug!(?report, "startup probe completed");
            self.ready_tx.send(report).is_ok()
        } else {
            self.result_tx.send(report).is_ok()
        };
        if !delivered {
            debug!("completion report dropped; session is gone");
        }
    }

    /// Signal readiness without a probe (prompt-driven interpreters).
    pub fn signal_ready(&self) {
        let _ = self.ready_tx.send(StatusReport::exited(0));
    }
}

/// A started interpreter plus the channels its strategy reports on.
#[derive(Debug)]
pub struct ProcessSession {
    wired: WiredProcess,
    command: InterpreterCommand,
    router: ResultRouter,
    ready_rx: Mutex<mpsc::UnboundedReceiver<StatusReport>>,
    result_rx: Mutex<mpsc::UnboundedReceiver<StatusReport>>,
}

impl ProcessSession {
    pub(crate) fn new(
        wired: WiredProcess,
        command: InterpreterCommand,
        skip: Arc<AtomicUsize>,
    ) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        Self {
            wired,
            command,
            router: ResultRouter {
                skip,
                ready_tx,
                result_tx,
            },
            ready_rx: Mutex::new(ready_rx),
            result_rx: Mutex::new(result_rx),
        }
    }

    pub fn feeder(&self) -> &CommandFeeder {
        self.wired.feeder()
    }

    pub fn stdout(&self) -> &OutputProxy {
        self.wired.stdout()
    }

    pub fn stderr(&self) -> &OutputProxy {
        self.wired.stderr()
    }

    pub fn process(&self) -> &ProcessHandle {
        self.wired.process()
    }

    pub fn command(&self) -> &InterpreterCommand {
        &self.command
    }

    pub fn use_pty(&self) -> bool {
        self.wired.use_pty()
    }

    /// Clone of the router, for marker callbacks.
    pub fn router(&self) -> ResultRouter {
        self.router.clone()
    }

    /// Wait for the next readiness report.
    pub async fn wait_ready(&self) -> Result<StatusReport, ExecError> {
        self.ready_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| ExecError::Startup("readiness channel closed".to_string()))
    }

    pub(crate) async fn next_result(&self) -> Option<StatusReport> {
        self.result_rx.lock().await.recv().await
    }

    /// Drop reports that arrived while no request was waiting.
    pub(crate) async fn drain_stale_results(&self) {
        let mut rx = self.result_rx.lock().await;
        while let Ok(report) = rx.try_recv() {
            debug!(?report, "discarding stale completion report");
        }
    }

    pub(crate) async fn shutdown(self, already_done: bool) -> i32 {
        self.wired.shutdown(already_done).await
    }
}
