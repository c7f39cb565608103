// src/exec/persistent/mod.rs

//! Executor that keeps one interpreter process alive across requests.
//!
//! Lifecycle: not started → starting → idle ⇄ executing → stopped.
//!
//! - The interpreter is spawned lazily by the first request and must become
//!   ready within [`READY_TIMEOUT`]; startup failures are remembered and
//!   returned by every later request.
//! - At most one request is in flight; a concurrent call fails with
//!   [`ExecError::InProgress`] without waiting.
//! - Each request races its completion report against the caller's
//!   cancellation and the interpreter exiting. Cancellation and unexpected
//!   exit both tear the interpreter down; the next request starts a new one.
//!
//! The interpreter-specific parts live behind [`ProcessStrategy`].

mod prompt;
mod session;
mod shell;
mod strategy;

pub use prompt::{DONE_MARKER, PARAM_ECHO, PromptStrategy};
pub use session::{ProcessSession, ResultRouter, StatusReport};
pub use shell::{
    EXIT_MARKER, ShellStrategy, exit_marker_regex, marker_trailer, parse_exit_marker,
};
pub use strategy::{ProcessStrategy, StrategyFuture};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::content_type::{ContentType, PARAM_DISABLE_PTY};
use crate::errors::ExecError;
use crate::exec::cancel::CancellationBridge;
use crate::exec::command::InterpreterCommand;
use crate::exec::process::WiredProcess;
use crate::exec::proxy::OutputProxy;
use crate::exec::{ExecFuture, ExecRequest, ExecResponse, Executor, RequestIo};

/// Hard limit for an interpreter to become ready.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a cancelled interpreter gets to act on SIGINT before its process
/// group is killed.
pub const CANCEL_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Never allocate a pseudo-terminal.
    pub disable_pty: bool,
    pub ready_timeout: Duration,
    /// Route SIGINT to the cancellation of the request in flight.
    pub interrupt_bridge: bool,
    pub cancel_grace: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            disable_pty: false,
            ready_timeout: READY_TIMEOUT,
            interrupt_bridge: false,
            cancel_grace: CANCEL_GRACE,
        }
    }
}

#[derive(Debug, Default)]
struct ExecutorState {
    session: Option<ProcessSession>,
    /// Persisted startup failure.
    fatal: Option<ExecError>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How a request ended, before it is mapped onto a result.
#[derive(Debug)]
enum Completion {
    Reported(StatusReport),
    Failed(ExecError),
    Cancelled,
    Exited(i32),
}

pub struct PersistentProcessExecutor {
    name: String,
    content_types: Vec<ContentType>,
    command: InterpreterCommand,
    strategy: Arc<dyn ProcessStrategy>,
    options: ExecutorOptions,
    in_flight: AtomicBool,
    skip: Arc<AtomicUsize>,
    state: Mutex<ExecutorState>,
}

impl std::fmt::Debug for PersistentProcessExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentProcessExecutor")
            .field("name", &self.name)
            .field("content_types", &self.content_types)
            .field("command", &self.command)
            .field("strategy", &self.strategy.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PersistentProcessExecutor {
    pub fn new(
        name: impl Into<String>,
        content_type: ContentType,
        command: InterpreterCommand,
        strategy: impl ProcessStrategy + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            content_types: vec![content_type],
            command,
            strategy: Arc::new(strategy),
            options: ExecutorOptions::default(),
            in_flight: AtomicBool::new(false),
            skip: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(ExecutorState::default()),
        }
    }

    /// Serve additional content types with the same interpreter.
    pub fn with_content_types(mut self, extra: impl IntoIterator<Item = ContentType>) -> Self {
        self.content_types.extend(extra);
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn command(&self) -> &InterpreterCommand {
        &self.command
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Startup probes whose answer has not been seen yet.
    pub fn skip_count(&self) -> usize {
        self.skip.load(Ordering::SeqCst)
    }

    /// Whether an interpreter process is currently alive. Waits for a
    /// request in flight to finish.
    pub async fn is_running(&self) -> bool {
        let state = self.state.lock().await;
        state
            .session
            .as_ref()
            .is_some_and(|s| !s.process().has_exited())
    }

    pub async fn startup_error(&self) -> Option<ExecError> {
        self.state.lock().await.fatal.clone()
    }

    /// Stop the interpreter. `already_done` means the caller saw it exit.
    pub async fn cleanup_process(&self, already_done: bool) {
        let mut state = self.state.lock().await;
        self.teardown(&mut state, already_done).await;
    }

    fn claim(&self) -> Result<InFlightGuard<'_>, ExecError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ExecError::InProgress)?;
        Ok(InFlightGuard(&self.in_flight))
    }

    fn wants_pty(&self, content_type: &ContentType) -> bool {
        if !cfg!(unix) || self.options.disable_pty {
            return false;
        }
        let disabled = content_type.flag(PARAM_DISABLE_PTY)
            || self.content_types.iter().any(|ct| ct.flag(PARAM_DISABLE_PTY));
        !disabled
    }

    async fn run_request(
        &self,
        cancel: CancellationToken,
        request: ExecRequest,
    ) -> Result<i32, ExecError> {
        let _in_flight = self.claim()?;
        let ExecRequest {
            header,
            content,
            content_type,
            stdout,
            stderr,
            stdin,
        } = request;

        let bridge = self
            .options
            .interrupt_bridge
            .then(|| CancellationBridge::for_token(cancel.clone()));

        let mut state = self.state.lock().await;
        if let Some(err) = &state.fatal {
            return Err(err.clone());
        }

        let use_pty = self.wants_pty(&content_type);
        self.ensure_running(&mut state, use_pty, &cancel).await?;
        let Some(session) = state.session.as_ref() else {
            return Err(ExecError::Startup("interpreter is not running".to_string()));
        };

        debug!(
            executor = %self.name,
            request_id = %header.request_id,
            node = %header.node_id,
            bytes = content.len(),
            "feeding request to interpreter"
        );

        session.drain_stale_results().await;
        session.stdout().set_writer(stdout).await;
        session.stderr().set_writer(stderr).await;
        let stdin_pump = stdin.map(|source| session.feeder().spawn_forward(source));

        let io = RequestIo {
            header: &header,
            content: &content,
            content_type: &content_type,
        };
        let completion = match self.strategy.prepare_io(session, io).await {
            Err(err) => Completion::Failed(err),
            Ok(()) => tokio::select! {
                biased;
                report = session.next_result() => match report {
                    Some(report) => Completion::Reported(report),
                    None => Completion::Exited(session.process().exited().await),
                },
                _ = cancel.cancelled() => Completion::Cancelled,
                code = session.process().exited() => Completion::Exited(code),
            },
        };

        if let Some(pump) = stdin_pump {
            pump.abort();
        }
        let mut exited_on_interrupt = false;
        if matches!(completion, Completion::Cancelled) {
            self.strategy.cancel(session);
            exited_on_interrupt =
                tokio::time::timeout(self.options.cancel_grace, session.process().exited())
                    .await
                    .is_ok();
        }
        session.stdout().detach().await;
        session.stderr().detach().await;
        let path = session.process().path().to_string();
        let exited = session.process().has_exited();
        drop(bridge);

        match completion {
            Completion::Reported(report) => report.into_result(),
            Completion::Failed(err) => {
                warn!(executor = %self.name, error = %err, "preparing request failed");
                if exited {
                    self.teardown(&mut state, true).await;
                }
                Err(err)
            }
            Completion::Cancelled => {
                info!(
                    executor = %self.name,
                    request_id = %header.request_id,
                    exited_on_interrupt,
                    "request cancelled"
                );
                self.teardown(&mut state, exited_on_interrupt).await;
                Err(ExecError::Cancelled)
            }
            Completion::Exited(status) => {
                warn!(executor = %self.name, %path, status, "interpreter exited during request");
                self.teardown(&mut state, true).await;
                Err(ExecError::Terminated { path, status })
            }
        }
    }

    async fn ensure_running(
        &self,
        state: &mut ExecutorState,
        use_pty: bool,
        cancel: &CancellationToken,
    ) -> Result<(), ExecError> {
        if let Some(session) = &state.session {
            if !session.process().has_exited() {
                return Ok(());
            }
            debug!(executor = %self.name, "interpreter exited while idle; restarting");
            self.teardown(state, true).await;
        }

        match self.start(use_pty, cancel).await {
            Ok(session) => {
                state.session = Some(session);
                Ok(())
            }
            Err(ExecError::Cancelled) => Err(ExecError::Cancelled),
            Err(err) => {
                error!(executor = %self.name, error = %err, "interpreter failed to start");
                state.fatal = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn start(
        &self,
        use_pty: bool,
        cancel: &CancellationToken,
    ) -> Result<ProcessSession, ExecError> {
        let mut command = self.command.clone();
        self.strategy.configure(&mut command, use_pty);
        self.skip.store(0, Ordering::SeqCst);

        info!(
            executor = %self.name,
            path = %command.display_path(),
            strategy = self.strategy.name(),
            use_pty,
            "starting interpreter"
        );

        let wired = WiredProcess::spawn(
            &command,
            use_pty,
            OutputProxy::new(format!("{}:stdout", self.name)),
            OutputProxy::new(format!("{}:stderr", self.name)),
        )
        .map_err(|e| ExecError::Startup(format!("spawning {}: {e}", command.display_path())))?;
        let session = ProcessSession::new(wired, command, Arc::clone(&self.skip));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            code = session.process().exited() => Err(ExecError::Startup(format!(
                "{} exited during startup, status:{code}",
                session.process().path()
            ))),
            ready = tokio::time::timeout(self.options.ready_timeout, self.strategy.startup(&session)) => {
                match ready {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(ExecError::Startup(msg))) => Err(ExecError::Startup(msg)),
                    Ok(Err(err)) => Err(ExecError::Startup(err.to_string())),
                    Err(_) => Err(ExecError::Startup(
                        "gave up waiting for executor to be ready".to_string(),
                    )),
                }
            }
        };

        match outcome {
            Ok(()) => {
                info!(executor = %self.name, pid = ?session.process().pid(), "interpreter ready");
                Ok(session)
            }
            Err(err) => {
                self.strategy.cleanup(&session);
                session.shutdown(false).await;
                Err(err)
            }
        }
    }

    async fn teardown(&self, state: &mut ExecutorState, already_done: bool) {
        if let Some(session) = state.session.take() {
            self.strategy.cleanup(&session);
            let code = session.shutdown(already_done).await;
            info!(executor = %self.name, exit_code = code, "interpreter stopped");
        }
    }
}

impl Executor for PersistentProcessExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn content_types(&self) -> &[ContentType] {
        &self.content_types
    }

    fn execute(&self, cancel: CancellationToken, request: ExecRequest) -> ExecFuture<'_> {
        Box::pin(async move {
            let header = request.header.clone();
            let outcome = self.run_request(cancel, request).await;
            if let Err(err) = &outcome {
                debug!(executor = %self.name, request_id = %header.request_id, error = %err, "request failed");
            }
            ExecResponse::from_outcome(header, outcome)
        })
    }

    fn cleanup(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.cleanup_process(false))
    }
}
