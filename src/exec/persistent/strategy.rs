// src/exec/persistent/strategy.rs

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use super::session::ProcessSession;
use crate::errors::ExecError;
use crate::exec::RequestIo;
use crate::exec::command::InterpreterCommand;

pub type StrategyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ExecError>> + Send + 'a>>;

/// The interpreter-specific steps of the persistent executor's state machine.
///
/// The executor owns the lifecycle (spawn, readiness race, in-flight
/// accounting, completion race, teardown); a strategy only decides how to
/// talk to one kind of interpreter.
pub trait ProcessStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Adjust the command line before spawning.
    fn configure(&self, _command: &mut InterpreterCommand, _use_pty: bool) {}

    /// Bring a freshly spawned interpreter to the point where it accepts
    /// requests. Resolves once the session's readiness report arrived.
    fn startup<'a>(&'a self, session: &'a ProcessSession) -> StrategyFuture<'a>;

    /// Arm completion detection for one request and feed its payload.
    fn prepare_io<'a>(
        &'a self,
        session: &'a ProcessSession,
        request: RequestIo<'a>,
    ) -> StrategyFuture<'a>;

    /// Interrupt whatever the interpreter is running.
    fn cancel(&self, session: &ProcessSession) {
        if let Err(e) = session.process().interrupt() {
            debug!(strategy = self.name(), error = %e, "interrupting interpreter failed");
        }
    }

    /// Last chance to release strategy-held resources before teardown.
    fn cleanup(&self, _session: &ProcessSession) {}
}
