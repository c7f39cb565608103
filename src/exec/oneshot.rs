// src/exec/oneshot.rs

//! Executor that spawns a fresh process per request.
//!
//! The payload is written to the child's stdin, which is then closed; the
//! exit code of the child is the request's exit status.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content_type::ContentType;
use crate::errors::ExecError;
use crate::exec::command::InterpreterCommand;
use crate::exec::process::WiredProcess;
use crate::exec::proxy::OutputProxy;
use crate::exec::{ExecFuture, ExecRequest, ExecResponse, Executor};

#[derive(Debug, Clone)]
pub struct OneShotExecutor {
    name: String,
    content_types: Vec<ContentType>,
    command: InterpreterCommand,
}

impl OneShotExecutor {
    pub fn new(
        name: impl Into<String>,
        content_type: ContentType,
        command: InterpreterCommand,
    ) -> Self {
        Self {
            name: name.into(),
            content_types: vec![content_type],
            command,
        }
    }

    pub fn with_content_types(mut self, extra: impl IntoIterator<Item = ContentType>) -> Self {
        self.content_types.extend(extra);
        self
    }

    pub fn command(&self) -> &InterpreterCommand {
        &self.command
    }

    async fn run_once(
        &self,
        cancel: CancellationToken,
        request: ExecRequest,
    ) -> Result<i32, ExecError> {
        let ExecRequest {
            header,
            content,
            stdout,
            stderr,
            stdin,
            ..
        } = request;

        let out = OutputProxy::new(format!("{}:stdout", self.name));
        let err = OutputProxy::new(format!("{}:stderr", self.name));
        out.set_writer(stdout).await;
        err.set_writer(stderr).await;

        let wired = WiredProcess::spawn(&self.command, false, out, err).map_err(|e| {
            ExecError::Startup(format!("spawning {}: {e}", self.command.display_path()))
        })?;
        info!(
            executor = %self.name,
            request_id = %header.request_id,
            path = %self.command.display_path(),
            "started one-shot process"
        );

        let feeder = wired.feeder().clone();
        let feed = tokio::spawn(async move {
            if let Err(e) = feeder.put(content).await {
                debug!(error = %e, "feeding payload failed");
            }
            if let Some(source) = stdin {
                let _ = feeder.spawn_forward(source).await;
            }
            feeder.close().await;
        });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            code = wired.process().exited() => Some(code),
        };
        feed.abort();

        match outcome {
            Some(code) => {
                // Let the monitors drain what the child wrote before exiting.
                wired.shutdown(true).await;
                if code != 0 {
                    warn!(executor = %self.name, exit_code = code, "one-shot process failed");
                }
                Ok(code)
            }
            None => {
                info!(
                    executor = %self.name,
                    request_id = %header.request_id,
                    "one-shot request cancelled"
                );
                wired.shutdown(false).await;
                Err(ExecError::Cancelled)
            }
        }
    }
}

impl Executor for OneShotExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn content_types(&self) -> &[ContentType] {
        &self.content_types
    }

    fn execute(&self, cancel: CancellationToken, request: ExecRequest) -> ExecFuture<'_> {
        Box::pin(async move {
            let header = request.header.clone();
            let outcome = self.run_once(cancel, request).await;
            ExecResponse::from_outcome(header, outcome)
        })
    }
}
