// src/exec/mod.rs

//! Execution layer.
//!
//! This module owns the request/response contract and everything needed to
//! run payloads against interpreter processes:
//!
//! - [`feeder`]: ordered handoff of command payloads into an interpreter's stdin.
//! - [`proxy`]: reassignable, marker-scanning output sinks.
//! - [`sink`]: the best-effort downstream writer and an in-memory capture buffer.
//! - [`cancel`]: OS interrupt → cancellation bridge.
//! - [`command`]: interpreter command lines and `<PREFIX>_<COMMAND>_PATH` overrides.
//! - [`process`]: spawning (optionally under a PTY) and supervising processes.
//! - [`oneshot`]: a stateless executor that spawns one process per request.
//! - [`persistent`]: the long-lived interpreter executor and its strategies.
//! - [`registry`]: content type → executor routing.
//! - [`factory`]: building executors and registries from a snippet document.

pub mod cancel;
pub mod command;
pub mod factory;
pub mod feeder;
pub mod oneshot;
pub mod persistent;
pub mod process;
pub mod proxy;
#[cfg(unix)]
pub mod pty;
pub mod registry;
pub mod sink;

use std::fmt;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::content_type::ContentType;
use crate::errors::ExecError;

pub use cancel::CancellationBridge;
pub use command::InterpreterCommand;
pub use feeder::{CommandFeeder, FeedReader, command_feeder};
pub use oneshot::OneShotExecutor;
pub use persistent::{
    ExecutorOptions, PersistentProcessExecutor, ProcessStrategy, PromptStrategy, ShellStrategy,
};
pub use proxy::{MarkerMatch, OutputProxy};
pub use registry::Registry;
pub use sink::{BestEffortSink, SharedBuffer};

/// Exit status reported when it is not (yet) known.
pub const EXIT_STATUS_UNKNOWN: i32 = -1;

/// Downstream writer for one of a request's output streams.
pub type OutputSink = Box<dyn Write + Send>;

/// Optional extra input for a request, forwarded into the interpreter's stdin.
pub type InputSource = Box<dyn AsyncRead + Send + Unpin>;

/// Identity of one execution request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequestHeader {
    pub request_id: String,
    /// Groups the requests of one run.
    pub execution_id: String,
    pub node_id: String,
    pub block_id: String,
    pub user_id: String,
}

impl RequestHeader {
    /// A header with a fresh request id.
    pub fn new(execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            block_id: String::new(),
            user_id: String::new(),
        }
    }

    pub fn with_block(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = block_id.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// One payload to execute.
pub struct ExecRequest {
    pub header: RequestHeader,
    pub content: Vec<u8>,
    pub content_type: ContentType,
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
    pub stdin: Option<InputSource>,
}

impl ExecRequest {
    pub fn new(
        header: RequestHeader,
        content_type: ContentType,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            header,
            content: content.into(),
            content_type,
            stdout: None,
            stderr: None,
            stdin: None,
        }
    }

    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    pub fn with_stdin(mut self, source: InputSource) -> Self {
        self.stdin = Some(source);
        self
    }
}

impl fmt::Debug for ExecRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecRequest")
            .field("header", &self.header)
            .field("content_type", &self.content_type.to_string())
            .field("content_len", &self.content.len())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

/// The borrowed, thread-safe part of a request handed to strategies.
#[derive(Debug, Clone, Copy)]
pub struct RequestIo<'a> {
    pub header: &'a RequestHeader,
    pub content: &'a [u8],
    pub content_type: &'a ContentType,
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResponse {
    pub header: RequestHeader,
    pub exit_status: i32,
    pub err: Option<ExecError>,
}

impl ExecResponse {
    pub fn pending(header: RequestHeader) -> Self {
        Self {
            header,
            exit_status: EXIT_STATUS_UNKNOWN,
            err: None,
        }
    }

    pub fn failed(header: RequestHeader, err: ExecError) -> Self {
        let exit_status = match err {
            ExecError::Terminated { status, .. } | ExecError::NonZeroExit(status) => status,
            _ => EXIT_STATUS_UNKNOWN,
        };
        Self {
            header,
            exit_status,
            err: Some(err),
        }
    }

    /// Map an executor outcome (exit status or error) onto a response.
    /// Non-zero exit statuses are per-request failures.
    pub fn from_outcome(header: RequestHeader, outcome: Result<i32, ExecError>) -> Self {
        match outcome {
            Ok(0) => Self {
                header,
                exit_status: 0,
                err: None,
            },
            Ok(code) => Self::failed(header, ExecError::NonZeroExit(code)),
            Err(err) => Self::failed(header, err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none() && self.exit_status == 0
    }
}

/// Boxed future returned by [`Executor::execute`].
pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = ExecResponse> + Send + 'a>>;

/// Something that can run payloads of its declared content types.
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    fn content_types(&self) -> &[ContentType];

    /// Run one request. `cancel` is authoritative: once it fires the executor
    /// must return promptly with [`ExecError::Cancelled`].
    fn execute(&self, cancel: CancellationToken, request: ExecRequest) -> ExecFuture<'_>;

    /// Release any long-lived resources (processes). Idempotent.
    fn cleanup(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}
