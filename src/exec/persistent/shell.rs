// src/exec/persistent/shell.rs

//! Marker protocol for shells.
//!
//! Shells have no native "command finished" signal on a pipe, so every
//! payload is followed by a statement printing `__AARDY_EXIT=<status>` on a
//! line of its own. The trailer emits its own leading newline, so the marker
//! starts a line even when the payload's output did not end with one. The
//! stdout proxy strips that newline together with the marker line, and the
//! captured digits become the exit status.

use std::sync::{Arc, LazyLock};

use regex::bytes::Regex;
use tracing::debug;

use super::session::{ProcessSession, StatusReport};
use super::strategy::{ProcessStrategy, StrategyFuture};
use crate::errors::ExecError;
use crate::exec::RequestIo;
use crate::exec::command::InterpreterCommand;
use crate::exec::proxy::MarkerMatch;

/// Name of the in-band exit status marker.
pub const EXIT_MARKER: &str = "__AARDY_EXIT";

static EXIT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?m)(?:\r?\n)?^{EXIT_MARKER}=(\d+)[ \t]*\r?\n?"))
        .expect("exit marker regex is valid")
});

/// The regex the stdout proxy is armed with for every shell request.
pub fn exit_marker_regex() -> Regex {
    EXIT_MARKER_RE.clone()
}

/// The statement appended after every payload.
pub fn marker_trailer() -> String {
    format!(r"printf '\n{EXIT_MARKER}=%d\n' $?")
}

/// Turn a marker occurrence into a status report.
pub fn parse_exit_marker(found: &MarkerMatch) -> StatusReport {
    match found.group(1).map(str::parse::<i32>) {
        Some(Ok(code)) => StatusReport::exited(code),
        _ => StatusReport::failed(ExecError::MalformedMarker(found.text.trim().to_string())),
    }
}

/// Strategy for POSIX-ish shells (bash, sh, zsh, remote shells over ssh).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellStrategy;

impl ShellStrategy {
    pub fn new() -> Self {
        Self
    }

    fn arm(&self, session: &ProcessSession) {
        let router = session.router();
        session.stdout().set_marker(
            EXIT_MARKER_RE.clone(),
            Arc::new(move |found: MarkerMatch| router.publish(parse_exit_marker(&found))),
        );
    }
}

impl ProcessStrategy for ShellStrategy {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn configure(&self, command: &mut InterpreterCommand, use_pty: bool) {
        command.set_env("PS1", "");
        command.set_env("PS2", "");

        // Readline would otherwise redraw the (empty) prompt around output.
        let has_flag = command.args.iter().any(|a| a == "--noediting");
        if use_pty && command.program_name() == "bash" && !has_flag {
            command.args.insert(0, "--noediting".to_string());
        }
    }

    fn startup<'a>(&'a self, session: &'a ProcessSession) -> StrategyFuture<'a> {
        Box::pin(async move {
            self.arm(session);
            session.router().expect_probe();
            session.feeder().put("true").await?;
            session.feeder().put(marker_trailer()).await?;

            let report = session.wait_ready().await?;
            debug!(path = %session.process().path(), ?report, "shell answered startup probe");
            Ok(())
        })
    }

    fn prepare_io<'a>(
        &'a self,
        session: &'a ProcessSession,
        request: RequestIo<'a>,
    ) -> StrategyFuture<'a> {
        Box::pin(async move {
            self.arm(session);
            session.feeder().put(request.content).await?;
            session.feeder().put(marker_trailer()).await?;
            Ok(())
        })
    }
}
