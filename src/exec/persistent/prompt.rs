// src/exec/persistent/prompt.rs

//! Prompt-driven REPLs (database clients and the like).
//!
//! Readiness is the prompt showing up on stdout. Each request is followed by
//! an echo of a token unique to that request; seeing the token at the start
//! of a line completes the request with status 0.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::bytes::Regex;
use tracing::debug;

use super::session::{ProcessSession, StatusReport};
use super::strategy::{ProcessStrategy, StrategyFuture};
use crate::content_type::{ContentType, PARAM_PROMPT, PARAM_PROMPT_ASSIGN};
use crate::errors::ExecError;
use crate::exec::RequestIo;
use crate::exec::proxy::MarkerMatch;

/// Prefix of per-request completion tokens.
pub const DONE_MARKER: &str = "__AARDY_DONE";

/// Content type parameter naming the echo statement.
pub const PARAM_ECHO: &str = "echo";

const DEFAULT_ECHO: &str = "echo";

#[derive(Debug)]
pub struct PromptStrategy {
    prompt: String,
    prompt_assign: Option<String>,
    echo: String,
    sequence: AtomicU64,
}

impl PromptStrategy {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            prompt_assign: None,
            echo: DEFAULT_ECHO.to_string(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Statement fed at startup to set the prompt, e.g. `\set PROMPT1 'db> '`.
    pub fn with_prompt_assign(mut self, statement: impl Into<String>) -> Self {
        self.prompt_assign = Some(statement.into());
        self
    }

    /// Statement printing the completion token. `{}` is replaced by the
    /// token; without a placeholder the token is appended after a space.
    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.echo = echo.into();
        self
    }

    /// Build from a registration content type carrying `prompt=...`.
    pub fn from_content_type(content_type: &ContentType) -> Option<Self> {
        let prompt = content_type.param(PARAM_PROMPT)?;
        let mut strategy = Self::new(prompt);
        if let Some(assign) = content_type.param(PARAM_PROMPT_ASSIGN) {
            strategy = strategy.with_prompt_assign(assign);
        }
        if let Some(echo) = content_type.param(PARAM_ECHO) {
            strategy = strategy.with_echo(echo);
        }
        Some(strategy)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    fn prompt_regex(&self) -> Result<Regex, ExecError> {
        Regex::new(&format!(r"(?m)^{}[ \t]*", regex::escape(&self.prompt)))
            .map_err(|e| ExecError::Startup(format!("invalid prompt {:?}: {e}", self.prompt)))
    }

    fn next_token(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{DONE_MARKER}_{n}")
    }

    fn completion_statement(&self, token: &str) -> String {
        if self.echo.contains("{}") {
            self.echo.replace("{}", token)
        } else {
            format!("{} {}", self.echo, token)
        }
    }
}

impl ProcessStrategy for PromptStrategy {
    fn name(&self) -> &'static str {
        "prompt"
    }

    fn startup<'a>(&'a self, session: &'a ProcessSession) -> StrategyFuture<'a> {
        Box::pin(async move {
            let router = session.router();
            session.stdout().set_marker(
                self.prompt_regex()?,
                Arc::new(move |_: MarkerMatch| router.signal_ready()),
            );

            if let Some(assign) = &self.prompt_assign {
                session.feeder().put(assign.as_str()).await?;
            }
            // An empty line makes the REPL print its prompt again.
            session.feeder().put("").await?;

            session.wait_ready().await?;
            session.stdout().clear_marker();
            debug!(prompt = %self.prompt, "prompt observed; interpreter ready");
            Ok(())
        })
    }

    fn prepare_io<'a>(
        &'a self,
        session: &'a ProcessSession,
        request: RequestIo<'a>,
    ) -> StrategyFuture<'a> {
        Box::pin(async move {
            let token = self.next_token();
            let regex = Regex::new(&format!(r"(?m)^[ \t]*{}\s*", regex::escape(&token)))
                .map_err(|e| ExecError::Io(e.to_string()))?;

            let router = session.router();
            session.stdout().set_marker(
                regex,
                Arc::new(move |_: MarkerMatch| router.publish(StatusReport::exited(0))),
            );

            session.feeder().put(request.content).await?;
            session.feeder().put(self.completion_statement(&token)).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_from_content_type_params() {
        let ct: ContentType = "text/sql;prompt=db>,prompt-assign=\\set PROMPT1 'db>',echo=select '{}'"
            .parse()
            .unwrap();
        let strategy = PromptStrategy::from_content_type(&ct).unwrap();
        assert_eq!(strategy.prompt(), "db>");
        assert_eq!(strategy.prompt_assign.as_deref(), Some("\\set PROMPT1 'db>'"));
        assert_eq!(
            strategy.completion_statement("__AARDY_DONE_1"),
            "select '__AARDY_DONE_1'"
        );
    }

    #[test]
    fn tokens_are_unique_per_request() {
        let strategy = PromptStrategy::new("> ");
        assert_eq!(strategy.next_token(), "__AARDY_DONE_1");
        assert_eq!(strategy.next_token(), "__AARDY_DONE_2");
        assert_eq!(strategy.completion_statement("__AARDY_DONE_3"), "echo __AARDY_DONE_3");
    }

    #[test]
    fn prompt_regex_escapes_metacharacters() {
        let strategy = PromptStrategy::new("db=#");
        let regex = strategy.prompt_regex().unwrap();
        assert!(regex.is_match(b"db=# "));
        assert!(PromptStrategy::new("(x)").prompt_regex().unwrap().is_match(b"(x)"));
    }

    #[test]
    fn missing_prompt_param_yields_none() {
        let ct: ContentType = "text/bash".parse().unwrap();
        assert!(PromptStrategy::from_content_type(&ct).is_none());
    }
}
