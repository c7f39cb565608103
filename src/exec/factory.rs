// src/exec/factory.rs

//! Building executors from `[[interpreter]]` entries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::model::{ConfigSection, Document, InterpreterConfig};
use crate::content_type::PARAM_COMMAND;
use crate::errors::ExecError;
use crate::exec::command::{InterpreterCommand, resolve_program};
use crate::exec::persistent::{
    ExecutorOptions, PersistentProcessExecutor, PromptStrategy, ShellStrategy,
};
use crate::exec::{Executor, OneShotExecutor, Registry};

#[derive(Debug, Clone)]
pub struct ExecutorFactory {
    env_prefix: String,
    options: ExecutorOptions,
}

impl Default for ExecutorFactory {
    fn default() -> Self {
        Self::from_config(&ConfigSection::default())
    }
}

impl ExecutorFactory {
    pub fn from_config(cfg: &ConfigSection) -> Self {
        Self {
            env_prefix: cfg.env_prefix.clone(),
            options: ExecutorOptions {
                disable_pty: cfg.disable_pty,
                ready_timeout: Duration::from_millis(cfg.ready_timeout_ms),
                ..ExecutorOptions::default()
            },
        }
    }

    /// Force PTYs off regardless of the document.
    pub fn disable_pty(mut self, disable: bool) -> Self {
        self.options.disable_pty |= disable;
        self
    }

    /// Route SIGINT to the request in flight of persistent interpreters.
    pub fn interrupt_bridge(mut self, enabled: bool) -> Self {
        self.options.interrupt_bridge = enabled;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Command line for `interp`, with the program resolved through the
    /// override variable.
    pub fn command_for(&self, interp: &InterpreterConfig) -> InterpreterCommand {
        let command = match interp.command.trim() {
            "" => interp.content_type.param(PARAM_COMMAND).unwrap_or_default(),
            name => name,
        };
        InterpreterCommand::new(resolve_program(&self.env_prefix, command))
            .args(interp.args.iter().cloned())
    }

    pub fn build(&self, interp: &InterpreterConfig) -> Arc<dyn Executor> {
        let command = self.command_for(interp);
        let content_type = interp.content_type.clone();

        if !interp.persistent {
            debug!(name = %interp.name, program = %command.display_path(), "one-shot interpreter");
            return Arc::new(OneShotExecutor::new(&interp.name, content_type, command));
        }

        let prompt = interp
            .prompt
            .as_ref()
            .map(|prompt| {
                let mut strategy = PromptStrategy::new(prompt);
                if let Some(assign) = &interp.prompt_assign {
                    strategy = strategy.with_prompt_assign(assign);
                }
                if let Some(echo) = &interp.echo {
                    strategy = strategy.with_echo(echo);
                }
                strategy
            })
            .or_else(|| PromptStrategy::from_content_type(&content_type));

        debug!(
            name = %interp.name,
            program = %command.display_path(),
            prompt = prompt.as_ref().map(|p| p.prompt()),
            "persistent interpreter"
        );

        match prompt {
            Some(strategy) => Arc::new(
                PersistentProcessExecutor::new(&interp.name, content_type, command, strategy)
                    .with_options(self.options.clone()),
            ),
            None => Arc::new(
                PersistentProcessExecutor::new(
                    &interp.name,
                    content_type,
                    command,
                    ShellStrategy::new(),
                )
                .with_options(self.options.clone()),
            ),
        }
    }

    pub fn build_registry(&self, interps: &[InterpreterConfig]) -> Result<Registry, ExecError> {
        let mut registry = Registry::new();
        for interp in interps {
            registry.register(self.build(interp))?;
        }
        info!(executors = registry.executors().len(), "executor registry ready");
        Ok(registry)
    }

    /// Registry for every interpreter the document makes available.
    pub fn registry_for(&self, doc: &Document) -> Result<Registry, ExecError> {
        self.build_registry(&doc.interpreters())
    }
}
