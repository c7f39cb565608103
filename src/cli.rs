// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `aardy`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "aardy",
    version,
    about = "Run command-line snippets against long-lived interpreters.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `AARDY_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the node graph of a snippet document.
    Run {
        /// Snippet document (TOML). Default: `Aardy.toml`.
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Start from this node instead of the document's first root.
        #[arg(long, value_name = "ID")]
        root: Option<String>,

        /// Parse + validate, print the graph, but don't execute anything.
        #[arg(long)]
        dry_run: bool,

        /// Never allocate pseudo-terminals.
        #[arg(long)]
        disable_pty: bool,
    },

    /// Execute one snippet and exit with its status.
    Exec {
        /// Content type selecting the interpreter, e.g. `text/bash`.
        #[arg(long = "type", value_name = "CONTENT_TYPE", default_value = "text/bash")]
        content_type: String,

        /// Snippet document providing the interpreter table.
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Never allocate pseudo-terminals.
        #[arg(long)]
        disable_pty: bool,

        /// Snippet text.
        #[arg(value_name = "CONTENT")]
        content: String,
    },

    /// List the interpreters a document makes available.
    List {
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_defaults_to_bash() {
        let args = CliArgs::try_parse_from(["aardy", "exec", "echo hi"]).unwrap();
        match args.command {
            Command::Exec {
                content_type,
                content,
                ..
            } => {
                assert_eq!(content_type, "text/bash");
                assert_eq!(content, "echo hi");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn log_level_is_global() {
        let args =
            CliArgs::try_parse_from(["aardy", "run", "--dry-run", "--log-level", "debug"]).unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(args.command, Command::Run { dry_run: true, .. }));
    }
}
