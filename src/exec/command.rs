// src/exec/command.rs

//! Interpreter command lines and binary resolution.
//!
//! Operators can redirect which binary backs a named interpreter with an
//! environment variable `<PREFIX>_<COMMAND>_PATH` (e.g. `AARDY_BASH_PATH`).

use std::path::{Path, PathBuf};

use tracing::debug;

/// Default prefix for override variables.
pub const DEFAULT_ENV_PREFIX: &str = "AARDY";

/// Everything needed to launch one interpreter process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl InterpreterCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set `key`, replacing an earlier value.
    pub fn set_env(&mut self, key: &str, value: &str) {
        self.env.retain(|(k, _)| k != key);
        self.env.push((key.to_string(), value.to_string()));
    }

    /// Program path as shown in logs and error messages.
    pub fn display_path(&self) -> String {
        self.program.display().to_string()
    }

    /// File name of the program, e.g. `bash` for `/bin/bash`.
    pub fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.display_path())
    }
}

/// Name of the override variable for `command` under `prefix`.
///
/// Non-alphanumeric characters become `_`: `python3.12` → `AARDY_PYTHON3_12_PATH`.
pub fn override_var_name(prefix: &str, command: &str) -> String {
    let base = Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string());

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();

    format!("{}_{}_PATH", prefix.to_uppercase(), sanitized)
}

/// Resolve `command` against the process environment.
pub fn resolve_program(prefix: &str, command: &str) -> PathBuf {
    resolve_program_with(prefix, command, |key| std::env::var(key).ok())
}

/// Resolve `command` with an explicit variable lookup.
pub fn resolve_program_with<F>(prefix: &str, command: &str, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let var = override_var_name(prefix, command);
    match lookup(&var).filter(|v| !v.trim().is_empty()) {
        Some(path) => {
            debug!(command, var = %var, path = %path, "interpreter path overridden from environment");
            PathBuf::from(path.trim())
        }
        None => PathBuf::from(command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_name_is_uppercased_and_sanitized() {
        assert_eq!(override_var_name("aardy", "bash"), "AARDY_BASH_PATH");
        assert_eq!(
            override_var_name("AARDY", "/usr/bin/python3.12"),
            "AARDY_PYTHON3_12_PATH"
        );
    }

    #[test]
    fn override_wins_when_set() {
        let resolved = resolve_program_with("AARDY", "bash", |key| {
            (key == "AARDY_BASH_PATH").then(|| "/opt/bash/bin/bash".to_string())
        });
        assert_eq!(resolved, PathBuf::from("/opt/bash/bin/bash"));
    }

    #[test]
    fn blank_override_is_ignored() {
        let resolved = resolve_program_with("AARDY", "bash", |_| Some("  ".to_string()));
        assert_eq!(resolved, PathBuf::from("bash"));
    }

    #[test]
    fn program_name_strips_directories() {
        let cmd = InterpreterCommand::new("/bin/bash").arg("--norc");
        assert_eq!(cmd.program_name(), "bash");
        assert_eq!(cmd.args, vec!["--norc".to_string()]);
    }
}
