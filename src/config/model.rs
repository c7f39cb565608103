// src/config/model.rs

use serde::Deserialize;

use crate::content_type::ContentType;

/// A snippet document as read from TOML.
///
/// ```toml
/// [config]
/// disable_pty = false
///
/// [[interpreter]]
/// name = "psql"
/// content_type = "text/sql"
/// command = "psql"
/// prompt = "db>"
/// prompt_assign = "\\set PROMPT1 'db>'"
///
/// [[node]]
/// id = "setup"
/// children = ["query"]
///
/// [[node.block]]
/// content_type = "text/bash"
/// content = "export PGDATABASE=demo"
/// ```
///
/// Every section is optional. Without `[[interpreter]]` entries the document
/// runs against [`default_interpreters`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub interpreter: Vec<InterpreterConfig>,

    #[serde(default)]
    pub node: Vec<NodeConfig>,
}

impl Document {
    /// Declared interpreters, or the defaults when none are declared.
    pub fn interpreters(&self) -> Vec<InterpreterConfig> {
        if self.interpreter.is_empty() {
            default_interpreters()
        } else {
            self.interpreter.clone()
        }
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeConfig> {
        self.node.iter().find(|n| n.id == id)
    }

    /// The node a run starts from when none is named: the first node that is
    /// nobody's child, falling back to the first node.
    pub fn default_root(&self) -> Option<&str> {
        self.node
            .iter()
            .find(|candidate| {
                !self
                    .node
                    .iter()
                    .any(|n| n.children.iter().any(|c| c == &candidate.id))
            })
            .or_else(|| self.node.first())
            .map(|n| n.id.as_str())
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Never allocate pseudo-terminals for persistent interpreters.
    #[serde(default)]
    pub disable_pty: bool,

    /// How long a persistent interpreter may take to become ready.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Prefix of the `<PREFIX>_<COMMAND>_PATH` override variables.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_env_prefix() -> String {
    crate::exec::command::DEFAULT_ENV_PREFIX.to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            disable_pty: false,
            ready_timeout_ms: default_ready_timeout_ms(),
            env_prefix: default_env_prefix(),
        }
    }
}

/// One `[[interpreter]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InterpreterConfig {
    pub name: String,

    /// Content type the interpreter is registered under.
    pub content_type: ContentType,

    /// Command name; resolved through the override variable, then `PATH`.
    /// May be left out when the content type carries `command=...`.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Keep one process alive across requests.
    #[serde(default = "default_persistent")]
    pub persistent: bool,

    /// Prompt that marks the interpreter ready for input. Switches the
    /// interpreter from the exit-marker protocol to prompt detection.
    #[serde(default)]
    pub prompt: Option<String>,

    /// Statement fed at startup to install `prompt`.
    #[serde(default)]
    pub prompt_assign: Option<String>,

    /// Statement template used to echo completion tokens.
    #[serde(default)]
    pub echo: Option<String>,
}

fn default_persistent() -> bool {
    true
}

impl InterpreterConfig {
    pub fn new(name: &str, content_type: ContentType, command: &str) -> Self {
        Self {
            name: name.to_string(),
            content_type,
            command: command.to_string(),
            args: Vec::new(),
            persistent: true,
            prompt: None,
            prompt_assign: None,
            echo: None,
        }
    }

    pub fn one_shot(mut self) -> Self {
        self.persistent = false;
        self
    }
}

/// Interpreters available when a document declares none.
pub fn default_interpreters() -> Vec<InterpreterConfig> {
    vec![
        InterpreterConfig::new("bash", ContentType::new("text", "bash"), "bash"),
        InterpreterConfig::new("sh", ContentType::new("text", "sh"), "sh").one_shot(),
    ]
}

/// One `[[node]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,

    #[serde(default)]
    pub children: Vec<String>,

    #[serde(default)]
    pub block: Vec<BlockConfig>,
}

/// One `[[node.block]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockConfig {
    /// Defaults to `<node>#<position>`.
    #[serde(default)]
    pub id: Option<String>,

    pub content_type: ContentType,

    pub content: String,
}
