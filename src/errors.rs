// src/errors.rs

//! Crate-wide error types.
//!
//! - [`AardyError`] is what the document/CLI layer returns.
//! - [`ExecError`] travels inside `ExecResponse`s and execution results, so it
//!   is `Clone` and only carries strings.
//! - [`ContentTypeError`] and [`GraphError`] are the narrow errors of their
//!   respective modules.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AardyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    ContentType(#[from] ContentTypeError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of a single execution request or of the executor serving it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The executor already has a request in flight.
    #[error("execution already in progress")]
    InProgress,

    #[error("no executor found for contentType={0}")]
    NoExecutor(String),

    #[error("duplicate content type: {0}")]
    DuplicateContentType(String),

    /// The interpreter could not be brought up. Persisted by the executor.
    #[error("executor startup failed: {0}")]
    Startup(String),

    /// The caller's cancellation token fired.
    #[error("context canceled")]
    Cancelled,

    #[error("{path} terminated unexpectedly, status:{status}")]
    Terminated { path: String, status: i32 },

    #[error("malformed completion marker: {0}")]
    MalformedMarker(String),

    #[error("command exited with status {0}")]
    NonZeroExit(i32),

    #[error("I/O error: {0}")]
    Io(String),

    /// The engine loop is gone; the request was never dispatched.
    #[error("execution engine stopped")]
    EngineStopped,
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeError {
    #[error("empty content type")]
    Empty,

    #[error("content type {0:?} is missing a '/subtype'")]
    MissingSubtype(String),

    #[error("content type parameter {0:?} is not of the form key=value")]
    MalformedParam(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Raised by the NodeView index on duplicate insertion.
    #[error("entry with id exists: {0}")]
    EntryExists(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AardyError>;
