// src/config/mod.rs

//! Snippet documents.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a document from disk (`loader.rs`).
//! - Validate its node graph and interpreter table (`validate.rs`).
//!
//! A document stands in for the external node/block store: it is turned into
//! a [`crate::graph::MemoryNodeStore`] and an executor registry.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_document_path, load_and_validate, load_from_path, parse_document};
pub use model::{BlockConfig, ConfigSection, Document, InterpreterConfig, NodeConfig};
pub use validate::validate_document;
