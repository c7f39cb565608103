// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::model::Document;
use crate::config::validate::validate_document;

/// Read and deserialize a snippet document without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading snippet document at {:?}", path))?;

    parse_document(&contents).with_context(|| format!("parsing snippet document {:?}", path))
}

/// Deserialize a document from TOML text.
pub fn parse_document(contents: &str) -> crate::errors::Result<Document> {
    let doc: Document = toml::from_str(contents)?;
    Ok(doc)
}

/// Load a document and check its node graph and interpreters.
///
/// This is the entry point the CLI uses.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Document> {
    let doc = load_from_path(&path)?;
    validate_document(&doc)
        .with_context(|| format!("validating snippet document {:?}", path.as_ref()))?;
    Ok(doc)
}

/// `Aardy.toml` in the current working directory.
pub fn default_document_path() -> PathBuf {
    PathBuf::from("Aardy.toml")
}
