// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::Document;
use crate::content_type::PARAM_COMMAND;
use crate::errors::{AardyError, Result};

/// Semantic checks on a loaded document.
///
/// - node and block ids are unique, children refer to existing nodes
/// - the node graph has no cycles
/// - interpreter names and content types are unique
/// - prompt-driven interpreters are persistent
pub fn validate_document(doc: &Document) -> Result<()> {
    validate_interpreters(doc)?;
    validate_nodes(doc)?;
    validate_dag(doc)?;
    Ok(())
}

macro_rules! config_error {
    ($($arg:tt)*) => {
        AardyError::ConfigError(format!($($arg)*))
    };
}

fn validate_interpreters(doc: &Document) -> Result<()> {
    let mut names = HashSet::new();
    let mut types = HashSet::new();

    for interp in &doc.interpreter {
        if interp.name.trim().is_empty() {
            return Err(config_error!("interpreter with empty name"));
        }
        if !names.insert(interp.name.as_str()) {
            return Err(config_error!("duplicate interpreter name '{}'", interp.name));
        }
        if !types.insert(interp.content_type.clone()) {
            return Err(config_error!(
                "interpreter '{}' reuses content type {}",
                interp.name,
                interp.content_type
            ));
        }
        if interp.command.trim().is_empty()
            && interp.content_type.param(PARAM_COMMAND).is_none()
        {
            return Err(config_error!("interpreter '{}' has an empty command", interp.name));
        }
        if interp.prompt.is_some() && !interp.persistent {
            return Err(config_error!(
                "interpreter '{}' sets a prompt but is not persistent",
                interp.name
            ));
        }
        if interp.prompt.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(config_error!("interpreter '{}' has an empty prompt", interp.name));
        }
    }
    Ok(())
}

fn validate_nodes(doc: &Document) -> Result<()> {
    let ids: HashSet<&str> = doc.node.iter().map(|n| n.id.as_str()).collect();
    if ids.len() != doc.node.len() {
        let mut seen = HashSet::new();
        for node in &doc.node {
            if !seen.insert(node.id.as_str()) {
                return Err(config_error!("duplicate node id '{}'", node.id));
            }
        }
    }

    let mut block_ids = HashSet::new();
    for node in &doc.node {
        for child in &node.children {
            if child == &node.id {
                return Err(config_error!("node '{}' cannot be its own child", node.id));
            }
            if !ids.contains(child.as_str()) {
                return Err(config_error!(
                    "node '{}' has unknown child '{}'",
                    node.id,
                    child
                ));
            }
        }
        for block in &node.block {
            if let Some(id) = &block.id {
                if !block_ids.insert(id.as_str()) {
                    return Err(config_error!("duplicate block id '{}' in node '{}'", id, node.id));
                }
            }
        }
    }
    Ok(())
}

fn validate_dag(doc: &Document) -> Result<()> {
    // Edge direction: parent -> child.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for node in &doc.node {
        graph.add_node(node.id.as_str());
    }
    for node in &doc.node {
        for child in &node.children {
            graph.add_edge(node.id.as_str(), child.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(config_error!(
            "cycle detected in node graph involving node '{}'",
            cycle.node_id()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_document;

    fn check(toml: &str) -> Result<()> {
        validate_document(&parse_document(toml)?)
    }

    #[test]
    fn accepts_a_diamond() {
        check(
            r#"
            [[node]]
            id = "a"
            children = ["b", "c"]
            [[node]]
            id = "b"
            children = ["d"]
            [[node]]
            id = "c"
            children = ["d"]
            [[node]]
            id = "d"
            "#,
        )
        .expect("diamond is valid");
    }

    #[test]
    fn rejects_cycles() {
        let err = check(
            r#"
            [[node]]
            id = "a"
            children = ["b"]
            [[node]]
            id = "b"
            children = ["a"]
            "#,
        )
        .expect_err("cycle must be rejected");
        assert!(err.to_string().contains("cycle detected"), "{err}");
    }

    #[test]
    fn rejects_unknown_children_and_self_edges() {
        let err = check(
            r#"
            [[node]]
            id = "a"
            children = ["ghost"]
            "#,
        )
        .expect_err("unknown child");
        assert!(err.to_string().contains("unknown child 'ghost'"), "{err}");

        let err = check(
            r#"
            [[node]]
            id = "a"
            children = ["a"]
            "#,
        )
        .expect_err("self edge");
        assert!(err.to_string().contains("own child"), "{err}");
    }

    #[test]
    fn rejects_duplicate_nodes() {
        let err = check(
            r#"
            [[node]]
            id = "a"
            [[node]]
            id = "a"
            "#,
        )
        .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate node id 'a'"), "{err}");
    }

    #[test]
    fn prompt_interpreters_must_be_persistent() {
        let err = check(
            r#"
            [[interpreter]]
            name = "db"
            content_type = "text/sql"
            command = "sqlite3"
            persistent = false
            prompt = "db>"
            "#,
        )
        .expect_err("one-shot prompt interpreter");
        assert!(err.to_string().contains("not persistent"), "{err}");
    }

    #[test]
    fn rejects_reused_content_types() {
        let err = check(
            r#"
            [[interpreter]]
            name = "bash"
            content_type = "text/bash"
            command = "bash"
            [[interpreter]]
            name = "bash2"
            content_type = "TEXT/Bash"
            command = "bash"
            "#,
        )
        .expect_err("same content type");
        assert!(err.to_string().contains("reuses content type"), "{err}");
    }
}
