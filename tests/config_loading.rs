// tests/config_loading.rs

mod common;

use std::fs;

use tempfile::tempdir;

use aardy::config::{load_and_validate, parse_document};
use aardy::graph::{MemoryNodeStore, NodeStore, build_graph};

const DOC: &str = r#"
[config]
disable_pty = true
ready_timeout_ms = 2500

[[interpreter]]
name = "py"
content_type = "text/python"
command = "python3"
args = ["-i", "-q"]
prompt = ">>> "

[[node]]
id = "setup"
children = ["build", "test"]

[[node.block]]
content_type = "text/bash"
content = "export STAGE=setup"

[[node]]
id = "build"
children = ["report"]

[[node.block]]
id = "compile"
content_type = "text/bash"
content = "echo building"

[[node]]
id = "test"
children = ["report"]

[[node]]
id = "report"
"#;

#[test]
fn full_document_parses_with_defaults() {
    let doc = parse_document(DOC).unwrap();

    assert!(doc.config.disable_pty);
    assert_eq!(doc.config.ready_timeout_ms, 2500);
    assert_eq!(doc.interpreter.len(), 1);
    assert!(doc.interpreter[0].persistent);
    assert_eq!(doc.interpreter[0].prompt.as_deref(), Some(">>> "));
    assert_eq!(doc.default_root(), Some("setup"));
    assert_eq!(doc.find_node("build").unwrap().block[0].id.as_deref(), Some("compile"));
}

#[test]
fn store_and_graph_follow_the_document() {
    let doc = parse_document(DOC).unwrap();
    let store = MemoryNodeStore::from_document(&doc);

    let setup = store.get_node_view("setup").unwrap();
    assert_eq!(setup.blocks[0].id, "setup#1");
    assert_eq!(store.get_node_view("build").unwrap().blocks[0].id, "compile");

    let index = build_graph(&store, "setup").unwrap();
    assert_eq!(index.ids(), vec!["setup", "build", "test", "report"]);
    assert_eq!(index.get("report").unwrap().depth, 2);
}

#[test]
fn load_and_validate_reads_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Aardy.toml");
    fs::write(&path, DOC).unwrap();

    let doc = load_and_validate(&path).unwrap();
    assert_eq!(doc.node.len(), 4);
}

#[test]
fn cycles_are_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cycle.toml");
    fs::write(
        &path,
        r#"
[[node]]
id = "a"
children = ["b"]

[[node]]
id = "b"
children = ["a"]
"#,
    )
    .unwrap();

    let err = load_and_validate(&path).unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("validating snippet document"), "{chain}");
    assert!(chain.contains("cycle detected"), "{chain}");
}

#[test]
fn missing_file_reports_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = load_and_validate(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.toml"));
}

#[test]
fn bad_content_type_is_a_parse_error() {
    let err = parse_document(
        r#"
[[interpreter]]
name = "broken"
content_type = "bash"
command = "bash"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().starts_with("TOML parsing error"), "{err}");
}
