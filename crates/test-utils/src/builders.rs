#![allow(dead_code)]

use aardy::config::model::{BlockConfig, Document, InterpreterConfig, NodeConfig};
use aardy::config::validate_document;
use aardy::content_type::ContentType;
use aardy::graph::{Block, MemoryNodeStore, Node};

fn ct(s: &str) -> ContentType {
    s.parse().expect("valid content type in test")
}

/// Builder for `Document` to simplify test setup.
#[derive(Default)]
pub struct DocumentBuilder {
    doc: Document,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable_pty(mut self) -> Self {
        self.doc.config.disable_pty = true;
        self
    }

    pub fn ready_timeout_ms(mut self, ms: u64) -> Self {
        self.doc.config.ready_timeout_ms = ms;
        self
    }

    pub fn with_interpreter(mut self, interp: InterpreterConfig) -> Self {
        self.doc.interpreter.push(interp);
        self
    }

    pub fn with_node(mut self, node: NodeConfigBuilder) -> Self {
        self.doc.node.push(node.build());
        self
    }

    /// Build and validate.
    pub fn build(self) -> anyhow::Result<Document> {
        validate_document(&self.doc)?;
        Ok(self.doc)
    }

    /// Build without validation (for tests feeding broken documents).
    pub fn build_unchecked(self) -> Document {
        self.doc
    }
}

/// Builder for `NodeConfig`.
pub struct NodeConfigBuilder {
    node: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            node: NodeConfig {
                id: id.to_string(),
                children: Vec::new(),
                block: Vec::new(),
            },
        }
    }

    pub fn child(mut self, id: &str) -> Self {
        self.node.children.push(id.to_string());
        self
    }

    pub fn block(mut self, content_type: &str, content: &str) -> Self {
        self.node.block.push(BlockConfig {
            id: None,
            content_type: ct(content_type),
            content: content.to_string(),
        });
        self
    }

    pub fn build(self) -> NodeConfig {
        self.node
    }
}

/// Store with one node per `(id, children, contents)` entry; every block is
/// `text/bash`.
pub fn bash_store(nodes: &[(&str, &[&str], &[&str])]) -> MemoryNodeStore {
    let mut store = MemoryNodeStore::new();
    for (id, children, contents) in nodes {
        let mut node = Node::new(*id);
        for (i, content) in contents.iter().enumerate() {
            node = node.with_block(Block::new(
                format!("{id}#{}", i + 1),
                ContentType::new("text", "bash"),
                *content,
            ));
        }
        for child in children.iter() {
            node = node.with_child(*child);
        }
        store.insert(node);
    }
    store
}
