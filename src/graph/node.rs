// src/graph/node.rs

use std::collections::HashMap;

use crate::config::model::Document;
use crate::content_type::ContentType;
use crate::errors::GraphError;

/// One executable payload of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub content: String,
    pub content_type: ContentType,
}

impl Block {
    pub fn new(
        id: impl Into<String>,
        content_type: ContentType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            content_type,
        }
    }
}

/// A node of the snippet graph: ordered blocks plus child node ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    pub id: String,
    pub blocks: Vec<Block>,
    pub children: Vec<String>,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }
}

/// Source of nodes for graph construction.
pub trait NodeStore: Send + Sync {
    fn get_node_view(&self, id: &str) -> Result<Node, GraphError>;
}

/// In-memory store, typically built from a snippet document.
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeStore {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node.
    pub fn insert(&mut self, node: Node) {
        if !self.nodes.contains_key(&node.id) {
            self.order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn from_document(doc: &Document) -> Self {
        let mut store = Self::new();
        for cfg in &doc.node {
            let blocks = cfg
                .block
                .iter()
                .enumerate()
                .map(|(i, b)| Block {
                    id: b.id.clone().unwrap_or_else(|| format!("{}#{}", cfg.id, i + 1)),
                    content: b.content.clone(),
                    content_type: b.content_type.clone(),
                })
                .collect();
            store.insert(Node {
                id: cfg.id.clone(),
                blocks,
                children: cfg.children.clone(),
            });
        }
        store
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn get_node_view(&self, id: &str) -> Result<Node, GraphError> {
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }
}
