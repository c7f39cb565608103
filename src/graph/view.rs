// src/graph/view.rs

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::GraphError;
use crate::graph::node::Node;

/// A node as seen from one traversal: the node plus its BFS depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub node: Node,
    pub depth: usize,
}

impl NodeView {
    pub fn id(&self) -> &str {
        &self.node.id
    }
}

#[derive(Debug, Default)]
struct ViewEntries {
    by_id: HashMap<String, Arc<NodeView>>,
    order: Vec<String>,
}

/// Node id → view. Each id may be added once.
#[derive(Debug, Default)]
pub struct NodeViewIndex {
    entries: RwLock<ViewEntries>,
}

impl NodeViewIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ViewEntries> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewEntries> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Add a view; a second view with the same id is rejected.
    pub fn add(&self, view: NodeView) -> Result<(), GraphError> {
        let mut entries = self.write();
        if entries.by_id.contains_key(view.id()) {
            return Err(GraphError::EntryExists(view.id().to_string()));
        }
        let id = view.id().to_string();
        entries.order.push(id.clone());
        entries.by_id.insert(id, Arc::new(view));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<NodeView>> {
        self.read().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().by_id.contains_key(id)
    }

    /// Ids in insertion (BFS) order.
    pub fn ids(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Views in insertion order.
    pub fn views(&self) -> Vec<Arc<NodeView>> {
        let entries = self.read();
        entries
            .order
            .iter()
            .filter_map(|id| entries.by_id.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
