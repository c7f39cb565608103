// src/graph/build.rs

use std::collections::VecDeque;

use tracing::debug;

use crate::errors::GraphError;
use crate::graph::node::NodeStore;
use crate::graph::view::{NodeView, NodeViewIndex};

/// Breadth-first expansion of the graph reachable from `root`.
///
/// A node reachable through several parents is indexed once, at the depth
/// it was first reached.
pub fn build_graph(store: &dyn NodeStore, root: &str) -> Result<NodeViewIndex, GraphError> {
    let index = NodeViewIndex::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::from([(root.to_string(), 0)]);

    while let Some((id, depth)) = queue.pop_front() {
        if index.contains(&id) {
            continue;
        }

        let node = store.get_node_view(&id)?;
        for child in &node.children {
            if !index.contains(child) {
                queue.push_back((child.clone(), depth + 1));
            }
        }

        debug!(node = %id, depth, children = node.children.len(), "indexed node");
        index.add(NodeView { node, depth })?;
    }

    Ok(index)
}
