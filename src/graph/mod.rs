// src/graph/mod.rs

//! Snippet graph: nodes, blocks, and the per-run indices.
//!
//! - [`node`]: `Node`/`Block` entities and the [`NodeStore`] contract.
//! - [`view`]: the NodeView index, which admits each node id once.
//! - [`build`]: breadth-first graph construction from a root node.
//! - [`results`]: the append-only execution result index.

pub mod build;
pub mod node;
pub mod results;
pub mod view;

pub use build::build_graph;
pub use node::{Block, MemoryNodeStore, Node, NodeStore};
pub use results::{ExecutionResult, ExecutionResultIndex};
pub use view::{NodeView, NodeViewIndex};
