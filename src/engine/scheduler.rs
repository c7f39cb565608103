// src/engine/scheduler.rs

//! Per-run node state for a graph execution.
//!
//! The scheduler is a pure structure: it decides which blocks may be handed to
//! the engine and reacts to their completion. It never performs IO.
//!
//! Rules:
//! - a node starts once every parent inside the run finished successfully;
//! - the blocks of a node run one after another, in declaration order;
//! - blocks whose content types resolve to the same executor ("lane") are
//!   dispatched one at a time, in FIFO order;
//! - a failed block fails its node and skips every pending descendant.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::content_type::ContentType;
use crate::exec::Registry;
use crate::graph::{Block, NodeViewIndex};

/// Maps a block's content type to the lane it is serialised on.
pub type LaneResolver = Box<dyn Fn(&ContentType) -> String + Send + Sync>;

/// Lane resolver keyed by the executor the registry would pick.
///
/// Content types without an executor get a lane of their own; dispatching
/// them fails fast inside the engine.
pub fn lane_by_executor(registry: Arc<Registry>) -> LaneResolver {
    Box::new(move |content_type: &ContentType| match registry.get(content_type) {
        Ok(executor) => executor.name().to_string(),
        Err(_) => format!("unresolved:{content_type}"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRunState {
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
    /// Never started because an ancestor failed (or the run was abandoned).
    Skipped,
}

impl NodeRunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeRunState::DoneSuccess | NodeRunState::DoneFailed | NodeRunState::Skipped
        )
    }
}

/// A block that may be submitted now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledBlock {
    pub node_id: String,
    pub block_index: usize,
    pub block: Block,
    pub lane: String,
}

/// Final node counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

#[derive(Debug)]
struct NodeSlot {
    blocks: Vec<Block>,
    next_block: usize,
    parents: Vec<String>,
    children: Vec<String>,
    state: NodeRunState,
}

#[derive(Debug, Default)]
struct Lane {
    busy: bool,
    queue: VecDeque<ScheduledBlock>,
}

pub struct GraphScheduler {
    nodes: HashMap<String, NodeSlot>,
    order: Vec<String>,
    lanes: BTreeMap<String, Lane>,
    lane_of: LaneResolver,
}

impl fmt::Debug for GraphScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphScheduler")
            .field("nodes", &self.nodes)
            .field("order", &self.order)
            .field("lanes", &self.lanes)
            .finish_non_exhaustive()
    }
}

impl GraphScheduler {
    pub fn new(index: &NodeViewIndex, lane_of: LaneResolver) -> Self {
        let views = index.views();
        let in_run: HashSet<&str> = views.iter().map(|v| v.id()).collect();

        let mut parents: HashMap<String, Vec<String>> = HashMap::new();
        for view in &views {
            for child in &view.node.children {
                if in_run.contains(child.as_str()) {
                    parents
                        .entry(child.clone())
                        .or_default()
                        .push(view.id().to_string());
                }
            }
        }

        let mut nodes = HashMap::new();
        let mut order = Vec::with_capacity(views.len());
        for view in &views {
            let id = view.id().to_string();
            nodes.insert(
                id.clone(),
                NodeSlot {
                    blocks: view.node.blocks.clone(),
                    next_block: 0,
                    parents: parents.remove(&id).unwrap_or_default(),
                    children: view.node.children.clone(),
                    state: NodeRunState::Pending,
                },
            );
            order.push(id);
        }

        Self {
            nodes,
            order,
            lanes: BTreeMap::new(),
            lane_of,
        }
    }

    /// Blocks that can be submitted at the start of the run.
    pub fn start(&mut self) -> Vec<ScheduledBlock> {
        self.promote_ready();
        self.dispatch()
    }

    /// Record the completion of the block currently running for `node_id`
    /// and return whatever became dispatchable.
    pub fn handle_completion(&mut self, node_id: &str, success: bool) -> Vec<ScheduledBlock> {
        let Some(slot) = self.nodes.get_mut(node_id) else {
            warn!(node = %node_id, "completion for a node outside this run");
            return Vec::new();
        };
        if slot.state != NodeRunState::Running {
            warn!(node = %node_id, state = ?slot.state, "completion for a node that is not running");
            return Vec::new();
        }

        let lane = slot
            .blocks
            .get(slot.next_block)
            .map(|block| (self.lane_of)(&block.content_type));
        if let Some(lane) = lane.and_then(|l| self.lanes.get_mut(&l)) {
            lane.busy = false;
        }

        if success {
            self.advance(node_id);
        } else {
            if let Some(slot) = self.nodes.get_mut(node_id) {
                slot.state = NodeRunState::DoneFailed;
            }
            info!(node = %node_id, "node failed");
            let skipped = self.skip_descendants(node_id);
            if !skipped.is_empty() {
                info!(node = %node_id, ?skipped, "skipping dependents of failed node");
            }
        }

        self.promote_ready();
        self.dispatch()
    }

    /// Mark every still-pending node skipped. Used when a run can make no
    /// further progress (cyclic stores, cancelled runs).
    pub fn abandon_pending(&mut self) -> Vec<String> {
        let mut abandoned = Vec::new();
        for id in &self.order {
            if let Some(slot) = self.nodes.get_mut(id) {
                if slot.state == NodeRunState::Pending {
                    slot.state = NodeRunState::Skipped;
                    abandoned.push(id.clone());
                }
            }
        }
        abandoned
    }

    pub fn state_of(&self, node_id: &str) -> Option<NodeRunState> {
        self.nodes.get(node_id).map(|slot| slot.state)
    }

    /// True once no node is pending or running.
    pub fn is_finished(&self) -> bool {
        self.nodes.values().all(|slot| slot.state.is_terminal())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for slot in self.nodes.values() {
            match slot.state {
                NodeRunState::DoneSuccess => summary.succeeded += 1,
                NodeRunState::DoneFailed => summary.failed += 1,
                NodeRunState::Skipped => summary.skipped += 1,
                NodeRunState::Pending | NodeRunState::Running => {}
            }
        }
        summary
    }

    fn is_ready(&self, id: &str) -> bool {
        let Some(slot) = self.nodes.get(id) else {
            return false;
        };
        slot.state == NodeRunState::Pending
            && slot.parents.iter().all(|p| {
                self.nodes
                    .get(p)
                    .is_some_and(|parent| parent.state == NodeRunState::DoneSuccess)
            })
    }

    fn promote_ready(&mut self) {
        loop {
            let ready: Vec<String> = self
                .order
                .iter()
                .filter(|id| self.is_ready(id))
                .cloned()
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                if let Some(slot) = self.nodes.get_mut(&id) {
                    slot.state = NodeRunState::Running;
                }
                debug!(node = %id, "node started");
                self.enqueue_next_block(&id);
            }
        }
    }

    /// Queue the node's current block, or finish it when none is left.
    fn enqueue_next_block(&mut self, id: &str) {
        let Some(slot) = self.nodes.get_mut(id) else {
            return;
        };
        match slot.blocks.get(slot.next_block) {
            Some(block) => {
                let scheduled = ScheduledBlock {
                    node_id: id.to_string(),
                    block_index: slot.next_block,
                    block: block.clone(),
                    lane: (self.lane_of)(&block.content_type),
                };
                self.lanes
                    .entry(scheduled.lane.clone())
                    .or_default()
                    .queue
                    .push_back(scheduled);
            }
            None => {
                slot.state = NodeRunState::DoneSuccess;
                info!(node = %id, blocks = slot.blocks.len(), "node succeeded");
            }
        }
    }

    fn advance(&mut self, id: &str) {
        if let Some(slot) = self.nodes.get_mut(id) {
            slot.next_block += 1;
        }
        self.enqueue_next_block(id);
    }

    fn skip_descendants(&mut self, failed: &str) -> Vec<String> {
        let mut stack: Vec<String> = self
            .nodes
            .get(failed)
            .map(|slot| slot.children.clone())
            .unwrap_or_default();
        let mut skipped = Vec::new();

        while let Some(id) = stack.pop() {
            if let Some(slot) = self.nodes.get_mut(&id) {
                if slot.state == NodeRunState::Pending {
                    slot.state = NodeRunState::Skipped;
                    skipped.push(id.clone());
                    stack.extend(slot.children.iter().cloned());
                }
            }
        }

        skipped
    }

    fn dispatch(&mut self) -> Vec<ScheduledBlock> {
        let mut ready = Vec::new();
        for (name, lane) in self.lanes.iter_mut() {
            if lane.busy {
                continue;
            }
            if let Some(block) = lane.queue.pop_front() {
                debug!(lane = %name, node = %block.node_id, block = %block.block.id, "dispatching block");
                lane.busy = true;
                ready.push(block);
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryNodeStore, Node, build_graph};

    fn bash() -> ContentType {
        ContentType::new("text", "bash")
    }

    fn block(id: &str, ct: ContentType) -> Block {
        Block::new(id, ct, "true")
    }

    fn by_essence() -> LaneResolver {
        Box::new(|ct: &ContentType| ct.essence())
    }

    fn scheduler(nodes: Vec<Node>, root: &str) -> GraphScheduler {
        let mut store = MemoryNodeStore::new();
        for node in nodes {
            store.insert(node);
        }
        let index = build_graph(&store, root).expect("graph builds");
        GraphScheduler::new(&index, by_essence())
    }

    fn ids(blocks: &[ScheduledBlock]) -> Vec<&str> {
        blocks.iter().map(|b| b.block.id.as_str()).collect()
    }

    #[test]
    fn children_wait_for_every_parent() {
        let mut s = scheduler(
            vec![
                Node::new("root")
                    .with_block(block("r", bash()))
                    .with_child("a")
                    .with_child("b"),
                Node::new("a")
                    .with_block(block("a", ContentType::new("text", "sh")))
                    .with_child("join"),
                Node::new("b")
                    .with_block(block("b", ContentType::new("text", "python")))
                    .with_child("join"),
                Node::new("join").with_block(block("j", bash())),
            ],
            "root",
        );

        assert_eq!(ids(&s.start()), vec!["r"]);
        let next = s.handle_completion("root", true);
        assert_eq!(ids(&next), vec!["b", "a"]);

        assert!(s.handle_completion("a", true).is_empty());
        assert_eq!(s.state_of("join"), Some(NodeRunState::Pending));

        assert_eq!(ids(&s.handle_completion("b", true)), vec!["j"]);
        assert!(s.handle_completion("join", true).is_empty());
        assert!(s.is_finished());
        assert_eq!(
            s.summary(),
            RunSummary {
                succeeded: 4,
                failed: 0,
                skipped: 0
            }
        );
    }

    #[test]
    fn blocks_of_a_node_run_in_order() {
        let mut s = scheduler(
            vec![
                Node::new("n")
                    .with_block(block("first", bash()))
                    .with_block(block("second", bash())),
            ],
            "n",
        );

        assert_eq!(ids(&s.start()), vec!["first"]);
        assert_eq!(ids(&s.handle_completion("n", true)), vec!["second"]);
        assert!(s.handle_completion("n", true).is_empty());
        assert_eq!(s.state_of("n"), Some(NodeRunState::DoneSuccess));
    }

    #[test]
    fn shared_lane_is_serialised() {
        let mut s = scheduler(
            vec![
                Node::new("root").with_child("a").with_child("b"),
                Node::new("a").with_block(block("a", bash())),
                Node::new("b").with_block(block("b", bash())),
            ],
            "root",
        );

        // Empty root completes immediately; both children share the bash lane.
        assert_eq!(ids(&s.start()), vec!["a"]);
        assert_eq!(s.state_of("b"), Some(NodeRunState::Running));
        assert_eq!(ids(&s.handle_completion("a", true)), vec!["b"]);
    }

    #[test]
    fn failure_skips_descendants_only() {
        let mut s = scheduler(
            vec![
                Node::new("root").with_child("bad").with_child("good"),
                Node::new("bad")
                    .with_block(block("bad", bash()))
                    .with_child("below"),
                Node::new("good").with_block(block("good", ContentType::new("text", "sh"))),
                Node::new("below").with_block(block("below", bash())),
            ],
            "root",
        );

        let first = s.start();
        assert_eq!(first.len(), 2);
        assert!(s.handle_completion("bad", false).is_empty());
        assert_eq!(s.state_of("below"), Some(NodeRunState::Skipped));
        assert!(s.handle_completion("good", true).is_empty());

        assert!(s.is_finished());
        assert_eq!(
            s.summary(),
            RunSummary {
                succeeded: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert!(!s.summary().is_success());
    }

    #[test]
    fn cycle_is_abandoned() {
        let mut s = scheduler(
            vec![
                Node::new("a").with_child("b"),
                Node::new("b").with_child("a"),
            ],
            "a",
        );
        assert!(s.start().is_empty());
        assert!(!s.is_finished());
        assert_eq!(s.abandon_pending(), vec!["a".to_string(), "b".to_string()]);
        assert!(s.is_finished());
    }

    #[test]
    fn stray_completion_is_ignored() {
        let mut s = scheduler(vec![Node::new("n").with_block(block("x", bash()))], "n");
        assert!(s.handle_completion("missing", true).is_empty());
        assert!(s.handle_completion("n", true).is_empty());
        assert_eq!(s.state_of("n"), Some(NodeRunState::Pending));
    }
}
