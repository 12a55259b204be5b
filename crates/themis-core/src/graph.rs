/// The constructed I/O call graph.
///
/// Structured the way `omtsf-core`'s `graph.rs` structures `OmtsGraph`: a
/// `petgraph::StableDiGraph` wrapped with an id-to-index side table so
/// callers can address nodes by their stable identifier instead of a
/// `NodeIndex` that could be invalidated by removals.
use std::collections::HashMap;
use std::fmt;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction as PetDirection;
use serde::{Deserialize, Serialize};

use crate::call_model::IoCall;

/// Identifies a node in the graph's public address space.
///
/// A tagged enum rather than a bare integer: the synthetic root ("entry")
/// shares no meaning with a call's monotone counter value, and conflating
/// them invites off-by-one bugs at the graph's root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Entry,
    Num(u64),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => f.write_str("entry"),
            Self::Num(n) => write!(f, "{n}"),
        }
    }
}

/// The edge kinds produced by the grapher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Connects a call to the next call that touched the same fd.
    Follow,
    /// Connects an enter/exit pair to the calls nested within its window.
    Nest,
    /// Reserved for a future time-ordering edge; not produced today.
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphNode {
    Entry,
    Call(IoCall),
}

impl GraphNode {
    pub fn as_call(&self) -> Option<&IoCall> {
        match self {
            Self::Call(call) => Some(call),
            Self::Entry => None,
        }
    }
}

#[derive(Debug)]
pub enum GraphBuildError {
    DuplicateNodeId(NodeId),
    DanglingEdgeRef { from: NodeId, missing: NodeId },
}

impl fmt::Display for GraphBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNodeId(id) => write!(f, "duplicate node id: {id}"),
            Self::DanglingEdgeRef { from, missing } => {
                write!(f, "edge from {from} references missing node {missing}")
            }
        }
    }
}

impl std::error::Error for GraphBuildError {}

/// The directed graph of observed I/O calls, rooted at a synthetic "entry"
/// node.
#[derive(Debug, Clone)]
pub struct IoGraph {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    id_to_index: HashMap<NodeId, NodeIndex>,
    index_to_id: HashMap<NodeIndex, NodeId>,
}

/// Which way to traverse when walking the graph. Mirrors `omtsf-core`'s
/// `graph::queries::Direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Both,
}

impl Default for IoGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl IoGraph {
    /// Creates a graph containing only the synthetic entry node.
    pub fn new() -> Self {
        let mut graph = StableDiGraph::new();
        let mut id_to_index = HashMap::new();
        let mut index_to_id = HashMap::new();
        let idx = graph.add_node(GraphNode::Entry);
        id_to_index.insert(NodeId::Entry, idx);
        index_to_id.insert(idx, NodeId::Entry);
        Self { graph, id_to_index, index_to_id }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_index(&self, id: NodeId) -> Option<NodeIndex> {
        self.id_to_index.get(&id).copied()
    }

    pub fn node_weight(&self, id: NodeId) -> Option<&GraphNode> {
        self.node_index(id).and_then(|idx| self.graph.node_weight(idx))
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.id_to_index.contains_key(&id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.id_to_index.keys().copied()
    }

    pub fn graph(&self) -> &StableDiGraph<GraphNode, GraphEdge> {
        &self.graph
    }

    /// Inserts a call node. Returns an error if `call.index` was already
    /// used (mirrors `OmtsGraph::build_graph`'s duplicate-id check).
    pub fn insert_call(&mut self, call: IoCall) -> Result<NodeId, GraphBuildError> {
        let id = NodeId::Num(call.index);
        if self.id_to_index.contains_key(&id) {
            return Err(GraphBuildError::DuplicateNodeId(id));
        }
        let idx = self.graph.add_node(GraphNode::Call(call));
        self.id_to_index.insert(id, idx);
        self.index_to_id.insert(idx, id);
        Ok(id)
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> Result<(), GraphBuildError> {
        let from_idx = self
            .node_index(from)
            .ok_or(GraphBuildError::DanglingEdgeRef { from, missing: from })?;
        let to_idx = self
            .node_index(to)
            .ok_or(GraphBuildError::DanglingEdgeRef { from, missing: to })?;
        self.graph.add_edge(from_idx, to_idx, GraphEdge { kind });
        Ok(())
    }

    /// Direct neighbors of `id` following edges in `direction`, optionally
    /// filtered to one edge kind.
    pub fn neighbors(&self, id: NodeId, direction: Direction, kind: Option<EdgeKind>) -> Vec<NodeId> {
        let Some(idx) = self.node_index(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut push_dir = |dir: PetDirection| {
            for edge in self.graph.edges_directed(idx, dir) {
                if let Some(k) = kind {
                    if edge.weight().kind != k {
                        continue;
                    }
                }
                let other = if dir == PetDirection::Outgoing {
                    edge.target()
                } else {
                    edge.source()
                };
                if let Some(other_id) = self.index_to_id(other) {
                    out.push(other_id);
                }
            }
        };
        match direction {
            Direction::Forward => push_dir(PetDirection::Outgoing),
            Direction::Backward => push_dir(PetDirection::Incoming),
            Direction::Both => {
                push_dir(PetDirection::Outgoing);
                push_dir(PetDirection::Incoming);
            }
        }
        out
    }

    /// The inverse of [`IoGraph::node_index`], O(1) via a reverse side
    /// table kept alongside `id_to_index`.
    pub fn index_to_id(&self, idx: NodeIndex) -> Option<NodeId> {
        self.index_to_id.get(&idx).copied()
    }

    /// Node ids reachable from `from` (exclusive), following edges forward
    /// only. Used to seed per-branch DFS.
    pub fn reachable_from(&self, from: NodeId) -> Vec<NodeId> {
        let Some(start) = self.node_index(from) else {
            return Vec::new();
        };
        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![start];
        let mut order = Vec::new();
        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            if idx != start {
                if let Some(id) = self.index_to_id(idx) {
                    order.push(id);
                }
            }
            for edge in self.graph.edges_directed(idx, PetDirection::Outgoing) {
                stack.push(edge.target());
            }
        }
        order
    }

    /// Shortest-path hop distance between two nodes on the *undirected*
    /// view of the graph (both FOLLOW and NEST edges count), used by
    /// [`crate::branch::structural_penalty`].
    pub fn undirected_distance(&self, a: NodeId, b: NodeId) -> Option<usize> {
        if a == b {
            return Some(0);
        }
        let start = self.node_index(a)?;
        let goal = self.node_index(b)?;
        let mut visited = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((start, 0usize));
        visited.insert(start);
        while let Some((idx, dist)) = queue.pop_front() {
            if idx == goal {
                return Some(dist);
            }
            for edge in self.graph.edges_directed(idx, PetDirection::Outgoing) {
                if visited.insert(edge.target()) {
                    queue.push_back((edge.target(), dist + 1));
                }
            }
            for edge in self.graph.edges_directed(idx, PetDirection::Incoming) {
                if visited.insert(edge.source()) {
                    queue.push_back((edge.source(), dist + 1));
                }
            }
        }
        None
    }
}
