/// Persisting and reloading [`IoGraph`]s, and the GEXF attribute-extraction
/// mapping described in `spec.md` §6.
///
/// The native snapshot format is CBOR via `cbor4ii`, the crate
/// `omtsf-core`'s own `cbor.rs` wraps for its on-disk format — the natural
/// Rust analogue of the reference implementation's pickled graph snapshot.
/// The GEXF *writer* itself is an external collaborator (`spec.md` §1); what
/// is implemented here is only the per-node/per-edge attribute values a
/// GEXF writer would need.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::call_model::IoCall;
use crate::graph::{EdgeKind, GraphNode, IoGraph, NodeId};

#[derive(Debug)]
pub enum GraphLoadError {
    Decode(cbor4ii::serde::DecodeError<std::convert::Infallible>),
    Encode(cbor4ii::serde::EncodeError<std::convert::Infallible>),
    Build(crate::graph::GraphBuildError),
}

impl fmt::Display for GraphLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "corrupt graph snapshot: {e}"),
            Self::Encode(e) => write!(f, "failed to encode graph snapshot: {e}"),
            Self::Build(e) => write!(f, "failed to rebuild graph from snapshot: {e}"),
        }
    }
}

impl std::error::Error for GraphLoadError {}

/// A flat, serializable snapshot of an [`IoGraph`]: every node and edge as
/// plain data, independent of `petgraph`'s internal indices.
#[derive(Debug, Serialize, Deserialize)]
struct GraphSnapshot {
    calls: Vec<(u64, IoCall)>,
    follow_edges: Vec<(SnapNodeId, SnapNodeId)>,
    nest_edges: Vec<(SnapNodeId, SnapNodeId)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum SnapNodeId {
    Entry,
    Num(u64),
}

impl From<NodeId> for SnapNodeId {
    fn from(id: NodeId) -> Self {
        match id {
            NodeId::Entry => Self::Entry,
            NodeId::Num(n) => Self::Num(n),
        }
    }
}

impl From<SnapNodeId> for NodeId {
    fn from(id: SnapNodeId) -> Self {
        match id {
            SnapNodeId::Entry => Self::Entry,
            SnapNodeId::Num(n) => Self::Num(n),
        }
    }
}

/// Encodes a graph as a CBOR byte snapshot.
pub fn to_cbor(graph: &IoGraph) -> Result<Vec<u8>, GraphLoadError> {
    let snapshot = to_snapshot(graph);
    let mut buf = Vec::new();
    cbor4ii::serde::to_writer(&mut buf, &snapshot).map_err(GraphLoadError::Encode)?;
    Ok(buf)
}

/// Decodes a graph previously written by [`to_cbor`].
pub fn from_cbor(bytes: &[u8]) -> Result<IoGraph, GraphLoadError> {
    let snapshot: GraphSnapshot = cbor4ii::serde::from_slice(bytes).map_err(GraphLoadError::Decode)?;
    from_snapshot(snapshot)
}

fn to_snapshot(graph: &IoGraph) -> GraphSnapshot {
    let mut calls = Vec::new();
    for id in graph.node_ids() {
        if let NodeId::Num(n) = id {
            if let Some(call) = graph.node_weight(id).and_then(GraphNode::as_call) {
                calls.push((n, call.clone()));
            }
        }
    }
    calls.sort_by_key(|(id, _)| *id);

    let mut follow_edges = Vec::new();
    let mut nest_edges = Vec::new();
    for edge in graph.graph().edge_indices() {
        let Some((src, dst)) = graph.graph().edge_endpoints(edge) else {
            continue;
        };
        let weight = &graph.graph()[edge];
        let src_id = graph.index_to_id(src);
        let dst_id = graph.index_to_id(dst);
        let (Some(src_id), Some(dst_id)) = (src_id, dst_id) else {
            continue;
        };
        match weight.kind {
            EdgeKind::Follow => follow_edges.push((src_id.into(), dst_id.into())),
            EdgeKind::Nest => nest_edges.push((src_id.into(), dst_id.into())),
            EdgeKind::Time => {}
        }
    }

    GraphSnapshot {
        calls,
        follow_edges,
        nest_edges,
    }
}

fn from_snapshot(snapshot: GraphSnapshot) -> Result<IoGraph, GraphLoadError> {
    let mut graph = IoGraph::new();
    for (_, call) in snapshot.calls {
        graph.insert_call(call).map_err(GraphLoadError::Build)?;
    }
    for (from, to) in snapshot.follow_edges {
        graph
            .add_edge(from.into(), to.into(), EdgeKind::Follow)
            .map_err(GraphLoadError::Build)?;
    }
    for (from, to) in snapshot.nest_edges {
        graph
            .add_edge(from.into(), to.into(), EdgeKind::Nest)
            .map_err(GraphLoadError::Build)?;
    }
    Ok(graph)
}

/// The per-node attribute values a GEXF writer needs (`spec.md` §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GexfNodeAttrs {
    pub func: String,
    pub in_fd_present: bool,
    pub out_fds_num: usize,
    pub io_type: String,
}

/// The per-edge attribute a GEXF writer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GexfEdgeAttrs {
    pub edge_type: &'static str,
}

pub fn gexf_node_attrs(graph: &IoGraph, id: NodeId) -> Option<GexfNodeAttrs> {
    let call = graph.node_weight(id).and_then(GraphNode::as_call)?;
    let io_type = call
        .in_fd
        .as_ref()
        .map(|d| d.typ)
        .into_iter()
        .chain(call.out_fd.iter().flatten().map(|d| d.typ))
        .fold(crate::call_model::IoConstructType::Unknown, |acc, t| acc.max(t));

    Some(GexfNodeAttrs {
        func: call.func.funcname.clone(),
        in_fd_present: call.in_fd.is_some(),
        out_fds_num: call.out_fd.as_ref().map(Vec::len).unwrap_or(0),
        io_type: io_type.to_string(),
    })
}

pub fn gexf_edge_attrs(kind: EdgeKind) -> GexfEdgeAttrs {
    let edge_type = match kind {
        EdgeKind::Follow => "FOLLOW",
        EdgeKind::Nest => "NEST",
        EdgeKind::Time => "TIME",
    };
    GexfEdgeAttrs { edge_type }
}
