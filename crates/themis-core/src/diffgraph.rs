/// The merged difference graph produced by a deep comparison.
///
/// Grounded on `original_source/themis/modules/comparing/difference_graph.py`'s
/// `DiffGraph`, with one deliberate deviation: that file's `_add_edges`
/// computes both `d_edge` and `t_edge` from `self._dirty_graph` (a bug —
/// `t_edge` should check the trusted graph). `spec.md` §4.6 describes the
/// intended four-way outcome table unambiguously, so this module implements
/// the corrected behavior rather than reproducing the original's mistake.
use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde_json::{json, Value};

use crate::branch::NodeMatch;
use crate::call_model::{ArgStatus, FunctionComparisonResult};
use crate::graph::{EdgeKind, GraphNode, IoGraph, NodeId};

/// A node-pair key in the difference graph; either side may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey(pub Option<NodeId>, pub Option<NodeId>);

impl PairKey {
    fn label(&self) -> String {
        let d = self.0.map(|id| id.to_string()).unwrap_or_else(|| "None".to_owned());
        let t = self.1.map(|id| id.to_string()).unwrap_or_else(|| "None".to_owned());
        format!("({d}, {t})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffNodeType {
    Matching,
    MiscellaneousMismatch,
    FunctionMismatchWeak,
    FunctionMismatchStrong,
    Missing,
    Excessive,
}

impl DiffNodeType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Matching => "MATCHING",
            Self::MiscellaneousMismatch => "MISCELLANEOUS_MISMATCH",
            Self::FunctionMismatchWeak => "FUNCTION_MISMATCH_WEAK",
            Self::FunctionMismatchStrong => "FUNCTION_MISMATCH_STRONG",
            Self::Missing => "MISSING",
            Self::Excessive => "EXCESSIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffEdgeType {
    Matching,
    TypeMismatch,
    Missing,
    Excessive,
}

impl DiffEdgeType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Matching => "MATCHING",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::Missing => "MISSING",
            Self::Excessive => "EXCESSIVE",
        }
    }
}

#[derive(Debug, Clone)]
struct DiffNode {
    key: PairKey,
    node_type: DiffNodeType,
    func: (Option<String>, Option<String>, FunctionComparisonResult),
    time: (Option<u64>, Option<u64>),
    score: i64,
    args: HashMap<String, (ArgStatus, Option<String>, Option<String>)>,
}

#[derive(Debug, Clone)]
struct DiffEdge {
    edge_type: DiffEdgeType,
    role: String,
}

/// A labelled directed graph whose nodes are matched `(dirty, trusted)`
/// node-id pairs, built from every `NodeMatch` produced during a deep
/// comparison.
pub struct DiffGraph {
    graph: StableDiGraph<DiffNode, DiffEdge>,
    index_of: HashMap<PairKey, NodeIndex>,
}

fn node_type_for(m: &NodeMatch) -> DiffNodeType {
    if m.d_node.is_none() {
        return DiffNodeType::Missing;
    }
    if m.t_node.is_none() {
        return DiffNodeType::Excessive;
    }
    match m.diff.func_diff.2 {
        FunctionComparisonResult::EquivClass => return DiffNodeType::FunctionMismatchWeak,
        FunctionComparisonResult::Different => return DiffNodeType::FunctionMismatchStrong,
        FunctionComparisonResult::Equal => {}
    }
    let any_arg_mismatch = m.diff.args_diff.values().any(|(status, _, _)| *status != ArgStatus::Matching);
    if any_arg_mismatch {
        DiffNodeType::MiscellaneousMismatch
    } else {
        DiffNodeType::Matching
    }
}

impl DiffGraph {
    /// Builds the difference graph from the full list of `NodeMatch`
    /// results produced across all branch assignments, plus the two
    /// source graphs (needed to look up edges for the edge-classification
    /// step).
    pub fn build(dirty_graph: &IoGraph, trusted_graph: &IoGraph, node_matches: &[NodeMatch]) -> Self {
        let mut graph = StableDiGraph::new();
        let mut index_of = HashMap::new();

        for m in node_matches {
            let key = PairKey(m.d_node, m.t_node);
            let node_type = node_type_for(m);
            let time = (
                m.d_node.and_then(|id| call_index(dirty_graph, id)),
                m.t_node.and_then(|id| call_index(trusted_graph, id)),
            );
            let func = m.diff.func_diff.clone();
            let args = m
                .diff
                .args_diff
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let idx = graph.add_node(DiffNode {
                key,
                node_type,
                func,
                time,
                score: m.score,
                args,
            });
            index_of.insert(key, idx);
        }

        let mut result = Self { graph, index_of };
        result.add_edges(dirty_graph, trusted_graph);
        result
    }

    fn add_edges(&mut self, dirty_graph: &IoGraph, trusted_graph: &IoGraph) {
        let keys: Vec<PairKey> = self.index_of.keys().copied().collect();
        for &n1 in &keys {
            for &n2 in &keys {
                if n1 == n2 {
                    continue;
                }
                let d_edge = edge_between(dirty_graph, n1.0, n2.0);
                let t_edge = edge_between(trusted_graph, n1.1, n2.1);

                let edge = match (d_edge, t_edge) {
                    (None, None) => None,
                    (Some(kind), None) => Some(DiffEdge {
                        edge_type: DiffEdgeType::Excessive,
                        role: edge_kind_str(kind).to_owned(),
                    }),
                    (None, Some(kind)) => Some(DiffEdge {
                        edge_type: DiffEdgeType::Missing,
                        role: edge_kind_str(kind).to_owned(),
                    }),
                    (Some(kd), Some(kt)) if kd == kt => Some(DiffEdge {
                        edge_type: DiffEdgeType::Matching,
                        role: edge_kind_str(kd).to_owned(),
                    }),
                    (Some(kd), Some(kt)) => Some(DiffEdge {
                        edge_type: DiffEdgeType::TypeMismatch,
                        role: format!("{}/{}", edge_kind_str(kd), edge_kind_str(kt)),
                    }),
                };

                if let Some(edge) = edge {
                    let i1 = self.index_of[&n1];
                    let i2 = self.index_of[&n2];
                    self.graph.add_edge(i1, i2, edge);
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Serializes as a JSON node-link document (`spec.md` §6): node ids are
    /// the string `"(d_id, t_id)"`.
    pub fn to_json(&self) -> Value {
        let mut nodes = Vec::new();
        let mut id_of_index = HashMap::new();
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let id_str = node.key.label();
            id_of_index.insert(idx, id_str.clone());
            let args: serde_json::Map<String, Value> = node
                .args
                .iter()
                .map(|(k, (status, v1, v2))| {
                    (
                        k.clone(),
                        json!({
                            "status": format!("{status:?}").to_uppercase(),
                            "dirty": v1,
                            "trusted": v2,
                        }),
                    )
                })
                .collect();
            nodes.push(json!({
                "id": id_str,
                "type": node.node_type.as_str(),
                "func": [node.func.0, node.func.1, format!("{:?}", node.func.2)],
                "time": [node.time.0, node.time.1],
                "score": node.score,
                "args": args,
            }));
        }

        let mut links = Vec::new();
        for edge_idx in self.graph.edge_indices() {
            let Some((src, dst)) = self.graph.edge_endpoints(edge_idx) else {
                continue;
            };
            let edge = &self.graph[edge_idx];
            links.push(json!({
                "source": id_of_index[&src],
                "target": id_of_index[&dst],
                "type": edge.edge_type.as_str(),
                "role": edge.role,
            }));
        }

        json!({ "directed": true, "multigraph": false, "nodes": nodes, "links": links })
    }
}

fn call_index(graph: &IoGraph, id: NodeId) -> Option<u64> {
    graph.node_weight(id).and_then(GraphNode::as_call).map(|c| c.index)
}

fn edge_between(graph: &IoGraph, from: Option<NodeId>, to: Option<NodeId>) -> Option<EdgeKind> {
    let (from, to) = (from?, to?);
    let from_idx = graph.node_index(from)?;
    let to_idx = graph.node_index(to)?;
    use petgraph::visit::EdgeRef;
    graph
        .graph()
        .edges_connecting(from_idx, to_idx)
        .next()
        .map(|e| e.weight().kind)
}

fn edge_kind_str(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::Follow => "FOLLOW",
        EdgeKind::Nest => "NEST",
        EdgeKind::Time => "TIME",
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::call_model::{ComparisonTables, Function, IoCall};

    fn single_node_graph(funcname: &str) -> IoGraph {
        let mut g = IoGraph::new();
        g.insert_call(IoCall::new(1, Function::new(funcname))).expect("insert");
        g.add_edge(NodeId::Entry, NodeId::Num(1), EdgeKind::Follow).expect("edge");
        g
    }

    #[test]
    fn identical_calls_are_matching() {
        let tables = ComparisonTables::default();
        let dirty = single_node_graph("open");
        let trusted = single_node_graph("open");
        let (score, diff) = IoCall::compare(
            dirty.node_weight(NodeId::Num(1)).and_then(GraphNode::as_call),
            trusted.node_weight(NodeId::Num(1)).and_then(GraphNode::as_call),
            &tables,
        );
        let node_matches = vec![NodeMatch {
            d_node: Some(NodeId::Num(1)),
            t_node: Some(NodeId::Num(1)),
            score,
            diff,
        }];
        let diffgraph = DiffGraph::build(&dirty, &trusted, &node_matches);
        assert_eq!(diffgraph.node_count(), 1);
        let json = diffgraph.to_json();
        assert_eq!(json["nodes"][0]["type"], "MATCHING");
    }

    #[test]
    fn different_equiv_class_is_strong_mismatch() {
        let tables = ComparisonTables::default();
        let dirty = single_node_graph("open");
        let trusted = single_node_graph("socket");
        let (score, diff) = IoCall::compare(
            dirty.node_weight(NodeId::Num(1)).and_then(GraphNode::as_call),
            trusted.node_weight(NodeId::Num(1)).and_then(GraphNode::as_call),
            &tables,
        );
        let node_matches = vec![NodeMatch {
            d_node: Some(NodeId::Num(1)),
            t_node: Some(NodeId::Num(1)),
            score,
            diff,
        }];
        let diffgraph = DiffGraph::build(&dirty, &trusted, &node_matches);
        let json = diffgraph.to_json();
        assert_eq!(json["nodes"][0]["type"], "FUNCTION_MISMATCH_STRONG");
    }

    #[test]
    fn missing_and_excessive_node_types() {
        let dirty = single_node_graph("open");
        let trusted = IoGraph::new();
        let (score, diff) = IoCall::compare(
            dirty.node_weight(NodeId::Num(1)).and_then(GraphNode::as_call),
            None,
            &ComparisonTables::default(),
        );
        let node_matches = vec![NodeMatch {
            d_node: Some(NodeId::Num(1)),
            t_node: None,
            score,
            diff,
        }];
        let diffgraph = DiffGraph::build(&dirty, &trusted, &node_matches);
        let json = diffgraph.to_json();
        assert_eq!(json["nodes"][0]["type"], "EXCESSIVE");
    }

    #[test]
    fn edge_present_only_in_trusted_is_missing() {
        let tables = ComparisonTables::default();
        let mut dirty = IoGraph::new();
        dirty.insert_call(IoCall::new(1, Function::new("open"))).expect("insert");
        dirty.insert_call(IoCall::new(2, Function::new("close"))).expect("insert");
        dirty.add_edge(NodeId::Entry, NodeId::Num(1), EdgeKind::Follow).expect("edge");
        dirty.add_edge(NodeId::Entry, NodeId::Num(2), EdgeKind::Follow).expect("edge");

        let mut trusted = IoGraph::new();
        trusted.insert_call(IoCall::new(1, Function::new("open"))).expect("insert");
        trusted.insert_call(IoCall::new(2, Function::new("close"))).expect("insert");
        trusted.add_edge(NodeId::Entry, NodeId::Num(1), EdgeKind::Follow).expect("edge");
        trusted.add_edge(NodeId::Num(1), NodeId::Num(2), EdgeKind::Follow).expect("edge");

        let (s1, d1) = IoCall::compare(
            dirty.node_weight(NodeId::Num(1)).and_then(GraphNode::as_call),
            trusted.node_weight(NodeId::Num(1)).and_then(GraphNode::as_call),
            &tables,
        );
        let (s2, d2) = IoCall::compare(
            dirty.node_weight(NodeId::Num(2)).and_then(GraphNode::as_call),
            trusted.node_weight(NodeId::Num(2)).and_then(GraphNode::as_call),
            &tables,
        );
        let node_matches = vec![
            NodeMatch { d_node: Some(NodeId::Num(1)), t_node: Some(NodeId::Num(1)), score: s1, diff: d1 },
            NodeMatch { d_node: Some(NodeId::Num(2)), t_node: Some(NodeId::Num(2)), score: s2, diff: d2 },
        ];
        let diffgraph = DiffGraph::build(&dirty, &trusted, &node_matches);
        let json = diffgraph.to_json();
        let links = json["links"].as_array().expect("links array");
        assert!(links.iter().any(|l| l["type"] == "MISSING"));
    }
}
