/// Branch extraction and node-level branch comparison.
///
/// Grounded on `original_source/themis/modules/comparing/branch_comparator.py`'s
/// `BranchComparator`, with the `pywraplp` SCIP solver replaced by
/// [`crate::assignment::HungarianSolver`] per `spec.md` §9's explicit
/// sanction of a specialized max-weight bipartite matching. Branches are
/// views over the parent graph — `(graph_ref, root_id)` plus a cached
/// reachability set — never copies, per the "Branch as subgraph view"
/// design note in `spec.md` §9.
use std::collections::HashMap;
use std::time::Duration;

use crate::assignment::{AssignmentSolver, AssignmentSolverError, Pair};
use crate::call_model::{ComparisonTables, DiffInfo, IoCall, IoConstructType};
use crate::graph::{GraphNode, IoGraph, NodeId};

const DEFAULT_PENALTY_SCALE: f64 = 2.0;

/// A branch: the node reachable from (and including) `root`, borrowed from
/// its parent graph.
#[derive(Clone)]
pub struct Branch<'g> {
    graph: &'g IoGraph,
    pub root: NodeId,
    pub nodes: Vec<NodeId>,
}

impl<'g> Branch<'g> {
    pub fn new(graph: &'g IoGraph, root: NodeId) -> Self {
        let mut nodes = vec![root];
        nodes.extend(graph.reachable_from(root));
        Self { graph, root, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn call(&self, id: NodeId) -> Option<&IoCall> {
        self.graph.node_weight(id).and_then(GraphNode::as_call)
    }

    /// The branch's representative `IoConstructType`: the maximum (per §3
    /// ordering) over every node's observed fd types (`spec.md` §4.5).
    pub fn representative_type(&self) -> IoConstructType {
        let mut typ = IoConstructType::Unknown;
        for &id in &self.nodes {
            let Some(call) = self.call(id) else {
                continue;
            };
            if let Some(in_fd) = &call.in_fd {
                typ = typ.max(in_fd.typ);
            }
            if let Some(outs) = &call.out_fd {
                for out in outs {
                    typ = typ.max(out.typ);
                }
            }
        }
        typ
    }
}

#[derive(Debug, Clone)]
pub struct NodeMatch {
    pub d_node: Option<NodeId>,
    pub t_node: Option<NodeId>,
    pub score: i64,
    pub diff: DiffInfo,
}

pub struct BranchComparator<'a> {
    pub tables: &'a ComparisonTables,
    pub solver: &'a dyn AssignmentSolver,
    pub penalty_scale: f64,
    pub budget: Option<Duration>,
}

impl<'a> BranchComparator<'a> {
    pub fn new(tables: &'a ComparisonTables, solver: &'a dyn AssignmentSolver) -> Self {
        Self {
            tables,
            solver,
            penalty_scale: DEFAULT_PENALTY_SCALE,
            budget: None,
        }
    }

    /// Compares two (possibly absent) branches.
    ///
    /// Returns `(score, node_matches)`. `score = match_avg - structural_penalty`.
    /// When either branch is absent, `match_avg = 0` and the penalty is
    /// `+inf`, so the returned score is `-inf`; the match list still
    /// contains one unmatched `NodeMatch` per node on the present side
    /// (`spec.md` §4.4 edge cases).
    pub fn compare(
        &self,
        branch_d: Option<&Branch<'_>>,
        branch_t: Option<&Branch<'_>>,
    ) -> Result<(f64, Vec<NodeMatch>), AssignmentSolverError> {
        match (branch_d, branch_t) {
            (None, None) => Ok((f64::NEG_INFINITY, Vec::new())),
            (Some(bd), None) => Ok((f64::NEG_INFINITY, self.unmatched(bd, true))),
            (None, Some(bt)) => Ok((f64::NEG_INFINITY, self.unmatched(bt, false))),
            (Some(bd), Some(bt)) => self.compare_both(bd, bt),
        }
    }

    fn unmatched(&self, branch: &Branch<'_>, is_dirty: bool) -> Vec<NodeMatch> {
        branch
            .nodes
            .iter()
            .map(|&id| {
                let call = branch.call(id);
                let (score, diff) = if is_dirty {
                    IoCall::compare(call, None, self.tables)
                } else {
                    IoCall::compare(None, call, self.tables)
                };
                NodeMatch {
                    d_node: is_dirty.then_some(id),
                    t_node: (!is_dirty).then_some(id),
                    score,
                    diff,
                }
            })
            .collect()
    }

    fn compare_both(
        &self,
        branch_d: &Branch<'_>,
        branch_t: &Branch<'_>,
    ) -> Result<(f64, Vec<NodeMatch>), AssignmentSolverError> {
        let nd = branch_d.len();
        let nt = branch_t.len();

        let mut weights = HashMap::new();
        for (i, &id_d) in branch_d.nodes.iter().enumerate() {
            for (j, &id_t) in branch_t.nodes.iter().enumerate() {
                let (score, _) = IoCall::compare(branch_d.call(id_d), branch_t.call(id_t), self.tables);
                weights.insert(Pair(i, j), score as f64);
            }
        }

        let assignment = self.solver.solve(&weights, nd, nt, self.budget)?;

        let objective: f64 = assignment.iter().map(|p| weights[p]).sum();
        let match_avg = objective / (nd.max(nt) as f64);

        let penalty = self.structural_penalty(branch_d, branch_t, &assignment);

        let mut matched_d = vec![false; nd];
        let mut matched_t = vec![false; nt];
        let mut matches = Vec::new();
        for Pair(i, j) in &assignment {
            matched_d[*i] = true;
            matched_t[*j] = true;
            let id_d = branch_d.nodes[*i];
            let id_t = branch_t.nodes[*j];
            let (score, diff) = IoCall::compare(branch_d.call(id_d), branch_t.call(id_t), self.tables);
            matches.push(NodeMatch {
                d_node: Some(id_d),
                t_node: Some(id_t),
                score,
                diff,
            });
        }
        for (i, &id_d) in branch_d.nodes.iter().enumerate() {
            if !matched_d[i] {
                let (score, diff) = IoCall::compare(branch_d.call(id_d), None, self.tables);
                matches.push(NodeMatch {
                    d_node: Some(id_d),
                    t_node: None,
                    score,
                    diff,
                });
            }
        }
        for (j, &id_t) in branch_t.nodes.iter().enumerate() {
            if !matched_t[j] {
                let (score, diff) = IoCall::compare(None, branch_t.call(id_t), self.tables);
                matches.push(NodeMatch {
                    d_node: None,
                    t_node: Some(id_t),
                    score,
                    diff,
                });
            }
        }

        Ok((match_avg - penalty, matches))
    }

    fn structural_penalty(&self, branch_d: &Branch<'_>, branch_t: &Branch<'_>, assignment: &[Pair]) -> f64 {
        if assignment.len() < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        for a in 0..assignment.len() {
            for b in (a + 1)..assignment.len() {
                let Pair(i1, j1) = assignment[a];
                let Pair(i2, j2) = assignment[b];
                let dist_d = branch_d
                    .graph
                    .undirected_distance(branch_d.nodes[i1], branch_d.nodes[i2])
                    .unwrap_or(0);
                let dist_t = branch_t
                    .graph
                    .undirected_distance(branch_t.nodes[j1], branch_t.nodes[j2])
                    .unwrap_or(0);
                sum += (dist_d as f64 - dist_t as f64).abs();
            }
        }
        sum * self.penalty_scale
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::assignment::HungarianSolver;
    use crate::call_model::{ComparisonTables, Function};
    use crate::graph::EdgeKind;

    fn chain_graph(funcnames: &[&str]) -> IoGraph {
        let mut g = IoGraph::new();
        let mut prev = NodeId::Entry;
        for (idx, name) in funcnames.iter().enumerate() {
            let id = idx as u64 + 1;
            g.insert_call(IoCall::new(id, Function::new(*name))).expect("insert");
            g.add_edge(prev, NodeId::Num(id), EdgeKind::Follow).expect("edge");
            prev = NodeId::Num(id);
        }
        g
    }

    #[test]
    fn self_compare_is_identity_with_zero_penalty() {
        let g = chain_graph(&["open", "read", "close"]);
        let tables = ComparisonTables::default();
        let solver = HungarianSolver;
        let comparator = BranchComparator::new(&tables, &solver);

        let branch_d = Branch::new(&g, NodeId::Num(1));
        let branch_t = Branch::new(&g, NodeId::Num(1));

        let (score, matches) = comparator.compare(Some(&branch_d), Some(&branch_t)).expect("compare");
        assert_eq!(matches.len(), 3);
        for m in &matches {
            assert_eq!(m.score, 100);
            assert_eq!(m.d_node, m.t_node);
        }
        assert_eq!(score, 100.0, "identical branches have zero structural penalty");
    }

    #[test]
    fn single_node_branches_have_no_penalty() {
        let g = chain_graph(&["open"]);
        let tables = ComparisonTables::default();
        let solver = HungarianSolver;
        let comparator = BranchComparator::new(&tables, &solver);
        let branch_d = Branch::new(&g, NodeId::Num(1));
        let branch_t = Branch::new(&g, NodeId::Num(1));
        let (score, _) = comparator.compare(Some(&branch_d), Some(&branch_t)).expect("compare");
        assert_eq!(score, 100.0);
    }

    #[test]
    fn absent_branch_yields_negative_infinity_and_unmatched_list() {
        let g = chain_graph(&["open", "read"]);
        let tables = ComparisonTables::default();
        let solver = HungarianSolver;
        let comparator = BranchComparator::new(&tables, &solver);
        let branch_d = Branch::new(&g, NodeId::Num(1));
        let (score, matches) = comparator.compare(Some(&branch_d), None).expect("compare");
        assert!(score.is_infinite() && score.is_sign_negative());
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.t_node.is_none()));
    }

    #[test]
    fn representative_type_is_max_over_nodes() {
        let mut g = IoGraph::new();
        let mut open_call = IoCall::new(1, Function::new("open"));
        open_call.out_fd = Some(vec![crate::call_model::IoDesc::new(IoConstructType::Binfile, Some(3))]);
        g.insert_call(open_call).expect("insert open");
        g.add_edge(NodeId::Entry, NodeId::Num(1), EdgeKind::Follow).expect("edge");

        let mut accept_call = IoCall::new(2, Function::new("accept"));
        accept_call.out_fd = Some(vec![crate::call_model::IoDesc::new(IoConstructType::Socket, Some(4))]);
        g.insert_call(accept_call).expect("insert accept");
        g.add_edge(NodeId::Num(1), NodeId::Num(2), EdgeKind::Follow).expect("edge");

        let branch = Branch::new(&g, NodeId::Num(1));
        assert_eq!(branch.representative_type(), IoConstructType::Socket);
    }
}
