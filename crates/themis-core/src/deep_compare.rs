/// Whole-graph comparison: branch extraction, two-phase branch assignment,
/// and difference-graph construction.
///
/// Grounded on
/// `original_source/themis/modules/comparing/graph_comparator.py`'s
/// `DeepGraphComparator`.
use std::collections::HashMap;
use std::time::Duration;

use crate::assignment::{AssignmentSolver, AssignmentSolverError, Pair};
use crate::branch::{Branch, BranchComparator, NodeMatch};
use crate::call_model::{ComparisonTables, IoConstructType};
use crate::diffgraph::DiffGraph;
use crate::graph::{Direction, EdgeKind, IoGraph, NodeId};

/// Wall-clock budgets for the two assignment levels (`spec.md` §5).
#[derive(Debug, Clone, Copy)]
pub struct SolverBudget {
    pub node_timeout: Duration,
    pub branch_timeout: Duration,
}

impl Default for SolverBudget {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(30),
            branch_timeout: Duration::from_secs(10),
        }
    }
}

/// One row of the final branch-assignment table.
#[derive(Debug, Clone)]
pub struct BranchAssignment {
    pub branch_d: Option<NodeId>,
    pub branch_t: Option<NodeId>,
    pub score: Option<f64>,
    pub node_matches: Vec<NodeMatch>,
}

pub struct DeepGraphComparator<'a> {
    tables: &'a ComparisonTables,
    solver: &'a dyn AssignmentSolver,
    budget: SolverBudget,
}

impl<'a> DeepGraphComparator<'a> {
    pub fn new(tables: &'a ComparisonTables, solver: &'a dyn AssignmentSolver) -> Self {
        Self {
            tables,
            solver,
            budget: SolverBudget::default(),
        }
    }

    pub fn with_budget(mut self, budget: SolverBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Compares two whole graphs. Returns the final average score and the
    /// merged difference graph.
    pub fn compare(&self, dirty: &IoGraph, trusted: &IoGraph) -> Result<(f64, DiffGraph), AssignmentSolverError> {
        let branch_roots_d = dirty.neighbors(NodeId::Entry, Direction::Forward, Some(EdgeKind::Follow));
        let branch_roots_t = trusted.neighbors(NodeId::Entry, Direction::Forward, Some(EdgeKind::Follow));

        let branches_d: Vec<Branch<'_>> = branch_roots_d.into_iter().map(|r| Branch::new(dirty, r)).collect();
        let branches_t: Vec<Branch<'_>> = branch_roots_t.into_iter().map(|r| Branch::new(trusted, r)).collect();

        let mut by_type_d = group_by_type(branches_d);
        let mut by_type_t = group_by_type(branches_t);

        let mut assignments = Vec::new();
        let mut remainder_d = Vec::new();
        let mut remainder_t = Vec::new();

        let mut types: Vec<IoConstructType> = by_type_d.keys().chain(by_type_t.keys()).copied().collect();
        types.sort();
        types.dedup();

        for typ in types {
            let list_d = by_type_d.remove(&typ).unwrap_or_default();
            let list_t = by_type_t.remove(&typ).unwrap_or_default();
            if list_t.is_empty() {
                remainder_d.extend(list_d);
                continue;
            }
            if list_d.is_empty() {
                remainder_t.extend(list_t);
                continue;
            }
            let (matched, unmatched_d, unmatched_t) = self.assign_branch_sets(list_d, list_t)?;
            assignments.extend(matched);
            remainder_d.extend(unmatched_d);
            remainder_t.extend(unmatched_t);
        }

        let (final_matched, final_d, final_t) = self.assign_branch_sets(remainder_d, remainder_t)?;
        assignments.extend(final_matched);
        // Anything still unmatched after the cross-type pass is finalized
        // as a None-paired assignment (spec.md §4.5).
        for b in final_d {
            let (_, node_matches) = BranchComparator::new(self.tables, self.solver)
                .compare(Some(&b), None)
                .unwrap_or((f64::NEG_INFINITY, Vec::new()));
            assignments.push(BranchAssignment {
                branch_d: Some(b.root),
                branch_t: None,
                score: None,
                node_matches,
            });
        }
        for b in final_t {
            let (_, node_matches) = BranchComparator::new(self.tables, self.solver)
                .compare(None, Some(&b))
                .unwrap_or((f64::NEG_INFINITY, Vec::new()));
            assignments.push(BranchAssignment {
                branch_d: None,
                branch_t: Some(b.root),
                score: None,
                node_matches,
            });
        }

        // spec.md §9: the denominator is the full assignment count
        // (including None-scored entries), while the numerator excludes
        // them — preserved verbatim even though it looks asymmetric.
        let sum: f64 = assignments.iter().filter_map(|a| a.score).sum();
        let average = if assignments.is_empty() {
            0.0
        } else {
            sum / assignments.len() as f64
        };

        let all_node_matches: Vec<NodeMatch> = assignments.iter().flat_map(|a| a.node_matches.clone()).collect();
        let diff_graph = DiffGraph::build(dirty, trusted, &all_node_matches);

        Ok((average, diff_graph))
    }

    /// Runs `BranchComparator` pairwise over every (dirty, trusted) branch
    /// in the given type bucket, then solves a branch-level max-weight
    /// assignment. Returns `(matched, unmatched_d, unmatched_t)`.
    #[allow(clippy::type_complexity)]
    fn assign_branch_sets<'g>(
        &self,
        branches_d: Vec<Branch<'g>>,
        branches_t: Vec<Branch<'g>>,
    ) -> Result<(Vec<BranchAssignment>, Vec<Branch<'g>>, Vec<Branch<'g>>), AssignmentSolverError> {
        if branches_d.is_empty() || branches_t.is_empty() {
            return Ok((Vec::new(), branches_d, branches_t));
        }

        let node_comparator = BranchComparator {
            tables: self.tables,
            solver: self.solver,
            penalty_scale: 2.0,
            budget: Some(self.budget.node_timeout),
        };

        let mut weights = HashMap::new();
        let mut pairwise: HashMap<Pair, (f64, Vec<NodeMatch>)> = HashMap::new();
        for (i, bd) in branches_d.iter().enumerate() {
            for (j, bt) in branches_t.iter().enumerate() {
                let (score, matches) = node_comparator.compare(Some(bd), Some(bt))?;
                weights.insert(Pair(i, j), score);
                pairwise.insert(Pair(i, j), (score, matches));
            }
        }

        let assignment = self.solver.solve(
            &weights,
            branches_d.len(),
            branches_t.len(),
            Some(self.budget.branch_timeout),
        )?;

        let mut matched_d = vec![false; branches_d.len()];
        let mut matched_t = vec![false; branches_t.len()];
        let mut matched = Vec::new();
        for pair in &assignment {
            matched_d[pair.0] = true;
            matched_t[pair.1] = true;
            let (score, node_matches) = pairwise.remove(pair).unwrap_or((f64::NEG_INFINITY, Vec::new()));
            matched.push(BranchAssignment {
                branch_d: Some(branches_d[pair.0].root),
                branch_t: Some(branches_t[pair.1].root),
                score: Some(score),
                node_matches,
            });
        }

        let mut unmatched_d = Vec::new();
        for (i, b) in branches_d.into_iter().enumerate() {
            if !matched_d[i] {
                unmatched_d.push(b);
            }
        }
        let mut unmatched_t = Vec::new();
        for (j, b) in branches_t.into_iter().enumerate() {
            if !matched_t[j] {
                unmatched_t.push(b);
            }
        }

        Ok((matched, unmatched_d, unmatched_t))
    }
}

fn group_by_type(branches: Vec<Branch<'_>>) -> HashMap<IoConstructType, Vec<Branch<'_>>> {
    let mut map: HashMap<IoConstructType, Vec<Branch<'_>>> = HashMap::new();
    for b in branches {
        map.entry(b.representative_type()).or_default().push(b);
    }
    map
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::assignment::HungarianSolver;
    use crate::call_model::{Function, IoCall};

    fn graph_with_branches(branches: &[&[&str]]) -> IoGraph {
        let mut g = IoGraph::new();
        let mut next_id = 1u64;
        for branch in branches {
            let mut prev = NodeId::Entry;
            for funcname in *branch {
                let id = next_id;
                next_id += 1;
                g.insert_call(IoCall::new(id, Function::new(*funcname))).expect("insert");
                g.add_edge(prev, NodeId::Num(id), EdgeKind::Follow).expect("edge");
                prev = NodeId::Num(id);
            }
        }
        g
    }

    #[test]
    fn identical_graphs_yield_all_matching() {
        let g = graph_with_branches(&[&["open", "read", "close"], &["socket", "send"]]);
        let tables = ComparisonTables::default();
        let solver = HungarianSolver;
        let comparator = DeepGraphComparator::new(&tables, &solver);
        let (average, diff_graph) = comparator.compare(&g, &g).expect("compare");
        assert_eq!(average, 100.0);
        assert_eq!(diff_graph.node_count(), 5);
    }

    #[test]
    fn empty_graphs_score_zero() {
        let g = IoGraph::new();
        let tables = ComparisonTables::default();
        let solver = HungarianSolver;
        let comparator = DeepGraphComparator::new(&tables, &solver);
        let (average, diff_graph) = comparator.compare(&g, &g).expect("compare");
        assert_eq!(average, 0.0);
        assert_eq!(diff_graph.node_count(), 0);
    }

    #[test]
    fn same_type_phase_prefers_matching_types() {
        // D has a STREAM branch and a SOCKET branch; T has the same. The
        // same-type phase should pair STREAM-with-STREAM and
        // SOCKET-with-SOCKET rather than cross-matching.
        let dirty = graph_with_branches(&[&["fopen"], &["socket", "accept"]]);
        let trusted = graph_with_branches(&[&["fopen"], &["socket", "accept"]]);
        let tables = ComparisonTables::default();
        let solver = HungarianSolver;
        let comparator = DeepGraphComparator::new(&tables, &solver);
        let (average, _diff_graph) = comparator.compare(&dirty, &trusted).expect("compare");
        assert_eq!(average, 100.0);
    }

    #[test]
    fn dirty_only_branch_is_excessive() {
        let dirty = graph_with_branches(&[&["open"], &["socket"]]);
        let trusted = graph_with_branches(&[&["open"]]);
        let tables = ComparisonTables::default();
        let solver = HungarianSolver;
        let comparator = DeepGraphComparator::new(&tables, &solver);
        let (average, diff_graph) = comparator.compare(&dirty, &trusted).expect("compare");
        assert!(average < 100.0);
        let json = diff_graph.to_json();
        let has_excessive = json["nodes"]
            .as_array()
            .expect("nodes array")
            .iter()
            .any(|n| n["type"] == "EXCESSIVE");
        assert!(has_excessive);
    }
}
