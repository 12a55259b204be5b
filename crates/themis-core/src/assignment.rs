/// Maximum-weight bipartite assignment.
///
/// `spec.md` §9 sanctions a specialized max-weight bipartite matching in
/// place of a general MIP solver ("the assignment problem is a standard
/// linear program... a specialized max-weight bipartite matching is
/// equivalent and preferred"). No MIP crate appears anywhere in the
/// example corpus, so this module implements the Hungarian algorithm
/// (Kuhn–Munkres) directly, following the small-solver-behind-a-trait shape
/// `omtsf-core` uses for its own pluggable pieces (e.g. `graph::queries`'s
/// free functions behind a narrow `Direction`-parameterized API) — here
/// expressed as a trait so tests can inject a stub solver, per the explicit
/// "Solver abstraction" design note in `spec.md` §9.
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pair(pub usize, pub usize);

#[derive(Debug)]
pub enum AssignmentSolverError {
    /// Neither an optimal nor a feasible assignment could be produced
    /// within the allotted wall-clock budget.
    TimedOut,
    /// The solver was asked to match an empty side against a nonempty one
    /// in a way it refuses to handle (never raised by `HungarianSolver`;
    /// reserved for solver implementations with stricter preconditions).
    Infeasible,
}

impl fmt::Display for AssignmentSolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut => write!(f, "assignment solver exceeded its time budget"),
            Self::Infeasible => write!(f, "assignment solver found no feasible solution"),
        }
    }
}

impl std::error::Error for AssignmentSolverError {}

/// An assignment solver: given a sparse weight map over `left × right`
/// index pairs, produce a matching of at most one pair per row/column that
/// maximizes total weight.
pub trait AssignmentSolver {
    fn solve(
        &self,
        weights: &HashMap<Pair, f64>,
        left_len: usize,
        right_len: usize,
        budget: Option<Duration>,
    ) -> Result<Vec<Pair>, AssignmentSolverError>;
}

/// Dense max-weight bipartite matching via the Hungarian algorithm. Both
/// sides get their own dummy rows/columns so either side may abstain from a
/// pairing at zero cost, rather than only padding the size difference —
/// dummy pairs are dropped from the result.
pub struct HungarianSolver;

impl AssignmentSolver for HungarianSolver {
    fn solve(
        &self,
        weights: &HashMap<Pair, f64>,
        left_len: usize,
        right_len: usize,
        budget: Option<Duration>,
    ) -> Result<Vec<Pair>, AssignmentSolverError> {
        if left_len == 0 || right_len == 0 {
            return Ok(Vec::new());
        }
        let started = Instant::now();

        // Pad to (left_len + right_len) square, not just max(left_len,
        // right_len): the original's MIP formulation puts a `<= 1` (not
        // `== 1`) constraint on each row/column sum (branch_comparator.py),
        // so a side can always abstain rather than take a bad pairing.
        // Padding only to max(left_len, right_len) leaves zero slack when
        // the sides are equal in size, forcing a full perfect matching even
        // when every candidate pairing scores worse than leaving both ends
        // unmatched (unmatched scores 0, per `compare_with_none_is_zero`).
        // A dedicated dummy row per left index and dummy column per right
        // index gives each side a standing zero-cost abstain option:
        //   [0..left_len)  x [0..right_len)  — real pairs, cost = max_w - w
        //   [0..left_len)  x [right_len..n)  — left abstains, cost = max_w
        //   [left_len..n)  x [0..right_len)  — right abstains, cost = max_w
        //   [left_len..n)  x [right_len..n)  — dummy-dummy, cost = 0
        let n = left_len + right_len;
        let max_w = weights.values().cloned().fold(0.0_f64, f64::max);
        let mut cost = vec![vec![0.0; n]; n];
        for i in 0..left_len {
            for j in 0..right_len {
                let w = weights.get(&Pair(i, j)).copied().unwrap_or(0.0);
                cost[i][j] = max_w - w;
            }
            for j in right_len..n {
                cost[i][j] = max_w;
            }
        }
        for i in left_len..n {
            for j in 0..right_len {
                cost[i][j] = max_w;
            }
        }

        let assignment = hungarian_min_cost(&cost, started, budget)?;

        let mut out = Vec::new();
        for (i, &j) in assignment.iter().enumerate() {
            if i < left_len && j < right_len {
                out.push(Pair(i, j));
            }
        }
        // Deterministic tie-breaking per spec.md §9: sort by (left, right).
        out.sort_by_key(|p| (p.0, p.1));
        Ok(out)
    }
}

/// Square-matrix Hungarian algorithm (O(n^3)), returning `assignment[i] = j`.
fn hungarian_min_cost(
    cost: &[Vec<f64>],
    started: Instant,
    budget: Option<Duration>,
) -> Result<Vec<usize>, AssignmentSolverError> {
    let n = cost.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    // Classic O(n^3) Jonker-Volgenant-style potentials formulation,
    // 1-indexed internally to keep the textbook recurrence readable.
    let inf = f64::INFINITY;
    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        if let Some(budget) = budget {
            if started.elapsed() > budget {
                return Err(AssignmentSolverError::TimedOut);
            }
        }
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![inf; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = inf;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    fn w(pairs: &[(usize, usize, f64)]) -> HashMap<Pair, f64> {
        pairs.iter().map(|(i, j, w)| (Pair(*i, *j), *w)).collect()
    }

    #[test]
    fn empty_sides_produce_empty_assignment() {
        let solver = HungarianSolver;
        let result = solver.solve(&HashMap::new(), 0, 3, None).expect("solve");
        assert!(result.is_empty());
    }

    #[test]
    fn picks_the_max_weight_matching() {
        let solver = HungarianSolver;
        // Optimal: (0,1)=9 and (1,0)=9 beats the diagonal (0,0)+(1,1)=2.
        let weights = w(&[(0, 0, 1.0), (0, 1, 9.0), (1, 0, 9.0), (1, 1, 1.0)]);
        let result = solver.solve(&weights, 2, 2, None).expect("solve");
        let total: f64 = result.iter().map(|p| weights[p]).sum();
        assert_eq!(total, 18.0);
    }

    #[test]
    fn respects_row_and_column_capacity() {
        let solver = HungarianSolver;
        let weights = w(&[(0, 0, 5.0), (0, 1, 5.0), (1, 0, 5.0)]);
        let result = solver.solve(&weights, 2, 2, None).expect("solve");
        let mut left_used = std::collections::HashSet::new();
        let mut right_used = std::collections::HashSet::new();
        for Pair(i, j) in &result {
            assert!(left_used.insert(*i), "left index {i} used twice");
            assert!(right_used.insert(*j), "right index {j} used twice");
        }
    }

    #[test]
    fn unequal_sides_leave_extras_unmatched() {
        let solver = HungarianSolver;
        let weights = w(&[(0, 0, 3.0), (1, 0, 1.0), (2, 0, 2.0)]);
        let result = solver.solve(&weights, 3, 1, None).expect("solve");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0], Pair(0, 0), "the highest-weight row should win the single slot");
    }

    #[test]
    fn result_is_sorted_for_determinism() {
        let solver = HungarianSolver;
        let weights = w(&[(0, 1, 4.0), (1, 0, 4.0)]);
        let result = solver.solve(&weights, 2, 2, None).expect("solve");
        let mut sorted = result.clone();
        sorted.sort_by_key(|p| (p.0, p.1));
        assert_eq!(result, sorted);
    }

    #[test]
    fn equal_sides_abstain_rather_than_force_a_bad_match() {
        // Both candidates score negative; leaving both unmatched (score 0
        // each) beats taking either pairing. A solver that only pads to
        // max(left_len, right_len) has no abstain slot here and is forced
        // into a perfect matching regardless of how bad the scores are.
        let solver = HungarianSolver;
        let weights = w(&[(0, 0, -40.0), (0, 1, -100.0), (1, 0, -100.0), (1, 1, -40.0)]);
        let result = solver.solve(&weights, 2, 2, None).expect("solve");
        assert!(result.is_empty(), "expected both sides to abstain, got {result:?}");
    }

    #[test]
    fn equal_sides_still_take_a_mix_of_good_and_bad_pairs() {
        // (0,0) is a strong match and should be taken; (1,1) is a bad match
        // and should be left unmatched rather than forced.
        let solver = HungarianSolver;
        let weights = w(&[(0, 0, 20.0), (0, 1, -30.0), (1, 0, -30.0), (1, 1, -25.0)]);
        let result = solver.solve(&weights, 2, 2, None).expect("solve");
        assert_eq!(result, vec![Pair(0, 0)]);
    }
}
