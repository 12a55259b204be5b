#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod assignment;
pub mod branch;
pub mod call_model;
pub mod config;
pub mod deep_compare;
pub mod diffgraph;
pub mod grapher;
pub mod graph;
pub mod parser;
pub mod serialize;
pub mod vptree;

pub use assignment::{AssignmentSolver, AssignmentSolverError, HungarianSolver, Pair};
pub use branch::{Branch, BranchComparator, NodeMatch};
pub use call_model::{
    ArgsComparator, ArgStatus, ComparisonTables, DiffInfo, Effect, Function, FunctionComparator,
    FunctionComparisonResult, IoCall, IoConstructType, IoDesc, IoDescState, TablesLoadError,
};
pub use config::Config;
pub use deep_compare::{BranchAssignment, DeepGraphComparator, SolverBudget};
pub use diffgraph::{DiffEdgeType, DiffGraph, DiffNodeType, PairKey};
pub use grapher::build_graph;
pub use graph::{Direction, EdgeKind, GraphBuildError, GraphEdge, GraphNode, IoGraph, NodeId};
pub use parser::{FdAnomalyKind, FdLifecycleAnomaly, GraphHint, ParseDiagnostic, ParseOutput, Parser, ParsedEvent, TraceSyntaxError};
pub use serialize::{from_cbor, gexf_edge_attrs, gexf_node_attrs, to_cbor, GexfEdgeAttrs, GexfNodeAttrs, GraphLoadError};
pub use vptree::{graph_edit_distance, VpTree};

/// Returns the current version of the themis-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
