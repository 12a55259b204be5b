/// Run configuration for a Themis comparison.
///
/// Loading this from disk (TOML/JSON/whatever the CLI prefers) is the CLI
/// collaborator's job, per `spec.md` §6 — this module only defines the
/// shape and its `serde` (de)serialization, the way `omtsf-core` leaves
/// config-file I/O to its own binary crate and keeps `Config` itself a
/// plain serde struct in the library.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub trusted_graph_dir: String,
    pub dirty_graph_dir: String,
    pub result_dir: String,
    pub img_dir: String,
    pub trace_dir: String,
    /// Whether the dirty-side graph may be persisted as a new trusted
    /// baseline once a comparison completes.
    pub trust: bool,
    pub executable: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}
