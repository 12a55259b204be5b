/// The I/O call model and the comparison tables that drive `IOCall::compare`.
///
/// Mirrors the construction/comparison split of `omtsf-core`'s
/// `structures.rs` + `identity.rs`: small data types here, matching rules
/// driven by tables rather than hard-coded branches, so the tables can be
/// swapped at runtime (see [`ComparisonTables::from_json`]).
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// IOConstructType
// ---------------------------------------------------------------------------

/// Coarse classification of what a file descriptor points to.
///
/// Declaration order is significant: `derive(PartialOrd, Ord)` gives
/// `UNKNOWN < INVALID < BINFILE < STDSTREAM < STREAM < MEMORY < DIRECTORY <
/// LINK < TMP < PIPE < FIFO < SOCKET`, which is exactly the "prefer more
/// specific evidence" ordering that [`merge_type`] relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IoConstructType {
    Unknown,
    Invalid,
    Binfile,
    Stdstream,
    Stream,
    Memory,
    Directory,
    Link,
    Tmp,
    Pipe,
    Fifo,
    Socket,
}

impl Default for IoConstructType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for IoConstructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Invalid => "INVALID",
            Self::Binfile => "BINFILE",
            Self::Stdstream => "STDSTREAM",
            Self::Stream => "STREAM",
            Self::Memory => "MEMORY",
            Self::Directory => "DIRECTORY",
            Self::Link => "LINK",
            Self::Tmp => "TMP",
            Self::Pipe => "PIPE",
            Self::Fifo => "FIFO",
            Self::Socket => "SOCKET",
        };
        f.write_str(s)
    }
}

/// Merges two type guesses for the same fd, keeping the more specific one.
///
/// "More specific" means "later in the `IoConstructType` ordering" (§3).
pub fn merge_type(t1: IoConstructType, t2: IoConstructType) -> IoConstructType {
    t1.max(t2)
}

// ---------------------------------------------------------------------------
// IODesc / IODescState
// ---------------------------------------------------------------------------

/// A descriptor record: the evolving picture of what one fd is.
///
/// `internal` is populated only for stream handles that wrap a lower-level
/// fd (e.g. an `fopen` result wrapping the `open` fd observed in its
/// enter/exit window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoDesc {
    pub typ: IoConstructType,
    pub fd: Option<u64>,
    pub desc: Option<String>,
    pub internal: Option<Box<IoDesc>>,
}

impl IoDesc {
    /// A descriptor with only a type and fd set; the common case for freshly
    /// observed fds before any type evidence has been gathered.
    pub fn new(typ: IoConstructType, fd: Option<u64>) -> Self {
        Self {
            typ,
            fd,
            desc: None,
            internal: None,
        }
    }
}

/// Lifecycle state of an [`IoDesc`] as tracked by the parser's fd registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoDescState {
    Open,
    Closed,
    /// An internal fd for a stream, after the stream was closed without a
    /// direct `close` on the fd itself.
    Forgotten,
    /// Initial state of inherited stdin/stdout/stderr: we never observed
    /// their creation, so we don't know for sure.
    Unknown,
}

// ---------------------------------------------------------------------------
// Function / Effect
// ---------------------------------------------------------------------------

/// Reserved for future use; equality for comparison purposes is driven by
/// `funcname` plus the equivalence table, not by `effect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Open,
    Use,
    Close,
    Tweak,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub funcname: String,
    pub effect: Effect,
}

impl Function {
    pub fn new(funcname: impl Into<String>) -> Self {
        Self {
            funcname: funcname.into(),
            effect: Effect::None,
        }
    }
}

// ---------------------------------------------------------------------------
// IOCall
// ---------------------------------------------------------------------------

/// One observed call into the traced function set.
///
/// `index` preserves original trace order; it is distinct from a
/// [`crate::graph::NodeId`], which identifies the call's position in the
/// constructed graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCall {
    pub index: u64,
    pub func: Function,
    pub in_fd: Option<IoDesc>,
    pub out_fd: Option<Vec<IoDesc>>,
    pub args: BTreeMap<String, String>,
}

impl IoCall {
    pub fn new(index: u64, func: Function) -> Self {
        Self {
            index,
            func,
            in_fd: None,
            out_fd: None,
            args: BTreeMap::new(),
        }
    }

    /// Compares two (possibly absent) calls, scoring their similarity.
    ///
    /// Returns `(score, DiffInfo)`. When one side is absent the score is 0
    /// and the diff records the missing/excessive side (§4.1). When both
    /// exist, the score starts at 100 and is reduced per the penalty table
    /// in `spec.md` §4.1.
    ///
    /// # Panics
    ///
    /// Never: unlike the reference implementation (which raises on
    /// `(None, None)`), both-absent is handled as a degenerate empty diff,
    /// since Rust call sites naturally hold `Option<&IoCall>` without an
    /// invariant forbidding the all-`None` case.
    pub fn compare(
        call1: Option<&IoCall>,
        call2: Option<&IoCall>,
        tables: &ComparisonTables,
    ) -> (i64, DiffInfo) {
        match (call1, call2) {
            (None, None) => (
                0,
                DiffInfo {
                    func_diff: (None, None, FunctionComparisonResult::Different),
                    idx_diff: (None, None),
                    args_diff: BTreeMap::new(),
                },
            ),
            (Some(c1), None) => {
                let args_diff = ArgsComparator::compare(&c1.args, &BTreeMap::new(), tables).1;
                (
                    0,
                    DiffInfo {
                        func_diff: (
                            Some(c1.func.funcname.clone()),
                            None,
                            FunctionComparisonResult::Different,
                        ),
                        idx_diff: (Some(c1.index), None),
                        args_diff,
                    },
                )
            }
            (None, Some(c2)) => {
                let args_diff = ArgsComparator::compare(&BTreeMap::new(), &c2.args, tables).1;
                (
                    0,
                    DiffInfo {
                        func_diff: (
                            None,
                            Some(c2.func.funcname.clone()),
                            FunctionComparisonResult::Different,
                        ),
                        idx_diff: (None, Some(c2.index)),
                        args_diff,
                    },
                )
            }
            (Some(c1), Some(c2)) => {
                let mut score: i64 = 100;

                let func_match = FunctionComparator::compare(
                    &c1.func.funcname,
                    &c2.func.funcname,
                    &tables.equivalence_classes,
                );
                match func_match {
                    FunctionComparisonResult::Equal => {}
                    FunctionComparisonResult::EquivClass => score -= 15,
                    FunctionComparisonResult::Different => score -= 55,
                }

                if c1.index != c2.index {
                    score -= 1;
                }
                let idx_delta = c1.index.abs_diff(c2.index);
                score -= ((idx_delta / 3) * 3) as i64;

                let (penalty, args_diff) = ArgsComparator::compare(&c1.args, &c2.args, tables);
                score -= penalty;

                (
                    score,
                    DiffInfo {
                        func_diff: (
                            Some(c1.func.funcname.clone()),
                            Some(c2.func.funcname.clone()),
                            func_match,
                        ),
                        idx_diff: (Some(c1.index), Some(c2.index)),
                        args_diff,
                    },
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FunctionComparator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionComparisonResult {
    Equal,
    EquivClass,
    Different,
}

pub struct FunctionComparator;

impl FunctionComparator {
    pub fn compare(fname1: &str, fname2: &str, equivalence_classes: &[Vec<String>]) -> FunctionComparisonResult {
        if fname1 == fname2 {
            return FunctionComparisonResult::Equal;
        }
        for class in equivalence_classes {
            if class.iter().any(|f| f == fname1) && class.iter().any(|f| f == fname2) {
                return FunctionComparisonResult::EquivClass;
            }
        }
        FunctionComparisonResult::Different
    }
}

// ---------------------------------------------------------------------------
// ArgsComparator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgStatus {
    Missing,
    Excessive,
    ValueMismatch,
    Matching,
}

pub struct ArgsComparator;

impl ArgsComparator {
    /// Compares two argument maps, excluding keys in
    /// [`ComparisonTables::args_to_exclude`].
    ///
    /// Returns the total penalty and a per-key diff map whose value is
    /// `(status, value_in_1, value_in_2)`.
    pub fn compare(
        args1: &BTreeMap<String, String>,
        args2: &BTreeMap<String, String>,
        tables: &ComparisonTables,
    ) -> (i64, BTreeMap<String, (ArgStatus, Option<String>, Option<String>)>) {
        let mut penalty: i64 = 0;
        let mut differences = BTreeMap::new();

        let filtered1: BTreeMap<&String, &String> = args1
            .iter()
            .filter(|(k, _)| !tables.args_to_exclude.contains(k.as_str()))
            .collect();
        let filtered2: BTreeMap<&String, &String> = args2
            .iter()
            .filter(|(k, _)| !tables.args_to_exclude.contains(k.as_str()))
            .collect();

        for (key, val) in &filtered1 {
            match filtered2.get(key) {
                None => {
                    differences.insert(
                        (*key).clone(),
                        (ArgStatus::Excessive, Some((*val).clone()), None),
                    );
                    penalty += 4;
                }
                Some(val2) => {
                    if val2 == val {
                        differences.insert(
                            (*key).clone(),
                            (ArgStatus::Matching, Some((*val).clone()), None),
                        );
                    } else {
                        differences.insert(
                            (*key).clone(),
                            (
                                ArgStatus::ValueMismatch,
                                Some((*val).clone()),
                                Some((*val2).clone()),
                            ),
                        );
                        penalty += 2;
                    }
                }
            }
        }

        for (key, val) in &filtered2 {
            if !filtered1.contains_key(key) {
                differences.insert(
                    (*key).clone(),
                    (ArgStatus::Missing, None, Some((*val).clone())),
                );
                penalty += 4;
            }
        }

        (penalty, differences)
    }
}

// ---------------------------------------------------------------------------
// DiffInfo
// ---------------------------------------------------------------------------

/// The structured diff produced by [`IoCall::compare`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffInfo {
    pub func_diff: (Option<String>, Option<String>, FunctionComparisonResult),
    pub idx_diff: (Option<u64>, Option<u64>),
    pub args_diff: BTreeMap<String, (ArgStatus, Option<String>, Option<String>)>,
}

// ---------------------------------------------------------------------------
// ComparisonTables
// ---------------------------------------------------------------------------

/// The three curated comparison tables, as data rather than code.
///
/// [`ComparisonTables::default`] returns the built-in tables transcribed
/// from the reference corpus; [`ComparisonTables::from_json`] loads an
/// override, so the tables can evolve without recompiling (`spec.md` §9,
/// "Equivalence classes as data").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonTables {
    /// Function name → implied `IoConstructType`, used by [`guess_io_type`].
    pub manipulators: HashMap<String, IoConstructType>,
    /// Function names whose effect is to close an fd.
    pub closers: HashSet<String>,
    /// Ordered list of function-name sets considered semantically
    /// equivalent for comparison purposes.
    pub equivalence_classes: Vec<Vec<String>>,
    /// Argument names ignored during argument comparison.
    pub args_to_exclude: HashSet<String>,
}

impl Default for ComparisonTables {
    fn default() -> Self {
        // Inserted in reverse priority order so that, for the one known
        // overlap ("wprintf", present in both STREAM and STDSTREAM), the
        // higher-priority category (STREAM, inserted later) wins — matching
        // the reference implementation's first-match-in-priority-order
        // behavior without needing an explicit priority list at lookup time.
        let mut manipulators = HashMap::new();
        insert_all(&mut manipulators, BINFILE_MANIPULATORS, IoConstructType::Binfile);
        insert_all(&mut manipulators, STDSTREAM_MANIPULATORS, IoConstructType::Stdstream);
        insert_all(&mut manipulators, STREAM_MANIPULATORS, IoConstructType::Stream);
        insert_all(&mut manipulators, FIFO_MANIPULATORS, IoConstructType::Fifo);
        insert_all(&mut manipulators, PIPE_MANIPULATORS, IoConstructType::Pipe);
        insert_all(&mut manipulators, TMP_MANIPULATORS, IoConstructType::Tmp);
        insert_all(&mut manipulators, LINK_MANIPULATORS, IoConstructType::Link);
        insert_all(&mut manipulators, DIRECTORY_MANIPULATORS, IoConstructType::Directory);
        insert_all(&mut manipulators, MEMORY_MANIPULATORS, IoConstructType::Memory);
        insert_all(&mut manipulators, SOCKET_MANIPULATORS, IoConstructType::Socket);

        Self {
            manipulators,
            closers: CLOSERS.iter().map(|s| (*s).to_owned()).collect(),
            equivalence_classes: EQUIVALENCE_CLASSES
                .iter()
                .map(|class| class.iter().map(|s| (*s).to_owned()).collect())
                .collect(),
            args_to_exclude: ARGS_TO_EXCLUDE.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

fn insert_all(map: &mut HashMap<String, IoConstructType>, names: &[&str], typ: IoConstructType) {
    for name in names {
        map.insert((*name).to_owned(), typ);
    }
}

/// Error loading a [`ComparisonTables`] override from JSON.
#[derive(Debug)]
pub enum TablesLoadError {
    Json(serde_json::Error),
}

impl fmt::Display for TablesLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid comparison-tables JSON: {e}"),
        }
    }
}

impl std::error::Error for TablesLoadError {}

impl ComparisonTables {
    /// Loads a full table override from a JSON document shaped like the
    /// serialized form of `ComparisonTables` itself.
    pub fn from_json(text: &str) -> Result<Self, TablesLoadError> {
        serde_json::from_str(text).map_err(TablesLoadError::Json)
    }

    /// Guesses the `IoConstructType` implied by `funcname`, merging with
    /// `old_guess` per the "more specific wins" rule (§3).
    ///
    /// Monotone: the result is never less specific than `old_guess`.
    pub fn guess_io_type(&self, old_guess: IoConstructType, funcname: &str) -> IoConstructType {
        let new_guess = self
            .manipulators
            .get(funcname)
            .copied()
            .unwrap_or(IoConstructType::Unknown);
        merge_type(old_guess, new_guess)
    }
}

// ---------------------------------------------------------------------------
// Built-in tables, transcribed from the reference corpus
// ---------------------------------------------------------------------------

pub const CLOSERS: &[&str] = &[
    "fclose",
    "fcloseall",
    "close",
    "close_range",
    "closefrom",
    "closedir",
    "pclose",
    "shutdown",
];

const STREAM_MANIPULATORS: &[&str] = &[
    "fopen",
    "freopen",
    "fclose",
    "fcloseall",
    "fputc",
    "fputwc",
    "fputc_unlocked",
    "fputwc_unlocked",
    "fputs",
    "fputws",
    "fputs_unlocked",
    "fputws_unlocked",
    "fgetc",
    "fgetwc",
    "fgetc_unlocked",
    "fgetwc_unlocked",
    "getline",
    "getdelim",
    "fgets",
    "fgetws",
    "fgets_unlocked",
    "fgetws_unlocked",
    "fread",
    "fread_unlocked",
    "fwrite",
    "fwrite_unlocked",
    "wprintf",
    "fprintf",
    "fwprintf",
    "fscanf",
    "fwscanf",
    "putc",
    "putwc",
    "putc_unlocked",
    "putwc_unlocked",
    "putchar",
    "putwchar",
    "putchar_unlocked",
    "putwchar_unlocked",
    "getc",
    "getwc",
    "getc_unlocked",
    "getwc_unlocked",
    "getw",
];

const STDSTREAM_MANIPULATORS: &[&str] = &[
    "puts",
    "putw",
    "getchar",
    "getwchar",
    "getchar_unlocked",
    "getwchar_unlocked",
    "gets",
    "printf",
    "wprintf",
];

const BINFILE_MANIPULATORS: &[&str] = &[
    "open",
    "creat",
    "close",
    "close_range",
    "closefrom",
    "read",
    "pread",
    "write",
    "pwrite",
    "readv",
    "writev",
    "preadv",
    "pwritev",
    "preadv2",
    "pwritev2",
    "copy_file_range",
    "remove",
    "rename",
];

const MEMORY_MANIPULATORS: &[&str] = &[
    "mmap", "munmap", "msync", "mremap", "madvise", "sprintf", "swprintf", "snprintf", "sscanf",
    "swscanf",
];

const DIRECTORY_MANIPULATORS: &[&str] = &[
    "getcwd", "chdir", "fchdir", "opendir", "fdopendir", "dirfd", "readdir", "readdir_r",
    "closedir", "scandir", "rmdir", "mkdir",
];

const LINK_MANIPULATORS: &[&str] = &["link", "linkat", "symlink", "readlink", "realpath"];

const TMP_MANIPULATORS: &[&str] = &[
    "tmpfile", "tmpnam", "tmpnam_r", "tempnam", "mktemp", "mkstemp", "mkdtemp",
];

const SOCKET_MANIPULATORS: &[&str] = &[
    "socket",
    "shutdown",
    "socketpair",
    "connect",
    "listen",
    "accept",
    "send",
    "recv",
    "sendto",
    "recvfrom",
    "getsockopt",
    "setsockopt",
    "bind",
];

const PIPE_MANIPULATORS: &[&str] = &["pipe", "popen", "pclose"];

const FIFO_MANIPULATORS: &[&str] = &["mkfifo", "mkfifoat"];

const ARGS_TO_EXCLUDE: &[&str] = &[
    "buf",
    "iov",
    "optval",
    "ptr",
    "stream",
    "lineptr",
    "n",
    "retval",
    "dest_addr",
    "fd",
];

const EQUIVALENCE_CLASSES: &[&[&str]] = &[
    &["read", "readv"],
    &["write", "writev"],
    &["pwrite", "pwritev", "pwritev2"],
    &["pread", "preadv", "preadv2"],
    &[
        "fputc",
        "fputwc",
        "fputc_unlocked",
        "fputwc_unlocked",
        "putc",
        "putwc",
        "putc_unlocked",
        "putwc_unlocked",
    ],
    &["putchar", "putwchar", "putchar_unlocked", "putwchar_unlocked"],
    &["puts", "putw"],
    &[
        "fgetc",
        "fgetwc",
        "fgetc_unlocked",
        "fgetwc_unlocked",
        "getc",
        "getwc",
        "getw",
        "getc_unlocked",
        "getwc_unlocked",
    ],
    &["getchar", "getwchar", "getchar_unlocked", "getwchar_unlocked"],
    &["fgets", "fgetws", "fgets_unlocked", "fgetws_unlocked"],
    &["fputs", "fputws"],
    &["printf", "wprintf"],
    &["sprintf", "swsprintf", "snprintf"],
    &["scanf", "wscanf"],
    &["fprintf", "fwprintf"],
    &["fscanf", "fwscanf"],
    &["swscanf", "sscanf"],
    &["chdir", "fchdir"],
    &["opendir", "fdopendir"],
    &["scandir", "scandirat"],
    &["link", "linkat"],
    &["tmpnam", "tmpnam_r", "tempnam"],
    &["mktemp", "mkstemp", "mkostemp"],
    &["mkstemps", "mkostemps"],
    &["send", "sendto", "sendmsg"],
    &["recv", "recvfrom"],
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    fn call(index: u64, funcname: &str) -> IoCall {
        IoCall::new(index, Function::new(funcname))
    }

    // ---- IoConstructType ordering ------------------------------------------

    #[test]
    fn construct_type_ordering_matches_spec() {
        use IoConstructType::*;
        let ordered = [
            Unknown, Invalid, Binfile, Stdstream, Stream, Memory, Directory, Link, Tmp, Pipe,
            Fifo, Socket,
        ];
        for window in ordered.windows(2) {
            assert!(window[0] < window[1], "{:?} should be < {:?}", window[0], window[1]);
        }
    }

    #[test]
    fn merge_type_prefers_more_specific() {
        assert_eq!(
            merge_type(IoConstructType::Unknown, IoConstructType::Socket),
            IoConstructType::Socket
        );
        assert_eq!(
            merge_type(IoConstructType::Socket, IoConstructType::Unknown),
            IoConstructType::Socket
        );
        assert_eq!(
            merge_type(IoConstructType::Stream, IoConstructType::Binfile),
            IoConstructType::Stream
        );
    }

    // ---- guess_io_type ------------------------------------------------------

    #[test]
    fn guess_io_type_is_monotone() {
        let tables = ComparisonTables::default();
        let mut typ = IoConstructType::Unknown;
        typ = tables.guess_io_type(typ, "open");
        assert_eq!(typ, IoConstructType::Binfile);
        typ = tables.guess_io_type(typ, "accept");
        assert_eq!(typ, IoConstructType::Socket);
        // A weaker hint afterwards never downgrades the guess.
        typ = tables.guess_io_type(typ, "read");
        assert_eq!(typ, IoConstructType::Socket);
    }

    #[test]
    fn guess_io_type_unknown_func_is_noop() {
        let tables = ComparisonTables::default();
        let typ = tables.guess_io_type(IoConstructType::Binfile, "frobnicate");
        assert_eq!(typ, IoConstructType::Binfile);
    }

    #[test]
    fn wprintf_resolves_to_stream_not_stdstream() {
        let tables = ComparisonTables::default();
        let typ = tables.guess_io_type(IoConstructType::Unknown, "wprintf");
        assert_eq!(typ, IoConstructType::Stream);
    }

    // ---- FunctionComparator ---------------------------------------------

    #[test]
    fn function_comparator_equal() {
        let tables = ComparisonTables::default();
        assert_eq!(
            FunctionComparator::compare("read", "read", &tables.equivalence_classes),
            FunctionComparisonResult::Equal
        );
    }

    #[test]
    fn function_comparator_equiv_class() {
        let tables = ComparisonTables::default();
        assert_eq!(
            FunctionComparator::compare("read", "readv", &tables.equivalence_classes),
            FunctionComparisonResult::EquivClass
        );
    }

    #[test]
    fn function_comparator_different() {
        let tables = ComparisonTables::default();
        assert_eq!(
            FunctionComparator::compare("open", "socket", &tables.equivalence_classes),
            FunctionComparisonResult::Different
        );
    }

    // ---- IoCall::compare (testable properties, spec §8) --------------------

    #[test]
    fn self_compare_scores_100() {
        let tables = ComparisonTables::default();
        let mut c = call(5, "read");
        c.args.insert("count".to_owned(), "10".to_owned());
        let (score, _) = IoCall::compare(Some(&c), Some(&c), &tables);
        assert_eq!(score, 100);
    }

    #[test]
    fn compare_with_none_is_zero() {
        let tables = ComparisonTables::default();
        let c = call(1, "open");
        let (score_a, _) = IoCall::compare(Some(&c), None, &tables);
        let (score_b, _) = IoCall::compare(None, Some(&c), &tables);
        assert_eq!(score_a, 0);
        assert_eq!(score_b, 0);
    }

    #[test]
    fn compare_is_symmetric_modulo_side_swap() {
        let tables = ComparisonTables::default();
        let mut c1 = call(1, "open");
        c1.args.insert("flags".to_owned(), "0x0".to_owned());
        c1.args.insert("extra".to_owned(), "1".to_owned());
        let mut c2 = call(4, "openat");
        c2.args.insert("flags".to_owned(), "0x1".to_owned());

        let (score_fwd, diff_fwd) = IoCall::compare(Some(&c1), Some(&c2), &tables);
        let (score_rev, diff_rev) = IoCall::compare(Some(&c2), Some(&c1), &tables);

        assert_eq!(score_fwd, score_rev);
        assert_eq!(diff_fwd.idx_diff, (Some(1), Some(4)));
        assert_eq!(diff_rev.idx_diff, (Some(4), Some(1)));
        assert_eq!(diff_fwd.func_diff.0, diff_rev.func_diff.1);
        assert_eq!(diff_fwd.func_diff.1, diff_rev.func_diff.0);
    }

    #[test]
    fn equiv_class_funcname_penalty() {
        let tables = ComparisonTables::default();
        let c1 = call(1, "read");
        let c2 = call(1, "readv");
        let (score, diff) = IoCall::compare(Some(&c1), Some(&c2), &tables);
        assert_eq!(score, 85);
        assert_eq!(diff.func_diff.2, FunctionComparisonResult::EquivClass);
    }

    #[test]
    fn different_class_funcname_penalty() {
        let tables = ComparisonTables::default();
        let c1 = call(1, "open");
        let c2 = call(1, "socket");
        let (score, diff) = IoCall::compare(Some(&c1), Some(&c2), &tables);
        assert_eq!(score, 45);
        assert_eq!(diff.func_diff.2, FunctionComparisonResult::Different);
    }

    #[test]
    fn index_penalty_scales_in_units_of_three() {
        let tables = ComparisonTables::default();
        let c1 = call(0, "open");
        let c2 = call(7, "open");
        let (score, _) = IoCall::compare(Some(&c1), Some(&c2), &tables);
        // index differs (-1) + floor(7/3)*3 = 6 -> total -7
        assert_eq!(score, 93);
    }

    #[test]
    fn args_excluded_from_comparison() {
        let tables = ComparisonTables::default();
        let mut c1 = call(1, "open");
        c1.args.insert("fd".to_owned(), "3".to_owned());
        let mut c2 = call(1, "open");
        c2.args.insert("fd".to_owned(), "99".to_owned());
        let (score, _) = IoCall::compare(Some(&c1), Some(&c2), &tables);
        assert_eq!(score, 100, "fd is in args_to_exclude, so it must not penalize");
    }

    #[test]
    fn args_value_mismatch_penalty() {
        let tables = ComparisonTables::default();
        let mut c1 = call(1, "open");
        c1.args.insert("mode".to_owned(), "0o644".to_owned());
        let mut c2 = call(1, "open");
        c2.args.insert("mode".to_owned(), "0o600".to_owned());
        let (score, diff) = IoCall::compare(Some(&c1), Some(&c2), &tables);
        assert_eq!(score, 98);
        assert_eq!(
            diff.args_diff.get("mode").map(|(s, _, _)| *s),
            Some(ArgStatus::ValueMismatch)
        );
    }

    #[test]
    fn args_missing_and_excessive_penalty() {
        let tables = ComparisonTables::default();
        let mut c1 = call(1, "open");
        c1.args.insert("extra_only_in_1".to_owned(), "x".to_owned());
        let mut c2 = call(1, "open");
        c2.args.insert("extra_only_in_2".to_owned(), "y".to_owned());
        let (score, diff) = IoCall::compare(Some(&c1), Some(&c2), &tables);
        assert_eq!(score, 92);
        assert_eq!(
            diff.args_diff.get("extra_only_in_1").map(|(s, _, _)| *s),
            Some(ArgStatus::Excessive)
        );
        assert_eq!(
            diff.args_diff.get("extra_only_in_2").map(|(s, _, _)| *s),
            Some(ArgStatus::Missing)
        );
    }

    #[test]
    fn tables_round_trip_json() {
        let tables = ComparisonTables::default();
        let json = serde_json::to_string(&tables).expect("serialize tables");
        let reloaded = ComparisonTables::from_json(&json).expect("reload tables");
        assert_eq!(reloaded.closers, tables.closers);
        assert_eq!(reloaded.equivalence_classes, tables.equivalence_classes);
    }
}
