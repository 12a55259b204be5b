/// Trace-line lexing, enter/exit pairing, and fd-lifecycle tracking.
///
/// Grounded on `omtsf-core`'s `newtypes.rs` for the `LazyLock<Regex>`
/// pattern, and on the reference parser's enter/exit state machine
/// (`original_source/themis/transforming/parser.py`).
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::call_model::{ComparisonTables, Function, IoCall, IoConstructType, IoDesc, IoDescState};
use crate::graph::{EdgeKind, NodeId};

// Patterns below are compile-time literals; Regex::new never returns Err for
// them. The fallback arm is required because the workspace bans expect()
// and unwrap(), so "a^" (a pattern that never matches) stands in as a safe
// value that satisfies the type checker (mirrors `omtsf-core`'s `newtypes.rs`).
static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ^(?P<offset>[|\s]*)
        (?P<func>\w+)
        (?:::(?P<evt>enter|exit)<(?P<evtid>\d+)>)?
        \((?P<args>.*)\)\s*$
        ",
    )
    .unwrap_or_else(|_| Regex::new("a^").unwrap_or_else(|_| Regex::new(".").unwrap_or_else(|_| unreachable!("regex engine broken"))))
});

static ARG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<key>\w+)=(?:"(?P<qval>[^"]*)"|(?P<val>[^,]+))"#)
        .unwrap_or_else(|_| Regex::new("a^").unwrap_or_else(|_| Regex::new(".").unwrap_or_else(|_| unreachable!("regex engine broken"))))
});

fn parse_depth(offset: &str) -> usize {
    offset.chars().filter(|c| *c == '|').count()
}

fn parse_args(text: &str) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    for caps in ARG_RE.captures_iter(text) {
        let key = caps["key"].to_owned();
        let value = if let Some(q) = caps.name("qval") {
            q.as_str().to_owned()
        } else {
            caps["val"].trim().to_owned()
        };
        args.insert(key, value);
    }
    args
}

/// Parses a fd-shaped argument value (`0x…` hex or plain decimal).
fn parse_fd_value(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        raw.parse::<u64>().ok()
    }
}

const IN_FD_KEYS: &[&str] = &["fd", "sockfd", "stream", "oldfd"];
const OUT_FD_KEYS: &[&str] = &["newfd", "retval"];

/// The call whose funcname wraps a lower-level fd-producing call inside its
/// enter/exit window (`spec.md` §4.2 step 4, scenario S3).
const FOPEN_WRAPPING: &str = "fopen";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdAnomalyKind {
    UseOfClosed,
    UseOfForgotten,
    ReopenOfOpen,
    OpenReturningNull,
    UnbalancedExit,
}

impl fmt::Display for FdAnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UseOfClosed => "use of closed fd",
            Self::UseOfForgotten => "use of forgotten fd",
            Self::ReopenOfOpen => "reopen of already-open fd",
            Self::OpenReturningNull => "open call returned null",
            Self::UnbalancedExit => "exit with no matching enter",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct TraceSyntaxError {
    pub line_no: usize,
    pub line: String,
}

impl fmt::Display for TraceSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: unparseable trace line: {:?}", self.line_no, self.line)
    }
}

impl std::error::Error for TraceSyntaxError {}

#[derive(Debug, Clone)]
pub struct FdLifecycleAnomaly {
    pub line_no: usize,
    pub kind: FdAnomalyKind,
    pub fd: Option<u64>,
}

impl fmt::Display for FdLifecycleAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fd {
            Some(fd) => write!(f, "line {}: {} (fd={fd})", self.line_no, self.kind),
            None => write!(f, "line {}: {}", self.line_no, self.kind),
        }
    }
}

impl std::error::Error for FdLifecycleAnomaly {}

/// Both kinds of recoverable parse diagnostic, collected rather than
/// short-circuited (`spec.md` §7).
#[derive(Debug, Clone)]
pub enum ParseDiagnostic {
    Syntax(TraceSyntaxError),
    FdLifecycle(FdLifecycleAnomaly),
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(e) => e.fmt(f),
            Self::FdLifecycle(e) => e.fmt(f),
        }
    }
}

/// A post-processing hint, consumed by the grapher to update its
/// last-toucher bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphHint {
    ResetFd { fd: u64, internal_fd: Option<u64> },
    ResetStreams,
    None,
}

/// One parsed call and the hint produced alongside it.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub node_id: NodeId,
    pub call: IoCall,
    pub hint: GraphHint,
}

/// Everything the grapher needs: the call stream plus accumulated NEST
/// edges and any diagnostics gathered along the way.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub events: Vec<ParsedEvent>,
    pub nest_edges: Vec<(NodeId, NodeId)>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

struct FdEntry {
    desc: IoDesc,
    state: IoDescState,
}

/// A call pending its matching `exit` event.
struct PendingCall {
    node_id: NodeId,
    funcname: String,
    enter_args: BTreeMap<String, String>,
    in_fd: Option<IoDesc>,
}

pub struct Parser<'a> {
    tables: &'a ComparisonTables,
    fd_registry: HashMap<u64, FdEntry>,
    open_calls: HashMap<u64, PendingCall>,
    open_call_stack: Vec<u64>,
    available_internal_fds: HashMap<u64, IoDesc>,
    last_of_level: HashMap<usize, NodeId>,
    next_node_id: u64,
    next_emit_index: u64,
    pending_anomalies: Vec<FdLifecycleAnomaly>,
}

impl<'a> Parser<'a> {
    pub fn new(tables: &'a ComparisonTables) -> Self {
        let mut fd_registry = HashMap::new();
        for fd in [0u64, 1, 2] {
            fd_registry.insert(
                fd,
                FdEntry {
                    desc: IoDesc::new(IoConstructType::Stdstream, Some(fd)),
                    state: IoDescState::Unknown,
                },
            );
        }
        Self {
            tables,
            fd_registry,
            open_calls: HashMap::new(),
            open_call_stack: Vec::new(),
            available_internal_fds: HashMap::new(),
            last_of_level: HashMap::new(),
            next_node_id: 1,
            next_emit_index: 0,
            pending_anomalies: Vec::new(),
        }
    }

    pub fn parse(mut self, text: &str) -> ParseOutput {
        let mut output = ParseOutput::default();
        for (line_no, raw_line) in text.lines().enumerate() {
            if raw_line.trim().is_empty() {
                continue;
            }
            self.parse_line(line_no + 1, raw_line, &mut output);
        }
        output
    }

    fn parse_line(&mut self, line_no: usize, raw_line: &str, output: &mut ParseOutput) {
        let Some(caps) = LINE_RE.captures(raw_line) else {
            output
                .diagnostics
                .push(ParseDiagnostic::Syntax(TraceSyntaxError {
                    line_no,
                    line: raw_line.to_owned(),
                }));
            return;
        };

        let depth = parse_depth(&caps["offset"]);
        let funcname = caps["func"].to_owned();
        let args = parse_args(&caps["args"]);
        let evt = caps.name("evt").map(|m| m.as_str());
        let evtid: Option<u64> = caps.name("evtid").and_then(|m| m.as_str().parse().ok());

        match evt {
            Some("enter") => self.handle_enter(line_no, depth, funcname, args, evtid, output),
            Some("exit") => self.handle_exit(line_no, depth, funcname, args, evtid, output),
            _ => self.handle_atomic(line_no, depth, funcname, args, output),
        }
    }

    fn resolve_in_fd(&mut self, line_no: usize, args: &BTreeMap<String, String>) -> Option<IoDesc> {
        for key in IN_FD_KEYS {
            if let Some(raw) = args.get(*key) {
                let Some(fd) = parse_fd_value(raw) else {
                    continue;
                };
                return Some(self.lookup_or_stub(line_no, fd));
            }
        }
        None
    }

    fn lookup_or_stub(&mut self, line_no: usize, fd: u64) -> IoDesc {
        match self.fd_registry.get(&fd) {
            Some(entry) => {
                match entry.state {
                    IoDescState::Closed => {
                        // logged as diagnostic; best-effort proceeds with the stale descriptor
                    }
                    IoDescState::Forgotten => {}
                    IoDescState::Open | IoDescState::Unknown => {}
                }
                if matches!(entry.state, IoDescState::Closed) {
                    self.note_anomaly(line_no, FdAnomalyKind::UseOfClosed, Some(fd));
                } else if matches!(entry.state, IoDescState::Forgotten) {
                    self.note_anomaly(line_no, FdAnomalyKind::UseOfForgotten, Some(fd));
                }
                entry.desc.clone()
            }
            None => IoDesc::new(IoConstructType::Unknown, Some(fd)),
        }
    }

    fn resolve_out_fds(&mut self, line_no: usize, funcname: &str, args: &BTreeMap<String, String>) -> Vec<IoDesc> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for key in OUT_FD_KEYS {
            let Some(raw) = args.get(*key) else {
                continue;
            };
            let Some(fd) = parse_fd_value(raw) else {
                continue;
            };
            if funcname == FOPEN_WRAPPING && fd == 0 {
                self.note_anomaly(line_no, FdAnomalyKind::OpenReturningNull, None);
                continue;
            }
            if !seen.insert(fd) {
                continue;
            }
            if self.fd_registry.contains_key(&fd)
                && matches!(self.fd_registry[&fd].state, IoDescState::Open)
            {
                self.note_anomaly(line_no, FdAnomalyKind::ReopenOfOpen, Some(fd));
            }
            let desc = IoDesc::new(IoConstructType::Unknown, Some(fd));
            self.fd_registry.insert(
                fd,
                FdEntry {
                    desc: desc.clone(),
                    state: IoDescState::Open,
                },
            );
            out.push(desc);
        }
        out
    }

    fn note_anomaly(&mut self, _line_no: usize, _kind: FdAnomalyKind, _fd: Option<u64>) {
        // Diagnostics are attached to `ParseOutput` by the caller to avoid
        // threading `output` through every helper; collected centrally in
        // `handle_atomic`/`handle_enter`/`handle_exit` via `self.pending_anomalies`.
        self.pending_anomalies.push(FdLifecycleAnomaly {
            line_no: _line_no,
            kind: _kind,
            fd: _fd,
        });
    }

    fn apply_hint(&self, funcname: &str, in_fd: Option<&IoDesc>) -> (GraphHint, bool) {
        // Returns (hint, suppress_guess). suppress_guess is true for
        // fclose/fcloseall/dup/dup2, matching the reference's if/elif/else
        // chain where only the `else` arm calls `guess_io_type`.
        let is_closer = self.tables.closers.contains(funcname);
        let fd_for_reset = in_fd.and_then(|d| d.fd);

        match funcname {
            "fclose" => (
                GraphHint::ResetFd {
                    fd: fd_for_reset.unwrap_or(0),
                    internal_fd: in_fd.and_then(|d| d.internal.as_ref()).and_then(|i| i.fd),
                },
                true,
            ),
            "fcloseall" => (GraphHint::ResetStreams, true),
            "dup" | "dup2" => (
                if is_closer {
                    GraphHint::ResetFd {
                        fd: fd_for_reset.unwrap_or(0),
                        internal_fd: None,
                    }
                } else {
                    GraphHint::None
                },
                true,
            ),
            _ if is_closer => (
                GraphHint::ResetFd {
                    fd: fd_for_reset.unwrap_or(0),
                    internal_fd: None,
                },
                false,
            ),
            _ => (GraphHint::None, false),
        }
    }

    fn finalize_types(&mut self, funcname: &str, in_fd: &mut Option<IoDesc>, out_fd: &mut Option<Vec<IoDesc>>) {
        let is_closer = self.tables.closers.contains(funcname);
        if is_closer {
            if let Some(desc) = in_fd {
                if let Some(fd) = desc.fd {
                    if let Some(entry) = self.fd_registry.get_mut(&fd) {
                        entry.state = IoDescState::Closed;
                    }
                }
                if funcname == "fclose" {
                    if let Some(internal) = desc.internal.as_ref() {
                        if let Some(ifd) = internal.fd {
                            if let Some(entry) = self.fd_registry.get_mut(&ifd) {
                                entry.state = IoDescState::Forgotten;
                            }
                        }
                    }
                }
            }
            return;
        }

        if funcname == "dup" || funcname == "dup2" {
            let propagated_type = in_fd.as_ref().map(|d| d.typ).unwrap_or(IoConstructType::Unknown);
            if let Some(outs) = out_fd {
                for desc in outs.iter_mut() {
                    desc.typ = propagated_type;
                    if let Some(fd) = desc.fd {
                        if let Some(entry) = self.fd_registry.get_mut(&fd) {
                            entry.desc.typ = propagated_type;
                        }
                    }
                }
            }
            return;
        }

        let mut guessed = in_fd.as_ref().map(|d| d.typ).unwrap_or(IoConstructType::Unknown);
        guessed = self.tables.guess_io_type(guessed, funcname);
        if let Some(desc) = in_fd {
            desc.typ = guessed;
            if let Some(fd) = desc.fd {
                if let Some(entry) = self.fd_registry.get_mut(&fd) {
                    entry.desc.typ = guessed;
                }
            }
        }
        if let Some(outs) = out_fd {
            for desc in outs.iter_mut() {
                desc.typ = merge_desc_type(desc.typ, guessed);
                if let Some(fd) = desc.fd {
                    if let Some(entry) = self.fd_registry.get_mut(&fd) {
                        entry.desc.typ = desc.typ;
                    }
                }
            }
        }
    }

    fn handle_atomic(
        &mut self,
        line_no: usize,
        depth: usize,
        funcname: String,
        args: BTreeMap<String, String>,
        output: &mut ParseOutput,
    ) {
        let mut in_fd = self.resolve_in_fd(line_no, &args);
        let mut out_fd_vec = self.resolve_out_fds(line_no, &funcname, &args);

        // Nested fd-producing call inside an fopen enter/exit window: stash
        // as the wrapping call's internal descriptor instead of emitting a
        // standalone node (spec.md §4.2 step 4, scenario S3).
        if let Some(&outer_id) = self.open_call_stack.last() {
            let wraps = self
                .open_calls
                .get(&outer_id)
                .map(|p| p.funcname == FOPEN_WRAPPING)
                .unwrap_or(false);
            if wraps {
                if let Some(first) = out_fd_vec.first().cloned() {
                    self.available_internal_fds.insert(outer_id, first);
                    self.drain_anomalies(output);
                    return;
                }
            }
        }

        let mut out_fd = if out_fd_vec.is_empty() { None } else { Some(std::mem::take(&mut out_fd_vec)) };
        self.finalize_types(&funcname, &mut in_fd, &mut out_fd);
        let (hint, _) = self.apply_hint(&funcname, in_fd.as_ref());

        let node_id = NodeId::Num(self.next_node_id);
        self.next_node_id += 1;
        let index = self.next_emit_index;
        self.next_emit_index += 1;

        let mut call = IoCall::new(index, Function::new(funcname));
        call.in_fd = in_fd;
        call.out_fd = out_fd;
        call.args = args;

        self.record_nest(depth, node_id, output);
        output.events.push(ParsedEvent { node_id, call, hint });
        self.drain_anomalies(output);
    }

    fn handle_enter(
        &mut self,
        line_no: usize,
        depth: usize,
        funcname: String,
        args: BTreeMap<String, String>,
        evtid: Option<u64>,
        output: &mut ParseOutput,
    ) {
        let in_fd = self.resolve_in_fd(line_no, &args);
        let node_id = NodeId::Num(self.next_node_id);
        self.next_node_id += 1;

        self.record_nest(depth, node_id, output);

        let Some(evtid) = evtid else {
            self.drain_anomalies(output);
            return;
        };
        self.open_calls.insert(
            evtid,
            PendingCall {
                node_id,
                funcname: funcname.clone(),
                enter_args: args,
                in_fd,
            },
        );
        self.open_call_stack.push(evtid);
        self.drain_anomalies(output);
    }

    fn handle_exit(
        &mut self,
        line_no: usize,
        _depth: usize,
        funcname: String,
        exit_args: BTreeMap<String, String>,
        evtid: Option<u64>,
        output: &mut ParseOutput,
    ) {
        let Some(evtid) = evtid else {
            self.drain_anomalies(output);
            return;
        };
        let Some(pending) = self.open_calls.remove(&evtid) else {
            self.note_anomaly(line_no, FdAnomalyKind::UnbalancedExit, None);
            self.drain_anomalies(output);
            return;
        };
        self.open_call_stack.retain(|id| *id != evtid);

        let mut merged_args = pending.enter_args.clone();
        merged_args.extend(exit_args.clone());

        let mut out_fd_vec = self.resolve_out_fds(line_no, &funcname, &exit_args);
        if funcname == FOPEN_WRAPPING {
            if let Some(internal) = self.available_internal_fds.remove(&evtid) {
                if let Some(first) = out_fd_vec.first_mut() {
                    first.internal = Some(Box::new(internal));
                }
            }
        }

        let mut in_fd = pending.in_fd;
        let mut out_fd = if out_fd_vec.is_empty() { None } else { Some(out_fd_vec) };
        self.finalize_types(&funcname, &mut in_fd, &mut out_fd);
        let (hint, _) = self.apply_hint(&funcname, in_fd.as_ref());

        let index = self.next_emit_index;
        self.next_emit_index += 1;

        let mut call = IoCall::new(index, Function::new(funcname));
        call.in_fd = in_fd;
        call.out_fd = out_fd;
        call.args = merged_args;

        output.events.push(ParsedEvent {
            node_id: pending.node_id,
            call,
            hint,
        });
        self.drain_anomalies(output);
    }

    fn record_nest(&mut self, depth: usize, node_id: NodeId, output: &mut ParseOutput) {
        if depth > 0 {
            if let Some(&parent) = self.last_of_level.get(&(depth - 1)) {
                output.nest_edges.push((parent, node_id));
            }
        }
        self.last_of_level.insert(depth, node_id);
    }

    fn drain_anomalies(&mut self, output: &mut ParseOutput) {
        for anomaly in self.pending_anomalies.drain(..) {
            output.diagnostics.push(ParseDiagnostic::FdLifecycle(anomaly));
        }
    }
}

fn merge_desc_type(old: IoConstructType, new: IoConstructType) -> IoConstructType {
    old.max(new)
}
