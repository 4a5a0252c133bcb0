//! Dirty-state computation: walks the graph below a target, stats files,
//! loads discovered dependencies and decides which outputs are out of date.
//!
//! The walk is iterative, with an explicit stack of edges being visited, so
//! that arbitrarily deep dependency chains can't overflow the call stack.
//! The stack doubles as the path used to report dependency cycles.

use crate::build_log::{BuildLog, LogEntry};
use crate::deps_log::DepsLog;
use crate::dyndep::{DyndepFile, DyndepLoader};
use crate::explain::explain;
use crate::fs::FileSystem;
use crate::graph::{EdgeId, NodeId, State, VisitMark};
use crate::hash::hash_command;
use crate::implicit::ImplicitDepLoader;
use crate::trace;
use anyhow::anyhow;

/// Where a Frame is in the visit of its edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    /// Visit the dyndep file's own producer first, if any.
    Dyndep,
    /// Load the dyndep file if it's ready.
    LoadDyndep,
    /// Stat outputs and load implicit deps.
    Deps,
    /// Visit inputs one at a time.
    Inputs,
    /// Everything below is known; decide this edge.
    Finish,
}

/// An edge being visited, reached via `node`.
struct Frame {
    node: NodeId,
    edge: EdgeId,
    phase: Phase,
    next_input: usize,
    /// Whether the input at next_input was pushed and is being visited.
    awaiting_input: bool,
    dirty: bool,
    most_recent_input: Option<NodeId>,
}

pub struct DependencyScan<'a> {
    build_log: Option<&'a BuildLog>,
    fs: &'a dyn FileSystem,
    dep_loader: ImplicitDepLoader<'a>,
    dyndep_loader: DyndepLoader<'a>,
}

impl<'a> DependencyScan<'a> {
    pub fn new(build_log: Option<&'a BuildLog>, deps_log: Option<&'a DepsLog>, fs: &'a dyn FileSystem) -> Self {
        DependencyScan {
            build_log,
            fs,
            dep_loader: ImplicitDepLoader::new(deps_log, fs),
            dyndep_loader: DyndepLoader::new(fs),
        }
    }

    pub fn build_log(&self) -> Option<&'a BuildLog> {
        self.build_log
    }

    /// Load a dyndep file and apply it to the edges that use it.
    pub fn load_dyndeps(&self, state: &mut State, node: NodeId) -> anyhow::Result<DyndepFile> {
        self.dyndep_loader.load_dyndeps(state, node)
    }

    /// Update the dirty state of `node` and everything it depends on.
    ///
    /// Afterwards every visited node has been stat'ed and has its dirty bit
    /// set, and every visited edge is marked done with outputs_ready telling
    /// whether nothing below it needs to run.  Fails on dependency cycles,
    /// stat errors and unreadable dependency files.
    pub fn recompute_dirty(&self, state: &mut State, node: NodeId) -> anyhow::Result<()> {
        trace::scope("recompute_dirty", || self.recompute_dirty_impl(state, node))
    }

    fn recompute_dirty_impl(&self, state: &mut State, node: NodeId) -> anyhow::Result<()> {
        let mut stack: Vec<Frame> = Vec::new();
        self.enter(state, node, &mut stack)?;

        while let Some(top) = stack.len().checked_sub(1) {
            let edge = stack[top].edge;
            match stack[top].phase {
                Phase::Dyndep => {
                    stack[top].phase = Phase::LoadDyndep;
                    if let Some(dyndep) = pending_dyndep(state, edge) {
                        self.enter(state, dyndep, &mut stack)?;
                    }
                }
                Phase::LoadDyndep => {
                    stack[top].phase = Phase::Deps;
                    if let Some(dyndep) = pending_dyndep(state, edge) {
                        let ready = match state.node(dyndep).in_edge() {
                            None => true,
                            Some(producer) => state.edge(producer).outputs_ready(),
                        };
                        if ready {
                            self.dyndep_loader.load_dyndeps(state, dyndep)?;
                        }
                    }
                }
                Phase::Deps => {
                    stack[top].phase = Phase::Inputs;
                    for i in 0..state.edge(edge).outputs().len() {
                        let out = state.edge(edge).outputs()[i];
                        state.node_mut(out).stat_if_necessary(self.fs)?;
                    }
                    if !state.edge(edge).deps_loaded {
                        state.edge_mut(edge).deps_loaded = true;
                        if !self.dep_loader.load_deps(state, edge)? {
                            // Rebuilding is the only way to learn the deps.
                            state.edge_mut(edge).deps_missing = true;
                            stack[top].dirty = true;
                        }
                    }
                }
                Phase::Inputs => {
                    if stack[top].awaiting_input {
                        let frame = &mut stack[top];
                        frame.awaiting_input = false;
                        absorb_input(state, frame);
                    }
                    loop {
                        let i = stack[top].next_input;
                        if i == state.edge(edge).inputs().len() {
                            stack[top].phase = Phase::Finish;
                            break;
                        }
                        let input = state.edge(edge).inputs()[i];
                        if self.enter(state, input, &mut stack)? {
                            stack[top].awaiting_input = true;
                            break;
                        }
                        absorb_input(state, &mut stack[top]);
                    }
                }
                Phase::Finish => {
                    let frame = &stack[top];
                    self.finish_edge(state, frame.edge, frame.dirty, frame.most_recent_input)?;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Start visiting `node`.  Returns true if a frame for its in-edge was
    /// pushed, false if the node is already fully handled.
    fn enter(&self, state: &mut State, node: NodeId, stack: &mut Vec<Frame>) -> anyhow::Result<bool> {
        let Some(edge) = state.node(node).in_edge() else {
            // A source file: dirty exactly when missing.
            if state.node(node).status_known() {
                return Ok(false);
            }
            let n = state.node_mut(node);
            n.stat_if_necessary(self.fs)?;
            if !n.exists() {
                explain!("{} has no in-edge and is missing", n.path());
            }
            let missing = !n.exists();
            n.set_dirty(missing);
            return Ok(false);
        };

        match state.edge(edge).mark() {
            VisitMark::Done => return Ok(false),
            VisitMark::InStack => return Err(cycle_error(state, node, edge, stack)),
            VisitMark::None => {}
        }

        let e = state.edge_mut(edge);
        e.mark = VisitMark::InStack;
        // Assume ready until an input says otherwise.
        e.outputs_ready = true;
        e.deps_missing = false;
        stack.push(Frame {
            node,
            edge,
            phase: Phase::Dyndep,
            next_input: 0,
            awaiting_input: false,
            dirty: false,
            most_recent_input: None,
        });
        Ok(true)
    }

    fn finish_edge(
        &self,
        state: &mut State,
        edge: EdgeId,
        mut dirty: bool,
        most_recent_input: Option<NodeId>,
    ) -> anyhow::Result<()> {
        if !dirty {
            dirty = self.recompute_outputs_dirty(state, edge, most_recent_input)?;
        }

        // Dirtiness is a property of the whole edge, not of single outputs.
        if dirty {
            for i in 0..state.edge(edge).outputs().len() {
                let out = state.edge(edge).outputs()[i];
                state.node_mut(out).mark_dirty();
            }
        }

        // A phony edge with no inputs has nothing to do even when its
        // missing output makes it dirty.
        let e = state.edge(edge);
        if dirty && !(e.is_phony() && e.inputs().is_empty()) {
            state.edge_mut(edge).outputs_ready = false;
        }
        state.edge_mut(edge).mark = VisitMark::Done;
        Ok(())
    }

    /// Decide whether any output of `edge` is out of date, given that all
    /// its inputs are clean.
    pub fn recompute_outputs_dirty(
        &self,
        state: &mut State,
        edge: EdgeId,
        most_recent_input: Option<NodeId>,
    ) -> anyhow::Result<bool> {
        let command = state.evaluate_command(edge, true);
        for i in 0..state.edge(edge).outputs().len() {
            let out = state.edge(edge).outputs()[i];
            if self.recompute_output_dirty(state, edge, most_recent_input, &command, out) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn recompute_output_dirty(
        &self,
        state: &mut State,
        edge: EdgeId,
        most_recent_input: Option<NodeId>,
        command: &str,
        output: NodeId,
    ) -> bool {
        if state.edge(edge).is_phony() {
            // Phony edges don't write any output.  Outputs are only dirty if
            // there are no inputs and the output is missing.
            if state.edge(edge).inputs().is_empty() && !state.node(output).exists() {
                explain!(
                    "output {} of phony edge with no inputs doesn't exist",
                    state.node(output).path()
                );
                return true;
            }
            // Carry the newest input's mtime through so that dependents of
            // the phony output compare against it.
            if let Some(input) = most_recent_input {
                let mtime = state.node(input).mtime();
                state.node_mut(output).update_phony_mtime(mtime);
            }
            return false;
        }

        let out = state.node(output);
        if !out.exists() {
            explain!("output {} doesn't exist", out.path());
            return true;
        }

        let mut entry: Option<&LogEntry> = None;
        if let Some(input) = most_recent_input {
            let input = state.node(input);
            if out.mtime() < input.mtime() {
                let mut output_mtime = out.mtime();
                let mut used_restat = false;
                // A restat edge may have left its output untouched; the log
                // then holds the time the command last ran.
                if state.get_binding_bool(edge, "restat") {
                    if let Some(e) = self.build_log.and_then(|log| log.lookup_by_output(out.path())) {
                        output_mtime = e.mtime;
                        used_restat = true;
                        entry = Some(e);
                    }
                }
                if output_mtime < input.mtime() {
                    explain!(
                        "{}output {} older than most recent input {} ({} vs {})",
                        if used_restat { "restat of " } else { "" },
                        out.path(),
                        input.path(),
                        output_mtime,
                        input.mtime()
                    );
                    return true;
                }
            }
        }

        if let Some(log) = self.build_log {
            let generator = state.get_binding_bool(edge, "generator");
            if entry.is_none() {
                entry = log.lookup_by_output(out.path());
            }
            match entry {
                Some(entry) => {
                    if !generator && hash_command(command) != entry.command_hash {
                        // May also be dirty due to the mtime checks below,
                        // but the command change is the better explanation.
                        explain!("command line changed for {}", out.path());
                        return true;
                    }
                    if let Some(input) = most_recent_input {
                        let input = state.node(input);
                        if entry.mtime < input.mtime() {
                            // The command was interrupted, or its output was
                            // replaced by something older than the input.
                            explain!(
                                "recorded mtime of {} older than most recent input {} ({} vs {})",
                                out.path(),
                                input.path(),
                                entry.mtime,
                                input.mtime()
                            );
                            return true;
                        }
                    }
                }
                None => {
                    if !generator {
                        explain!("command line not found in log for {}", out.path());
                        return true;
                    }
                }
            }
        }

        false
    }
}

/// The dyndep file of `edge`, if it still has to be loaded.
fn pending_dyndep(state: &State, edge: EdgeId) -> Option<NodeId> {
    state.edge(edge).dyndep().filter(|&dd| state.node(dd).dyndep_pending())
}

/// Fold the now-visited input at `frame.next_input` into the frame's state.
fn absorb_input(state: &mut State, frame: &mut Frame) {
    let e = state.edge(frame.edge);
    let i = frame.next_input;
    let input = e.inputs()[i];
    let order_only = e.is_order_only(i);
    frame.next_input += 1;

    // A dirty or unready input anywhere below means this edge isn't ready.
    if let Some(producer) = state.node(input).in_edge() {
        if !state.edge(producer).outputs_ready() {
            state.edge_mut(frame.edge).outputs_ready = false;
        }
    }

    // Order-only inputs only need to exist; they never dirty the edge.
    if order_only {
        return;
    }
    let n = state.node(input);
    if n.dirty() {
        explain!("{} is dirty", n.path());
        frame.dirty = true;
    } else if frame
        .most_recent_input
        .map_or(true, |newest| n.mtime() > state.node(newest).mtime())
    {
        frame.most_recent_input = Some(input);
    }
}

/// Describe the cycle closed by reaching `node`, whose in-edge is already on
/// the stack.  The path starts and ends at `node`.
fn cycle_error(state: &State, node: NodeId, edge: EdgeId, stack: &[Frame]) -> anyhow::Error {
    let start = stack.iter().position(|f| f.edge == edge).unwrap_or(0);
    let mut path: Vec<&str> = Vec::with_capacity(stack.len() - start + 1);
    path.push(state.node(node).path());
    for frame in &stack[start + 1..] {
        path.push(state.node(frame.node).path());
    }
    path.push(state.node(node).path());

    let mut msg = format!("dependency cycle: {}", path.join(" -> "));
    if start + 1 == stack.len() && state.edge(edge).maybe_phonycycle_diagnostic() {
        // The edge depends on itself directly, which older manifests did
        // with phony rules; name the switch that tolerates it.
        msg.push_str(" [-w phonycycle=err]");
    }
    anyhow!(msg)
}
