//! Loading of implicit dependencies discovered by previous runs, from either
//! the deps log or a depfile, into the graph.

use crate::canon::canon_path_bits;
use crate::deps_log::DepsLog;
use crate::depfile;
use crate::explain::explain;
use crate::fs::FileSystem;
use crate::graph::{EdgeId, NodeId, State};
use crate::scanner::Scanner;
use anyhow::anyhow;
use std::io::ErrorKind;

/// Read the depfile at `path` for `edge`, returning its canonicalized
/// inputs with slash bits.  Ok(None) means the depfile is missing or
/// unusable and the edge must be rebuilt.
pub(crate) fn read_depfile_ins(
    fs: &dyn FileSystem,
    state: &State,
    edge: EdgeId,
    path: &str,
) -> anyhow::Result<Option<Vec<(String, u64)>>> {
    let content = match fs.read_file(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(anyhow!("loading '{}': {}", path, err)),
    };
    if content.is_empty() {
        explain!("depfile '{}' is missing", path);
        return Ok(None);
    }

    let mut scanner = Scanner::new(&content);
    let deps = match depfile::parse(&mut scanner) {
        Ok(deps) => deps,
        Err(err) => {
            tracing::warn!("{}", scanner.format_parse_error(path, err));
            return Ok(None);
        }
    };
    let Some(first_out) = deps.outs.first() else {
        tracing::warn!("{}: no outputs declared", path);
        return Ok(None);
    };

    let edge_outputs = state.edge(edge).outputs();
    let expected = state.node(edge_outputs[0]).path();
    let (first_out, _) = canon_path_bits(first_out)?;
    if first_out != expected {
        explain!("expected depfile '{}' to mention '{}', got '{}'", path, expected, first_out);
        return Ok(None);
    }
    for out in &deps.outs[1..] {
        let (out, _) = canon_path_bits(out)?;
        if !edge_outputs.iter().any(|&o| state.node(o).path() == out) {
            tracing::warn!(
                "{}: depfile mentions '{}' as an output, but no such output was declared",
                path,
                out
            );
            return Ok(None);
        }
    }

    let ins = deps
        .ins
        .iter()
        .map(|input| canon_path_bits(input))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Some(ins))
}

/// Gives a dependency discovered from a depfile or the deps log a phony
/// producer if it has none, so the scan treats it as a source that may
/// legitimately disappear rather than as a missing input.
pub(crate) fn create_phony_in_edge(state: &mut State, node: NodeId) {
    if state.node(node).in_edge().is_some() {
        return;
    }
    let phony = state.add_phony_edge();
    let edge = state.edge_mut(phony);
    edge.generated_by_dep_loader = true;
    edge.outputs_ready = true;
    edge.outputs.push(node);
    state.node_mut(node).in_edge = Some(phony);
}

pub struct ImplicitDepLoader<'a> {
    deps_log: Option<&'a DepsLog>,
    fs: &'a dyn FileSystem,
}

impl<'a> ImplicitDepLoader<'a> {
    pub fn new(deps_log: Option<&'a DepsLog>, fs: &'a dyn FileSystem) -> Self {
        ImplicitDepLoader { deps_log, fs }
    }

    /// Load the implicit dependencies of `edge` into the graph.  Returns
    /// false if they are unavailable or stale, meaning the edge needs to be
    /// rebuilt to regenerate them.
    pub fn load_deps(&self, state: &mut State, edge: EdgeId) -> anyhow::Result<bool> {
        if !state.get_binding(edge, "deps").is_empty() {
            return Ok(self.load_deps_from_log(state, edge));
        }
        let depfile = state.get_unescaped_depfile(edge);
        if !depfile.is_empty() {
            return self.load_depfile(state, edge, &depfile);
        }
        // No implicit dependencies to load.
        Ok(true)
    }

    fn load_depfile(&self, state: &mut State, edge: EdgeId, path: &str) -> anyhow::Result<bool> {
        let Some(ins) = read_depfile_ins(self.fs, state, edge, path)? else {
            return Ok(false);
        };
        let nodes: Vec<NodeId> = ins
            .iter()
            .map(|(path, slash_bits)| state.get_node(path, *slash_bits))
            .collect();
        attach(state, edge, &nodes);
        Ok(true)
    }

    fn load_deps_from_log(&self, state: &mut State, edge: EdgeId) -> bool {
        let output = state.edge(edge).outputs()[0];
        let deps = match self.deps_log.and_then(|log| log.get_deps(state, output)) {
            Some(deps) => deps,
            None => {
                explain!("deps for '{}' are missing", state.node(output).path());
                return false;
            }
        };
        // Deps recorded before the output was last rewritten may be stale.
        if state.node(output).mtime() > deps.mtime {
            explain!(
                "stored deps info out of date for '{}' ({} vs {})",
                state.node(output).path(),
                deps.mtime,
                state.node(output).mtime()
            );
            return false;
        }
        let nodes = deps.nodes.clone();
        attach(state, edge, &nodes);
        true
    }
}

fn attach(state: &mut State, edge: EdgeId, nodes: &[NodeId]) {
    state.add_implicit_deps(edge, nodes);
    for &node in nodes {
        create_phony_in_edge(state, node);
    }
}
