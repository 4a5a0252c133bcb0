//! Loading dyndep files and applying the dependency information they carry
//! to the edges that reference them.

use crate::dyndep_parser;
use crate::explain::explain;
use crate::fs::FileSystem;
use crate::graph::{EdgeId, NodeId, State};
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;

/// Dependency information for one edge, from a dyndep file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dyndeps {
    pub restat: bool,
    pub implicit_inputs: Vec<NodeId>,
    pub implicit_outputs: Vec<NodeId>,
}

/// The parsed contents of a dyndep file, in file order.
pub type DyndepFile = Vec<(EdgeId, Dyndeps)>;

pub struct DyndepLoader<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> DyndepLoader<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        DyndepLoader { fs }
    }

    /// Load the dyndep file at `node` and update every edge that names it
    /// as its dyndep binding.  Returns the parsed file.
    pub fn load_dyndeps(&self, state: &mut State, node: NodeId) -> anyhow::Result<DyndepFile> {
        // Cleared up front so a failed load isn't retried within this scan.
        state.node_mut(node).dyndep_pending = false;
        let path = state.node(node).path().to_owned();
        explain!("loading dyndep file '{}'", path);

        let file = self.load_dyndep_file(state, &path)?;
        let index: FxHashMap<EdgeId, usize> = file.iter().enumerate().map(|(i, (edge, _))| (*edge, i)).collect();
        let mut used = vec![false; file.len()];

        let out_edges = state.node(node).out_edges().to_vec();
        for edge in out_edges {
            if state.edge(edge).dyndep() != Some(node) {
                continue;
            }
            let Some(&i) = index.get(&edge) else {
                let out = state.edge(edge).outputs()[0];
                bail!(
                    "'{}' not mentioned in its dyndep file '{}'",
                    state.node(out).path(),
                    path
                );
            };
            used[i] = true;
            update_edge(state, edge, &file[i].1)?;
        }

        for (i, (edge, _)) in file.iter().enumerate() {
            if !used[i] {
                let out = state.edge(*edge).outputs()[0];
                bail!(
                    "dyndep file '{}' mentions output '{}' whose build statement does not have a dyndep binding for the file",
                    path,
                    state.node(out).path()
                );
            }
        }
        Ok(file)
    }

    /// Read and parse a dyndep file without applying it.
    pub fn load_dyndep_file(&self, state: &mut State, path: &str) -> anyhow::Result<DyndepFile> {
        let content = self
            .fs
            .read_file(path)
            .map_err(|err| anyhow!("loading '{}': {}", path, err))?;
        dyndep_parser::parse(state, path, &content)
    }
}

/// Apply `dyndeps` to `edge`: the restat flag, extra outputs, and extra
/// inputs spliced in ahead of the order-only ones.  Conflicting outputs are
/// rejected before anything changes.
fn update_edge(state: &mut State, edge: EdgeId, dyndeps: &Dyndeps) -> anyhow::Result<()> {
    // Only a placeholder from dependency loading may be displaced.
    let mut displaced = Vec::new();
    for &out in &dyndeps.implicit_outputs {
        if let Some(old) = state.node(out).in_edge() {
            if old == edge || !state.edge(old).generated_by_dep_loader() {
                bail!("multiple rules generate {}", state.node(out).path());
            }
            displaced.push(old);
        }
    }

    if dyndeps.restat {
        state.edge_mut(edge).bindings.insert("restat".to_owned(), "1".to_owned());
    }
    for old in displaced {
        state.edge_mut(old).outputs.clear();
    }
    for &out in &dyndeps.implicit_outputs {
        state.node_mut(out).in_edge = Some(edge);
    }
    let e = state.edge_mut(edge);
    e.outputs.extend_from_slice(&dyndeps.implicit_outputs);
    e.implicit_outs += dyndeps.implicit_outputs.len();

    // Inputs without a producer stay that way; they are plain sources.
    state.add_implicit_deps(edge, &dyndeps.implicit_inputs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::VirtualFileSystem;
    use crate::graph::Rule;

    fn dyndep_state() -> (State, EdgeId) {
        let mut state = State::new();
        state
            .add_rule(Rule::with_bindings("touch", &[("command", "touch $out")]).unwrap())
            .unwrap();
        let e = state
            .build("touch")
            .out("out")
            .input("in")
            .order_only("dd")
            .binding("dyndep", "dd")
            .finish()
            .unwrap();
        (state, e)
    }

    #[test]
    fn updates_edge() {
        let fs = VirtualFileSystem::new();
        fs.create("dd", "ninja_dyndep_version = 1\nbuild out | out.imp: dyndep | in.imp\n  restat = 1\n");
        let (mut state, e) = dyndep_state();
        let dd = state.lookup_node("dd").unwrap();

        DyndepLoader::new(&fs).load_dyndeps(&mut state, dd).unwrap();
        assert!(!state.node(dd).dyndep_pending());
        assert!(state.get_binding_bool(e, "restat"));

        let outs: Vec<&str> = state.edge(e).outputs().iter().map(|&n| state.node(n).path()).collect();
        assert_eq!(outs, vec!["out", "out.imp"]);
        assert_eq!(state.edge(e).implicit_outs(), 1);
        let ins: Vec<&str> = state.edge(e).inputs().iter().map(|&n| state.node(n).path()).collect();
        assert_eq!(ins, vec!["in", "in.imp", "dd"]);
        assert_eq!(state.edge(e).implicit_deps(), 1);

        let imp_out = state.lookup_node("out.imp").unwrap();
        assert_eq!(state.node(imp_out).in_edge(), Some(e));
        let imp_in = state.lookup_node("in.imp").unwrap();
        assert!(state.node(imp_in).in_edge().is_none());
        assert_eq!(state.node(imp_in).out_edges(), &[e]);
    }

    #[test]
    fn missing_file() {
        let fs = VirtualFileSystem::new();
        let (mut state, _) = dyndep_state();
        let dd = state.lookup_node("dd").unwrap();
        let err = DyndepLoader::new(&fs).load_dyndeps(&mut state, dd).unwrap_err();
        assert_eq!(err.to_string(), "loading 'dd': No such file or directory");
        assert!(!state.node(dd).dyndep_pending());
    }

    #[test]
    fn edge_not_mentioned() {
        let fs = VirtualFileSystem::new();
        fs.create("dd", "ninja_dyndep_version = 1\n");
        let (mut state, _) = dyndep_state();
        let dd = state.lookup_node("dd").unwrap();
        let err = DyndepLoader::new(&fs).load_dyndeps(&mut state, dd).unwrap_err();
        assert_eq!(err.to_string(), "'out' not mentioned in its dyndep file 'dd'");
    }

    #[test]
    fn unrelated_edge_mentioned() {
        let fs = VirtualFileSystem::new();
        fs.create(
            "dd",
            "ninja_dyndep_version = 1\nbuild out: dyndep\nbuild other: dyndep\n",
        );
        let (mut state, _) = dyndep_state();
        state.build("touch").out("other").finish().unwrap();
        let dd = state.lookup_node("dd").unwrap();
        let err = DyndepLoader::new(&fs).load_dyndeps(&mut state, dd).unwrap_err();
        assert_eq!(
            err.to_string(),
            "dyndep file 'dd' mentions output 'other' whose build statement does not have a dyndep binding for the file"
        );
    }

    #[test]
    fn output_already_produced() {
        let fs = VirtualFileSystem::new();
        fs.create("dd", "ninja_dyndep_version = 1\nbuild out | taken: dyndep\n");
        let (mut state, _) = dyndep_state();
        state.build("touch").out("taken").finish().unwrap();
        let dd = state.lookup_node("dd").unwrap();
        let err = DyndepLoader::new(&fs).load_dyndeps(&mut state, dd).unwrap_err();
        assert_eq!(err.to_string(), "multiple rules generate taken");
    }

    #[test]
    fn conflict_leaves_edge_untouched() {
        let fs = VirtualFileSystem::new();
        fs.create("dd", "ninja_dyndep_version = 1\nbuild out | free taken: dyndep | in.imp\n  restat = 1\n");
        let (mut state, e) = dyndep_state();
        state.build("touch").out("taken").finish().unwrap();
        let dd = state.lookup_node("dd").unwrap();
        assert!(DyndepLoader::new(&fs).load_dyndeps(&mut state, dd).is_err());

        assert_eq!(state.edge(e).outputs().len(), 1);
        assert_eq!(state.edge(e).inputs().len(), 2);
        assert!(!state.get_binding_bool(e, "restat"));
        let free = state.lookup_node("free").unwrap();
        assert!(state.node(free).in_edge().is_none());
    }
}
