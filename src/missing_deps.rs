//! Finds dependencies that are only known from depfiles or the deps log,
//! on files produced by some other edge, without any declared path in the
//! graph ordering the producer before the consumer.  Such builds work today
//! by accident of scheduling and break in a clean build of one target.

use crate::deps_log::DepsLog;
use crate::fs::FileSystem;
use crate::graph::{EdgeId, NodeId, Rule, State};
use crate::implicit::read_depfile_ins;
use rustc_hash::{FxHashMap, FxHashSet};

pub trait MissingDependencyScannerDelegate {
    /// `node` was built using `path`, generated by a `generator` edge that
    /// nothing orders before it.
    fn on_missing_dep(&mut self, state: &State, node: NodeId, path: &str, generator: &Rule);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MissingDepsStats {
    /// Nodes with a producing edge that were examined.
    pub seen: usize,
    /// Distinct (target, generator rule) pairs lacking a dependency path.
    pub missing_dep_path_count: usize,
    pub nodes_missing_deps: usize,
    pub generated_nodes: usize,
    pub generator_rules: usize,
}

pub struct MissingDependencyScanner<'a> {
    delegate: &'a mut dyn MissingDependencyScannerDelegate,
    deps_log: &'a DepsLog,
    state: &'a State,
    fs: &'a dyn FileSystem,
    seen: FxHashSet<NodeId>,
    nodes_missing_deps: FxHashSet<NodeId>,
    generated_nodes: FxHashSet<NodeId>,
    generator_rules: FxHashSet<String>,
    missing_dep_path_count: usize,
    /// Memoized reachability: adjacency_map[from][to] is whether `from` is
    /// reachable walking declared inputs back from `to`.
    adjacency_map: FxHashMap<EdgeId, FxHashMap<EdgeId, bool>>,
}

impl<'a> MissingDependencyScanner<'a> {
    pub fn new(
        delegate: &'a mut dyn MissingDependencyScannerDelegate,
        deps_log: &'a DepsLog,
        state: &'a State,
        fs: &'a dyn FileSystem,
    ) -> Self {
        MissingDependencyScanner {
            delegate,
            deps_log,
            state,
            fs,
            seen: FxHashSet::default(),
            nodes_missing_deps: FxHashSet::default(),
            generated_nodes: FxHashSet::default(),
            generator_rules: FxHashSet::default(),
            missing_dep_path_count: 0,
            adjacency_map: FxHashMap::default(),
        }
    }

    pub fn had_missing_deps(&self) -> bool {
        !self.nodes_missing_deps.is_empty()
    }

    /// Check `node` and everything it depends on.  Inputs are checked before
    /// the nodes that consume them.
    pub fn process_node(&mut self, node: NodeId) {
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        self.visit(node, &mut stack);
        while let Some(top) = stack.last_mut() {
            let (node, i) = *top;
            let Some(edge) = self.state.node(node).in_edge() else {
                stack.pop();
                continue;
            };
            match self.state.edge(edge).inputs().get(i) {
                Some(&input) => {
                    top.1 += 1;
                    self.visit(input, &mut stack);
                }
                None => {
                    stack.pop();
                    let deps = self.dep_nodes(node, edge);
                    if !deps.is_empty() {
                        self.process_node_deps(node, edge, &deps);
                    }
                }
            }
        }
    }

    fn visit(&mut self, node: NodeId, stack: &mut Vec<(NodeId, usize)>) {
        if self.state.node(node).in_edge().is_none() {
            return;
        }
        if self.seen.insert(node) {
            stack.push((node, 0));
        }
    }

    /// The discovered dependencies of `node`.  Problems reading them only
    /// mean there is nothing to check.
    fn dep_nodes(&self, node: NodeId, edge: EdgeId) -> Vec<NodeId> {
        let state = self.state;
        if !state.get_binding(edge, "deps").is_empty() {
            return match self.deps_log.get_deps(state, node) {
                Some(deps) => deps.nodes.clone(),
                None => Vec::new(),
            };
        }
        let depfile = state.get_unescaped_depfile(edge);
        if depfile.is_empty() {
            return Vec::new();
        }
        match read_depfile_ins(self.fs, state, edge, &depfile) {
            // Paths the graph has never seen can't have a producer.
            Ok(Some(ins)) => ins.iter().filter_map(|(path, _)| state.lookup_node(path)).collect(),
            _ => Vec::new(),
        }
    }

    fn process_node_deps(&mut self, node: NodeId, edge: EdgeId, deps: &[NodeId]) {
        let state = self.state;
        let mut dep_edges: Vec<EdgeId> = Vec::new();
        for &dep in deps {
            // Depending on build.ninja means "rebuild after regeneration",
            // and regeneration always runs first.
            if state.node(dep).path() == "build.ninja" {
                return;
            }
            if let Some(producer) = state.node(dep).in_edge() {
                // Placeholders from dependency loading produce nothing.
                if !state.edge(producer).generated_by_dep_loader() && !dep_edges.contains(&producer) {
                    dep_edges.push(producer);
                }
            }
        }

        let missing: Vec<EdgeId> = dep_edges
            .into_iter()
            .filter(|&producer| !self.path_exists_between(producer, edge))
            .collect();
        if missing.is_empty() {
            return;
        }

        let mut rule_names: FxHashSet<&str> = FxHashSet::default();
        for &producer in &missing {
            let rule = state.edge(producer).rule();
            for &dep in deps {
                if state.node(dep).in_edge() != Some(producer) {
                    continue;
                }
                self.generated_nodes.insert(dep);
                self.generator_rules.insert(rule.name().to_owned());
                rule_names.insert(rule.name());
                self.delegate.on_missing_dep(state, node, state.node(dep).path(), rule);
            }
        }
        self.missing_dep_path_count += rule_names.len();
        self.nodes_missing_deps.insert(node);
    }

    /// Whether `from` is reachable from `to` through declared inputs.
    fn path_exists_between(&mut self, from: EdgeId, to: EdgeId) -> bool {
        let state = self.state;
        let memo = self.adjacency_map.entry(from).or_default();
        if let Some(&found) = memo.get(&to) {
            return found;
        }

        // Each frame is an edge and the index of the input being examined.
        // Edges are memoized as unreachable while in progress, which also
        // stops the walk going round a cycle.
        memo.insert(to, false);
        let mut stack: Vec<(EdgeId, usize)> = vec![(to, 0)];
        let mut child_result: Option<bool> = None;
        let mut found = false;
        while let Some(top) = stack.last_mut() {
            let (edge, i) = *top;
            let resolved = match child_result.take() {
                Some(true) => Some(true),
                Some(false) => {
                    top.1 += 1;
                    None
                }
                None => match state.edge(edge).inputs().get(i) {
                    None => Some(false),
                    Some(&input) => match state.node(input).in_edge() {
                        Some(producer) if producer == from => Some(true),
                        Some(producer) => match memo.get(&producer) {
                            Some(true) => Some(true),
                            Some(false) => {
                                top.1 += 1;
                                None
                            }
                            None => {
                                memo.insert(producer, false);
                                stack.push((producer, 0));
                                None
                            }
                        },
                        None => {
                            top.1 += 1;
                            None
                        }
                    },
                },
            };
            if let Some(result) = resolved {
                memo.insert(edge, result);
                stack.pop();
                child_result = Some(result);
                found = result;
            }
        }
        found
    }

    pub fn stats(&self) -> MissingDepsStats {
        MissingDepsStats {
            seen: self.seen.len(),
            missing_dep_path_count: self.missing_dep_path_count,
            nodes_missing_deps: self.nodes_missing_deps.len(),
            generated_nodes: self.generated_nodes.len(),
            generator_rules: self.generator_rules.len(),
        }
    }

    pub fn print_stats(&self) {
        let stats = self.stats();
        println!("Processed {} nodes.", stats.seen);
        if self.had_missing_deps() {
            println!("Error: There are {} missing dependency paths.", stats.missing_dep_path_count);
            println!(
                "{} targets had depfile dependencies on {} distinct generated inputs (from {} rules) without a non-depfile dep path to the generator.",
                stats.nodes_missing_deps, stats.generated_nodes, stats.generator_rules
            );
            println!("There might be build flakiness if any of the targets listed above are built alone, or not late enough, in a clean output directory.");
        } else {
            println!("No missing dependencies on generated files found.");
        }
    }
}
