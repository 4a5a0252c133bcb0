//! The build graph, a bipartite graph between files (nodes) and the
//! commands (edges) that produce them.
//!
//! All nodes and edges live in arenas owned by State and refer to each other
//! by id, so cyclic references need no shared ownership.

use crate::canon::{canon_path_bits, decanon_path};
use crate::densemap::{dense_id, DenseMap};
use crate::eval::{platform_escape, Env, EvalString, Scope, ScopeId};
use crate::fs::FileSystem;
use crate::smallmap::SmallMap;
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// File modification time in nanoseconds.  -1 means "not yet examined" and
/// 0 means "does not exist".
pub type TimeStamp = i64;

dense_id!(
    /// Identifies a Node within a State.
    NodeId
);
dense_id!(
    /// Identifies an Edge within a State.
    EdgeId
);
dense_id!(
    /// Identifies a Pool within a State.
    PoolId
);

/// The name of the built-in rule that runs no command.
pub const PHONY_RULE: &str = "phony";
/// Unlimited concurrency; edges that don't name a pool go here.
pub const DEFAULT_POOL: PoolId = PoolId(0);
/// Depth 1, with direct terminal access.
pub const CONSOLE_POOL: PoolId = PoolId(1);
pub use crate::eval::ROOT_SCOPE;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExistenceStatus {
    /// The file hasn't been examined.
    Unknown,
    /// The file doesn't exist.  mtime will be 0.
    Missing,
    /// The path is an actual file.  mtime will be the file's mtime.
    Exists,
}

/// Per-scan traversal state of an edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VisitMark {
    None,
    InStack,
    Done,
}

/// Information about a file within the build.
#[derive(Debug)]
pub struct Node {
    path: String,
    slash_bits: u64,
    pub(crate) mtime: TimeStamp,
    pub(crate) exists: ExistenceStatus,
    pub(crate) dirty: bool,
    pub(crate) dyndep_pending: bool,
    /// The edge that produces this file, if any.
    pub(crate) in_edge: Option<EdgeId>,
    /// All edges that use this file as an input.
    pub(crate) out_edges: Vec<EdgeId>,
    /// Dense id assigned by the deps log, if recorded there.
    pub(crate) id: Option<u32>,
}

impl Node {
    fn new(path: String, slash_bits: u64) -> Self {
        Node {
            path,
            slash_bits,
            mtime: -1,
            exists: ExistenceStatus::Unknown,
            dirty: false,
            dyndep_pending: false,
            in_edge: None,
            out_edges: Vec::new(),
            id: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn slash_bits(&self) -> u64 {
        self.slash_bits
    }

    /// The path as originally spelled, with any backslashes restored.
    pub fn path_decanonicalized(&self) -> String {
        decanon_path(&self.path, self.slash_bits)
    }

    pub fn mtime(&self) -> TimeStamp {
        self.mtime
    }

    pub fn exists(&self) -> bool {
        self.exists == ExistenceStatus::Exists
    }

    pub fn status_known(&self) -> bool {
        self.exists != ExistenceStatus::Unknown
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn dyndep_pending(&self) -> bool {
        self.dyndep_pending
    }

    pub fn in_edge(&self) -> Option<EdgeId> {
        self.in_edge
    }

    pub fn out_edges(&self) -> &[EdgeId] {
        &self.out_edges
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// Stat the file, recording its mtime and existence.
    pub fn stat(&mut self, fs: &dyn FileSystem) -> anyhow::Result<()> {
        let mtime = fs
            .stat(&self.path)
            .map_err(|err| anyhow!("stat({}): {}", self.path, err))?;
        self.mtime = mtime.timestamp();
        self.exists = if self.mtime == 0 {
            ExistenceStatus::Missing
        } else {
            ExistenceStatus::Exists
        };
        Ok(())
    }

    /// Stat the file only if it hasn't been examined yet.
    pub fn stat_if_necessary(&mut self, fs: &dyn FileSystem) -> anyhow::Result<()> {
        if self.status_known() {
            return Ok(());
        }
        self.stat(fs)
    }

    /// Mark the file as missing without touching the disk, e.g. after the
    /// scheduler removed it.
    pub fn mark_missing(&mut self) {
        if self.mtime == -1 {
            self.mtime = 0;
        }
        self.exists = ExistenceStatus::Missing;
    }

    /// Phony outputs that don't exist on disk take the newest input's mtime.
    pub fn update_phony_mtime(&mut self, mtime: TimeStamp) {
        if !self.exists() {
            self.mtime = self.mtime.max(mtime);
        }
    }

    pub fn reset_state(&mut self) {
        self.mtime = -1;
        self.exists = ExistenceStatus::Unknown;
        self.dirty = false;
    }
}

/// A named set of bindings, instantiated by edges.
#[derive(Debug)]
pub struct Rule {
    name: String,
    bindings: SmallMap<String, EvalString>,
}

impl Rule {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Rule {
            name: name.into(),
            bindings: SmallMap::new(),
        }
    }

    /// Convenience constructor parsing each binding value.
    pub fn with_bindings(name: &str, bindings: &[(&str, &str)]) -> anyhow::Result<Self> {
        let mut rule = Rule::new(name);
        for (key, value) in bindings {
            let value =
                EvalString::parse(value).map_err(|err| anyhow!("rule {} binding {}: {}", name, key, err))?;
            rule.add_binding(key.to_string(), value);
        }
        Ok(rule)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_binding(&mut self, key: String, value: EvalString) {
        self.bindings.insert(key, value);
    }

    pub fn get_binding(&self, key: &str) -> Option<&EvalString> {
        self.bindings.get(key)
    }

    pub fn is_phony(&self) -> bool {
        self.name == PHONY_RULE
    }
}

/// A concurrency limit for a group of edges.  Depth 0 means unlimited.
#[derive(Debug)]
pub struct Pool {
    pub name: String,
    pub depth: usize,
}

/// An invocation of a rule: a command plus its inputs and outputs.
///
/// Inputs are ordered explicit, then implicit, then order-only; outputs are
/// explicit then implicit.  The counts locate the boundaries.
#[derive(Debug)]
pub struct Edge {
    pub(crate) rule: Rc<Rule>,
    pub(crate) pool: PoolId,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<NodeId>,
    pub(crate) dyndep: Option<NodeId>,
    pub(crate) scope: ScopeId,
    /// Already-expanded bindings given on the build statement itself.
    pub(crate) bindings: SmallMap<String, String>,
    pub(crate) mark: VisitMark,
    pub(crate) outputs_ready: bool,
    pub(crate) deps_loaded: bool,
    pub(crate) deps_missing: bool,
    pub(crate) generated_by_dep_loader: bool,
    pub(crate) implicit_deps: usize,
    pub(crate) order_only_deps: usize,
    pub(crate) implicit_outs: usize,
}

impl Edge {
    fn new(rule: Rc<Rule>, scope: ScopeId) -> Self {
        Edge {
            rule,
            pool: DEFAULT_POOL,
            inputs: Vec::new(),
            outputs: Vec::new(),
            dyndep: None,
            scope,
            bindings: SmallMap::new(),
            mark: VisitMark::None,
            outputs_ready: false,
            deps_loaded: false,
            deps_missing: false,
            generated_by_dep_loader: false,
            implicit_deps: 0,
            order_only_deps: 0,
            implicit_outs: 0,
        }
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn pool(&self) -> PoolId {
        self.pool
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Inputs that appear in `$in`.
    pub fn explicit_ins(&self) -> &[NodeId] {
        &self.inputs[..self.inputs.len() - self.implicit_deps - self.order_only_deps]
    }

    pub fn implicit_ins(&self) -> &[NodeId] {
        let end = self.inputs.len() - self.order_only_deps;
        &self.inputs[end - self.implicit_deps..end]
    }

    pub fn order_only_ins(&self) -> &[NodeId] {
        &self.inputs[self.inputs.len() - self.order_only_deps..]
    }

    /// Outputs that appear in `$out`.
    pub fn explicit_outs(&self) -> &[NodeId] {
        &self.outputs[..self.outputs.len() - self.implicit_outs]
    }

    pub fn is_implicit(&self, index: usize) -> bool {
        index >= self.inputs.len() - self.order_only_deps - self.implicit_deps
            && !self.is_order_only(index)
    }

    pub fn is_order_only(&self, index: usize) -> bool {
        index >= self.inputs.len() - self.order_only_deps
    }

    pub fn is_implicit_out(&self, index: usize) -> bool {
        index >= self.outputs.len() - self.implicit_outs
    }

    pub fn implicit_deps(&self) -> usize {
        self.implicit_deps
    }

    pub fn order_only_deps(&self) -> usize {
        self.order_only_deps
    }

    pub fn implicit_outs(&self) -> usize {
        self.implicit_outs
    }

    pub fn dyndep(&self) -> Option<NodeId> {
        self.dyndep
    }

    pub fn mark(&self) -> VisitMark {
        self.mark
    }

    pub fn outputs_ready(&self) -> bool {
        self.outputs_ready
    }

    pub fn set_outputs_ready(&mut self, ready: bool) {
        self.outputs_ready = ready;
    }

    pub fn deps_loaded(&self) -> bool {
        self.deps_loaded
    }

    /// Whether implicit dependency info was expected but unavailable.
    pub fn deps_missing(&self) -> bool {
        self.deps_missing
    }

    pub fn generated_by_dep_loader(&self) -> bool {
        self.generated_by_dep_loader
    }

    pub fn is_phony(&self) -> bool {
        self.rule.is_phony()
    }

    pub fn use_console(&self) -> bool {
        self.pool == CONSOLE_POOL
    }

    /// A phony edge with a single input can only cycle through itself,
    /// which older manifests did routinely.
    pub fn maybe_phonycycle_diagnostic(&self) -> bool {
        self.is_phony() && self.outputs.len() == 1 && self.implicit_outs == 0 && self.implicit_deps == 0
    }
}

/// Expands variables on behalf of an edge: `$in` and `$out` first, then the
/// build statement's bindings, the rule's bindings, and finally the
/// enclosing scopes.
struct EdgeEnv<'a> {
    state: &'a State,
    edge: &'a Edge,
    escape: bool,
    /// Rule variables currently being expanded, to catch self-reference.
    lookups: RefCell<Vec<String>>,
}

impl<'a> EdgeEnv<'a> {
    fn append_paths(&self, result: &mut String, nodes: &[NodeId], sep: char) {
        for (i, &id) in nodes.iter().enumerate() {
            if i > 0 {
                result.push(sep);
            }
            let path = self.state.node(id).path_decanonicalized();
            if self.escape {
                platform_escape(&path, result);
            } else {
                result.push_str(&path);
            }
        }
    }
}

impl<'a> Env for EdgeEnv<'a> {
    fn evaluate_var(&self, result: &mut String, var: &str) {
        match var {
            "in" => self.append_paths(result, self.edge.explicit_ins(), ' '),
            "in_newline" => self.append_paths(result, self.edge.explicit_ins(), '\n'),
            "out" => self.append_paths(result, self.edge.explicit_outs(), ' '),
            _ => {
                if let Some(value) = self.edge.bindings.get(var) {
                    result.push_str(value);
                    return;
                }
                if let Some(eval) = self.edge.rule.get_binding(var) {
                    if self.lookups.borrow().iter().any(|v| v == var) {
                        let mut cycle = self.lookups.borrow().join(" -> ");
                        cycle.push_str(" -> ");
                        cycle.push_str(var);
                        tracing::warn!("cycle in rule variables: {}", cycle);
                        return;
                    }
                    self.lookups.borrow_mut().push(var.to_owned());
                    eval.evaluate_into(result, self);
                    self.lookups.borrow_mut().pop();
                    return;
                }
                if let Some(value) = self.state.lookup_variable(self.edge.scope, var) {
                    result.push_str(value);
                }
            }
        }
    }
}

/// The complete build graph.
pub struct State {
    nodes: DenseMap<NodeId, Node>,
    edges: DenseMap<EdgeId, Edge>,
    paths: FxHashMap<String, NodeId>,
    rules: FxHashMap<String, Rc<Rule>>,
    pools: DenseMap<PoolId, Pool>,
    pool_names: FxHashMap<String, PoolId>,
    scopes: DenseMap<ScopeId, Scope>,
    defaults: Vec<NodeId>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        let mut state = State {
            nodes: DenseMap::default(),
            edges: DenseMap::default(),
            paths: FxHashMap::default(),
            rules: FxHashMap::default(),
            pools: DenseMap::default(),
            pool_names: FxHashMap::default(),
            scopes: DenseMap::default(),
            defaults: Vec::new(),
        };
        state.rules.insert(PHONY_RULE.to_owned(), Rc::new(Rule::new(PHONY_RULE)));
        state.push_pool("", 0);
        state.push_pool("console", 1);
        state.scopes.push(Scope::new(None));
        state
    }

    fn push_pool(&mut self, name: &str, depth: usize) -> PoolId {
        let id = self.pools.push(Pool {
            name: name.to_owned(),
            depth,
        });
        self.pool_names.insert(name.to_owned(), id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> {
        self.edges.all_ids()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.all_ids()
    }

    /// Look up a node by canonical path, creating it if necessary.
    pub fn get_node(&mut self, path: &str, slash_bits: u64) -> NodeId {
        if let Some(&id) = self.paths.get(path) {
            return id;
        }
        let id = self.nodes.push(Node::new(path.to_owned(), slash_bits));
        self.paths.insert(path.to_owned(), id);
        id
    }

    /// Look up a node by canonical path.
    pub fn lookup_node(&self, path: &str) -> Option<NodeId> {
        self.paths.get(path).copied()
    }

    /// Canonicalize `path` and look it up.
    pub fn lookup_path(&self, path: &str) -> anyhow::Result<Option<NodeId>> {
        let (canon, _) = canon_path_bits(path)?;
        Ok(self.lookup_node(&canon))
    }

    pub fn add_rule(&mut self, rule: Rule) -> anyhow::Result<()> {
        if self.rules.contains_key(rule.name()) {
            bail!("duplicate rule '{}'", rule.name());
        }
        self.rules.insert(rule.name().to_owned(), Rc::new(rule));
        Ok(())
    }

    pub fn lookup_rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name).map(|r| r.as_ref())
    }

    pub fn add_pool(&mut self, name: &str, depth: usize) -> anyhow::Result<PoolId> {
        if self.pool_names.contains_key(name) {
            bail!("duplicate pool '{}'", name);
        }
        Ok(self.push_pool(name, depth))
    }

    pub fn lookup_pool(&self, name: &str) -> Option<PoolId> {
        self.pool_names.get(name).copied()
    }

    pub fn pool(&self, id: PoolId) -> &Pool {
        &self.pools[id]
    }

    /// Add a child scope for subninja-style nesting.
    pub fn add_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope::new(Some(parent)))
    }

    pub fn add_binding(&mut self, scope: ScopeId, key: &str, value: &str) {
        self.scopes[scope].add_binding(key.to_owned(), value.to_owned());
    }

    /// Look up a variable in `scope` and then its ancestors.
    pub fn lookup_variable(&self, scope: ScopeId, var: &str) -> Option<&str> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let scope = &self.scopes[id];
            if let Some(value) = scope.get(var) {
                return Some(value);
            }
            cur = scope.parent;
        }
        None
    }

    /// Add an edge with no inputs or outputs yet.
    pub fn add_edge(&mut self, rule: &str) -> anyhow::Result<EdgeId> {
        let rule = self
            .rules
            .get(rule)
            .cloned()
            .ok_or_else(|| anyhow!("unknown rule '{}'", rule))?;
        Ok(self.edges.push(Edge::new(rule, ROOT_SCOPE)))
    }

    /// Add an edge for the built-in phony rule.
    pub(crate) fn add_phony_edge(&mut self) -> EdgeId {
        let rule = match self.rules.get(PHONY_RULE) {
            Some(rule) => rule.clone(),
            None => Rc::new(Rule::new(PHONY_RULE)),
        };
        self.edges.push(Edge::new(rule, ROOT_SCOPE))
    }

    /// Append an input to an edge.  `path` must be canonical.
    pub fn add_in(&mut self, edge: EdgeId, path: &str, slash_bits: u64) -> NodeId {
        let node = self.get_node(path, slash_bits);
        self.edges[edge].inputs.push(node);
        self.nodes[node].out_edges.push(edge);
        node
    }

    /// Append an output to an edge.  `path` must be canonical.  A file may
    /// only be produced by one edge.
    pub fn add_out(&mut self, edge: EdgeId, path: &str, slash_bits: u64) -> anyhow::Result<NodeId> {
        let node = self.get_node(path, slash_bits);
        if self.nodes[node].in_edge.is_some() {
            bail!("multiple rules generate {}", path);
        }
        self.nodes[node].in_edge = Some(edge);
        self.edges[edge].outputs.push(node);
        Ok(node)
    }

    /// Splice discovered dependencies in ahead of the order-only inputs.
    /// Nodes that are already inputs of the edge are skipped, so reloading
    /// the same dependencies after a reset() changes nothing.
    pub(crate) fn add_implicit_deps(&mut self, edge: EdgeId, nodes: &[NodeId]) {
        let e = &mut self.edges[edge];
        let mut added: Vec<NodeId> = Vec::with_capacity(nodes.len());
        for &node in nodes {
            if !e.inputs.contains(&node) && !added.contains(&node) {
                added.push(node);
            }
        }
        let at = e.inputs.len() - e.order_only_deps;
        e.inputs.splice(at..at, added.iter().copied());
        e.implicit_deps += added.len();
        for node in added {
            self.nodes[node].out_edges.push(edge);
        }
    }

    /// Name `path` as the dyndep file of `edge`.  It must already be one of
    /// the edge's inputs.
    pub fn set_dyndep(&mut self, edge: EdgeId, path: &str) -> anyhow::Result<NodeId> {
        let (canon, bits) = canon_path_bits(path)?;
        let node = self.get_node(&canon, bits);
        if !self.edges[edge].inputs.contains(&node) {
            bail!("dyndep '{}' is not an input", path);
        }
        self.edges[edge].dyndep = Some(node);
        self.nodes[node].dyndep_pending = true;
        Ok(node)
    }

    /// Whether every input's producer, if any, has its outputs ready.
    pub fn all_inputs_ready(&self, edge: EdgeId) -> bool {
        self.edges[edge].inputs.iter().all(|&input| match self.nodes[input].in_edge {
            Some(producer) => self.edges[producer].outputs_ready,
            None => true,
        })
    }

    pub fn add_default(&mut self, path: &str) -> anyhow::Result<()> {
        let node = self
            .lookup_path(path)?
            .ok_or_else(|| anyhow!("unknown target '{}'", path))?;
        self.defaults.push(node);
        Ok(())
    }

    /// Nodes produced by some edge but consumed by none.
    pub fn root_nodes(&self) -> anyhow::Result<Vec<NodeId>> {
        let mut roots = Vec::new();
        for (_, edge) in self.edges.iter() {
            for &out in &edge.outputs {
                if self.nodes[out].out_edges.is_empty() {
                    roots.push(out);
                }
            }
        }
        if !self.edges.is_empty() && roots.is_empty() {
            bail!("could not determine root nodes of build graph");
        }
        Ok(roots)
    }

    /// The explicitly declared defaults, or the root nodes if there are none.
    pub fn default_nodes(&self) -> anyhow::Result<Vec<NodeId>> {
        if self.defaults.is_empty() {
            self.root_nodes()
        } else {
            Ok(self.defaults.clone())
        }
    }

    /// Forget all per-scan state so the graph can be scanned again.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.reset_state();
        }
        for edge in self.edges.values_mut() {
            edge.outputs_ready = false;
            edge.deps_loaded = false;
            edge.mark = VisitMark::None;
        }
    }

    fn evaluate(&self, edge: EdgeId, key: &str, escape: bool) -> String {
        let env = EdgeEnv {
            state: self,
            edge: &self.edges[edge],
            escape,
            lookups: RefCell::new(Vec::new()),
        };
        let mut result = String::new();
        env.evaluate_var(&mut result, key);
        result
    }

    /// Expand a binding for an edge, with `$in`/`$out` shell-escaped.
    pub fn get_binding(&self, edge: EdgeId, key: &str) -> String {
        self.evaluate(edge, key, true)
    }

    pub fn get_binding_bool(&self, edge: EdgeId, key: &str) -> bool {
        !self.get_binding(edge, key).is_empty()
    }

    /// The full command line, optionally followed by the response file
    /// contents so that changes to those also count as command changes.
    pub fn evaluate_command(&self, edge: EdgeId, incl_rsp_file: bool) -> String {
        let mut command = self.get_binding(edge, "command");
        if incl_rsp_file {
            let rspfile_content = self.get_binding(edge, "rspfile_content");
            if !rspfile_content.is_empty() {
                command.push_str(";rspfile=");
                command.push_str(&rspfile_content);
            }
        }
        command
    }

    /// The depfile path, with `$in`/`$out` unescaped.
    pub fn get_unescaped_depfile(&self, edge: EdgeId) -> String {
        self.evaluate(edge, "depfile", false)
    }

    pub fn get_unescaped_dyndep(&self, edge: EdgeId) -> String {
        self.evaluate(edge, "dyndep", false)
    }

    pub fn get_unescaped_rspfile(&self, edge: EdgeId) -> String {
        self.evaluate(edge, "rspfile", false)
    }

    /// Start describing a new edge for `rule`.
    pub fn build(&mut self, rule: &str) -> EdgeBuilder {
        EdgeBuilder {
            state: self,
            rule: rule.to_owned(),
            scope: ROOT_SCOPE,
            outs: Vec::new(),
            implicit_outs: Vec::new(),
            ins: Vec::new(),
            implicit_ins: Vec::new(),
            order_only: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Dump the graph in a human-readable form, for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (_, node) in self.nodes.iter() {
            let status = match node.exists {
                ExistenceStatus::Unknown => "unknown".to_owned(),
                ExistenceStatus::Missing => "missing".to_owned(),
                ExistenceStatus::Exists => node.mtime.to_string(),
            };
            out.push_str(&format!(
                "{} {}[{}]\n",
                node.path,
                if node.dirty { "dirty " } else { "clean " },
                status
            ));
        }
        for (_, pool) in self.pools.iter() {
            if !pool.name.is_empty() {
                out.push_str(&format!("{} {}\n", pool.name, pool.depth));
            }
        }
        out
    }
}

/// Describes one build statement, `build outs | implicit_outs: rule ins | implicit_ins || order_only`,
/// and adds it to the graph on finish().
pub struct EdgeBuilder<'a> {
    state: &'a mut State,
    rule: String,
    scope: ScopeId,
    outs: Vec<String>,
    implicit_outs: Vec<String>,
    ins: Vec<String>,
    implicit_ins: Vec<String>,
    order_only: Vec<String>,
    bindings: Vec<(String, String)>,
}

impl<'a> EdgeBuilder<'a> {
    pub fn out(mut self, path: &str) -> Self {
        self.outs.push(path.to_owned());
        self
    }

    pub fn implicit_out(mut self, path: &str) -> Self {
        self.implicit_outs.push(path.to_owned());
        self
    }

    pub fn input(mut self, path: &str) -> Self {
        self.ins.push(path.to_owned());
        self
    }

    pub fn implicit_in(mut self, path: &str) -> Self {
        self.implicit_ins.push(path.to_owned());
        self
    }

    pub fn order_only(mut self, path: &str) -> Self {
        self.order_only.push(path.to_owned());
        self
    }

    /// A build-statement binding; the value is taken literally.
    pub fn binding(mut self, key: &str, value: &str) -> Self {
        self.bindings.push((key.to_owned(), value.to_owned()));
        self
    }

    pub fn scope(mut self, scope: ScopeId) -> Self {
        self.scope = scope;
        self
    }

    pub fn finish(self) -> anyhow::Result<EdgeId> {
        let state = self.state;
        if self.outs.is_empty() && self.implicit_outs.is_empty() {
            bail!("expected path");
        }
        let id = state.add_edge(&self.rule)?;
        {
            let edge = &mut state.edges[id];
            edge.scope = self.scope;
            for (key, value) in self.bindings {
                edge.bindings.insert(key, value);
            }
        }

        for path in self.outs.iter().chain(&self.implicit_outs) {
            let (path, bits) = canon_path_bits(path)?;
            state.add_out(id, &path, bits)?;
        }
        state.edges[id].implicit_outs = self.implicit_outs.len();

        for path in self.ins.iter().chain(&self.implicit_ins).chain(&self.order_only) {
            let (path, bits) = canon_path_bits(path)?;
            state.add_in(id, &path, bits);
        }
        state.edges[id].implicit_deps = self.implicit_ins.len();
        state.edges[id].order_only_deps = self.order_only.len();

        let pool_name = state.get_binding(id, "pool");
        if !pool_name.is_empty() {
            let pool = state
                .lookup_pool(&pool_name)
                .ok_or_else(|| anyhow!("unknown pool name '{}'", pool_name))?;
            state.edges[id].pool = pool;
        }

        if state.edges[id].outputs.len() > 1 && !state.get_binding(id, "deps").is_empty() {
            bail!("multiple outputs aren't (yet?) supported by depslog; bring this up on the mailing list if it affects you");
        }

        let dyndep = state.get_unescaped_dyndep(id);
        if !dyndep.is_empty() {
            state.set_dyndep(id, &dyndep)?;
        }

        Ok(id)
    }
}
