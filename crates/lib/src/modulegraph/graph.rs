//! The resolved import graph.
//!
//! Nodes are module names, resolved or missing. Resolved modules carry a
//! [`ModuleRecord`]; missing ones only appear as edge targets and in
//! [`ModuleGraph::missing`]. Node insertion order is traversal order, which
//! is what the TOC is built from.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use super::hooks::HookFile;
use super::types::{DependencyEdge, ModuleRecord, UnresolvedImport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeInfo {
  pub conditional: bool,
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
  graph: DiGraph<String, EdgeInfo>,
  nodes: HashMap<String, NodeIndex>,
  records: HashMap<String, ModuleRecord>,
  order: Vec<String>,
  entries: Vec<String>,
  missing: Vec<UnresolvedImport>,
  excluded: BTreeSet<String>,
  datas: Vec<HookFile>,
  binaries: Vec<HookFile>,
}

impl ModuleGraph {
  pub fn new() -> Self {
    Self::default()
  }

  fn node(&mut self, name: &str) -> NodeIndex {
    if let Some(&idx) = self.nodes.get(name) {
      return idx;
    }
    let idx = self.graph.add_node(name.to_string());
    self.nodes.insert(name.to_string(), idx);
    idx
  }

  /// Insert a resolved module. Returns `false` if it was already present.
  pub fn add_module(&mut self, record: ModuleRecord) -> bool {
    if self.records.contains_key(&record.name) {
      return false;
    }
    self.node(&record.name);
    if record.entry {
      self.entries.push(record.name.clone());
    }
    self.order.push(record.name.clone());
    self.records.insert(record.name.clone(), record);
    true
  }

  pub fn add_missing(&mut self, unresolved: UnresolvedImport) {
    self.node(&unresolved.name);
    if !self
      .missing
      .iter()
      .any(|m| m.importer == unresolved.importer && m.name == unresolved.name)
    {
      self.missing.push(unresolved);
    }
  }

  /// Add `importer -> imported`. An unconditional edge upgrades a
  /// conditional one.
  pub fn add_edge(&mut self, importer: &str, imported: &str, conditional: bool) {
    if importer == imported {
      return;
    }
    let from = self.node(importer);
    let to = self.node(imported);
    if let Some(edge) = self.graph.find_edge(from, to) {
      if let Some(info) = self.graph.edge_weight_mut(edge) {
        info.conditional &= conditional;
      }
      return;
    }
    self.graph.add_edge(from, to, EdgeInfo { conditional });
  }

  pub fn exclude(&mut self, name: &str) {
    self.excluded.insert(name.to_string());
  }

  pub fn add_data(&mut self, file: HookFile) {
    self.datas.push(file);
  }

  pub fn add_binary(&mut self, file: HookFile) {
    self.binaries.push(file);
  }

  pub fn contains(&self, name: &str) -> bool {
    self.records.contains_key(name)
  }

  pub fn is_known(&self, name: &str) -> bool {
    self.nodes.contains_key(name)
  }

  pub fn get(&self, name: &str) -> Option<&ModuleRecord> {
    self.records.get(name)
  }

  pub fn get_mut(&mut self, name: &str) -> Option<&mut ModuleRecord> {
    self.records.get_mut(name)
  }

  /// Resolved modules in traversal order.
  pub fn modules(&self) -> impl Iterator<Item = &ModuleRecord> {
    self.order.iter().filter_map(|name| self.records.get(name))
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  pub fn missing(&self) -> &[UnresolvedImport] {
    &self.missing
  }

  /// Names that were imported somewhere but excluded.
  pub fn excluded(&self) -> &BTreeSet<String> {
    &self.excluded
  }

  pub fn datas(&self) -> &[HookFile] {
    &self.datas
  }

  pub fn binaries(&self) -> &[HookFile] {
    &self.binaries
  }

  /// Every edge, ordered by importer traversal order then insertion.
  pub fn edges(&self) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();
    for name in &self.order {
      let Some(&idx) = self.nodes.get(name) else {
        continue;
      };
      let mut out: Vec<_> = self.graph.edges_directed(idx, Direction::Outgoing).collect();
      out.sort_by_key(|e| e.id());
      for edge in out {
        edges.push(DependencyEdge {
          importer: name.clone(),
          imported: self.graph[edge.target()].clone(),
          conditional: edge.weight().conditional,
        });
      }
    }
    edges
  }

  /// Names `name` imports directly.
  pub fn imports_of(&self, name: &str) -> Vec<&str> {
    self
      .edges_from(name)
      .into_iter()
      .map(|idx| self.graph[idx].as_str())
      .collect()
  }

  /// Names that import `name` directly.
  pub fn importers_of(&self, name: &str) -> Vec<&str> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    let mut importers: Vec<&str> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|i| self.graph[i].as_str())
      .collect();
    importers.sort();
    importers
  }

  fn edges_from(&self, name: &str) -> Vec<NodeIndex> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };
    let mut out: Vec<_> = self.graph.edges_directed(idx, Direction::Outgoing).collect();
    out.sort_by_key(|e| e.id());
    out.into_iter().map(|e| e.target()).collect()
  }

  /// Drop everything not reachable from the entry points without passing
  /// through an excluded name.
  ///
  /// Exclusions can be learned from a hook after the excluded module was
  /// already reached through another importer; this pass makes them hold
  /// regardless of discovery order.
  pub fn prune(&mut self, is_excluded: impl Fn(&str) -> bool) {
    let mut keep: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();
    for entry in &self.entries {
      if let Some(&idx) = self.nodes.get(entry)
        && keep.insert(idx)
      {
        queue.push_back(idx);
      }
    }
    while let Some(idx) = queue.pop_front() {
      for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        let name = &self.graph[next];
        if is_excluded(name) {
          self.excluded.insert(name.clone());
          continue;
        }
        if keep.insert(next) {
          queue.push_back(next);
        }
      }
    }

    let graph = self
      .graph
      .filter_map(|idx, name| keep.contains(&idx).then(|| name.clone()), |_, e| Some(*e));
    self.nodes = graph.node_indices().map(|idx| (graph[idx].clone(), idx)).collect();
    self.graph = graph;

    let nodes = &self.nodes;
    self.order.retain(|name| nodes.contains_key(name));
    self.records.retain(|name, _| nodes.contains_key(name));
    for record in self.records.values_mut() {
      record.imports.retain(|name| nodes.contains_key(name));
    }
    self
      .missing
      .retain(|m| nodes.contains_key(&m.importer) && nodes.contains_key(&m.name));
    let records = &self.records;
    self.datas.retain(|f| records.contains_key(&f.module));
    self.binaries.retain(|f| records.contains_key(&f.module));
  }
}
