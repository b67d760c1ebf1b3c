use std::collections::{BTreeMap, BTreeSet, VecDeque};

use electra_status::Status;

use crate::{Edge, EdgeAttrs, GraphIntegrityError, Node, NodeId, NodeSpec};

/// Directed acyclic multigraph of task nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskGraph {
  nodes: BTreeMap<NodeId, Node>,
  edges: Vec<Edge>,
}

impl TaskGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rebuild a graph from stored parts, checking every invariant.
  pub fn from_parts(
    nodes: impl IntoIterator<Item = Node>,
    edges: impl IntoIterator<Item = Edge>,
  ) -> Result<Self, GraphIntegrityError> {
    let mut graph = Self::new();
    let mut sorted: Vec<Node> = nodes.into_iter().collect();
    sorted.sort_by_key(|node| node.id);

    for (position, node) in sorted.into_iter().enumerate() {
      if node.id != NodeId(position) {
        return Err(GraphIntegrityError::NonDenseIds {
          expected: NodeId(position),
          actual: node.id,
        });
      }
      graph.nodes.insert(node.id, node);
    }

    for edge in edges {
      graph.check_endpoints(edge.source, edge.target)?;
      graph.edges.push(edge);
    }
    graph.topological_order()?;
    Ok(graph)
  }

  /// Add a node and return its id.
  pub fn add_node(&mut self, spec: NodeSpec) -> NodeId {
    let id = NodeId(self.nodes.len());
    self.nodes.insert(id, spec.into_node(id));
    id
  }

  /// Bind the output of `source` into a parameter of `target`.
  pub fn add_edge(
    &mut self,
    source: NodeId,
    target: NodeId,
    attrs: EdgeAttrs,
  ) -> Result<(), GraphIntegrityError> {
    self.check_endpoints(source, target)?;
    if source == target || self.reachable_from([target]).contains(&source) {
      return Err(GraphIntegrityError::Cycle {
        from: source,
        to: target,
      });
    }
    self.edges.push(Edge {
      source,
      target,
      attrs,
    });
    Ok(())
  }

  fn check_endpoints(&self, source: NodeId, target: NodeId) -> Result<(), GraphIntegrityError> {
    for id in [source, target] {
      if !self.nodes.contains_key(&id) {
        return Err(GraphIntegrityError::MissingNode(id));
      }
    }
    Ok(())
  }

  pub fn get_node(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(&id)
  }

  pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
    self.nodes.get_mut(&id)
  }

  /// Nodes in insertion (id) order.
  pub fn nodes(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }

  pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
    self.nodes.values_mut()
  }

  pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
    self.nodes.keys().copied()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Edges feeding `id`, in the order they were added.
  pub fn incoming_edges(&self, id: NodeId) -> Vec<&Edge> {
    self.edges.iter().filter(|edge| edge.target == id).collect()
  }

  /// Distinct direct dependencies of `id`.
  pub fn upstream(&self, id: NodeId) -> BTreeSet<NodeId> {
    self
      .edges
      .iter()
      .filter(|edge| edge.target == id)
      .map(|edge| edge.source)
      .collect()
  }

  /// Distinct direct dependents of `id`.
  pub fn downstream(&self, id: NodeId) -> BTreeSet<NodeId> {
    self
      .edges
      .iter()
      .filter(|edge| edge.source == id)
      .map(|edge| edge.target)
      .collect()
  }

  /// Every node reachable from `start` along directed edges, `start` included.
  pub fn reachable_from(&self, start: impl IntoIterator<Item = NodeId>) -> BTreeSet<NodeId> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<NodeId> = start.into_iter().collect();

    while let Some(id) = queue.pop_front() {
      if !seen.insert(id) {
        continue;
      }
      queue.extend(self.downstream(id));
    }
    seen
  }

  /// Kahn's algorithm; lower ids first among ready nodes.
  pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphIntegrityError> {
    let mut indegree: BTreeMap<NodeId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
    for edge in &self.edges {
      *indegree.entry(edge.target).or_default() += 1;
    }

    let mut ready: BTreeSet<NodeId> = indegree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(id, _)| *id)
      .collect();
    let mut order = Vec::with_capacity(self.nodes.len());

    while let Some(id) = ready.pop_first() {
      order.push(id);
      for edge in self.edges.iter().filter(|edge| edge.source == id) {
        if let Some(degree) = indegree.get_mut(&edge.target) {
          *degree -= 1;
          if *degree == 0 {
            ready.insert(edge.target);
          }
        }
      }
    }

    if order.len() == self.nodes.len() {
      Ok(order)
    } else {
      Err(GraphIntegrityError::Cyclic)
    }
  }

  /// `NEW` nodes whose dependencies have all completed.
  pub fn ready_nodes(&self) -> Vec<NodeId> {
    self
      .nodes
      .values()
      .filter(|node| node.status == Status::New)
      .filter(|node| {
        self
          .upstream(node.id)
          .iter()
          .all(|dep| self.status_of(*dep) == Some(Status::Completed))
      })
      .map(|node| node.id)
      .collect()
  }

  pub fn status_of(&self, id: NodeId) -> Option<Status> {
    self.nodes.get(&id).map(|node| node.status)
  }

  /// Independent copy of the graph.
  pub fn copy(&self) -> Self {
    self.clone()
  }

  /// Clear execution state on every node.
  pub fn reset(&mut self) {
    for node in self.nodes.values_mut() {
      node.reset();
    }
  }
}
