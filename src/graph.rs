//! # Graph Description
//!
//! A [`GraphSpec`] describes a component graph declaratively: which components
//! exist (by name and registered kind, with parameters) and how their ports are
//! linked. It is plain data, so it can be loaded from JSON and handed to every
//! replica of a pool, each of which builds its own live components from it.
//!
//! Links are keyed `source -> target -> (output_port, input_port)`, so a pair of
//! components is joined by at most one link.
//!
//! ```json
//! {
//!   "components": {
//!     "reader":  { "kind": "pass_through" },
//!     "printer": { "kind": "discard" }
//!   },
//!   "links": {
//!     "reader": { "printer": ["out", "in"] }
//!   }
//! }
//! ```
//!
//! This module also holds the deterministic topological sort used to order
//! components for scheduling.

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// `(output_port, input_port)` pair carried by a link. Serializes as a two-element array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link(pub String, pub String);

impl Link {
  /// Creates a link from an output port to an input port.
  pub fn new(output_port: impl Into<String>, input_port: impl Into<String>) -> Self {
    Self(output_port.into(), input_port.into())
  }

  /// Output port on the source component.
  pub fn output_port(&self) -> &str {
    &self.0
  }

  /// Input port on the target component.
  pub fn input_port(&self) -> &str {
    &self.1
  }
}

/// Nested link map: `source -> target -> link`.
pub type LinkMap = BTreeMap<String, BTreeMap<String, Link>>;

/// Declares one component of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
  /// Registered kind used to look up the component factory.
  pub kind: String,
  /// Parameter values applied after the component is built.
  #[serde(default)]
  pub params: BTreeMap<String, Value>,
}

impl ComponentSpec {
  /// Creates a spec without parameters.
  pub fn new(kind: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      params: BTreeMap::new(),
    }
  }
}

/// Declarative description of a component graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
  /// Components by name.
  #[serde(default)]
  pub components: BTreeMap<String, ComponentSpec>,
  /// Links between component ports.
  #[serde(default)]
  pub links: LinkMap,
}

impl GraphSpec {
  /// Creates an empty graph.
  pub fn new() -> Self {
    Self::default()
  }

  /// Parses a graph from JSON.
  ///
  /// # Errors
  ///
  /// Returns the `serde_json` error for malformed input.
  pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Adds (or replaces) a component.
  pub fn component(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
    self.components.insert(name.into(), ComponentSpec::new(kind));
    self
  }

  /// Sets a parameter on an already declared component. Unknown components are ignored.
  pub fn param(mut self, component: &str, key: impl Into<String>, value: Value) -> Self {
    if let Some(spec) = self.components.get_mut(component) {
      spec.params.insert(key.into(), value);
    }
    self
  }

  /// Links `source.output_port` to `target.input_port`, replacing any previous
  /// link between the same two components.
  pub fn link(
    mut self,
    source: impl Into<String>,
    target: impl Into<String>,
    output_port: impl Into<String>,
    input_port: impl Into<String>,
  ) -> Self {
    self
      .links
      .entry(source.into())
      .or_default()
      .insert(target.into(), Link::new(output_port, input_port));
    self
  }

  /// Flattened view of the links.
  pub fn edges(&self) -> Vec<EdgeRef<'_>> {
    edge_list(&self.links)
  }
}

/// Borrowed, flattened view of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRef<'a> {
  /// Producing component.
  pub source: &'a str,
  /// Consuming component.
  pub target: &'a str,
  /// Port on the producer.
  pub output_port: &'a str,
  /// Port on the consumer.
  pub input_port: &'a str,
}

/// Flattens a [`LinkMap`] into edges, ordered by `(source, target)`.
pub fn edge_list(links: &LinkMap) -> Vec<EdgeRef<'_>> {
  links
    .iter()
    .flat_map(|(source, targets)| {
      targets.iter().map(move |(target, link)| EdgeRef {
        source,
        target,
        output_port: link.output_port(),
        input_port: link.input_port(),
      })
    })
    .collect()
}

/// Orders `nodes` so every edge's source precedes its target.
///
/// Uses Kahn's algorithm. Among nodes that are ready at the same time the
/// lexicographically smallest goes first, so the same graph always yields the
/// same order.
///
/// # Errors
///
/// - [`GraphError::UnknownComponent`] if an edge endpoint is not in `nodes`
/// - [`GraphError::Cycle`] naming a component that lies on a cycle
pub fn topological_sort<'a>(
  nodes: impl IntoIterator<Item = &'a str>,
  edges: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<String>, GraphError> {
  let mut in_degree: BTreeMap<&str, usize> = nodes.into_iter().map(|node| (node, 0)).collect();
  let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

  for (source, target) in edges {
    if !in_degree.contains_key(source) {
      return Err(GraphError::UnknownComponent(source.to_string()));
    }
    match in_degree.get_mut(target) {
      Some(degree) => *degree += 1,
      None => return Err(GraphError::UnknownComponent(target.to_string())),
    }
    adjacency.entry(source).or_default().push(target);
  }

  let mut ready: BTreeSet<&str> = in_degree
    .iter()
    .filter(|(_, degree)| **degree == 0)
    .map(|(node, _)| *node)
    .collect();
  let mut order = Vec::with_capacity(in_degree.len());

  while let Some(node) = ready.pop_first() {
    order.push(node.to_string());
    if let Some(targets) = adjacency.get(node) {
      for target in targets {
        if let Some(degree) = in_degree.get_mut(target) {
          *degree -= 1;
          if *degree == 0 {
            ready.insert(*target);
          }
        }
      }
    }
  }

  if order.len() < in_degree.len() {
    return Err(GraphError::Cycle {
      component: cycle_member(&in_degree, &adjacency),
    });
  }

  Ok(order)
}

/// Finds a node on a cycle among the nodes Kahn's algorithm could not place.
///
/// Every unplaced node still has an unplaced predecessor, so walking
/// predecessors must eventually revisit a node; that node is on a cycle.
fn cycle_member(in_degree: &BTreeMap<&str, usize>, adjacency: &BTreeMap<&str, Vec<&str>>) -> String {
  let stuck: BTreeSet<&str> = in_degree
    .iter()
    .filter(|(_, degree)| **degree > 0)
    .map(|(node, _)| *node)
    .collect();

  let mut predecessors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
  for (source, targets) in adjacency {
    if !stuck.contains(source) {
      continue;
    }
    for target in targets {
      if stuck.contains(target) {
        predecessors.entry(*target).or_default().push(*source);
      }
    }
  }

  let Some(mut current) = stuck.first().copied() else {
    return String::new();
  };
  let mut visited = BTreeSet::new();
  while visited.insert(current) {
    match predecessors.get(current).and_then(|p| p.first()) {
      Some(previous) => current = *previous,
      None => break,
    }
  }
  current.to_string()
}
