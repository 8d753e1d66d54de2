//! # Wiring
//!
//! Turns a set of built components plus a [`LinkMap`] into a [`WiredGraph`]:
//! components in topological order with one fresh [`Buffer`] per link, and an
//! intake buffer on every source component's `"in"` port.
//!
//! Wiring is all-or-nothing. Every link is validated before the first buffer
//! is created, so a bad link leaves every component untouched.

use crate::buffer::Buffer;
use crate::component::{Component, DEFAULT_INPUT, Payload};
use crate::error::GraphError;
use crate::graph::{LinkMap, edge_list, topological_sort};
use crate::port::PortDirection;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// A buffer that carries items between two components.
#[derive(Debug)]
pub struct WiredEdge<T> {
  /// Producing component.
  pub source: String,
  /// Consuming component.
  pub target: String,
  /// Port on the producer.
  pub output_port: String,
  /// Port on the consumer.
  pub input_port: String,
  /// The shared queue.
  pub buffer: Buffer<T>,
}

/// The buffer bound to a source component's `"in"` port, fed by `dispatch`.
#[derive(Debug)]
pub struct SourceIntake<T> {
  /// Source component name.
  pub component: String,
  /// Intake queue.
  pub buffer: Buffer<T>,
}

/// Components connected by buffers, in topological order.
#[derive(Debug)]
pub struct WiredGraph<T: Payload> {
  pub(crate) components: Vec<Component<T>>,
  pub(crate) edges: Vec<WiredEdge<T>>,
  pub(crate) intakes: Vec<SourceIntake<T>>,
}

impl<T: Payload> WiredGraph<T> {
  /// Component names in topological order.
  pub fn order(&self) -> Vec<&str> {
    self.components.iter().map(Component::name).collect()
  }

  /// Components in topological order.
  pub fn components(&self) -> &[Component<T>] {
    &self.components
  }

  /// One entry per link.
  pub fn edges(&self) -> &[WiredEdge<T>] {
    &self.edges
  }

  /// One entry per source component that kept its `"in"` port.
  pub fn intakes(&self) -> &[SourceIntake<T>] {
    &self.intakes
  }
}

/// Validates `links` against `components`, then wires them.
///
/// On success every component is moved out of `components` into the returned
/// graph. On error `components` is left exactly as it was.
///
/// # Errors
///
/// - [`GraphError::UnknownComponent`] for a link endpoint that is not in `components`
/// - [`GraphError::Cycle`] if the links form a cycle
/// - [`GraphError::UndefinedPort`] if a link names a port the component lacks
/// - [`GraphError::PortAlreadyWired`] if two links share a port, or a link
///   targets the `"in"` port that a source component uses as its intake
pub fn wire<T: Payload>(
  components: &mut BTreeMap<String, Component<T>>,
  links: &LinkMap,
) -> Result<WiredGraph<T>, GraphError> {
  let edges = edge_list(links);
  let order = topological_sort(
    components.keys().map(String::as_str),
    edges.iter().map(|edge| (edge.source, edge.target)),
  )?;

  let mut used_outputs = BTreeSet::new();
  let mut used_inputs = BTreeSet::new();

  for edge in &edges {
    let (Some(source), Some(target)) = (components.get(edge.source), components.get(edge.target)) else {
      // topological_sort has already rejected unknown endpoints
      continue;
    };
    if !source.ports().has_port_in(edge.output_port, PortDirection::Output) {
      return Err(GraphError::UndefinedPort {
        component: edge.source.to_string(),
        port: edge.output_port.to_string(),
        direction: PortDirection::Output,
      });
    }
    if !target.ports().has_port_in(edge.input_port, PortDirection::Input) {
      return Err(GraphError::UndefinedPort {
        component: edge.target.to_string(),
        port: edge.input_port.to_string(),
        direction: PortDirection::Input,
      });
    }
    if !used_outputs.insert((edge.source, edge.output_port)) {
      return Err(GraphError::PortAlreadyWired {
        component: edge.source.to_string(),
        port: edge.output_port.to_string(),
        direction: PortDirection::Output,
      });
    }
    if !used_inputs.insert((edge.target, edge.input_port)) {
      return Err(GraphError::PortAlreadyWired {
        component: edge.target.to_string(),
        port: edge.input_port.to_string(),
        direction: PortDirection::Input,
      });
    }
  }

  let mut intake_names = Vec::new();
  for name in &order {
    let Some(component) = components.get(name) else {
      continue;
    };
    if !component.role().is_source() || !component.ports().has_port_in(DEFAULT_INPUT, PortDirection::Input) {
      continue;
    }
    if used_inputs.contains(&(name.as_str(), DEFAULT_INPUT)) {
      return Err(GraphError::PortAlreadyWired {
        component: name.clone(),
        port: DEFAULT_INPUT.to_string(),
        direction: PortDirection::Input,
      });
    }
    intake_names.push(name.clone());
  }

  // Validation done; nothing below can fail on a well-formed graph.
  let mut wired_edges = Vec::with_capacity(edges.len());
  for edge in &edges {
    let buffer = Buffer::new();
    if let Some(source) = components.get_mut(edge.source) {
      source.ports_mut().connect_output(edge.output_port, buffer.clone())?;
    }
    if let Some(target) = components.get_mut(edge.target) {
      target.ports_mut().connect_input(edge.input_port, buffer.clone())?;
    }
    trace!(
      source = edge.source,
      target = edge.target,
      output_port = edge.output_port,
      input_port = edge.input_port,
      "wired link"
    );
    wired_edges.push(WiredEdge {
      source: edge.source.to_string(),
      target: edge.target.to_string(),
      output_port: edge.output_port.to_string(),
      input_port: edge.input_port.to_string(),
      buffer,
    });
  }

  let mut intakes = Vec::with_capacity(intake_names.len());
  for name in intake_names {
    let buffer = Buffer::new();
    if let Some(component) = components.get_mut(&name) {
      component.ports_mut().connect_input(DEFAULT_INPUT, buffer.clone())?;
    }
    intakes.push(SourceIntake {
      component: name,
      buffer,
    });
  }

  let ordered: Vec<Component<T>> = order.iter().filter_map(|name| components.remove(name)).collect();
  debug!(
    components = ordered.len(),
    links = wired_edges.len(),
    sources = intakes.len(),
    "graph wired"
  );

  Ok(WiredGraph {
    components: ordered,
    edges: wired_edges,
    intakes,
  })
}
