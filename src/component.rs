//! # Components
//!
//! A component is a named unit of processing with named input and output ports,
//! a parameter map and a role. The framework half lives in [`Ports`]: port
//! management, item flow and parameters. The user half is a [`Stage`], whose
//! `run` body is a long-lived loop that drains inputs, emits outputs and hands
//! control back to the scheduler with [`Ports::yield_ctrl`].
//!
//! [`Component`] pairs the two.
//!
//! ## Default ports
//!
//! Every component starts with an input port `"in"`. Every component except a
//! sink ([`Role::Publisher`]) also starts with an output port `"out"`. A stage
//! can add or remove ports in [`Stage::configure`] before the graph is wired.
//!
//! ## Example
//!
//! ```rust
//! use flowloom::{async_trait, Ports, Role, Stage, StageError};
//!
//! struct Upper;
//!
//! #[async_trait(?Send)]
//! impl Stage<String> for Upper {
//!   fn role(&self) -> Role {
//!     Role::Transformer
//!   }
//!
//!   async fn run(&mut self, ports: &mut Ports<String>) -> Result<(), StageError> {
//!     loop {
//!       for line in ports.receive_all("in") {
//!         ports.send("out", line.to_uppercase());
//!       }
//!       ports.yield_ctrl().await;
//!     }
//!   }
//! }
//! ```

use crate::buffer::Buffer;
use crate::error::{ComponentError, StageError};
use crate::port::{Parameter, Port, PortDirection};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Name of the input port every component starts with.
pub const DEFAULT_INPUT: &str = "in";
/// Name of the output port every non-sink component starts with.
pub const DEFAULT_OUTPUT: &str = "out";

/// Bound for items that flow through a graph.
///
/// Items are cloned when one dispatch feeds several sources and serialized
/// when they cross from the pool into a replica thread.
pub trait Payload: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + 'static {}

/// What a component does within a graph.
///
/// Only [`Role::Adapter`] (source) and [`Role::Publisher`] (sink) change engine
/// behaviour; the others are descriptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
  /// Source: receives items dispatched into the replica.
  Adapter,
  /// Rewrites each item.
  Transformer,
  /// Drops items that do not match.
  Filter,
  /// Operates over several items or ports.
  Operator,
  /// Pulls parts out of items.
  Extractor,
  /// Sink: has no output port.
  Publisher,
}

impl Role {
  /// Returns `true` for components fed directly by `dispatch`.
  pub fn is_source(self) -> bool {
    matches!(self, Role::Adapter)
  }

  /// Returns `true` for components without output ports.
  pub fn is_sink(self) -> bool {
    matches!(self, Role::Publisher)
  }

  /// Upper-case label used in logs and serialized graphs.
  pub fn as_str(self) -> &'static str {
    match self {
      Role::Adapter => "ADAPTER",
      Role::Transformer => "TRANSFORMER",
      Role::Filter => "FILTER",
      Role::Operator => "OPERATOR",
      Role::Extractor => "EXTRACTOR",
      Role::Publisher => "PUBLISHER",
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Future returned by [`Ports::yield_ctrl`].
///
/// Pending on its first poll and ready on the second, which suspends the
/// calling component for exactly one trip through the scheduler.
#[derive(Debug, Default)]
#[must_use = "yield_ctrl does nothing unless awaited"]
pub struct YieldNow {
  yielded: bool,
}

impl Future for YieldNow {
  type Output = ();

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    if self.yielded {
      Poll::Ready(())
    } else {
      self.yielded = true;
      cx.waker().wake_by_ref();
      Poll::Pending
    }
  }
}

/// Iterator returned by [`Ports::receive_all`].
///
/// Yields the items that were queued when it was created and nothing else.
#[derive(Debug)]
pub struct ReceiveAll<T> {
  buffer: Option<Buffer<T>>,
  remaining: usize,
}

impl<T> Iterator for ReceiveAll<T> {
  type Item = T;

  fn next(&mut self) -> Option<T> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    self.buffer.as_ref()?.receive()
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (0, Some(self.remaining))
  }
}

/// The framework side of a component: its ports, parameters and role.
pub struct Ports<T> {
  component: String,
  role: Role,
  inputs: BTreeMap<String, Port<T>>,
  outputs: BTreeMap<String, Port<T>>,
  parameters: BTreeMap<String, Parameter>,
}

impl<T> Ports<T> {
  /// Creates the port set for a component, including its default ports.
  pub fn new(component: impl Into<String>, role: Role) -> Self {
    let mut ports = Self {
      component: component.into(),
      role,
      inputs: BTreeMap::new(),
      outputs: BTreeMap::new(),
      parameters: BTreeMap::new(),
    };
    ports.add_input(DEFAULT_INPUT, "Default input port");
    ports.add_output(DEFAULT_OUTPUT, "Default output port");
    ports
  }

  /// Name of the owning component.
  pub fn component(&self) -> &str {
    &self.component
  }

  /// Role of the owning component.
  pub fn role(&self) -> Role {
    self.role
  }

  // ==========================================================================
  // Port management
  // ==========================================================================

  /// Declares an input port. Returns `false` if the name is already taken.
  pub fn add_input(&mut self, name: &str, description: &str) -> bool {
    if self.inputs.contains_key(name) {
      return false;
    }
    self.inputs.insert(name.to_string(), Port::new(description));
    true
  }

  /// Declares an output port.
  ///
  /// Returns `false` if the name is already taken or the component is a sink.
  pub fn add_output(&mut self, name: &str, description: &str) -> bool {
    if self.role.is_sink() || self.outputs.contains_key(name) {
      return false;
    }
    self.outputs.insert(name.to_string(), Port::new(description));
    true
  }

  /// Removes an input port. Returns `false` if it did not exist.
  pub fn remove_input(&mut self, name: &str) -> bool {
    self.inputs.remove(name).is_some()
  }

  /// Removes an output port. Returns `false` if it did not exist.
  pub fn remove_output(&mut self, name: &str) -> bool {
    self.outputs.remove(name).is_some()
  }

  /// Binds an input port to a buffer.
  ///
  /// # Errors
  ///
  /// [`ComponentError::UnknownPort`] if the port is not declared.
  pub fn connect_input(&mut self, name: &str, buffer: Buffer<T>) -> Result<(), ComponentError> {
    let component = &self.component;
    let port = self
      .inputs
      .get_mut(name)
      .ok_or_else(|| ComponentError::UnknownPort {
        component: component.clone(),
        port: name.to_string(),
        direction: PortDirection::Input,
      })?;
    port.connect(buffer);
    Ok(())
  }

  /// Binds an output port to a buffer.
  ///
  /// # Errors
  ///
  /// [`ComponentError::UnknownPort`] if the port is not declared.
  pub fn connect_output(&mut self, name: &str, buffer: Buffer<T>) -> Result<(), ComponentError> {
    let component = &self.component;
    let port = self
      .outputs
      .get_mut(name)
      .ok_or_else(|| ComponentError::UnknownPort {
        component: component.clone(),
        port: name.to_string(),
        direction: PortDirection::Output,
      })?;
    port.connect(buffer);
    Ok(())
  }

  /// Returns `true` if a port with this name (input or output) is bound to a buffer.
  pub fn is_connected(&self, name: &str) -> bool {
    self.inputs.get(name).is_some_and(Port::is_connected)
      || self.outputs.get(name).is_some_and(Port::is_connected)
  }

  /// Returns `true` if the component declares a port with this name in either direction.
  pub fn has_port(&self, name: &str) -> bool {
    self.inputs.contains_key(name) || self.outputs.contains_key(name)
  }

  /// Returns `true` if the component declares a port in the given direction.
  pub fn has_port_in(&self, name: &str, direction: PortDirection) -> bool {
    match direction {
      PortDirection::Input => self.inputs.contains_key(name),
      PortDirection::Output => self.outputs.contains_key(name),
    }
  }

  /// Names of the declared input ports, sorted.
  pub fn input_ports(&self) -> impl Iterator<Item = &str> {
    self.inputs.keys().map(String::as_str)
  }

  /// Names of the declared output ports, sorted.
  pub fn output_ports(&self) -> impl Iterator<Item = &str> {
    self.outputs.keys().map(String::as_str)
  }

  /// Description of a port. Inputs are searched before outputs.
  pub fn port_description(&self, name: &str) -> Option<&str> {
    self
      .inputs
      .get(name)
      .or_else(|| self.outputs.get(name))
      .map(Port::description)
  }

  /// Replaces a port's description. Returns `false` if no such port exists.
  pub fn set_port_description(&mut self, name: &str, description: &str) -> bool {
    match self.inputs.get_mut(name) {
      Some(port) => {
        port.set_description(description);
        true
      }
      None => match self.outputs.get_mut(name) {
        Some(port) => {
          port.set_description(description);
          true
        }
        None => false,
      },
    }
  }

  pub(crate) fn connected_inputs(&self) -> Vec<Buffer<T>> {
    self.inputs.values().filter_map(Port::buffer).cloned().collect()
  }

  // ==========================================================================
  // Item flow
  // ==========================================================================

  /// Pops one item from an input port.
  ///
  /// Returns `None` when the buffer is empty, the port is unconnected or the
  /// port does not exist.
  pub fn receive(&self, port: &str) -> Option<T> {
    self.inputs.get(port)?.buffer()?.receive()
  }

  /// Drains the items queued on an input port at the moment of the call.
  ///
  /// Items that arrive while the iterator is being consumed are left for the
  /// next call. Unknown or unconnected ports yield nothing.
  pub fn receive_all(&self, port: &str) -> ReceiveAll<T> {
    let buffer = self.inputs.get(port).and_then(Port::buffer).cloned();
    let remaining = buffer.as_ref().map_or(0, Buffer::len);
    ReceiveAll { buffer, remaining }
  }

  /// Appends an item to an output port's buffer.
  ///
  /// Returns `false`, dropping the item, when the port is unconnected or does not exist.
  pub fn send(&self, port: &str, item: T) -> bool {
    match self.outputs.get(port).and_then(Port::buffer) {
      Some(buffer) => {
        buffer.send(item);
        true
      }
      None => false,
    }
  }

  /// Suspends the calling component until the scheduler resumes it.
  ///
  /// Must be awaited regularly: a component that never yields starves every
  /// other component in its replica.
  pub fn yield_ctrl(&self) -> YieldNow {
    YieldNow::default()
  }

  // ==========================================================================
  // Parameters
  // ==========================================================================

  /// Value of a parameter, if set.
  pub fn get_parameter(&self, name: &str) -> Option<&Value> {
    self.parameters.get(name).map(Parameter::value)
  }

  /// Sets a parameter value.
  ///
  /// With `choices` of `None` an existing parameter keeps its choice list and
  /// only the value changes; a new parameter is unrestricted. With
  /// `Some(choices)` the choice list is replaced.
  ///
  /// # Errors
  ///
  /// [`ComponentError::InvalidChoice`] if the value is not among the choices.
  /// The parameter is left untouched in that case.
  pub fn set_parameter(
    &mut self,
    name: &str,
    value: Value,
    choices: Option<Vec<Value>>,
  ) -> Result<(), ComponentError> {
    let choices = match (choices, self.parameters.get(name)) {
      (Some(choices), _) => choices,
      (None, Some(existing)) => existing.choices().to_vec(),
      (None, None) => Vec::new(),
    };
    let parameter = Parameter::new(value, choices);
    if !parameter.is_valid() {
      return Err(ComponentError::InvalidChoice {
        component: self.component.clone(),
        parameter: name.to_string(),
        value: parameter.value().to_string(),
      });
    }
    self.parameters.insert(name.to_string(), parameter);
    Ok(())
  }

  /// The full parameter map.
  pub fn parameters(&self) -> &BTreeMap<String, Parameter> {
    &self.parameters
  }

  /// Replaces the full parameter map.
  pub fn set_parameters(&mut self, parameters: BTreeMap<String, Parameter>) {
    self.parameters = parameters;
  }
}

impl<T> fmt::Debug for Ports<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Ports")
      .field("component", &self.component)
      .field("role", &self.role)
      .field("inputs", &self.inputs)
      .field("outputs", &self.outputs)
      .field("parameters", &self.parameters)
      .finish()
  }
}

/// User-supplied behaviour of a component.
///
/// `run` is started once and is expected to loop forever, awaiting
/// [`Ports::yield_ctrl`] whenever it has drained its inputs. Returning `Ok`
/// finishes the component for good; returning `Err` (or panicking) is logged by
/// the scheduler and the body is started afresh on the next dispatch.
#[async_trait(?Send)]
pub trait Stage<T: Payload> {
  /// Role of the component; decides the default ports.
  fn role(&self) -> Role;

  /// Adjusts ports and parameters before the graph is wired.
  fn configure(&mut self, _ports: &mut Ports<T>) -> Result<(), ComponentError> {
    Ok(())
  }

  /// Processing loop.
  async fn run(&mut self, ports: &mut Ports<T>) -> Result<(), StageError>;
}

/// A named component: its ports plus the stage that drives them.
pub struct Component<T: Payload> {
  ports: Ports<T>,
  stage: Box<dyn Stage<T>>,
}

impl<T: Payload> Component<T> {
  /// Creates a component from a boxed stage and runs the stage's `configure` hook.
  ///
  /// # Errors
  ///
  /// Whatever `configure` returns.
  pub fn new(name: impl Into<String>, mut stage: Box<dyn Stage<T>>) -> Result<Self, ComponentError> {
    let mut ports = Ports::new(name, stage.role());
    stage.configure(&mut ports)?;
    Ok(Self { ports, stage })
  }

  /// Convenience wrapper around [`Component::new`] for an unboxed stage.
  pub fn from_stage<S>(name: impl Into<String>, stage: S) -> Result<Self, ComponentError>
  where
    S: Stage<T> + 'static,
  {
    Self::new(name, Box::new(stage))
  }

  /// Component name.
  pub fn name(&self) -> &str {
    self.ports.component()
  }

  /// Component role.
  pub fn role(&self) -> Role {
    self.ports.role()
  }

  /// Read access to ports and parameters.
  pub fn ports(&self) -> &Ports<T> {
    &self.ports
  }

  /// Write access to ports and parameters.
  pub fn ports_mut(&mut self) -> &mut Ports<T> {
    &mut self.ports
  }

  /// Runs the stage body against this component's ports.
  pub async fn run(&mut self) -> Result<(), StageError> {
    self.stage.run(&mut self.ports).await
  }
}

impl<T: Payload> fmt::Debug for Component<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Component")
      .field("name", &self.name())
      .field("role", &self.role())
      .field("inputs", &self.ports.input_ports().collect::<Vec<_>>())
      .field("outputs", &self.ports.output_ports().collect::<Vec<_>>())
      .finish()
  }
}
