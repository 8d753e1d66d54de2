//! # Ports and Parameters
//!
//! A [`Port`] is a named endpoint on a component. It starts out unconnected and
//! is bound to a [`Buffer`] when the graph is wired. A [`Parameter`] is a named
//! configuration value with an optional set of allowed choices.

use crate::buffer::Buffer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which side of a component a port sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
  /// Items arrive through the port.
  Input,
  /// Items leave through the port.
  Output,
}

impl fmt::Display for PortDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PortDirection::Input => write!(f, "input"),
      PortDirection::Output => write!(f, "output"),
    }
  }
}

/// A named endpoint: an optional buffer binding plus a human-readable description.
pub struct Port<T> {
  buffer: Option<Buffer<T>>,
  description: String,
}

impl<T> Port<T> {
  /// Creates an unconnected port.
  pub fn new(description: impl Into<String>) -> Self {
    Self {
      buffer: None,
      description: description.into(),
    }
  }

  /// The bound buffer, if the port has been wired.
  pub fn buffer(&self) -> Option<&Buffer<T>> {
    self.buffer.as_ref()
  }

  /// Binds the port to `buffer`, replacing any previous binding.
  pub fn connect(&mut self, buffer: Buffer<T>) {
    self.buffer = Some(buffer);
  }

  /// Returns `true` once a buffer is bound.
  pub fn is_connected(&self) -> bool {
    self.buffer.is_some()
  }

  /// Free-form description of what flows through the port.
  pub fn description(&self) -> &str {
    &self.description
  }

  /// Replaces the description.
  pub fn set_description(&mut self, description: impl Into<String>) {
    self.description = description.into();
  }
}

impl<T> fmt::Debug for Port<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Port")
      .field("description", &self.description)
      .field("connected", &self.is_connected())
      .finish()
  }
}

/// A named configuration value with an optional list of allowed choices.
///
/// An empty choice list means any value is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
  value: Value,
  #[serde(default)]
  choices: Vec<Value>,
}

impl Parameter {
  /// Creates a parameter. Validity against `choices` is checked by [`Parameter::is_valid`].
  pub fn new(value: Value, choices: Vec<Value>) -> Self {
    Self { value, choices }
  }

  /// Current value.
  pub fn value(&self) -> &Value {
    &self.value
  }

  /// Allowed values; empty when unrestricted.
  pub fn choices(&self) -> &[Value] {
    &self.choices
  }

  /// Returns `true` when the value is one of the choices or the choices are unrestricted.
  pub fn is_valid(&self) -> bool {
    self.choices.is_empty() || self.choices.contains(&self.value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_port_connects_once_bound() {
    let mut port: Port<u8> = Port::new("Default input port");
    assert!(!port.is_connected());

    port.connect(Buffer::new());
    assert!(port.is_connected());
    assert_eq!(port.description(), "Default input port");
  }

  #[test]
  fn test_parameter_choices() {
    assert!(Parameter::new(json!(3), vec![]).is_valid());
    assert!(Parameter::new(json!("asc"), vec![json!("asc"), json!("desc")]).is_valid());
    assert!(!Parameter::new(json!("up"), vec![json!("asc"), json!("desc")]).is_valid());
  }

  #[test]
  fn test_direction_display() {
    assert_eq!(PortDirection::Input.to_string(), "input");
    assert_eq!(PortDirection::Output.to_string(), "output");
  }
}
