//! # Built-in Stages
//!
//! Small general-purpose stages. They are registered by
//! [`ComponentRegistry::with_builtins`](crate::registry::ComponentRegistry::with_builtins)
//! under the kinds [`PASS_THROUGH`], [`DUPLICATE`] and [`DISCARD`]; [`Collect`]
//! needs a callback and is registered by hand.

use crate::component::{DEFAULT_INPUT, DEFAULT_OUTPUT, Payload, Ports, Role, Stage};
use crate::error::{ComponentError, StageError};
use async_trait::async_trait;

/// Registry kind for [`PassThrough`].
pub const PASS_THROUGH: &str = "pass_through";
/// Registry kind for [`Duplicate`].
pub const DUPLICATE: &str = "duplicate";
/// Registry kind for [`Discard`].
pub const DISCARD: &str = "discard";

/// Name of the second output port added by [`Duplicate`].
pub const SECOND_OUTPUT: &str = "out2";

/// Forwards every item from `"in"` to `"out"` unchanged.
///
/// Acts as a source by default; [`PassThrough::with_role`] gives it any other role.
#[derive(Debug, Clone, Copy)]
pub struct PassThrough {
  role: Role,
}

impl PassThrough {
  /// A source that forwards dispatched items.
  pub fn new() -> Self {
    Self { role: Role::Adapter }
  }

  /// A forwarder with the given role.
  pub fn with_role(role: Role) -> Self {
    Self { role }
  }
}

impl Default for PassThrough {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait(?Send)]
impl<T: Payload> Stage<T> for PassThrough {
  fn role(&self) -> Role {
    self.role
  }

  async fn run(&mut self, ports: &mut Ports<T>) -> Result<(), StageError> {
    loop {
      for item in ports.receive_all(DEFAULT_INPUT) {
        ports.send(DEFAULT_OUTPUT, item);
      }
      ports.yield_ctrl().await;
    }
  }
}

/// Copies every item from `"in"` to both `"out"` and `"out2"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Duplicate;

#[async_trait(?Send)]
impl<T: Payload> Stage<T> for Duplicate {
  fn role(&self) -> Role {
    Role::Operator
  }

  fn configure(&mut self, ports: &mut Ports<T>) -> Result<(), ComponentError> {
    ports.add_output(SECOND_OUTPUT, "Copy of every input item");
    Ok(())
  }

  async fn run(&mut self, ports: &mut Ports<T>) -> Result<(), StageError> {
    loop {
      for item in ports.receive_all(DEFAULT_INPUT) {
        ports.send(SECOND_OUTPUT, item.clone());
        ports.send(DEFAULT_OUTPUT, item);
      }
      ports.yield_ctrl().await;
    }
  }
}

/// Sink that drops everything it receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

#[async_trait(?Send)]
impl<T: Payload> Stage<T> for Discard {
  fn role(&self) -> Role {
    Role::Publisher
  }

  async fn run(&mut self, ports: &mut Ports<T>) -> Result<(), StageError> {
    loop {
      ports.receive_all(DEFAULT_INPUT).for_each(drop);
      ports.yield_ctrl().await;
    }
  }
}

/// Sink that hands every item to a callback.
pub struct Collect<T> {
  sink: Box<dyn FnMut(T)>,
}

impl<T> Collect<T> {
  /// Creates a sink around `sink`.
  pub fn new(sink: impl FnMut(T) + 'static) -> Self {
    Self { sink: Box::new(sink) }
  }
}

impl<T> std::fmt::Debug for Collect<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Collect").finish_non_exhaustive()
  }
}

#[async_trait(?Send)]
impl<T: Payload> Stage<T> for Collect<T> {
  fn role(&self) -> Role {
    Role::Publisher
  }

  async fn run(&mut self, ports: &mut Ports<T>) -> Result<(), StageError> {
    loop {
      for item in ports.receive_all(DEFAULT_INPUT) {
        (self.sink)(item);
      }
      ports.yield_ctrl().await;
    }
  }
}
