//! # Errors
//!
//! Error types for each layer of the engine. Every layer has its own enum so
//! callers can tell a wiring mistake from a transport failure without string
//! matching; the pool-level [`DataflowError`] wraps the layers below it.
//!
//! Component code itself reports failures as a boxed [`StageError`], which is
//! caught and logged by the scheduler and never escapes a dispatch cycle.

use crate::port::PortDirection;

/// Error returned from a component's `run` body.
///
/// Any error type can be boxed into it; string literals convert with `?` or `.into()`.
pub type StageError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while manipulating a single component's ports or parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
  /// The named port does not exist in the given direction.
  #[error("component '{component}' has no {direction} port '{port}'")]
  UnknownPort {
    /// Component name.
    component: String,
    /// Port name.
    port: String,
    /// Direction that was searched.
    direction: PortDirection,
  },

  /// A parameter value outside the parameter's allowed choices.
  #[error("parameter '{parameter}' of component '{component}' does not allow value {value}")]
  InvalidChoice {
    /// Component name.
    component: String,
    /// Parameter name.
    parameter: String,
    /// Rejected value, JSON-encoded.
    value: String,
  },
}

/// Errors raised while building, validating or wiring a component graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
  /// A link references a component that is not part of the graph.
  #[error("component '{0}' is referenced by a link but not declared")]
  UnknownComponent(String),

  /// No factory is registered for the component's kind.
  #[error("component '{component}' uses unregistered kind '{kind}'")]
  UnknownKind {
    /// Component name.
    component: String,
    /// Requested kind.
    kind: String,
  },

  /// A factory refused to build a component.
  #[error("failed to build component '{component}': {reason}")]
  Build {
    /// Component name.
    component: String,
    /// Message from the factory.
    reason: String,
  },

  /// A link names a port that the component does not declare.
  #[error("trying to connect undefined {direction} port '{port}' on component '{component}'")]
  UndefinedPort {
    /// Component name.
    component: String,
    /// Port name.
    port: String,
    /// Direction the port was expected in.
    direction: PortDirection,
  },

  /// Two links (or a link and a source intake) claim the same port.
  #[error("{direction} port '{port}' on component '{component}' is already wired")]
  PortAlreadyWired {
    /// Component name.
    component: String,
    /// Port name.
    port: String,
    /// Port direction.
    direction: PortDirection,
  },

  /// The link graph is not acyclic.
  #[error("graph contains a cycle through component '{component}'")]
  Cycle {
    /// A component that lies on the cycle.
    component: String,
  },

  /// A port or parameter operation failed.
  #[error(transparent)]
  Component(#[from] ComponentError),
}

/// Errors raised by a replica's scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
  /// `dispatch` was called after `shutdown`.
  #[error("scheduler for replica {replica} is stopped")]
  Stopped {
    /// Replica that owns the scheduler.
    replica: usize,
  },
}

/// Errors raised when envelopes cross the replica boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// The envelope could not be serialized into a frame.
  #[error("failed to encode envelope: {0}")]
  Encode(#[source] serde_json::Error),

  /// A frame could not be deserialized into an envelope.
  #[error("failed to decode frame: {0}")]
  Decode(#[source] serde_json::Error),
}

/// Errors raised by the replica pool.
#[derive(Debug, thiserror::Error)]
pub enum DataflowError {
  /// A pool needs at least one replica.
  #[error("replica count must be >= 1")]
  ZeroReplicas,

  /// The pool was created outside a tokio runtime.
  #[error("a dataflow must be created from within a tokio runtime")]
  NoRuntime,

  /// The pool has been closed and accepts no more items.
  #[error("dataflow is closed")]
  Closed,

  /// `remove_replica` would leave the pool without replicas.
  #[error("cannot remove the last replica")]
  LastReplica,

  /// A replica thread could not be spawned.
  #[error("failed to spawn replica thread: {0}")]
  Spawn(#[from] std::io::Error),

  /// A replica failed to build its graph.
  #[error("replica {replica} failed to build its graph: {source}")]
  Replica {
    /// Replica id.
    replica: usize,
    /// Underlying graph error.
    #[source]
    source: GraphError,
  },

  /// A replica thread exited before reporting whether its graph was built.
  #[error("replica {replica} exited during startup")]
  ReplicaExited {
    /// Replica id.
    replica: usize,
  },

  /// A replica thread panicked outside of component code.
  #[error("replica {replica} panicked")]
  ReplicaPanicked {
    /// Replica id.
    replica: usize,
  },

  /// A router, forwarder or join task failed.
  #[error("pool task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}
