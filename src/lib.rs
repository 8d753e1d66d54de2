//! # flowloom
//!
//! Flow-based pipeline engine in pure Rust.
//!
//! A pipeline is a directed acyclic graph of *components* linked port-to-port
//! by unbounded FIFO buffers. Within one replica a cooperative scheduler runs
//! every component on a single thread: each component's body drains its inputs,
//! emits outputs and yields. A [`Dataflow`] pool runs several replicas of the
//! same graph on separate threads and spreads items across them round-robin.
//!
//! ## Key Features
//!
//! - **Named ports**: components declare `"in"`/`"out"` by default and add more as needed
//! - **Deterministic scheduling**: topological order with lexicographic tie-breaking
//! - **Fault isolation**: a failing component is logged and restarted; its siblings keep running
//! - **Replica pool**: share-nothing replicas fed over serialized envelopes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowloom::{ComponentRegistry, Dataflow, GraphSpec};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let spec = GraphSpec::new()
//!   .component("reader", "pass_through")
//!   .component("split", "duplicate")
//!   .component("left", "discard")
//!   .component("right", "discard")
//!   .link("reader", "split", "out", "in")
//!   .link("split", "left", "out", "in")
//!   .link("split", "right", "out2", "in");
//!
//! let mut flow = Dataflow::new(spec, ComponentRegistry::<u64>::with_builtins(), 2)?;
//! for n in 0..10 {
//!   flow.send(n)?;
//! }
//! flow.wait_for_completion().await?;
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Unbounded FIFO buffers that form graph edges.
pub mod buffer;
/// Components: ports, parameters, roles and the `Stage` trait.
pub mod component;
/// Scheduler and pool configuration.
pub mod config;
/// Replica pool with round-robin distribution.
pub mod dataflow;
/// Error types for every layer.
pub mod error;
/// Declarative graph description and topological sort.
pub mod graph;
/// Ports and parameters.
pub mod port;
/// Component kind registry used to build graphs from a description.
pub mod registry;
/// Single-threaded cooperative scheduler for one replica.
pub mod scheduler;
/// Built-in stages.
pub mod stages;
/// Envelope framing across the replica boundary.
pub mod transport;
/// Graph validation and buffer wiring.
pub mod wiring;

#[cfg(test)]
mod scheduler_test;

pub use async_trait::async_trait;

pub use buffer::Buffer;
pub use component::{
  Component, DEFAULT_INPUT, DEFAULT_OUTPUT, Payload, Ports, ReceiveAll, Role, Stage, YieldNow,
};
pub use config::{DataflowConfig, SchedulerConfig};
pub use dataflow::{Dataflow, ReplicaStats};
pub use error::{
  ComponentError, DataflowError, GraphError, SchedulerError, StageError, TransportError,
};
pub use graph::{ComponentSpec, EdgeRef, GraphSpec, Link, LinkMap, edge_list, topological_sort};
pub use port::{Parameter, Port, PortDirection};
pub use registry::{BuildContext, ComponentRegistry, StageFactory};
pub use scheduler::{DispatchReport, Scheduler, SchedulerState, TaskState};
pub use stages::{Collect, Discard, Duplicate, PassThrough};
pub use transport::{Envelope, Frame};
pub use wiring::{SourceIntake, WiredEdge, WiredGraph, wire};
