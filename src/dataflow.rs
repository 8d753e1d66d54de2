//! # Dataflow Replica Pool
//!
//! A [`Dataflow`] runs N independent replicas of one graph, each on its own OS
//! thread with its own [`Scheduler`], and spreads items across them round-robin.
//!
//! ```text
//!              send()                    router task                 forwarder tasks          replica threads
//!  caller ───► intake (mpsc) ───► round-robin by arrival ───► replica 0 (mpsc) ─encode─► frames (crossbeam) ─► scheduler 0
//!                                                      ├──► replica 1 (mpsc) ─encode─► frames (crossbeam) ─► scheduler 1
//!                                                      └──► ...
//! ```
//!
//! Replicas share nothing: the graph is rebuilt from the [`GraphSpec`] inside
//! every replica thread, and items reach a replica only as serialized
//! [`Envelope`] frames. An item that fails to encode is logged and dropped; the
//! pool keeps running.
//!
//! ## Shutdown
//!
//! [`Dataflow::close`] enqueues one [`Envelope::Shutdown`] per live replica
//! behind every item already sent. Round-robin over N replicas delivers exactly
//! one sentinel to each, so every replica finishes its queued items and stops.
//! Before stopping, a replica drains whatever earlier dispatches left buffered,
//! for example work deferred by the drain budget.
//! [`Dataflow::wait_for_completion`] then joins everything.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flowloom::{ComponentRegistry, Dataflow, GraphSpec};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let spec = GraphSpec::new()
//!   .component("reader", "pass_through")
//!   .component("sink", "discard")
//!   .link("reader", "sink", "out", "in");
//!
//! let mut flow = Dataflow::new(spec, ComponentRegistry::<String>::with_builtins(), 4)?;
//! for line in ["a", "b", "c"] {
//!   flow.send(line.to_string())?;
//! }
//! let stats = flow.wait_for_completion().await?;
//! assert_eq!(stats.iter().map(|s| s.dispatched).sum::<u64>(), 3);
//! # Ok(())
//! # }
//! ```

use crate::component::Payload;
use crate::config::{DataflowConfig, SchedulerConfig};
use crate::error::{DataflowError, GraphError};
use crate::graph::GraphSpec;
use crate::registry::ComponentRegistry;
use crate::scheduler::{Scheduler, panic_message};
use crate::transport::{self, Envelope, Frame};
use std::sync::Arc;
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Drain passes a replica runs after its sentinel before giving up on leftovers.
const MAX_SETTLE_PASSES: usize = 1_024;

/// Per-replica counters returned by [`Dataflow::wait_for_completion`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaStats {
  /// Replica id.
  pub replica: usize,
  /// Items dispatched into the replica's graph.
  pub dispatched: u64,
  /// Component faults observed while dispatching.
  pub faults: u64,
  /// Items lost at the replica boundary (encode or decode failures).
  pub dropped: u64,
}

/// Messages on the pool's intake channel. One channel keeps items, sentinels
/// and membership changes in a single order.
enum Intake<T> {
  Envelope(Envelope<T>),
  Attach(ReplicaLink<T>),
  Detach,
}

/// Router-side handle on a replica's forwarder.
struct ReplicaLink<T> {
  id: usize,
  tx: mpsc::UnboundedSender<Envelope<T>>,
}

/// Pool-side handle on a replica.
struct ReplicaHandle {
  id: usize,
  thread: Option<thread::JoinHandle<ReplicaStats>>,
  forwarder: Option<JoinHandle<u64>>,
}

/// A pool of graph replicas fed round-robin.
pub struct Dataflow<T: Payload> {
  spec: Arc<GraphSpec>,
  registry: Arc<ComponentRegistry<T>>,
  config: DataflowConfig,
  runtime: Handle,
  intake: Option<mpsc::UnboundedSender<Intake<T>>>,
  router: Option<JoinHandle<()>>,
  replicas: Vec<ReplicaHandle>,
  retired: Vec<ReplicaHandle>,
  next_id: usize,
}

impl<T: Payload> Dataflow<T> {
  /// Starts a pool of `replicas` copies of `spec`.
  ///
  /// # Arguments
  ///
  /// * `spec` - Graph every replica builds
  /// * `registry` - Factories for the graph's component kinds
  /// * `replicas` - Number of replicas; must be at least 1
  ///
  /// # Errors
  ///
  /// See [`Dataflow::with_config`].
  pub fn new(spec: GraphSpec, registry: ComponentRegistry<T>, replicas: usize) -> Result<Self, DataflowError> {
    Self::with_config(spec, registry, DataflowConfig::default().with_replicas(replicas))
  }

  /// Starts a pool with explicit configuration.
  ///
  /// # Blocking
  ///
  /// Waits synchronously until every replica thread has built its graph, so
  /// the calling thread is held for the duration of each factory. Inside a
  /// current-thread runtime that stalls every other task; call it from a
  /// multi-threaded runtime or through `tokio::task::block_in_place` when
  /// factories are slow.
  ///
  /// # Errors
  ///
  /// - [`DataflowError::ZeroReplicas`] if `config.replicas` is 0
  /// - [`DataflowError::NoRuntime`] outside a tokio runtime
  /// - [`DataflowError::Replica`] if a replica cannot build or wire the graph
  /// - [`DataflowError::Spawn`] if a thread cannot be spawned
  pub fn with_config(
    spec: GraphSpec,
    registry: ComponentRegistry<T>,
    config: DataflowConfig,
  ) -> Result<Self, DataflowError> {
    if config.replicas == 0 {
      return Err(DataflowError::ZeroReplicas);
    }
    let runtime = Handle::try_current().map_err(|_| DataflowError::NoRuntime)?;

    let replicas = config.replicas;
    let mut pool = Self {
      spec: Arc::new(spec),
      registry: Arc::new(registry),
      config,
      runtime,
      intake: None,
      router: None,
      replicas: Vec::with_capacity(replicas),
      retired: Vec::new(),
      next_id: 0,
    };

    let mut links = Vec::with_capacity(replicas);
    for _ in 0..replicas {
      links.push(pool.spawn_replica()?);
    }

    let (intake_tx, intake_rx) = mpsc::unbounded_channel();
    pool.router = Some(pool.runtime.spawn(router_task(intake_rx, links)));
    pool.intake = Some(intake_tx);

    info!(replicas, components = pool.spec.components.len(), "dataflow started");
    Ok(pool)
  }

  /// Sends an item to the next replica in round-robin order.
  ///
  /// Never blocks; items queue until their replica takes them.
  ///
  /// # Errors
  ///
  /// [`DataflowError::Closed`] after [`Dataflow::close`].
  pub fn send(&self, item: T) -> Result<(), DataflowError> {
    let intake = self.intake.as_ref().ok_or(DataflowError::Closed)?;
    intake
      .send(Intake::Envelope(Envelope::Item(item)))
      .map_err(|_| DataflowError::Closed)
  }

  /// Stops accepting items and sends one shutdown sentinel per live replica.
  ///
  /// Items sent before the call are still dispatched. Calling it again does nothing.
  pub fn close(&mut self) {
    let Some(intake) = self.intake.take() else {
      return;
    };
    for _ in &self.replicas {
      if intake.send(Intake::Envelope(Envelope::Shutdown)).is_err() {
        warn!("router has stopped; shutdown sentinel not delivered");
        break;
      }
    }
    info!(replicas = self.replicas.len(), "dataflow closed");
  }

  /// Starts one more replica and adds it to the rotation.
  ///
  /// Blocks the calling thread while the replica builds its graph, as
  /// [`Dataflow::with_config`] does.
  ///
  /// # Errors
  ///
  /// [`DataflowError::Closed`] after [`Dataflow::close`], or any error from
  /// building the new replica.
  pub fn add_replica(&mut self) -> Result<usize, DataflowError> {
    if self.intake.is_none() {
      return Err(DataflowError::Closed);
    }
    let link = self.spawn_replica()?;
    let id = link.id;
    let intake = self.intake.as_ref().ok_or(DataflowError::Closed)?;
    intake.send(Intake::Attach(link)).map_err(|_| DataflowError::Closed)?;
    info!(replica = id, replicas = self.replicas.len(), "replica added");
    Ok(id)
  }

  /// Retires the most recently added replica.
  ///
  /// The replica finishes the items already routed to it and then stops.
  ///
  /// # Errors
  ///
  /// - [`DataflowError::LastReplica`] if only one replica is left
  /// - [`DataflowError::Closed`] after [`Dataflow::close`]
  pub fn remove_replica(&mut self) -> Result<usize, DataflowError> {
    let intake = self.intake.as_ref().ok_or(DataflowError::Closed)?;
    if self.replicas.len() <= 1 {
      return Err(DataflowError::LastReplica);
    }
    intake.send(Intake::Detach).map_err(|_| DataflowError::Closed)?;
    let handle = self.replicas.pop().ok_or(DataflowError::LastReplica)?;
    let id = handle.id;
    self.retired.push(handle);
    info!(replica = id, replicas = self.replicas.len(), "replica removed");
    Ok(id)
  }

  /// Number of replicas in the rotation.
  pub fn replica_count(&self) -> usize {
    self.replicas.len()
  }

  /// Ids of the replicas in the rotation, oldest first.
  pub fn replica_ids(&self) -> Vec<usize> {
    self.replicas.iter().map(|handle| handle.id).collect()
  }

  /// Returns `true` once [`Dataflow::close`] has been called.
  pub fn is_closed(&self) -> bool {
    self.intake.is_none()
  }

  /// Closes the pool if still open and waits for every replica to stop.
  ///
  /// Returns per-replica statistics ordered by replica id, retired replicas included.
  ///
  /// # Errors
  ///
  /// - [`DataflowError::Join`] if a pool task panicked
  /// - [`DataflowError::ReplicaPanicked`] if a replica thread panicked
  pub async fn wait_for_completion(&mut self) -> Result<Vec<ReplicaStats>, DataflowError> {
    self.close();
    if let Some(router) = self.router.take() {
      router.await?;
    }

    let handles: Vec<ReplicaHandle> = self.retired.drain(..).chain(self.replicas.drain(..)).collect();
    let mut stats = Vec::with_capacity(handles.len());
    for mut handle in handles {
      let dropped_in_transit = match handle.forwarder.take() {
        Some(forwarder) => forwarder.await?,
        None => 0,
      };
      let mut replica_stats = match handle.thread.take() {
        Some(thread) => tokio::task::spawn_blocking(move || thread.join())
          .await?
          .map_err(|_| DataflowError::ReplicaPanicked { replica: handle.id })?,
        None => ReplicaStats {
          replica: handle.id,
          ..ReplicaStats::default()
        },
      };
      replica_stats.dropped += dropped_in_transit;
      stats.push(replica_stats);
    }

    stats.sort_by_key(|s| s.replica);
    info!(
      replicas = stats.len(),
      dispatched = stats.iter().map(|s| s.dispatched).sum::<u64>(),
      "dataflow completed"
    );
    Ok(stats)
  }

  /// Spawns a replica thread, waits for it to build its graph, and starts its forwarder.
  fn spawn_replica(&mut self) -> Result<ReplicaLink<T>, DataflowError> {
    let id = self.next_id;
    self.next_id += 1;

    let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<Frame>();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), GraphError>>(1);
    let spec = Arc::clone(&self.spec);
    let registry = Arc::clone(&self.registry);
    let scheduler_config = self.config.scheduler.clone();

    let thread = thread::Builder::new()
      .name(format!("{}-{id}", self.config.thread_name))
      .spawn(move || run_replica(id, &spec, &registry, scheduler_config, frame_rx, ready_tx))?;

    match ready_rx.recv() {
      Ok(Ok(())) => {}
      Ok(Err(source)) => {
        join_failed_replica(id, thread);
        error!(replica = id, error = %source, "replica failed to build its graph");
        return Err(DataflowError::Replica { replica: id, source });
      }
      Err(_) => {
        join_failed_replica(id, thread);
        error!(replica = id, "replica exited before reporting ready");
        return Err(DataflowError::ReplicaExited { replica: id });
      }
    }

    let (envelope_tx, envelope_rx) = mpsc::unbounded_channel();
    let forwarder = self.runtime.spawn(forward_task(id, envelope_rx, frame_tx));
    self.replicas.push(ReplicaHandle {
      id,
      thread: Some(thread),
      forwarder: Some(forwarder),
    });
    debug!(replica = id, "replica ready");

    Ok(ReplicaLink { id, tx: envelope_tx })
  }
}

/// Joins a replica thread that never became ready.
fn join_failed_replica(replica: usize, thread: thread::JoinHandle<ReplicaStats>) {
  if let Err(panic) = thread.join() {
    error!(replica, panic = %panic_message(panic.as_ref()), "replica panicked during startup");
  }
}

impl<T: Payload> Drop for Dataflow<T> {
  fn drop(&mut self) {
    self.close();
  }
}

impl<T: Payload> std::fmt::Debug for Dataflow<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Dataflow")
      .field("replicas", &self.replica_ids())
      .field("closed", &self.is_closed())
      .finish()
  }
}

/// Assigns envelopes to replicas in arrival order.
async fn router_task<T: Payload>(mut intake: mpsc::UnboundedReceiver<Intake<T>>, mut replicas: Vec<ReplicaLink<T>>) {
  let mut cursor = 0usize;
  while let Some(message) = intake.recv().await {
    match message {
      Intake::Envelope(envelope) => {
        if replicas.is_empty() {
          warn!("no replicas attached; envelope dropped");
          continue;
        }
        let link = &replicas[cursor % replicas.len()];
        cursor = cursor.wrapping_add(1);
        if link.tx.send(envelope).is_err() {
          error!(replica = link.id, "forwarder has stopped; envelope dropped");
        }
      }
      Intake::Attach(link) => replicas.push(link),
      Intake::Detach => {
        if let Some(link) = replicas.pop() {
          let _ = link.tx.send(Envelope::Shutdown);
        }
      }
    }
  }
  debug!("intake closed; router stopped");
}

/// Serializes envelopes for one replica. Returns the number of envelopes that failed to encode.
async fn forward_task<T: Payload>(
  replica: usize,
  mut envelopes: mpsc::UnboundedReceiver<Envelope<T>>,
  frames: crossbeam_channel::Sender<Frame>,
) -> u64 {
  let mut dropped = 0;
  while let Some(envelope) = envelopes.recv().await {
    let shutdown = envelope.is_shutdown();
    match transport::encode(&envelope) {
      Ok(frame) => {
        if frames.send(frame).is_err() {
          error!(replica, "replica channel closed; forwarder stopped");
          break;
        }
      }
      Err(e) => {
        dropped += 1;
        error!(replica, error = %e, "item dropped at replica boundary");
      }
    }
    if shutdown {
      break;
    }
  }
  dropped
}

/// Body of a replica thread: build the graph, then dispatch frames until shutdown.
fn run_replica<T: Payload>(
  replica: usize,
  spec: &GraphSpec,
  registry: &ComponentRegistry<T>,
  config: SchedulerConfig,
  frames: crossbeam_channel::Receiver<Frame>,
  ready: crossbeam_channel::Sender<Result<(), GraphError>>,
) -> ReplicaStats {
  let mut stats = ReplicaStats {
    replica,
    ..ReplicaStats::default()
  };

  let mut scheduler = match Scheduler::from_spec(spec, registry, replica, config) {
    Ok(scheduler) => scheduler,
    Err(e) => {
      let _ = ready.send(Err(e));
      return stats;
    }
  };
  let _ = ready.send(Ok(()));
  drop(ready);
  info!(replica, order = ?scheduler.order(), "replica started");

  for frame in frames.iter() {
    match transport::decode::<T>(&frame) {
      Ok(Envelope::Item(item)) => match scheduler.dispatch(item) {
        Ok(report) => {
          stats.dispatched += 1;
          stats.faults += report.faults as u64;
        }
        Err(e) => {
          error!(replica, error = %e, "dispatch rejected");
          break;
        }
      },
      Ok(Envelope::Shutdown) => {
        debug!(replica, "shutdown sentinel received");
        break;
      }
      Err(e) => {
        stats.dropped += 1;
        error!(replica, error = %e, "frame dropped at replica boundary");
      }
    }
  }

  settle(replica, &mut scheduler, &mut stats);
  scheduler.shutdown();
  info!(replica, dispatched = stats.dispatched, faults = stats.faults, "replica stopped");
  stats
}

/// Drains work left over from earlier dispatches so that every item taken
/// before the sentinel finishes its traversal.
fn settle<T: Payload>(replica: usize, scheduler: &mut Scheduler<T>, stats: &mut ReplicaStats) {
  for _ in 0..MAX_SETTLE_PASSES {
    if scheduler.pending_items() == 0 {
      return;
    }
    match scheduler.drain_pending() {
      Ok(report) => {
        stats.faults += report.faults as u64;
        if report.polls == 0 {
          break;
        }
      }
      Err(_) => return,
    }
  }
  let pending = scheduler.pending_items();
  if pending > 0 {
    warn!(replica, pending, "items still buffered at shutdown; dropping them");
  }
}
