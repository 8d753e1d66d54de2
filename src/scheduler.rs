//! # Cooperative Scheduler
//!
//! One [`Scheduler`] drives one replica's component graph on a single thread.
//! Each component's `run` body is a future; the scheduler polls it until the
//! body awaits [`Ports::yield_ctrl`](crate::component::Ports::yield_ctrl) and
//! then moves on. No preemption: a body that never yields keeps the thread.
//!
//! ## Dispatch cycle
//!
//! [`Scheduler::dispatch`] puts one item into the intake buffer of every source
//! component and then drains the graph:
//!
//! 1. Every task that has not started yet, or that faulted in an earlier
//!    cycle, is queued, together with every task that has pending input.
//!    The queue starts in topological order.
//! 2. The head of the queue is polled once.
//! 3. Downstream tasks that now have pending input are queued. The polled
//!    task is re-queued if it consumed input but still has more.
//! 4. The cycle ends when the queue is empty or the drain budget is spent.
//!
//! ## Faults
//!
//! A body that returns `Err` or panics is logged and dropped. Its siblings
//! keep running, and the body is started afresh on the next dispatch. A body
//! that returns `Ok` is finished and never polled again.
//!
//! ## States
//!
//! ```text
//! Building -> Idle -> Dispatching -> Draining -> Idle -> ... -> Stopped
//! ```

use crate::buffer::Buffer;
use crate::component::{Component, Payload};
use crate::config::SchedulerConfig;
use crate::error::{GraphError, SchedulerError, StageError};
use crate::graph::{GraphSpec, LinkMap};
use crate::registry::ComponentRegistry;
use crate::wiring::{WiredGraph, wire};
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a replica's scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
  /// Components are being wired.
  Building,
  /// Waiting for the next dispatch.
  Idle,
  /// Feeding an item to the sources.
  Dispatching,
  /// Running components until the graph is quiescent.
  Draining,
  /// Shut down; no further dispatch is accepted.
  Stopped,
}

/// Lifecycle of one component's `run` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
  /// Not started yet.
  Fresh,
  /// Suspended at a yield point.
  Suspended,
  /// Failed or panicked; restarts on the next dispatch.
  Faulted,
  /// Returned `Ok`; never polled again.
  Finished,
}

/// What happened during one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
  /// Number of source intakes that received the item.
  pub sources: usize,
  /// Component polls performed.
  pub polls: usize,
  /// Component bodies that failed or panicked.
  pub faults: usize,
  /// `true` if the drain budget ran out before the graph was quiescent.
  pub exhausted: bool,
}

enum Outcome {
  Yielded,
  Finished,
  Faulted,
}

struct Task<T: Payload> {
  name: String,
  component: Rc<RefCell<Component<T>>>,
  future: Option<LocalBoxFuture<'static, Result<(), StageError>>>,
  inputs: Vec<Buffer<T>>,
  downstream: Vec<usize>,
  state: TaskState,
  starts: usize,
}

impl<T: Payload> Task<T> {
  fn new(component: Component<T>) -> Self {
    Self {
      name: component.name().to_string(),
      inputs: component.ports().connected_inputs(),
      component: Rc::new(RefCell::new(component)),
      future: None,
      downstream: Vec::new(),
      state: TaskState::Fresh,
      starts: 0,
    }
  }

  fn pending_input(&self) -> usize {
    self.inputs.iter().map(Buffer::len).sum()
  }

  /// Whether the task belongs in the queue at the start of a cycle.
  fn wants_cycle(&self) -> bool {
    match self.state {
      TaskState::Fresh | TaskState::Faulted => true,
      TaskState::Suspended => self.pending_input() > 0,
      TaskState::Finished => false,
    }
  }

  /// Whether the task may be queued again within the current cycle.
  fn runnable(&self) -> bool {
    match self.state {
      TaskState::Fresh | TaskState::Suspended => self.pending_input() > 0,
      TaskState::Faulted | TaskState::Finished => false,
    }
  }

  fn resume(&mut self, replica: usize) -> Outcome {
    if self.future.is_none() {
      self.starts += 1;
      if self.starts > 1 {
        debug!(replica, component = %self.name, starts = self.starts, "restarting component");
      }
      self.future = Some(start(Rc::clone(&self.component)));
    }
    let Some(future) = self.future.as_mut() else {
      return Outcome::Finished;
    };

    let mut cx = Context::from_waker(futures::task::noop_waker_ref());
    match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
      Ok(Poll::Pending) => {
        self.state = TaskState::Suspended;
        Outcome::Yielded
      }
      Ok(Poll::Ready(Ok(()))) => {
        self.future = None;
        self.state = TaskState::Finished;
        info!(replica, component = %self.name, "component finished");
        Outcome::Finished
      }
      Ok(Poll::Ready(Err(e))) => {
        self.future = None;
        self.state = TaskState::Faulted;
        error!(replica, component = %self.name, error = %e, "component failed; restarting on next dispatch");
        Outcome::Faulted
      }
      Err(panic) => {
        self.future = None;
        self.state = TaskState::Faulted;
        error!(
          replica,
          component = %self.name,
          panic = %panic_message(panic.as_ref()),
          "component panicked; restarting on next dispatch"
        );
        Outcome::Faulted
      }
    }
  }
}

fn start<T: Payload>(component: Rc<RefCell<Component<T>>>) -> LocalBoxFuture<'static, Result<(), StageError>> {
  Box::pin(async move {
    let Ok(mut component) = component.try_borrow_mut() else {
      return Err(StageError::from("component is already running"));
    };
    component.run().await
  })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

/// Single-threaded cooperative executor for one replica's graph.
pub struct Scheduler<T: Payload> {
  replica: usize,
  state: SchedulerState,
  tasks: Vec<Task<T>>,
  intakes: Vec<Buffer<T>>,
  config: SchedulerConfig,
  cycles: u64,
}

impl<T: Payload> Scheduler<T> {
  /// Creates a scheduler over an already wired graph.
  pub fn new(graph: WiredGraph<T>, replica: usize, config: SchedulerConfig) -> Self {
    let WiredGraph {
      components,
      edges,
      intakes,
    } = graph;

    let mut scheduler = Self {
      replica,
      state: SchedulerState::Building,
      tasks: components.into_iter().map(Task::new).collect(),
      intakes: intakes.into_iter().map(|intake| intake.buffer).collect(),
      config,
      cycles: 0,
    };

    let index: HashMap<String, usize> = scheduler
      .tasks
      .iter()
      .enumerate()
      .map(|(i, task)| (task.name.clone(), i))
      .collect();
    for edge in &edges {
      if let (Some(&source), Some(&target)) = (index.get(&edge.source), index.get(&edge.target)) {
        let downstream = &mut scheduler.tasks[source].downstream;
        if !downstream.contains(&target) {
          downstream.push(target);
        }
      }
    }

    scheduler.state = SchedulerState::Idle;
    debug!(
      replica,
      components = scheduler.tasks.len(),
      sources = scheduler.intakes.len(),
      "scheduler ready"
    );
    scheduler
  }

  /// Wires `components` with `links` and creates a scheduler for replica 0.
  ///
  /// # Errors
  ///
  /// Any wiring error; see [`wire`].
  pub fn from_components(
    mut components: BTreeMap<String, Component<T>>,
    links: &LinkMap,
    config: SchedulerConfig,
  ) -> Result<Self, GraphError> {
    let graph = wire(&mut components, links)?;
    Ok(Self::new(graph, 0, config))
  }

  /// Builds, wires and schedules the graph described by `spec`.
  ///
  /// # Errors
  ///
  /// Any build or wiring error.
  pub fn from_spec(
    spec: &GraphSpec,
    registry: &ComponentRegistry<T>,
    replica: usize,
    config: SchedulerConfig,
  ) -> Result<Self, GraphError> {
    let mut components = registry.build_all(spec, replica)?;
    let graph = wire(&mut components, &spec.links)?;
    Ok(Self::new(graph, replica, config))
  }

  /// Replica this scheduler belongs to.
  pub fn replica(&self) -> usize {
    self.replica
  }

  /// Current lifecycle state.
  pub fn state(&self) -> SchedulerState {
    self.state
  }

  /// Component names in scheduling order.
  pub fn order(&self) -> Vec<&str> {
    self.tasks.iter().map(|task| task.name.as_str()).collect()
  }

  /// Number of components.
  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  /// Returns `true` for an empty graph.
  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Number of source intakes fed by [`Scheduler::dispatch`].
  pub fn source_count(&self) -> usize {
    self.intakes.len()
  }

  /// Dispatch cycles completed so far.
  pub fn cycles(&self) -> u64 {
    self.cycles
  }

  /// State of a component's `run` body.
  pub fn task_state(&self, component: &str) -> Option<TaskState> {
    self.tasks.iter().find(|task| task.name == component).map(|task| task.state)
  }

  /// Feeds `item` to every source component and drains the graph.
  ///
  /// A graph without sources drops the item with a warning.
  ///
  /// # Errors
  ///
  /// [`SchedulerError::Stopped`] after [`Scheduler::shutdown`].
  pub fn dispatch(&mut self, item: T) -> Result<DispatchReport, SchedulerError> {
    self.ensure_running()?;
    self.state = SchedulerState::Dispatching;

    match self.intakes.split_last() {
      Some((last, rest)) => {
        for intake in rest {
          intake.send(item.clone());
        }
        last.send(item);
      }
      None => warn!(replica = self.replica, "graph has no source components; item dropped"),
    }

    let mut report = self.drain();
    report.sources = self.intakes.len();
    debug!(
      replica = self.replica,
      sources = report.sources,
      polls = report.polls,
      faults = report.faults,
      "dispatch cycle complete"
    );
    Ok(report)
  }

  /// Drains pending work without dispatching a new item.
  ///
  /// Useful after a cycle that ran out of budget.
  ///
  /// # Errors
  ///
  /// [`SchedulerError::Stopped`] after [`Scheduler::shutdown`].
  pub fn drain_pending(&mut self) -> Result<DispatchReport, SchedulerError> {
    self.ensure_running()?;
    Ok(self.drain())
  }

  /// Items waiting on the inputs of components that have not finished.
  pub fn pending_items(&self) -> usize {
    self
      .tasks
      .iter()
      .filter(|task| task.state != TaskState::Finished)
      .map(Task::pending_input)
      .sum()
  }

  /// Stops the scheduler and drops every component and buffer.
  pub fn shutdown(&mut self) {
    if self.state == SchedulerState::Stopped {
      return;
    }
    for task in &mut self.tasks {
      task.future = None;
    }
    self.tasks.clear();
    self.intakes.clear();
    self.state = SchedulerState::Stopped;
    debug!(replica = self.replica, cycles = self.cycles, "scheduler stopped");
  }

  fn ensure_running(&self) -> Result<(), SchedulerError> {
    if self.state == SchedulerState::Stopped {
      return Err(SchedulerError::Stopped { replica: self.replica });
    }
    Ok(())
  }

  fn drain(&mut self) -> DispatchReport {
    self.state = SchedulerState::Draining;

    let mut report = DispatchReport::default();
    let mut queued = vec![false; self.tasks.len()];
    let mut queue = VecDeque::with_capacity(self.tasks.len());
    for (index, task) in self.tasks.iter().enumerate() {
      if task.wants_cycle() {
        queued[index] = true;
        queue.push_back(index);
      }
    }

    while let Some(index) = queue.pop_front() {
      if report.polls >= self.config.drain_budget {
        report.exhausted = true;
        warn!(
          replica = self.replica,
          budget = self.config.drain_budget,
          pending = queue.len() + 1,
          "drain budget exhausted; remaining work deferred to next dispatch"
        );
        break;
      }
      queued[index] = false;

      let before = self.tasks[index].pending_input();
      let starts = self.tasks[index].starts;
      report.polls += 1;
      trace!(replica = self.replica, component = %self.tasks[index].name, "polling component");
      if let Outcome::Faulted = self.tasks[index].resume(self.replica) {
        report.faults += 1;
      }

      let task = &self.tasks[index];
      let mut wake: Vec<usize> = task
        .downstream
        .iter()
        .copied()
        .filter(|&next| self.tasks[next].runnable())
        .collect();
      // A body that just started may yield before it reads its inputs.
      let started = task.starts != starts;
      if task.runnable() && (started || task.pending_input() < before) {
        wake.push(index);
      }
      for next in wake {
        if !queued[next] {
          queued[next] = true;
          queue.push_back(next);
        }
      }
    }

    self.cycles += 1;
    self.state = SchedulerState::Idle;
    report
  }
}

impl<T: Payload> std::fmt::Debug for Scheduler<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Scheduler")
      .field("replica", &self.replica)
      .field("state", &self.state)
      .field("order", &self.order())
      .field("cycles", &self.cycles)
      .finish()
  }
}

impl<T: Payload> Drop for Scheduler<T> {
  fn drop(&mut self) {
    self.shutdown();
  }
}
