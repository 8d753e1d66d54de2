//! Tests for the cooperative scheduler.

use crate::component::{Component, Ports, Role, Stage};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, StageError};
use crate::graph::GraphSpec;
use crate::registry::ComponentRegistry;
use crate::scheduler::{Scheduler, SchedulerState, TaskState};
use crate::stages::{Collect, Discard, Duplicate, PassThrough};
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

// ============================================================================
// Test stages
// ============================================================================

type Seen = Rc<RefCell<Vec<i64>>>;

fn recorder(seen: &Seen) -> Collect<i64> {
  let seen = Rc::clone(seen);
  Collect::new(move |item| seen.borrow_mut().push(item))
}

/// Forwards items but panics on `poison`. Counts how often it was started.
struct Flaky {
  poison: i64,
  starts: Rc<Cell<usize>>,
}

#[async_trait(?Send)]
impl Stage<i64> for Flaky {
  fn role(&self) -> Role {
    Role::Transformer
  }

  async fn run(&mut self, ports: &mut Ports<i64>) -> Result<(), StageError> {
    self.starts.set(self.starts.get() + 1);
    loop {
      for item in ports.receive_all("in") {
        if item == self.poison {
          panic!("poisoned item {item}");
        }
        ports.send("out", item);
      }
      ports.yield_ctrl().await;
    }
  }
}

/// Forwards items but returns an error on negative ones.
struct Strict;

#[async_trait(?Send)]
impl Stage<i64> for Strict {
  fn role(&self) -> Role {
    Role::Filter
  }

  async fn run(&mut self, ports: &mut Ports<i64>) -> Result<(), StageError> {
    loop {
      for item in ports.receive_all("in") {
        if item < 0 {
          return Err(format!("negative item {item}").into());
        }
        ports.send("out", item);
      }
      ports.yield_ctrl().await;
    }
  }
}

/// Handles one item and then returns.
struct OneShot;

#[async_trait(?Send)]
impl Stage<i64> for OneShot {
  fn role(&self) -> Role {
    Role::Transformer
  }

  async fn run(&mut self, ports: &mut Ports<i64>) -> Result<(), StageError> {
    loop {
      if let Some(item) = ports.receive("in") {
        ports.send("out", item);
        return Ok(());
      }
      ports.yield_ctrl().await;
    }
  }
}

/// Yields once before each read of its input.
struct Lazy;

#[async_trait(?Send)]
impl Stage<i64> for Lazy {
  fn role(&self) -> Role {
    Role::Transformer
  }

  async fn run(&mut self, ports: &mut Ports<i64>) -> Result<(), StageError> {
    loop {
      ports.yield_ctrl().await;
      for item in ports.receive_all("in") {
        ports.send("out", item);
      }
    }
  }
}

/// Source that spins for a while without yielding and records what the
/// worker's counter looked like when it stopped spinning.
struct Hog {
  worker_progress: Rc<Cell<u32>>,
  observed: Rc<Cell<Option<u32>>>,
}

#[async_trait(?Send)]
impl Stage<i64> for Hog {
  fn role(&self) -> Role {
    Role::Adapter
  }

  async fn run(&mut self, ports: &mut Ports<i64>) -> Result<(), StageError> {
    loop {
      for _ in ports.receive_all("in") {
        let mut spins = 0u64;
        while spins < 50_000 {
          spins += 1;
          std::hint::spin_loop();
        }
        self.observed.set(Some(self.worker_progress.get()));
      }
      ports.yield_ctrl().await;
    }
  }
}

/// Source that bumps a counter for every item.
struct Worker {
  progress: Rc<Cell<u32>>,
}

#[async_trait(?Send)]
impl Stage<i64> for Worker {
  fn role(&self) -> Role {
    Role::Adapter
  }

  async fn run(&mut self, ports: &mut Ports<i64>) -> Result<(), StageError> {
    loop {
      for _ in ports.receive_all("in") {
        self.progress.set(self.progress.get() + 1);
      }
      ports.yield_ctrl().await;
    }
  }
}

fn graph(components: Vec<Component<i64>>) -> BTreeMap<String, Component<i64>> {
  components
    .into_iter()
    .map(|component| (component.name().to_string(), component))
    .collect()
}

fn scheduler(components: Vec<Component<i64>>, spec: &GraphSpec) -> Scheduler<i64> {
  Scheduler::from_components(graph(components), &spec.links, SchedulerConfig::default()).unwrap()
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn test_pass_through_delivers_each_item_once() {
  let seen = Seen::default();
  let spec = GraphSpec::new().link("reader", "sink", "out", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("sink", recorder(&seen)).unwrap(),
    ],
    &spec,
  );

  assert_eq!(scheduler.state(), SchedulerState::Idle);
  for n in [10, 20, 30] {
    let report = scheduler.dispatch(n).unwrap();
    assert_eq!(report.sources, 1);
    assert_eq!(report.faults, 0);
    assert!(!report.exhausted);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
  }

  assert_eq!(*seen.borrow(), vec![10, 20, 30]);
  assert_eq!(scheduler.cycles(), 3);
}

#[test]
fn test_duplicate_feeds_both_branches() {
  let left = Seen::default();
  let right = Seen::default();
  let spec = GraphSpec::new()
    .link("reader", "split", "out", "in")
    .link("split", "left", "out", "in")
    .link("split", "right", "out2", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("split", Duplicate).unwrap(),
      Component::from_stage("left", recorder(&left)).unwrap(),
      Component::from_stage("right", recorder(&right)).unwrap(),
    ],
    &spec,
  );

  scheduler.dispatch(7).unwrap();
  assert_eq!(*left.borrow(), vec![7]);
  assert_eq!(*right.borrow(), vec![7]);
}

#[test]
fn test_every_source_receives_the_item() {
  let a = Seen::default();
  let b = Seen::default();
  let spec = GraphSpec::new()
    .link("src_a", "sink_a", "out", "in")
    .link("src_b", "sink_b", "out", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("src_a", PassThrough::new()).unwrap(),
      Component::from_stage("src_b", PassThrough::new()).unwrap(),
      Component::from_stage("sink_a", recorder(&a)).unwrap(),
      Component::from_stage("sink_b", recorder(&b)).unwrap(),
    ],
    &spec,
  );

  let report = scheduler.dispatch(3).unwrap();
  assert_eq!(report.sources, 2);
  assert_eq!(*a.borrow(), vec![3]);
  assert_eq!(*b.borrow(), vec![3]);
}

#[test]
fn test_graph_without_sources_drops_items() {
  let spec = GraphSpec::new();
  let mut scheduler = scheduler(vec![Component::from_stage("sink", Discard).unwrap()], &spec);

  let report = scheduler.dispatch(1).unwrap();
  assert_eq!(report.sources, 0);
  assert_eq!(scheduler.source_count(), 0);
}

#[test]
fn test_from_spec_builds_through_registry() {
  let spec = GraphSpec::new()
    .component("reader", "pass_through")
    .component("sink", "discard")
    .link("reader", "sink", "out", "in");
  let registry = ComponentRegistry::with_builtins();

  let mut scheduler: Scheduler<i64> = Scheduler::from_spec(&spec, &registry, 4, SchedulerConfig::default()).unwrap();
  assert_eq!(scheduler.replica(), 4);
  assert_eq!(scheduler.order(), vec!["reader", "sink"]);
  assert!(scheduler.dispatch(1).is_ok());
}

// ============================================================================
// Fault isolation
// ============================================================================

#[test]
fn test_panicking_component_is_isolated_and_restarted() {
  let starts = Rc::new(Cell::new(0));
  let through_flaky = Seen::default();
  let bypass = Seen::default();
  let spec = GraphSpec::new()
    .link("reader", "split", "out", "in")
    .link("split", "flaky", "out", "in")
    .link("split", "bypass", "out2", "in")
    .link("flaky", "after", "out", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("split", Duplicate).unwrap(),
      Component::from_stage(
        "flaky",
        Flaky {
          poison: 1,
          starts: Rc::clone(&starts),
        },
      )
      .unwrap(),
      Component::from_stage("after", recorder(&through_flaky)).unwrap(),
      Component::from_stage("bypass", recorder(&bypass)).unwrap(),
    ],
    &spec,
  );

  let report = scheduler.dispatch(1).unwrap();
  assert_eq!(report.faults, 1);
  assert_eq!(scheduler.task_state("flaky"), Some(TaskState::Faulted));
  assert_eq!(*bypass.borrow(), vec![1]);
  assert!(through_flaky.borrow().is_empty());

  let report = scheduler.dispatch(2).unwrap();
  assert_eq!(report.faults, 0);
  assert_eq!(starts.get(), 2);
  assert_eq!(scheduler.task_state("flaky"), Some(TaskState::Suspended));
  assert_eq!(*through_flaky.borrow(), vec![2]);
  assert_eq!(*bypass.borrow(), vec![1, 2]);
}

#[test]
fn test_failing_component_is_restarted_on_next_dispatch() {
  let seen = Seen::default();
  let spec = GraphSpec::new()
    .link("reader", "strict", "out", "in")
    .link("strict", "sink", "out", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("strict", Strict).unwrap(),
      Component::from_stage("sink", recorder(&seen)).unwrap(),
    ],
    &spec,
  );

  scheduler.dispatch(1).unwrap();
  let report = scheduler.dispatch(-1).unwrap();
  assert_eq!(report.faults, 1);
  scheduler.dispatch(2).unwrap();

  assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[test]
fn test_finished_component_is_never_polled_again() {
  let seen = Seen::default();
  let spec = GraphSpec::new()
    .link("reader", "once", "out", "in")
    .link("once", "sink", "out", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("once", OneShot).unwrap(),
      Component::from_stage("sink", recorder(&seen)).unwrap(),
    ],
    &spec,
  );

  scheduler.dispatch(1).unwrap();
  assert_eq!(scheduler.task_state("once"), Some(TaskState::Finished));
  scheduler.dispatch(2).unwrap();
  scheduler.dispatch(3).unwrap();

  assert_eq!(*seen.borrow(), vec![1]);
}

// ============================================================================
// Cooperation
// ============================================================================

#[test]
fn test_component_that_does_not_yield_holds_the_replica() {
  let progress = Rc::new(Cell::new(0));
  let observed = Rc::new(Cell::new(None));
  let spec = GraphSpec::new();
  let mut scheduler = scheduler(
    vec![
      Component::from_stage(
        "hog",
        Hog {
          worker_progress: Rc::clone(&progress),
          observed: Rc::clone(&observed),
        },
      )
      .unwrap(),
      Component::from_stage(
        "worker",
        Worker {
          progress: Rc::clone(&progress),
        },
      )
      .unwrap(),
    ],
    &spec,
  );

  scheduler.dispatch(1).unwrap();

  // The worker made no progress while the hog was spinning...
  assert_eq!(observed.get(), Some(0));
  // ...and ran as soon as the hog yielded.
  assert_eq!(progress.get(), 1);
}

#[test]
fn test_component_yielding_before_reading_drains_within_dispatch() {
  let seen = Seen::default();
  let spec = GraphSpec::new()
    .link("reader", "lazy", "out", "in")
    .link("lazy", "sink", "out", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("lazy", Lazy).unwrap(),
      Component::from_stage("sink", recorder(&seen)).unwrap(),
    ],
    &spec,
  );

  let report = scheduler.dispatch(1).unwrap();
  assert!(!report.exhausted);
  assert_eq!(*seen.borrow(), vec![1]);
  assert_eq!(scheduler.pending_items(), 0);

  scheduler.dispatch(2).unwrap();
  assert_eq!(*seen.borrow(), vec![1, 2]);
}

#[test]
fn test_drain_budget_defers_remaining_work() {
  let seen = Seen::default();
  let spec = GraphSpec::new()
    .link("reader", "middle", "out", "in")
    .link("middle", "sink", "out", "in");
  let mut scheduler = Scheduler::from_components(
    graph(vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("middle", PassThrough::with_role(Role::Transformer)).unwrap(),
      Component::from_stage("sink", recorder(&seen)).unwrap(),
    ]),
    &spec.links,
    SchedulerConfig { drain_budget: 2 },
  )
  .unwrap();

  let report = scheduler.dispatch(9).unwrap();
  assert!(report.exhausted);
  assert_eq!(report.polls, 2);
  assert!(seen.borrow().is_empty());
  assert_eq!(scheduler.pending_items(), 1);

  let report = scheduler.drain_pending().unwrap();
  assert!(!report.exhausted);
  assert_eq!(*seen.borrow(), vec![9]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_dispatch_after_shutdown_fails() {
  let spec = GraphSpec::new().link("reader", "sink", "out", "in");
  let mut scheduler = scheduler(
    vec![
      Component::from_stage("reader", PassThrough::new()).unwrap(),
      Component::from_stage("sink", Discard).unwrap(),
    ],
    &spec,
  );

  scheduler.shutdown();
  assert_eq!(scheduler.state(), SchedulerState::Stopped);
  assert!(scheduler.is_empty());
  assert_eq!(scheduler.dispatch(1), Err(SchedulerError::Stopped { replica: 0 }));
  assert_eq!(scheduler.drain_pending(), Err(SchedulerError::Stopped { replica: 0 }));
}
