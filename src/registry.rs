//! # Component Registry
//!
//! Maps a component *kind* (the `kind` field of a [`ComponentSpec`]) to a
//! factory that builds the component's [`Stage`]. Every replica of a pool
//! builds its own components from the shared registry, so factories must be
//! `Send + Sync` while the stages they produce stay on the replica thread.

use crate::component::{Component, Payload, Stage};
use crate::error::{GraphError, StageError};
use crate::graph::{ComponentSpec, GraphSpec};
use crate::stages::{DISCARD, DUPLICATE, Discard, Duplicate, PASS_THROUGH, PassThrough};
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

/// What a factory knows about the component it is building.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
  /// Replica the component will run in.
  pub replica: usize,
  /// Component name within the graph.
  pub name: &'a str,
  /// The component's declaration.
  pub spec: &'a ComponentSpec,
}

/// Boxed stage factory.
pub type StageFactory<T> =
  Box<dyn Fn(&BuildContext<'_>) -> Result<Box<dyn Stage<T>>, StageError> + Send + Sync>;

/// Kind-to-factory map used to build graphs from a [`GraphSpec`].
pub struct ComponentRegistry<T: Payload> {
  factories: BTreeMap<String, StageFactory<T>>,
}

impl<T: Payload> ComponentRegistry<T> {
  /// Creates an empty registry.
  pub fn new() -> Self {
    Self {
      factories: BTreeMap::new(),
    }
  }

  /// Creates a registry with the built-in stages registered.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    registry
      .register(PASS_THROUGH, |_| Ok(PassThrough::new()))
      .register(DUPLICATE, |_| Ok(Duplicate))
      .register(DISCARD, |_| Ok(Discard));
    registry
  }

  /// Registers a factory under `kind`, replacing any previous one.
  pub fn register<S, F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
  where
    S: Stage<T> + 'static,
    F: Fn(&BuildContext<'_>) -> Result<S, StageError> + Send + Sync + 'static,
  {
    let boxed: StageFactory<T> = Box::new(move |context: &BuildContext<'_>| {
      factory(context).map(|stage| Box::new(stage) as Box<dyn Stage<T>>)
    });
    self.factories.insert(kind.into(), boxed);
    self
  }

  /// Returns `true` if a factory is registered for `kind`.
  pub fn contains(&self, kind: &str) -> bool {
    self.factories.contains_key(kind)
  }

  /// Registered kinds, sorted.
  pub fn kinds(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }

  /// Builds one component and applies its declared parameters.
  ///
  /// # Errors
  ///
  /// - [`GraphError::UnknownKind`] if no factory is registered for the kind
  /// - [`GraphError::Build`] if the factory fails
  /// - [`GraphError::Component`] if `configure` or a parameter is rejected
  pub fn build(&self, replica: usize, name: &str, spec: &ComponentSpec) -> Result<Component<T>, GraphError> {
    let factory = self
      .factories
      .get(&spec.kind)
      .ok_or_else(|| GraphError::UnknownKind {
        component: name.to_string(),
        kind: spec.kind.clone(),
      })?;

    let context = BuildContext { replica, name, spec };
    let stage = factory(&context).map_err(|e| GraphError::Build {
      component: name.to_string(),
      reason: e.to_string(),
    })?;

    let mut component = Component::new(name, stage)?;
    for (key, value) in &spec.params {
      component.ports_mut().set_parameter(key, value.clone(), None)?;
    }
    trace!(replica, component = name, kind = %spec.kind, "built component");
    Ok(component)
  }

  /// Builds every component declared in `spec`.
  ///
  /// # Errors
  ///
  /// The first error from [`ComponentRegistry::build`].
  pub fn build_all(&self, spec: &GraphSpec, replica: usize) -> Result<BTreeMap<String, Component<T>>, GraphError> {
    spec
      .components
      .iter()
      .map(|(name, component)| Ok((name.clone(), self.build(replica, name, component)?)))
      .collect()
  }
}

impl<T: Payload> Default for ComponentRegistry<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Payload> fmt::Debug for ComponentRegistry<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentRegistry")
      .field("kinds", &self.kinds().collect::<Vec<_>>())
      .finish()
  }
}
