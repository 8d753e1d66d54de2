//! # Configuration
//!
//! Tunables for the scheduler and the replica pool. Both structs deserialize
//! from JSON with every field optional, falling back to [`Default`].

use serde::{Deserialize, Serialize};

/// Default number of replicas in a pool.
pub const DEFAULT_REPLICAS: usize = 1;
/// Default cap on component polls per dispatch cycle.
pub const DEFAULT_DRAIN_BUDGET: usize = 100_000;
/// Default prefix for replica thread names.
pub const DEFAULT_THREAD_NAME: &str = "flowloom-replica";

/// Per-replica scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Maximum number of component polls in one dispatch cycle.
  ///
  /// When reached the cycle ends early and the remaining work is picked up by
  /// the next dispatch.
  pub drain_budget: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      drain_budget: DEFAULT_DRAIN_BUDGET,
    }
  }
}

/// Replica pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataflowConfig {
  /// Number of replicas started with the pool.
  pub replicas: usize,
  /// Replica threads are named `"{thread_name}-{id}"`.
  pub thread_name: String,
  /// Settings shared by every replica's scheduler.
  pub scheduler: SchedulerConfig,
}

impl Default for DataflowConfig {
  fn default() -> Self {
    Self {
      replicas: DEFAULT_REPLICAS,
      thread_name: DEFAULT_THREAD_NAME.to_string(),
      scheduler: SchedulerConfig::default(),
    }
  }
}

impl DataflowConfig {
  /// Parses a configuration from JSON; missing fields take their defaults.
  pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Sets the initial replica count.
  pub fn with_replicas(mut self, replicas: usize) -> Self {
    self.replicas = replicas;
    self
  }

  /// Sets the replica thread name prefix.
  pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
    self.thread_name = thread_name.into();
    self
  }

  /// Sets the scheduler settings.
  pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
    self.scheduler = scheduler;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = DataflowConfig::default();
    assert_eq!(config.replicas, 1);
    assert_eq!(config.thread_name, "flowloom-replica");
    assert_eq!(config.scheduler.drain_budget, 100_000);
  }

  #[test]
  fn test_partial_json_falls_back_to_defaults() {
    let config = DataflowConfig::from_json_str(r#"{"replicas": 4, "scheduler": {}}"#).unwrap();
    assert_eq!(config.replicas, 4);
    assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
    assert_eq!(config.scheduler, SchedulerConfig::default());
  }

  #[test]
  fn test_builder() {
    let config = DataflowConfig::default()
      .with_replicas(3)
      .with_thread_name("grep")
      .with_scheduler(SchedulerConfig { drain_budget: 10 });
    assert_eq!(config.replicas, 3);
    assert_eq!(config.thread_name, "grep");
    assert_eq!(config.scheduler.drain_budget, 10);
  }

  #[test]
  fn test_malformed_json_is_rejected() {
    assert!(DataflowConfig::from_json_str(r#"{"replicas": "many"}"#).is_err());
  }
}
