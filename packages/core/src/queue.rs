//! Worker pool configuration and statistics.

use serde::{Deserialize, Serialize};

/// Default number of concurrent training slots.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Maximum number of pending tasks. `None` leaves the queue unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_queue_size: None,
        }
    }
}

impl PoolConfig {
    /// Set the worker count. Zero is raised to one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }
}

/// Snapshot of the pool's current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolStats {
    /// Tasks waiting for a worker.
    pub pending: u64,
    /// Tasks currently held by a worker.
    pub running: u64,
    /// Tasks finished successfully since startup.
    pub completed: u64,
    /// Tasks finished with an error since startup.
    pub failed: u64,
    pub concurrency: usize,
}

impl PoolStats {
    /// Total tasks in the pool (pending + running).
    pub fn active(&self) -> u64 {
        self.pending + self.running
    }

    /// Total processed tasks.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_two_unbounded_slots() {
        let config = PoolConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_queue_size, None);
        assert_eq!(PoolConfig::default().with_concurrency(0).concurrency, 1);
    }
}
