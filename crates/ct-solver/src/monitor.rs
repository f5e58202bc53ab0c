//! Search limits.
//!
//! Reading the clock on every node is measurable in a tight search loop, so
//! the wall clock is only consulted when the node counter hits the check mask.

use ct_core::{SolverConfig, TerminationStatus};
use std::time::{Duration, Instant};

/// Node and wall-clock budget shared by every search a backend runs for one
/// `solve` call.
#[derive(Debug, Clone)]
pub struct LimitMonitor {
    start: Instant,
    time_limit: Option<Duration>,
    node_limit: Option<u64>,
    nodes: u64,
    clock_check_mask: u64,
}

impl LimitMonitor {
    /// Clock is read every 256 nodes.
    pub const DEFAULT_CLOCK_CHECK_MASK: u64 = 0xFF;

    /// Monitor started now.
    pub fn new(time_limit: Option<Duration>, node_limit: Option<u64>) -> Self {
        Self {
            start: Instant::now(),
            time_limit,
            node_limit,
            nodes: 0,
            clock_check_mask: Self::DEFAULT_CLOCK_CHECK_MASK,
        }
    }

    /// Monitor using the limits of a solver configuration.
    pub fn from_config(config: &SolverConfig) -> Self {
        Self::new(config.time_limit, config.node_limit)
    }

    /// Override how often the clock is read. `mask + 1` must be a power of two.
    pub fn with_clock_check_mask(mut self, mask: u64) -> Self {
        debug_assert!(mask.wrapping_add(1).is_power_of_two());
        self.clock_check_mask = mask;
        self
    }

    /// Count one node; returns the limit status once a budget is exhausted.
    #[inline]
    pub fn on_node(&mut self) -> Option<TerminationStatus> {
        self.nodes = self.nodes.wrapping_add(1);
        if self.node_limit.is_some_and(|limit| self.nodes > limit) {
            return Some(TerminationStatus::NodeLimit);
        }
        if self.nodes & self.clock_check_mask == 0 {
            return self.check_time();
        }
        None
    }

    /// Unconditional clock check (used between outer iterations).
    pub fn check_time(&self) -> Option<TerminationStatus> {
        match self.time_limit {
            Some(limit) if self.start.elapsed() >= limit => Some(TerminationStatus::TimeLimit),
            _ => None,
        }
    }

    /// Nodes counted so far.
    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    /// Time since the monitor was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
