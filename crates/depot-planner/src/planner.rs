//! Planner configuration, inputs and cancellation checkpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use depot_core::Order;
use serde::{Deserialize, Serialize};

/// Configuration for the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Number of candidates processed between two cancellation checks.
    pub checkpoint_interval: usize,

    /// Upper bound on `candidates * (capacity + 1)` choice-record cells.
    pub max_table_cells: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1,
            max_table_cells: 1 << 28,
        }
    }
}

/// Something a robot can carry: an indivisible weight/value pair.
pub trait Parcel {
    fn weight(&self) -> u64;
    fn value(&self) -> u64;
}

impl Parcel for Order {
    fn weight(&self) -> u64 {
        self.weight
    }

    fn value(&self) -> u64 {
        self.value
    }
}

/// `(weight, value)`
impl Parcel for (u64, u64) {
    fn weight(&self) -> u64 {
        self.0
    }

    fn value(&self) -> u64 {
        self.1
    }
}

/// Cooperative cancellation signal polled by long-running planning loops.
pub trait Checkpoint: Send + Sync {
    /// Returns true once the computation should be abandoned.
    fn is_cancelled(&self) -> bool;
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl Checkpoint for Unbounded {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Cancels once a point in time has passed.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// Total time the deadline allowed, for error reporting.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

impl Checkpoint for Deadline {
    fn is_cancelled(&self) -> bool {
        Instant::now() >= self.at
    }
}

impl Checkpoint for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Value-maximizing, capacity-feasible subset chosen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    /// Chosen candidates, in candidate order.
    pub items: Vec<T>,

    /// Sum of the chosen weights.
    pub total_weight: u64,

    /// Sum of the chosen values.
    pub total_value: u64,
}

impl<T> Selection<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_weight: 0,
            total_value: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
