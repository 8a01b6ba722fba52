//! # Depot Planner
//!
//! Capacity-bounded delivery planning for the Depot fulfilment service.
//!
//! The planner is pure: it never touches the order store and keeps no state
//! between calls. Callers bound its running time through a [`Checkpoint`].

pub mod knapsack;
pub mod planner;

pub use knapsack::KnapsackPlanner;
pub use planner::{Checkpoint, Deadline, Parcel, PlannerConfig, Selection, Unbounded};
