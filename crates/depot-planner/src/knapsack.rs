//! 0/1 knapsack delivery planner.

use std::time::Instant;

use depot_core::{DepotError, Result};
use tracing::{debug, warn};

use crate::planner::{Checkpoint, Parcel, PlannerConfig, Selection};

/// Dynamic-programming planner that picks the most valuable set of parcels
/// fitting into one robot.
#[derive(Debug, Clone, Default)]
pub struct KnapsackPlanner {
    config: PlannerConfig,
}

/// Per-call working memory, dropped once the selection is reconstructed.
struct Table {
    /// best[w]: highest value reachable with total weight at most `w`.
    best: Vec<u64>,
    /// Bit `row * width + w` is set when that row's candidate improved `best[w]`.
    taken: Vec<u64>,
    width: usize,
}

impl Table {
    fn new(rows: usize, width: usize) -> Self {
        Self {
            best: vec![0; width],
            taken: vec![0; (rows * width).div_ceil(64)],
            width,
        }
    }

    /// Fold one candidate into the table as row `row`.
    fn relax(&mut self, row: usize, weight: usize, value: u64) {
        let base = row * self.width;
        // Downward sweep: best[w - weight] still holds the previous row.
        for w in (weight..self.width).rev() {
            let with = self.best[w - weight].saturating_add(value);
            if with > self.best[w] {
                self.best[w] = with;
                let bit = base + w;
                self.taken[bit / 64] |= 1 << (bit % 64);
            }
        }
    }

    fn was_taken(&self, row: usize, w: usize) -> bool {
        let bit = row * self.width + w;
        self.taken[bit / 64] & (1 << (bit % 64)) != 0
    }

    /// Smallest weight at which the optimum is reached, and the optimum.
    fn optimum(&self) -> (usize, u64) {
        self.best
            .iter()
            .enumerate()
            .fold((0, 0), |(bw, bv), (w, &v)| if v > bv { (w, v) } else { (bw, bv) })
    }
}

impl KnapsackPlanner {
    /// Create a new planner with default configuration.
    pub fn new() -> Self {
        Self {
            config: PlannerConfig::default(),
        }
    }

    /// Create a new planner with custom configuration.
    pub fn with_config(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Choose the subset of `candidates` with maximum total value whose total
    /// weight does not exceed `capacity`.
    ///
    /// Candidates are considered in the order given and each at most once.
    /// Ties keep the earlier choice, so equal inputs always produce equal
    /// selections. `checkpoint` is polled every
    /// [`PlannerConfig::checkpoint_interval`] candidates; when it fires the
    /// call returns [`DepotError::Cancelled`].
    ///
    /// Only candidates that fit and carry value get a table row, and the
    /// table is never wider than their combined weight, so a backlog of
    /// heavy orders does not count against [`PlannerConfig::max_table_cells`].
    pub fn select<T, C>(&self, candidates: &[T], capacity: u64, checkpoint: &C) -> Result<Selection<T>>
    where
        T: Parcel + Clone,
        C: Checkpoint + ?Sized,
    {
        let n = candidates.len();
        if n == 0 || capacity == 0 {
            return Ok(Selection::empty());
        }

        let rows: Vec<usize> = (0..n)
            .filter(|&i| candidates[i].weight() <= capacity && candidates[i].value() > 0)
            .collect();
        if rows.is_empty() {
            return Ok(Selection::empty());
        }
        let reachable = rows
            .iter()
            .map(|&i| candidates[i].weight())
            .fold(0u64, u64::saturating_add)
            .min(capacity);

        let start = Instant::now();
        let width = self.table_width(rows.len(), reachable, capacity)?;
        let interval = self.config.checkpoint_interval.max(1);
        let mut table = Table::new(rows.len(), width);

        for (row, &i) in rows.iter().enumerate() {
            if row % interval == 0 && checkpoint.is_cancelled() {
                warn!("Delivery planning cancelled after {} of {} candidates", row, rows.len());
                return Err(DepotError::Cancelled {
                    message: format!("delivery planning stopped at candidate {} of {}", row, rows.len()),
                });
            }
            let item = &candidates[i];
            table.relax(row, item.weight() as usize, item.value());
        }

        let (mut remaining, best_value) = table.optimum();

        let mut picked = Vec::new();
        for (row, &i) in rows.iter().enumerate().rev() {
            if table.was_taken(row, remaining) {
                picked.push(i);
                remaining -= candidates[i].weight() as usize;
            }
        }
        picked.reverse();

        let items: Vec<T> = picked.into_iter().map(|i| candidates[i].clone()).collect();
        let total_weight = items.iter().map(Parcel::weight).sum();
        let total_value = items.iter().map(Parcel::value).fold(0u64, u64::saturating_add);
        debug_assert_eq!(total_value, best_value);

        debug!(
            "Planned {} of {} candidates ({} eligible): weight {}/{}, value {} in {}ms",
            items.len(),
            n,
            rows.len(),
            total_weight,
            capacity,
            total_value,
            start.elapsed().as_millis()
        );

        Ok(Selection {
            items,
            total_weight,
            total_value,
        })
    }

    /// Row width `reachable + 1`, checked against the cell budget.
    fn table_width(&self, rows: usize, reachable: u64, capacity: u64) -> Result<usize> {
        let too_large = || DepotError::PlanTooLarge {
            candidates: rows,
            capacity,
        };
        let width = usize::try_from(reachable)
            .ok()
            .and_then(|c| c.checked_add(1))
            .ok_or_else(too_large)?;
        match rows.checked_mul(width) {
            Some(cells) if cells <= self.config.max_table_cells => Ok(width),
            _ => Err(too_large()),
        }
    }
}
