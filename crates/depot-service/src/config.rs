//! Service configuration.

use std::time::Duration;

use depot_planner::PlannerConfig;
use serde::{Deserialize, Serialize};

/// Default bound on one planning call or status update.
pub const DEFAULT_PLAN_TIMEOUT_MS: u64 = 5_000;

/// Configuration shared by the fulfilment services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Upper bound on a whole planning transaction, in milliseconds.
    pub plan_timeout_ms: u64,

    /// Knapsack planner settings.
    #[serde(default)]
    pub planner: PlannerConfig,
}

impl ServiceConfig {
    pub fn plan_timeout(&self) -> Duration {
        Duration::from_millis(self.plan_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            plan_timeout_ms: DEFAULT_PLAN_TIMEOUT_MS,
            planner: PlannerConfig::default(),
        }
    }
}
