//! # Optimizer Configuration
//!
//! Tunables for one optimization run, carried by the [`Session`]. Every field has
//! a default, so a JSON document only needs the values it overrides:
//!
//! ```json
//! { "join_reordering_enabled": false, "optimizer_timeout_ms": 500 }
//! ```

use crate::error::Result;
use crate::range::OverlapHeuristics;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Enables the cost-based join reordering rule.
    pub join_reordering_enabled: bool,
    /// Wall-clock budget of one `optimize` call. Exceeding it stops exploration
    /// and returns the best plan found so far.
    pub optimizer_timeout_ms: u64,
    /// Upper bound on successful rule applications per `optimize` call.
    pub max_rule_applications: usize,
    /// Join graphs with more sources than this are left in their original order
    /// (enumeration is exponential in the number of sources).
    pub max_reordered_join_sources: usize,
    pub cpu_cost_weight: f64,
    pub memory_cost_weight: f64,
    pub network_cost_weight: f64,
    /// Row-count factor applied for predicates the calculator cannot model.
    pub unknown_filter_coefficient: f64,
    /// Bytes assumed for a value whose size is not known from statistics or type.
    pub default_column_width: f64,
    pub overlap_heuristics: OverlapHeuristics,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            join_reordering_enabled: true,
            optimizer_timeout_ms: 180_000,
            max_rule_applications: 1_000_000,
            max_reordered_join_sources: 10,
            cpu_cost_weight: 1.0,
            memory_cost_weight: 1.0,
            network_cost_weight: 10.0,
            unknown_filter_coefficient: 0.5,
            default_column_width: 8.0,
            overlap_heuristics: OverlapHeuristics::default(),
        }
    }
}

impl OptimizerConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn optimizer_timeout(&self) -> Duration {
        Duration::from_millis(self.optimizer_timeout_ms)
    }
}

/// Per-query context handed to calculators and rules.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub query_id: String,
    config: OptimizerConfig,
}

impl Session {
    pub fn new(query_id: impl Into<String>, config: OptimizerConfig) -> Self {
        Self {
            query_id: query_id.into(),
            config,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}
