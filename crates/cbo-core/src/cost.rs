//! # Cost Model
//!
//! Plan cost is kept in three dimensions, CPU, memory and network, so that the
//! comparison policy can be tuned without touching the per-node formulas.
//!
//! ## Local and cumulative cost
//!
//! [`CostCalculator::calculate_cost`] returns the *local* cost of one node, given
//! its own estimate and its sources' estimates. The cumulative cost of a subtree
//! is the local cost plus the cumulative costs of the sources; the memo computes
//! and caches it per group.
//!
//! ## Comparing costs
//!
//! [`CostComparator`] collapses the dimensions with session-supplied weights:
//!
//! ```text
//! total = cpu_weight * cpu + memory_weight * memory + network_weight * network
//! ```
//!
//! The defaults (1.0, 1.0, 10.0) make network transfer the dominant term, as in a
//! distributed engine. A cost with an unknown (NaN) component sorts after every
//! known cost; two unknown costs are equal.

use crate::config::Session;
use crate::plan::{DistributionType, PlanNode};
use crate::stats::PlanNodeStatsEstimate;
use crate::symbol::{Symbol, TypeProvider};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::Add;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanNodeCostEstimate {
    pub cpu_cost: f64,
    pub memory_cost: f64,
    pub network_cost: f64,
}

impl PlanNodeCostEstimate {
    pub const ZERO: PlanNodeCostEstimate = PlanNodeCostEstimate {
        cpu_cost: 0.0,
        memory_cost: 0.0,
        network_cost: 0.0,
    };

    pub const UNKNOWN: PlanNodeCostEstimate = PlanNodeCostEstimate {
        cpu_cost: f64::NAN,
        memory_cost: f64::NAN,
        network_cost: f64::NAN,
    };

    pub fn new(cpu_cost: f64, memory_cost: f64, network_cost: f64) -> Self {
        Self {
            cpu_cost,
            memory_cost,
            network_cost,
        }
    }

    pub fn cpu(cpu_cost: f64) -> Self {
        Self::new(cpu_cost, 0.0, 0.0)
    }

    pub fn has_unknown_components(&self) -> bool {
        self.cpu_cost.is_nan() || self.memory_cost.is_nan() || self.network_cost.is_nan()
    }
}

impl Add for PlanNodeCostEstimate {
    type Output = PlanNodeCostEstimate;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.cpu_cost + other.cpu_cost,
            self.memory_cost + other.memory_cost,
            self.network_cost + other.network_cost,
        )
    }
}

/// Local cost of a single plan node.
pub trait CostCalculator: Send + Sync {
    fn calculate_cost(
        &self,
        node: &PlanNode,
        stats: &PlanNodeStatsEstimate,
        source_stats: &[PlanNodeStatsEstimate],
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeCostEstimate;
}

/// Byte-based cost formulas.
///
/// - **TableScan**: CPU proportional to the bytes read.
/// - **Filter / Project**: CPU proportional to the bytes processed.
/// - **Join**: both inputs are hashed/probed and the output produced (CPU), the
///   right side is held in a hash table (memory), and both sides are shuffled
///   when partitioned or the right side broadcast when replicated (network).
/// - **Aggregation**: CPU on the input, memory for the groups.
/// - **JoinGraph**: not executable, so unknown.
#[derive(Debug, Default)]
pub struct DefaultCostCalculator;

impl DefaultCostCalculator {
    pub fn new() -> Self {
        Self
    }
}

impl CostCalculator for DefaultCostCalculator {
    fn calculate_cost(
        &self,
        node: &PlanNode,
        stats: &PlanNodeStatsEstimate,
        source_stats: &[PlanNodeStatsEstimate],
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeCostEstimate {
        let default_width = session.config().default_column_width;
        let size_of = |estimate: &PlanNodeStatsEstimate, symbols: &[Symbol]| {
            estimate.output_size_in_bytes(symbols, types, default_width)
        };
        let source_size = |i: usize| match (node.sources().get(i), source_stats.get(i)) {
            (Some(source), Some(estimate)) => size_of(estimate, &source.output_symbols()),
            _ => f64::NAN,
        };
        let output_size = size_of(stats, &node.output_symbols());

        match node {
            PlanNode::TableScan(_) => PlanNodeCostEstimate::cpu(output_size),
            PlanNode::Values(_) | PlanNode::Union(_) => PlanNodeCostEstimate::ZERO,
            PlanNode::Filter(_) | PlanNode::Project(_) => PlanNodeCostEstimate::cpu(source_size(0)),
            PlanNode::Limit(_) => PlanNodeCostEstimate::cpu(output_size),
            PlanNode::Aggregation(_) => {
                PlanNodeCostEstimate::new(source_size(0), output_size, 0.0)
            }
            PlanNode::Join(join) => {
                let left = source_size(0);
                let right = source_size(1);
                let network = match join.distribution_type {
                    Some(DistributionType::Replicated) => right,
                    Some(DistributionType::Partitioned) | None => left + right,
                };
                PlanNodeCostEstimate::new(left + right + output_size, right, network)
            }
            PlanNode::JoinGraph(_) | PlanNode::GroupReference(_) => PlanNodeCostEstimate::UNKNOWN,
        }
    }
}

/// Ordering of cost estimates. `Less` means cheaper.
pub trait CostComparator: Send + Sync {
    fn compare(
        &self,
        session: &Session,
        left: &PlanNodeCostEstimate,
        right: &PlanNodeCostEstimate,
    ) -> Ordering;
}

/// Weighted-sum comparator using the weights of the session configuration.
#[derive(Debug, Default)]
pub struct DefaultCostComparator;

impl DefaultCostComparator {
    pub fn new() -> Self {
        Self
    }

    pub fn total(session: &Session, cost: &PlanNodeCostEstimate) -> f64 {
        let config = session.config();
        config.cpu_cost_weight * cost.cpu_cost
            + config.memory_cost_weight * cost.memory_cost
            + config.network_cost_weight * cost.network_cost
    }
}

impl CostComparator for DefaultCostComparator {
    fn compare(
        &self,
        session: &Session,
        left: &PlanNodeCostEstimate,
        right: &PlanNodeCostEstimate,
    ) -> Ordering {
        match (left.has_unknown_components(), right.has_unknown_components()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let l = Self::total(session, left);
                let r = Self::total(session, right);
                // sub-epsilon differences are float noise
                if (l - r).abs() < f64::EPSILON {
                    Ordering::Equal
                } else {
                    l.total_cmp(&r)
                }
            }
        }
    }
}
