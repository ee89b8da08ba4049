//! Error type of the optimizer.
//!
//! Estimation never fails (unknowns are NaN). Errors are reserved for malformed
//! input plans, rule results that break a memo invariant, and bad configuration.

use crate::memo::GroupId;
use crate::plan::PlanNodeId;
use crate::symbol::Symbol;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("invalid plan at node {node}: {message}")]
    InvalidPlan { node: PlanNodeId, message: String },

    #[error("rule {rule} changed the outputs of group {group}: expected {expected:?}, got {actual:?}")]
    OutputSymbolsChanged {
        group: GroupId,
        rule: String,
        expected: BTreeSet<Symbol>,
        actual: BTreeSet<Symbol>,
    },

    #[error("invalid join partition: {0}")]
    InvalidJoinPartition(String),

    #[error("invalid optimizer configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = OptimizerError> = std::result::Result<T, E>;
