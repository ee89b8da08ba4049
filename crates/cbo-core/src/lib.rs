//! # cbo-core: Cost-Based Optimizer Core
//!
//! Statistics estimation and the iterative rule engine of a Presto-style
//! cost-based optimizer. Concrete rewrite rules live in `cbo-rules`.
//!
//! ## Module Overview
//!
//! - **`symbol`**, **`expr`**, **`plan`**: the plan model (symbols and types,
//!   scalar expressions, plan nodes) plus **`plan_builder`** for assembling plans
//!   and **`validate`** for checking symbol references.
//! - **`range`**: the value-range model behind every selectivity estimate.
//! - **`stats`**: column and plan-node estimates, filter estimation and the
//!   per-node statistics calculator.
//! - **`cost`**: CPU/memory/network cost of plan nodes and their comparison.
//! - **`memo`**: groups of equivalent plans with cached statistics and cost.
//! - **`rule`**, **`pattern`**, **`optimizer`**: the rule trait and the
//!   iterative optimizer that applies rules to a fixpoint.
//! - **`catalog`**: table statistics supplied by the metadata provider.
//! - **`config`**, **`error`**: session configuration and the error type.

pub mod catalog;
pub mod config;
pub mod cost;
pub mod error;
pub mod expr;
pub mod memo;
pub mod optimizer;
pub mod pattern;
pub mod plan;
pub mod plan_builder;
pub mod range;
pub mod rule;
pub mod stats;
pub mod symbol;
pub mod validate;

pub use config::{OptimizerConfig, Session};
pub use error::{OptimizerError, Result};
