//! # Built-in Rewrite Rules
//!
//! The default rule set for the iterative optimizer of `cbo-core`. Every rule
//! rewrites one memo group into an equivalent plan with the same output
//! symbols.
//!
//! ## Simplification
//!
//! - **`CanonicalizeProjectExpressions`**, **`CanonicalizeFilterExpressions`**,
//!   **`CanonicalizeTableScanExpressions`**: rewrite expressions into a
//!   canonical form (constant folding, literals on the right of comparisons,
//!   flattened connectives) so that equal predicates look equal.
//! - **`PruneUnreferencedOutputs`**: narrows projections, scans and values to
//!   the symbols their parent reads.
//!
//! ## Cost-based
//!
//! - **`ReorderJoins`**: flattens trees of inner joins into a join graph and
//!   picks the cheapest join order by exhaustive enumeration.

pub mod canonicalize;
pub mod join_enumerator;
pub mod join_graph;
pub mod prune_unreferenced_outputs;
pub mod reorder_joins;

#[cfg(test)]
mod test_support;

use cbo_core::rule::RuleRegistry;

/// Create a rule registry with all built-in rules.
///
/// Rules are tried in registration order: simplifications first, so that join
/// reordering costs plans that are already canonical and narrow.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    registry.add_rule(Box::new(canonicalize::CanonicalizeProjectExpressions));
    registry.add_rule(Box::new(canonicalize::CanonicalizeFilterExpressions));
    registry.add_rule(Box::new(canonicalize::CanonicalizeTableScanExpressions));
    registry.add_rule(Box::new(
        prune_unreferenced_outputs::PruneUnreferencedOutputs,
    ));

    registry.add_rule(Box::new(reorder_joins::ReorderJoins::default()));

    registry
}
