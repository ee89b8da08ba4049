//! Helpers for rule unit tests.

use cbo_core::catalog::InMemoryMetadata;
use cbo_core::config::Session;
use cbo_core::cost::DefaultCostCalculator;
use cbo_core::memo::StatelessLookup;
use cbo_core::plan::{PlanNode, PlanNodeIdAllocator};
use cbo_core::rule::{Rule, RuleContext};
use cbo_core::stats::calculator::DefaultStatsCalculator;
use cbo_core::symbol::SymbolAllocator;
use std::sync::Arc;

pub fn rule_context() -> (SymbolAllocator, PlanNodeIdAllocator, Session) {
    (SymbolAllocator::new(), PlanNodeIdAllocator::new(), Session::default())
}

/// Apply `rule` once to an inline plan, outside any memo.
pub fn run_rule(
    rule: &dyn Rule,
    node: &PlanNode,
    symbol_allocator: &mut SymbolAllocator,
    id_allocator: &mut PlanNodeIdAllocator,
    session: &Session,
) -> Option<PlanNode> {
    let stats = DefaultStatsCalculator::new(Arc::new(InMemoryMetadata::new()));
    let cost = DefaultCostCalculator::new();
    let lookup = StatelessLookup::new(&stats, &cost);
    let mut ctx = RuleContext {
        lookup: &lookup,
        id_allocator,
        symbol_allocator,
        session,
    };
    rule.apply(node, &mut ctx)
}
