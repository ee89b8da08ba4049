//! # Rule System
//!
//! A rule rewrites one plan node into an equivalent one. Rules are registered in
//! a [`RuleRegistry`] and driven by the
//! [`IterativeOptimizer`](crate::optimizer::IterativeOptimizer), which calls
//! [`Rule::apply`] on every memo group whose representative matches the rule's
//! [`Pattern`].
//!
//! ## Contract
//!
//! - `apply` returns `None` when the rule does not fire.
//! - A returned node must produce the same *set* of output symbols as the input
//!   node. The memo rejects anything else.
//! - Children of the input are group references. A rule may return them as they
//!   are, wrap them in new inline nodes, or return one of them alone; inline
//!   nodes become new groups.
//! - Rules must be deterministic: the same node and memo state give the same
//!   result. The optimizer keeps applying rules until none fires, so a rule that
//!   always fires never terminates.
//!
//! ## Context
//!
//! [`RuleContext`] exposes the memo through [`Lookup`] (resolve children, query
//! statistics and cost), the allocators for new plan node ids and symbols, and
//! the session.

use crate::config::Session;
use crate::cost::PlanNodeCostEstimate;
use crate::memo::Lookup;
use crate::pattern::Pattern;
use crate::plan::{PlanNode, PlanNodeIdAllocator};
use crate::stats::PlanNodeStatsEstimate;
use crate::symbol::{SymbolAllocator, TypeProvider};

pub struct RuleContext<'a> {
    pub lookup: &'a dyn Lookup,
    pub id_allocator: &'a mut PlanNodeIdAllocator,
    pub symbol_allocator: &'a mut SymbolAllocator,
    pub session: &'a Session,
}

impl RuleContext<'_> {
    pub fn types(&self) -> &TypeProvider {
        self.symbol_allocator.types()
    }

    pub fn stats(&self, node: &PlanNode) -> PlanNodeStatsEstimate {
        self.lookup.stats(node, self.session, self.symbol_allocator.types())
    }

    pub fn cumulative_cost(&self, node: &PlanNode) -> PlanNodeCostEstimate {
        self.lookup
            .cumulative_cost(node, self.session, self.symbol_allocator.types())
    }
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn pattern(&self) -> Pattern;

    /// Whether the rule runs at all for this session.
    fn is_enabled(&self, _session: &Session) -> bool {
        true
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Option<PlanNode>;
}

/// Ordered set of rules. Rules are tried in registration order.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.add_rule(Box::new(rule));
        self
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    /// Enabled rules whose pattern matches `node`.
    pub fn candidates<'r>(
        &'r self,
        node: &'r PlanNode,
        session: &'r Session,
    ) -> impl Iterator<Item = &'r dyn Rule> {
        self.rules()
            .filter(move |r| r.is_enabled(session) && r.pattern().matches(node))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
