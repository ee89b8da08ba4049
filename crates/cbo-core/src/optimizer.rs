//! # Iterative Optimizer
//!
//! Drives the rule engine over the memo until a fixpoint is reached.
//!
//! ## Exploration
//!
//! Exploration is top-down and recursive. For one group:
//!
//! 1. **Explore the node**: try every enabled rule whose pattern matches the
//!    group's representative. When a rule fires, the representative is replaced
//!    and the rule list is tried again on the new node.
//! 2. **Explore the children**: recursively explore every child group.
//! 3. If either step made progress, repeat from 1: a rewritten child may enable
//!    a rule on the parent (e.g. pruning below lets a projection shrink above).
//!
//! A rule result equal to the current representative (plan node ids ignored)
//! does not count as progress; this is what lets a rule set reach a fixpoint.
//!
//! ## Candidate checks
//!
//! Every rule result is validated with [`validate_plan`] and then handed to
//! [`Memo::replace`], which rejects a changed output-symbol set. A rejected
//! candidate is logged and skipped; the group keeps its previous node.
//!
//! ## Budgets
//!
//! Two soft limits bound one `optimize` call: a wall-clock deadline
//! (`optimizer_timeout_ms`) and a count of successful rule applications
//! (`max_rule_applications`). Both are checked between rule applications. When
//! either is exhausted, exploration stops and the current plan is returned.

use crate::config::Session;
use crate::cost::CostCalculator;
use crate::error::Result;
use crate::memo::{GroupId, Memo, MemoLookup};
use crate::plan::{PlanNode, PlanNodeIdAllocator};
use crate::rule::{Rule, RuleContext, RuleRegistry};
use crate::stats::calculator::StatsCalculator;
use crate::symbol::SymbolAllocator;
use crate::validate::validate_plan;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

pub struct IterativeOptimizer {
    rules: Arc<RuleRegistry>,
    stats_calculator: Arc<dyn StatsCalculator>,
    cost_calculator: Arc<dyn CostCalculator>,
}

/// Mutable state of one `optimize` call.
struct Exploration<'a> {
    memo: Memo,
    session: &'a Session,
    symbol_allocator: &'a mut SymbolAllocator,
    id_allocator: &'a mut PlanNodeIdAllocator,
    deadline: Instant,
    applications: usize,
    stopped: bool,
}

impl Exploration<'_> {
    /// Whether exploration may continue; latches once a budget is exhausted.
    fn within_budget(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        if Instant::now() >= self.deadline {
            warn!(
                query_id = %self.session.query_id,
                applications = self.applications,
                "optimizer timed out, returning current plan"
            );
            self.stopped = true;
        } else if self.applications >= self.session.config().max_rule_applications {
            warn!(
                query_id = %self.session.query_id,
                applications = self.applications,
                "rule application budget exhausted, returning current plan"
            );
            self.stopped = true;
        }
        !self.stopped
    }
}

impl IterativeOptimizer {
    pub fn new(
        rules: Arc<RuleRegistry>,
        stats_calculator: Arc<dyn StatsCalculator>,
        cost_calculator: Arc<dyn CostCalculator>,
    ) -> Self {
        Self {
            rules,
            stats_calculator,
            cost_calculator,
        }
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Rewrite `plan` with the registered rules until no rule fires or a budget
    /// runs out.
    ///
    /// Fails only when the input plan itself is invalid.
    pub fn optimize(
        &self,
        plan: PlanNode,
        session: &Session,
        symbol_allocator: &mut SymbolAllocator,
        id_allocator: &mut PlanNodeIdAllocator,
    ) -> Result<PlanNode> {
        validate_plan(&plan)?;

        let started = Instant::now();
        let memo = Memo::new(plan);
        let root = memo.root_group();
        let mut exploration = Exploration {
            memo,
            session,
            symbol_allocator,
            id_allocator,
            deadline: started + session.config().optimizer_timeout(),
            applications: 0,
            stopped: false,
        };

        self.explore_group(root, &mut exploration);

        debug!(
            query_id = %session.query_id,
            groups = exploration.memo.group_count(),
            applications = exploration.applications,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "optimization finished"
        );
        Ok(exploration.memo.extract())
    }

    fn explore_group(&self, group: GroupId, exploration: &mut Exploration<'_>) -> bool {
        let mut progress = false;
        loop {
            if !exploration.within_budget() {
                break;
            }
            let mut changed = self.explore_node(group, exploration);
            changed |= self.explore_children(group, exploration);
            if !changed {
                break;
            }
            progress = true;
        }
        progress
    }

    fn explore_node(&self, group: GroupId, exploration: &mut Exploration<'_>) -> bool {
        let mut progress = false;
        let mut done = false;
        while !done && exploration.within_budget() {
            done = true;
            let node = exploration.memo.node(group).clone();
            for rule in self.rules.candidates(&node, exploration.session) {
                if !exploration.within_budget() {
                    return progress;
                }
                if self.apply_rule(rule, group, &node, exploration) {
                    exploration.applications += 1;
                    progress = true;
                    done = false;
                    // re-match the rule list against the new representative
                    break;
                }
            }
        }
        progress
    }

    fn explore_children(&self, group: GroupId, exploration: &mut Exploration<'_>) -> bool {
        let children: Vec<GroupId> = exploration
            .memo
            .node(group)
            .sources()
            .into_iter()
            .filter_map(|child| match child {
                PlanNode::GroupReference(r) => Some(r.group),
                _ => None,
            })
            .collect();

        let mut progress = false;
        for child in children {
            progress |= self.explore_group(child, exploration);
        }
        progress
    }

    /// Apply one rule to the representative of `group`; true when it changed.
    fn apply_rule(
        &self,
        rule: &dyn Rule,
        group: GroupId,
        node: &PlanNode,
        exploration: &mut Exploration<'_>,
    ) -> bool {
        let started = Instant::now();
        let result = {
            let lookup = MemoLookup::new(
                &exploration.memo,
                self.stats_calculator.as_ref(),
                self.cost_calculator.as_ref(),
            );
            let mut ctx = RuleContext {
                lookup: &lookup,
                id_allocator: &mut *exploration.id_allocator,
                symbol_allocator: &mut *exploration.symbol_allocator,
                session: exploration.session,
            };
            rule.apply(node, &mut ctx)
        };
        let Some(candidate) = result else {
            return false;
        };

        if let Err(e) = validate_plan(&candidate) {
            warn!(rule = rule.name(), group, error = %e, "rule produced an invalid plan, skipping");
            return false;
        }
        match exploration.memo.replace(group, candidate, rule.name()) {
            Ok(changed) => {
                if changed {
                    trace!(
                        rule = rule.name(),
                        group,
                        elapsed_us = started.elapsed().as_micros() as u64,
                        "rule fired"
                    );
                }
                changed
            }
            Err(e) => {
                warn!(rule = rule.name(), group, error = %e, "rule result rejected by memo, skipping");
                false
            }
        }
    }
}
