//! # Memo
//!
//! The memo stores the plan being optimized as an arena of *groups*. Each group
//! holds one representative [`PlanNode`] whose children are
//! [`PlanNode::GroupReference`]s to other groups, so a rule that rewrites a group
//! never has to rebuild its ancestors.
//!
//! ## Deduplication
//!
//! Inserting a subtree that is structurally equal to one already in the memo
//! (same node fields and child groups, plan node ids ignored) reuses the existing
//! group. Shared subtrees therefore share statistics and cost.
//!
//! ## Replacement
//!
//! [`Memo::replace`] swaps a group's representative. The new node must produce
//! the same *set* of output symbols; anything else would silently change the
//! meaning of every parent. Inline children of the new node become new groups
//! (or are deduplicated into existing ones).
//!
//! ## Caches
//!
//! Statistics and cumulative cost are cached per group and stamped from a
//! monotonic clock. An entry is reused only while it is newer than the group's
//! last replacement and newer than the entries of all its children; replacing a
//! group therefore invalidates every ancestor without walking parent links.
//! When nothing has been replaced since an entry was computed, it is returned
//! without checking the subtree.
//!
//! The caches use `RefCell`: the memo belongs to a single optimization call and
//! is not shared across threads.
//!
//! ## Lookup
//!
//! Rules see the memo through the [`Lookup`] trait: resolve a group reference,
//! get statistics or cumulative cost of any node (group references hit the memo
//! caches; inline nodes are computed on the fly).

use crate::config::Session;
use crate::cost::{CostCalculator, PlanNodeCostEstimate};
use crate::error::{OptimizerError, Result};
use crate::plan::{GroupReference, PlanNode, PlanNodeId};
use crate::stats::calculator::StatsCalculator;
use crate::stats::PlanNodeStatsEstimate;
use crate::symbol::TypeProvider;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Index of a group in the memo arena.
pub type GroupId = usize;

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    computed_at: u64,
}

#[derive(Debug)]
struct Group {
    node: PlanNode,
    changed_at: u64,
    stats: RefCell<Option<Cached<PlanNodeStatsEstimate>>>,
    cost: RefCell<Option<Cached<PlanNodeCostEstimate>>>,
}

impl Group {
    fn new(node: PlanNode, changed_at: u64) -> Self {
        Self {
            node,
            changed_at,
            stats: RefCell::new(None),
            cost: RefCell::new(None),
        }
    }
}

#[derive(Debug)]
pub struct Memo {
    groups: Vec<Group>,
    /// Structural key → group holding an equal node.
    index: HashMap<PlanNode, GroupId>,
    root: GroupId,
    clock: Cell<u64>,
    last_replace: u64,
}

/// Node with its own id and its children's ids zeroed.
fn structural_key(node: &PlanNode) -> PlanNode {
    let children = node
        .sources()
        .into_iter()
        .map(|c| c.with_id(PlanNodeId(0)))
        .collect();
    node.replace_children(children).with_id(PlanNodeId(0))
}

fn child_groups(node: &PlanNode) -> Vec<GroupId> {
    node.sources()
        .into_iter()
        .filter_map(|c| match c {
            PlanNode::GroupReference(r) => Some(r.group),
            _ => None,
        })
        .collect()
}

impl Memo {
    pub fn new(plan: PlanNode) -> Self {
        let mut memo = Self {
            groups: Vec::new(),
            index: HashMap::new(),
            root: 0,
            clock: Cell::new(0),
            last_replace: 0,
        };
        memo.root = memo.insert(plan);
        debug!(groups = memo.groups.len(), "memo initialized");
        memo
    }

    pub fn root_group(&self) -> GroupId {
        self.root
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Representative node of `group`.
    ///
    /// # Panics
    /// If `group` was not allocated by this memo.
    pub fn node(&self, group: GroupId) -> &PlanNode {
        &self.groups[group].node
    }

    /// The group's representative for a reference, the node itself otherwise.
    pub fn resolve<'a>(&'a self, node: &'a PlanNode) -> &'a PlanNode {
        match node {
            PlanNode::GroupReference(r) => self.node(r.group),
            other => other,
        }
    }

    fn tick(&self) -> u64 {
        let now = self.clock.get() + 1;
        self.clock.set(now);
        now
    }

    fn insert(&mut self, node: PlanNode) -> GroupId {
        let normalized = self.insert_children(node);
        let key = structural_key(&normalized);
        if let Some(&existing) = self.index.get(&key) {
            trace!(group = existing, "deduplicated plan node");
            return existing;
        }
        let id = self.groups.len();
        let now = self.tick();
        trace!(group = id, node = %normalized, "new memo group");
        self.groups.push(Group::new(normalized, now));
        self.index.insert(key, id);
        id
    }

    /// Move inline children into their own groups.
    fn insert_children(&mut self, node: PlanNode) -> PlanNode {
        let sources: Vec<PlanNode> = node.sources().into_iter().cloned().collect();
        if sources.is_empty() {
            return node;
        }
        let mut children = Vec::with_capacity(sources.len());
        for source in sources {
            let child = match source {
                PlanNode::GroupReference(_) => source,
                inline => {
                    let id = inline.id();
                    let output_symbols = inline.output_symbols();
                    let group = self.insert(inline);
                    PlanNode::GroupReference(GroupReference {
                        id,
                        group,
                        output_symbols,
                    })
                }
            };
            children.push(child);
        }
        node.replace_children(children)
    }

    /// Install `node` as the representative of `group`.
    ///
    /// Returns `false` when the node is structurally equal to the current
    /// representative (nothing changes). Fails without touching the memo when
    /// the output-symbol set differs from the group's current one, or when the
    /// node references its own group.
    pub fn replace(&mut self, group: GroupId, node: PlanNode, reason: &str) -> Result<bool> {
        let node = match node {
            PlanNode::GroupReference(r) if r.group == group => return Ok(false),
            PlanNode::GroupReference(r) => self.node(r.group).clone(),
            other => other,
        };

        let expected = self.node(group).output_symbol_set();
        let actual = node.output_symbol_set();
        if expected != actual {
            return Err(OptimizerError::OutputSymbolsChanged {
                group,
                rule: reason.to_string(),
                expected,
                actual,
            });
        }
        if child_groups(&node).contains(&group) {
            return Err(OptimizerError::InvalidPlan {
                node: node.id(),
                message: format!("replacement for group {} references the group itself", group),
            });
        }

        // The old representative must not be found while inserting the new
        // node's children, or a child equal to it would point back at `group`.
        let old_key = structural_key(self.node(group));
        let owned_old_key = self.index.get(&old_key) == Some(&group);
        if owned_old_key {
            self.index.remove(&old_key);
        }
        let normalized = self.insert_children(node);
        let new_key = structural_key(&normalized);
        if new_key == old_key {
            if owned_old_key {
                self.index.insert(old_key, group);
            }
            return Ok(false);
        }
        self.index.entry(new_key).or_insert(group);

        let now = self.tick();
        let entry = &mut self.groups[group];
        debug!(group, rule = reason, node = %normalized, "replaced group representative");
        entry.node = normalized;
        entry.changed_at = now;
        entry.stats.replace(None);
        entry.cost.replace(None);
        self.last_replace = now;
        Ok(true)
    }

    /// Full plan tree rooted at the root group.
    pub fn extract(&self) -> PlanNode {
        self.extract_group(self.root)
    }

    pub fn extract_group(&self, group: GroupId) -> PlanNode {
        let node = self.node(group);
        let children = node
            .sources()
            .into_iter()
            .map(|c| match c {
                PlanNode::GroupReference(r) => self.extract_group(r.group),
                inline => inline.clone(),
            })
            .collect();
        node.replace_children(children)
    }

    fn is_fresh(&self, group: &Group, computed_at: u64) -> bool {
        computed_at > group.changed_at
    }

    pub fn stats(
        &self,
        group: GroupId,
        calculator: &dyn StatsCalculator,
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeStatsEstimate {
        self.stamped_stats(group, calculator, session, types).0
    }

    fn stamped_stats(
        &self,
        group: GroupId,
        calculator: &dyn StatsCalculator,
        session: &Session,
        types: &TypeProvider,
    ) -> (PlanNodeStatsEstimate, u64) {
        let entry = &self.groups[group];
        if let Some(cached) = entry.stats.borrow().as_ref() {
            if cached.computed_at > self.last_replace {
                return (cached.value.clone(), cached.computed_at);
            }
        }

        let sources: Vec<(PlanNodeStatsEstimate, u64)> = child_groups(&entry.node)
            .into_iter()
            .map(|child| self.stamped_stats(child, calculator, session, types))
            .collect();
        if let Some(cached) = entry.stats.borrow().as_ref() {
            if self.is_fresh(entry, cached.computed_at)
                && sources.iter().all(|(_, stamp)| *stamp < cached.computed_at)
            {
                return (cached.value.clone(), cached.computed_at);
            }
        }

        let source_stats: Vec<PlanNodeStatsEstimate> = sources.into_iter().map(|(s, _)| s).collect();
        let value = calculator.calculate_stats(&entry.node, &source_stats, session, types);
        let computed_at = self.tick();
        trace!(group, rows = value.output_row_count(), "computed group statistics");
        entry.stats.replace(Some(Cached {
            value: value.clone(),
            computed_at,
        }));
        (value, computed_at)
    }

    pub fn cumulative_cost(
        &self,
        group: GroupId,
        stats_calculator: &dyn StatsCalculator,
        cost_calculator: &dyn CostCalculator,
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeCostEstimate {
        self.stamped_cost(group, stats_calculator, cost_calculator, session, types)
            .0
    }

    fn stamped_cost(
        &self,
        group: GroupId,
        stats_calculator: &dyn StatsCalculator,
        cost_calculator: &dyn CostCalculator,
        session: &Session,
        types: &TypeProvider,
    ) -> (PlanNodeCostEstimate, u64) {
        let entry = &self.groups[group];
        if let Some(cached) = entry.cost.borrow().as_ref() {
            if cached.computed_at > self.last_replace {
                return (cached.value, cached.computed_at);
            }
        }

        let children = child_groups(&entry.node);
        let (stats, stats_stamp) = self.stamped_stats(group, stats_calculator, session, types);
        let source_stats: Vec<(PlanNodeStatsEstimate, u64)> = children
            .iter()
            .map(|&child| self.stamped_stats(child, stats_calculator, session, types))
            .collect();
        let source_costs: Vec<(PlanNodeCostEstimate, u64)> = children
            .iter()
            .map(|&child| {
                self.stamped_cost(child, stats_calculator, cost_calculator, session, types)
            })
            .collect();

        if let Some(cached) = entry.cost.borrow().as_ref() {
            if self.is_fresh(entry, cached.computed_at)
                && stats_stamp < cached.computed_at
                && source_costs.iter().all(|(_, stamp)| *stamp < cached.computed_at)
            {
                return (cached.value, cached.computed_at);
            }
        }

        let source_stats: Vec<PlanNodeStatsEstimate> =
            source_stats.into_iter().map(|(s, _)| s).collect();
        let local = cost_calculator.calculate_cost(&entry.node, &stats, &source_stats, session, types);
        let value = source_costs
            .into_iter()
            .fold(local, |acc, (cost, _)| acc + cost);
        let computed_at = self.tick();
        entry.cost.replace(Some(Cached { value, computed_at }));
        (value, computed_at)
    }
}

/// Read access to plan nodes, statistics and costs for rules.
pub trait Lookup {
    /// The representative for a group reference, the node itself otherwise.
    fn resolve<'a>(&'a self, node: &'a PlanNode) -> &'a PlanNode;

    fn stats(&self, node: &PlanNode, session: &Session, types: &TypeProvider) -> PlanNodeStatsEstimate;

    fn cumulative_cost(
        &self,
        node: &PlanNode,
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeCostEstimate;
}

/// Statistics and local cost of an inline node, sources through `lookup`.
fn inline_cost(
    lookup: &dyn Lookup,
    node: &PlanNode,
    stats_calculator: &dyn StatsCalculator,
    cost_calculator: &dyn CostCalculator,
    session: &Session,
    types: &TypeProvider,
) -> PlanNodeCostEstimate {
    let source_stats: Vec<PlanNodeStatsEstimate> = node
        .sources()
        .into_iter()
        .map(|s| lookup.stats(s, session, types))
        .collect();
    let stats = stats_calculator.calculate_stats(node, &source_stats, session, types);
    let local = cost_calculator.calculate_cost(node, &stats, &source_stats, session, types);
    node.sources()
        .into_iter()
        .fold(local, |acc, s| acc + lookup.cumulative_cost(s, session, types))
}

/// [`Lookup`] backed by a memo.
pub struct MemoLookup<'a> {
    memo: &'a Memo,
    stats_calculator: &'a dyn StatsCalculator,
    cost_calculator: &'a dyn CostCalculator,
}

impl<'a> MemoLookup<'a> {
    pub fn new(
        memo: &'a Memo,
        stats_calculator: &'a dyn StatsCalculator,
        cost_calculator: &'a dyn CostCalculator,
    ) -> Self {
        Self {
            memo,
            stats_calculator,
            cost_calculator,
        }
    }
}

impl Lookup for MemoLookup<'_> {
    fn resolve<'b>(&'b self, node: &'b PlanNode) -> &'b PlanNode {
        self.memo.resolve(node)
    }

    fn stats(&self, node: &PlanNode, session: &Session, types: &TypeProvider) -> PlanNodeStatsEstimate {
        if let PlanNode::GroupReference(r) = node {
            return self.memo.stats(r.group, self.stats_calculator, session, types);
        }
        let source_stats: Vec<PlanNodeStatsEstimate> = node
            .sources()
            .into_iter()
            .map(|s| self.stats(s, session, types))
            .collect();
        self.stats_calculator
            .calculate_stats(node, &source_stats, session, types)
    }

    fn cumulative_cost(
        &self,
        node: &PlanNode,
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeCostEstimate {
        if let PlanNode::GroupReference(r) = node {
            return self.memo.cumulative_cost(
                r.group,
                self.stats_calculator,
                self.cost_calculator,
                session,
                types,
            );
        }
        inline_cost(
            self,
            node,
            self.stats_calculator,
            self.cost_calculator,
            session,
            types,
        )
    }
}

/// [`Lookup`] over plain trees without a memo. Group references resolve to
/// themselves and have unknown statistics.
pub struct StatelessLookup<'a> {
    stats_calculator: &'a dyn StatsCalculator,
    cost_calculator: &'a dyn CostCalculator,
}

impl<'a> StatelessLookup<'a> {
    pub fn new(
        stats_calculator: &'a dyn StatsCalculator,
        cost_calculator: &'a dyn CostCalculator,
    ) -> Self {
        Self {
            stats_calculator,
            cost_calculator,
        }
    }
}

impl Lookup for StatelessLookup<'_> {
    fn resolve<'b>(&'b self, node: &'b PlanNode) -> &'b PlanNode {
        node
    }

    fn stats(&self, node: &PlanNode, session: &Session, types: &TypeProvider) -> PlanNodeStatsEstimate {
        let source_stats: Vec<PlanNodeStatsEstimate> = node
            .sources()
            .into_iter()
            .map(|s| self.stats(s, session, types))
            .collect();
        self.stats_calculator
            .calculate_stats(node, &source_stats, session, types)
    }

    fn cumulative_cost(
        &self,
        node: &PlanNode,
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeCostEstimate {
        inline_cost(
            self,
            node,
            self.stats_calculator,
            self.cost_calculator,
            session,
            types,
        )
    }
}
