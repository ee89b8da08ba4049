//! # Reorder Joins
//!
//! Cost-based join ordering. An inner join (or an explicit join graph) is
//! flattened into a [`JoinGraphNode`] and the cheapest binary tree over its
//! sources is chosen by the [`JoinEnumerator`].
//!
//! - A `Join` is only replaced when the chosen tree is strictly cheaper than the
//!   current one, so the rule reaches a fixpoint.
//! - A `JoinGraph` is not executable and is always replaced.
//! - Joins produced here carry a distribution type and are never matched again.
//! - Graphs with more than `max_reordered_join_sources` sources are not
//!   enumerated. An oversized `Join` is left alone; an oversized `JoinGraph`
//!   is split into its first sources joined with the last one, leaving a
//!   smaller graph to be handled on its own.

use crate::join_enumerator::{create_join_according_to_partitioning, JoinEnumerator};
use crate::join_graph::{build_join_graph, is_reorderable};
use cbo_core::cost::{CostComparator, DefaultCostComparator};
use cbo_core::pattern::Pattern;
use cbo_core::plan::{JoinGraphNode, PlanNode, PlanNodeKind};
use cbo_core::rule::{Rule, RuleContext};
use cbo_core::Session;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ReorderJoins {
    cost_comparator: Arc<dyn CostComparator>,
}

impl ReorderJoins {
    pub fn new(cost_comparator: Arc<dyn CostComparator>) -> Self {
        Self { cost_comparator }
    }

    /// Join of all but the last source against the last one.
    fn split_oversized(graph: &JoinGraphNode, ctx: &mut RuleContext<'_>) -> Option<PlanNode> {
        let left: BTreeSet<usize> = (0..graph.sources.len() - 1).collect();
        match create_join_according_to_partitioning(graph, &left, ctx.id_allocator) {
            Ok(mut join) => {
                join.output_symbols = graph.output_symbols.clone();
                Some(PlanNode::Join(join))
            }
            Err(err) => {
                warn!(%err, "could not split join graph");
                None
            }
        }
    }
}

impl Default for ReorderJoins {
    fn default() -> Self {
        Self::new(Arc::new(DefaultCostComparator::new()))
    }
}

impl Rule for ReorderJoins {
    fn name(&self) -> &str {
        "ReorderJoins"
    }

    fn pattern(&self) -> Pattern {
        Pattern::one_of([PlanNodeKind::Join, PlanNodeKind::JoinGraph])
    }

    fn is_enabled(&self, session: &Session) -> bool {
        session.config().join_reordering_enabled
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Option<PlanNode> {
        let graph = match node {
            PlanNode::Join(join) if join.distribution_type.is_none() && is_reorderable(join) => {
                build_join_graph(join, ctx.lookup, ctx.id_allocator.next_id())
            }
            PlanNode::JoinGraph(graph) => graph.clone(),
            _ => return None,
        };
        if graph.sources.len() < 2 {
            return None;
        }

        let limit = ctx.session.config().max_reordered_join_sources;
        if graph.sources.len() > limit {
            debug!(
                sources = graph.sources.len(),
                limit, "join graph too large to reorder"
            );
            return match node {
                PlanNode::JoinGraph(_) => Self::split_oversized(&graph, ctx),
                _ => None,
            };
        }

        let types = ctx.symbol_allocator.types();
        let mut enumerator =
            JoinEnumerator::new(ctx.lookup, ctx.session, types, self.cost_comparator.as_ref());
        let best = match enumerator.choose_join_order(&graph, ctx.id_allocator) {
            Ok(best) => best,
            Err(err) => {
                warn!(%err, node = %node.id(), "join enumeration failed");
                return None;
            }
        };

        if let PlanNode::Join(_) = node {
            let current = ctx.lookup.cumulative_cost(node, ctx.session, types);
            if self.cost_comparator.compare(ctx.session, &best.cost, &current) != Ordering::Less {
                return None;
            }
            debug!(node = %node.id(), from = ?current, to = ?best.cost, "reordered joins");
        }
        Some(best.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rule_context, run_rule};
    use cbo_core::catalog::TableRef;
    use cbo_core::config::OptimizerConfig;
    use cbo_core::plan::{DistributionType, EquiJoinClause, JoinType};
    use cbo_core::plan_builder::PlanBuilder;
    use cbo_core::symbol::{Symbol, Type};

    fn scans(builder: &mut PlanBuilder, n: usize) -> (Vec<Symbol>, Vec<PlanNode>) {
        (0..n)
            .map(|i| {
                let symbol = builder.symbol(&format!("s{i}"), Type::Bigint);
                let scan = builder.table_scan(TableRef::new("t", format!("t{i}")), &[(symbol.clone(), "k")]);
                (symbol, scan)
            })
            .unzip()
    }

    fn chain_criteria(symbols: &[Symbol]) -> Vec<EquiJoinClause> {
        symbols
            .windows(2)
            .map(|w| EquiJoinClause::new(w[0].clone(), w[1].clone()))
            .collect()
    }

    fn apply(node: &PlanNode, builder: &mut PlanBuilder, session: &Session) -> Option<PlanNode> {
        let (symbols, ids) = builder.allocators();
        run_rule(&ReorderJoins::default(), node, symbols, ids, session)
    }

    #[test]
    fn test_join_graph_is_always_replaced() {
        let mut builder = PlanBuilder::new();
        let (symbols, sources) = scans(&mut builder, 3);
        let graph = builder.join_graph(sources, chain_criteria(&symbols), vec![], symbols.clone());

        let Some(PlanNode::Join(join)) = apply(&graph, &mut builder, &Session::default()) else {
            panic!("expected a join");
        };
        assert_eq!(join.output_symbols, symbols);
        assert_eq!(join.distribution_type, Some(DistributionType::Partitioned));
        assert!(matches!(join.left.as_ref(), PlanNode::Join(_)));
    }

    #[test]
    fn test_outer_and_distributed_joins_do_not_match() {
        let mut builder = PlanBuilder::new();
        let (symbols, mut sources) = scans(&mut builder, 2);
        let right = sources.pop().unwrap();
        let left = sources.pop().unwrap();
        let criteria = chain_criteria(&symbols);

        let outer = builder.join(JoinType::Left, left.clone(), right.clone(), criteria.clone(), None);
        assert_eq!(apply(&outer, &mut builder, &Session::default()), None);

        let PlanNode::Join(mut inner) =
            builder.join(JoinType::Inner, left, right, criteria, None)
        else {
            unreachable!()
        };
        inner.distribution_type = Some(DistributionType::Replicated);
        assert_eq!(apply(&PlanNode::Join(inner), &mut builder, &Session::default()), None);
    }

    #[test]
    fn test_disabled_by_session() {
        let session = Session::new(
            "q",
            OptimizerConfig {
                join_reordering_enabled: false,
                ..OptimizerConfig::default()
            },
        );
        assert!(!ReorderJoins::default().is_enabled(&session));
        assert!(ReorderJoins::default().is_enabled(&Session::default()));
    }

    #[test]
    fn test_oversized_join_is_skipped() {
        let session = Session::new(
            "q",
            OptimizerConfig {
                max_reordered_join_sources: 2,
                ..OptimizerConfig::default()
            },
        );
        let mut builder = PlanBuilder::new();
        let (symbols, sources) = scans(&mut builder, 3);
        let mut sources = sources.into_iter();
        let (a, b, c) = (
            sources.next().unwrap(),
            sources.next().unwrap(),
            sources.next().unwrap(),
        );
        let ab = builder.join(
            JoinType::Inner,
            a,
            b,
            vec![EquiJoinClause::new(symbols[0].clone(), symbols[1].clone())],
            None,
        );
        let abc = builder.join(
            JoinType::Inner,
            ab,
            c,
            vec![EquiJoinClause::new(symbols[1].clone(), symbols[2].clone())],
            None,
        );
        assert_eq!(apply(&abc, &mut builder, &session), None);
    }

    #[test]
    fn test_oversized_join_graph_is_split() {
        let session = Session::new(
            "q",
            OptimizerConfig {
                max_reordered_join_sources: 2,
                ..OptimizerConfig::default()
            },
        );
        let mut builder = PlanBuilder::new();
        let (symbols, sources) = scans(&mut builder, 4);
        let graph = builder.join_graph(sources, chain_criteria(&symbols), vec![], symbols.clone());

        let Some(PlanNode::Join(join)) = apply(&graph, &mut builder, &session) else {
            panic!("expected a join");
        };
        let PlanNode::JoinGraph(rest) = join.left.as_ref() else {
            panic!("expected the remaining sources as a join graph");
        };
        assert_eq!(rest.sources.len(), 3);
        assert_eq!(join.right.output_symbols(), vec![symbols[3].clone()]);
        assert_eq!(join.output_symbols, symbols);
    }

    #[test]
    fn test_single_source_graph_does_not_fire() {
        let (mut symbols, mut ids, session) = rule_context();
        let mut builder = PlanBuilder::new();
        let (outputs, sources) = scans(&mut builder, 1);
        let graph = builder.join_graph(sources, vec![], vec![], outputs);
        assert_eq!(
            run_rule(&ReorderJoins::default(), &graph, &mut symbols, &mut ids, &session),
            None
        );
    }
}
