//! # Join Enumeration
//!
//! Exhaustive search over the binary join trees of a [`JoinGraphNode`].
//!
//! Every way of splitting the sources in two (source 0 always on the left) is
//! turned into a partitioned inner join whose sides are either a single source
//! or a smaller join graph. Smaller graphs are solved recursively and memoized,
//! so each distinct subset of sources is costed once per enumeration. The
//! cheapest tree according to the [`CostComparator`] wins.
//!
//! ```text
//! JoinGraph[A, B, C]
//!   {A, B} | {C}   →   Join(JoinGraph[A, B], C)   →   Join(Join(A, B), C)
//!   {A, C} | {B}   →   Join(JoinGraph[A, C], B)   →   Join(Join(A, C), B)
//!   {A}    | {B, C}→   Join(A, JoinGraph[B, C])   →   Join(A, Join(B, C))
//! ```

use cbo_core::cost::{CostComparator, PlanNodeCostEstimate};
use cbo_core::error::{OptimizerError, Result};
use cbo_core::expr::{combine_conjuncts, Expr};
use cbo_core::memo::Lookup;
use cbo_core::plan::{
    DistributionType, EquiJoinClause, FilterNode, JoinGraphNode, JoinNode, JoinType, PlanNode,
    PlanNodeIdAllocator,
};
use cbo_core::symbol::{Symbol, TypeProvider};
use cbo_core::Session;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

/// Left sides of every two-way split of `total` sources.
///
/// Each set contains index 0 and leaves at least one index for the right side,
/// giving `2^(total-1) - 1` partitions. Sets are produced depth first,
/// preferring to include the next index, so larger left sides come first.
pub fn generate_partitions(total: usize) -> Vec<BTreeSet<usize>> {
    fn extend(
        current: &mut BTreeSet<usize>,
        total: usize,
        index: usize,
        out: &mut Vec<BTreeSet<usize>>,
    ) {
        if index < total && current.len() < total - 1 {
            current.insert(index);
            extend(current, total, index + 1, out);
            current.remove(&index);
            extend(current, total, index + 1, out);
        } else {
            out.push(current.clone());
        }
    }

    let mut out = Vec::new();
    if total >= 2 {
        extend(&mut BTreeSet::from([0]), total, 1, &mut out);
    }
    out
}

fn side_source(
    id_allocator: &mut PlanNodeIdAllocator,
    mut sources: Vec<PlanNode>,
    criteria: Vec<EquiJoinClause>,
    filters: Vec<Expr>,
) -> PlanNode {
    if sources.len() == 1 {
        let source = sources.remove(0);
        // criteria between two symbols of the same source are plain filters
        let conjuncts: Vec<Expr> = criteria
            .iter()
            .map(EquiJoinClause::to_expression)
            .chain(filters)
            .collect();
        if conjuncts.is_empty() {
            return source;
        }
        return PlanNode::Filter(FilterNode {
            id: id_allocator.next_id(),
            source: Box::new(source),
            predicate: combine_conjuncts(conjuncts),
        });
    }
    let output_symbols = sources.iter().flat_map(PlanNode::output_symbols).collect();
    PlanNode::JoinGraph(JoinGraphNode {
        id: id_allocator.next_id(),
        sources,
        criteria,
        filters,
        output_symbols,
    })
}

/// Partitioned inner join of the sources in `left` against all the others.
///
/// Criteria and filters whose symbols all come from one side move into that
/// side; the rest stay on the join. Spanning criteria are oriented so their
/// left symbol is produced by the left side. The join outputs the left side's
/// symbols followed by the right side's.
pub fn create_join_according_to_partitioning(
    graph: &JoinGraphNode,
    left: &BTreeSet<usize>,
    id_allocator: &mut PlanNodeIdAllocator,
) -> Result<JoinNode> {
    let total = graph.sources.len();
    if left.is_empty() || left.len() >= total || left.iter().any(|&i| i >= total) {
        return Err(OptimizerError::InvalidJoinPartition(format!(
            "{left:?} does not split {total} sources"
        )));
    }

    let (left_sources, right_sources): (Vec<(usize, &PlanNode)>, Vec<(usize, &PlanNode)>) =
        graph.sources.iter().enumerate().partition(|(i, _)| left.contains(i));
    let symbols_of = |sources: &[(usize, &PlanNode)]| -> BTreeSet<Symbol> {
        sources.iter().flat_map(|(_, s)| s.output_symbols()).collect()
    };
    let left_symbols = symbols_of(&left_sources);
    let right_symbols = symbols_of(&right_sources);

    let mut left_criteria = Vec::new();
    let mut right_criteria = Vec::new();
    let mut spanning_criteria = Vec::new();
    for clause in &graph.criteria {
        let in_side = |symbols: &BTreeSet<Symbol>| {
            symbols.contains(&clause.left) && symbols.contains(&clause.right)
        };
        if in_side(&left_symbols) {
            left_criteria.push(clause.clone());
        } else if in_side(&right_symbols) {
            right_criteria.push(clause.clone());
        } else if left_symbols.contains(&clause.left) {
            spanning_criteria.push(clause.clone());
        } else {
            spanning_criteria.push(clause.flip());
        }
    }

    let mut left_filters = Vec::new();
    let mut right_filters = Vec::new();
    let mut spanning_filters = Vec::new();
    for filter in &graph.filters {
        let symbols = filter.symbols();
        if symbols.is_subset(&left_symbols) {
            left_filters.push(filter.clone());
        } else if symbols.is_subset(&right_symbols) {
            right_filters.push(filter.clone());
        } else {
            spanning_filters.push(filter.clone());
        }
    }

    let owned = |sources: Vec<(usize, &PlanNode)>| -> Vec<PlanNode> {
        sources.into_iter().map(|(_, s)| s.clone()).collect()
    };
    let left = side_source(id_allocator, owned(left_sources), left_criteria, left_filters);
    let right = side_source(id_allocator, owned(right_sources), right_criteria, right_filters);
    let output_symbols = left
        .output_symbols()
        .into_iter()
        .chain(right.output_symbols())
        .collect();

    Ok(JoinNode {
        id: id_allocator.next_id(),
        join_type: JoinType::Inner,
        left: Box::new(left),
        right: Box::new(right),
        criteria: spanning_criteria,
        output_symbols,
        filter: (!spanning_filters.is_empty()).then(|| combine_conjuncts(spanning_filters)),
        distribution_type: Some(DistributionType::Partitioned),
    })
}

/// A fully resolved join tree and its cumulative cost.
#[derive(Debug, Clone)]
pub struct JoinCandidate {
    pub plan: PlanNode,
    pub cost: PlanNodeCostEstimate,
}

/// Candidates ordered cheapest first. Candidates of equal cost keep the order
/// they were pushed in.
pub struct JoinCandidateQueue<'a> {
    comparator: &'a dyn CostComparator,
    session: &'a Session,
    candidates: Vec<JoinCandidate>,
}

impl<'a> JoinCandidateQueue<'a> {
    pub fn new(comparator: &'a dyn CostComparator, session: &'a Session) -> Self {
        Self {
            comparator,
            session,
            candidates: Vec::new(),
        }
    }

    pub fn push(&mut self, candidate: JoinCandidate) {
        let position = self.candidates.partition_point(|c| {
            self.comparator.compare(self.session, &c.cost, &candidate.cost) != Ordering::Greater
        });
        self.candidates.insert(position, candidate);
    }

    pub fn peek(&self) -> Option<&JoinCandidate> {
        self.candidates.first()
    }

    /// Remove and return the cheapest candidate.
    pub fn pop(&mut self) -> Option<JoinCandidate> {
        if self.candidates.is_empty() {
            None
        } else {
            Some(self.candidates.remove(0))
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Chooses the cheapest join order of a join graph.
///
/// One enumerator serves one rule application: its memo holds plans built
/// against the lookup it was created with.
pub struct JoinEnumerator<'a> {
    lookup: &'a dyn Lookup,
    session: &'a Session,
    types: &'a TypeProvider,
    comparator: &'a dyn CostComparator,
    memo: HashMap<JoinGraphNode, JoinCandidate>,
}

impl<'a> JoinEnumerator<'a> {
    pub fn new(
        lookup: &'a dyn Lookup,
        session: &'a Session,
        types: &'a TypeProvider,
        comparator: &'a dyn CostComparator,
    ) -> Self {
        Self {
            lookup,
            session,
            types,
            comparator,
            memo: HashMap::new(),
        }
    }

    /// Cheapest join tree producing `graph`'s output symbols.
    pub fn choose_join_order(
        &mut self,
        graph: &JoinGraphNode,
        id_allocator: &mut PlanNodeIdAllocator,
    ) -> Result<JoinCandidate> {
        if let Some(known) = self.memo.get(graph) {
            trace!(sources = graph.sources.len(), "join graph already enumerated");
            return Ok(known.clone());
        }
        if graph.sources.len() < 2 {
            return Err(OptimizerError::InvalidJoinPartition(format!(
                "join graph {} has {} source(s)",
                graph.id,
                graph.sources.len()
            )));
        }

        let mut queue = JoinCandidateQueue::new(self.comparator, self.session);
        for partition in generate_partitions(graph.sources.len()) {
            let mut join = create_join_according_to_partitioning(graph, &partition, id_allocator)?;
            join.left = Box::new(self.resolve_side(*join.left, id_allocator)?);
            join.right = Box::new(self.resolve_side(*join.right, id_allocator)?);
            join.output_symbols = graph.output_symbols.clone();

            let plan = PlanNode::Join(join);
            let cost = self.lookup.cumulative_cost(&plan, self.session, self.types);
            trace!(?partition, ?cost, "join candidate");
            queue.push(JoinCandidate { plan, cost });
        }

        let best = queue.pop().ok_or_else(|| {
            OptimizerError::InvalidJoinPartition(format!("no partitions for join graph {}", graph.id))
        })?;
        debug!(
            sources = graph.sources.len(),
            cost = ?best.cost,
            "chose join order"
        );
        self.memo.insert(graph.clone(), best.clone());
        Ok(best)
    }

    fn resolve_side(
        &mut self,
        side: PlanNode,
        id_allocator: &mut PlanNodeIdAllocator,
    ) -> Result<PlanNode> {
        match side {
            PlanNode::JoinGraph(nested) => Ok(self.choose_join_order(&nested, id_allocator)?.plan),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbo_core::catalog::{InMemoryMetadata, TableRef, TableStatistics};
    use cbo_core::cost::{DefaultCostCalculator, DefaultCostComparator};
    use cbo_core::expr::ComparisonOp;
    use cbo_core::memo::StatelessLookup;
    use cbo_core::plan_builder::PlanBuilder;
    use cbo_core::stats::calculator::DefaultStatsCalculator;
    use cbo_core::symbol::Type;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn set(items: &[usize]) -> BTreeSet<usize> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_generate_partitions_order() {
        assert_eq!(generate_partitions(2), vec![set(&[0])]);
        assert_eq!(
            generate_partitions(3),
            vec![set(&[0, 1]), set(&[0, 2]), set(&[0])]
        );
        assert!(generate_partitions(1).is_empty());
        assert!(generate_partitions(0).is_empty());
    }

    proptest! {
        #[test]
        fn test_generate_partitions_count(n in 2usize..12) {
            let partitions = generate_partitions(n);
            prop_assert_eq!(partitions.len(), (1 << (n - 1)) - 1);
            let distinct: BTreeSet<_> = partitions.iter().cloned().collect();
            prop_assert_eq!(distinct.len(), partitions.len());
            for left in &partitions {
                prop_assert!(left.contains(&0));
                prop_assert!(left.len() < n);
            }
        }
    }

    struct Fixture {
        builder: PlanBuilder,
        graph: JoinGraphNode,
        symbols: Vec<Symbol>,
    }

    /// Scans a(a1), b(b1), c(c1) joined on a1 = b1 and b1 = c1, filtered on a1 < c1.
    fn fixture() -> Fixture {
        let mut builder = PlanBuilder::new();
        let symbols: Vec<Symbol> = ["a1", "b1", "c1"]
            .iter()
            .map(|n| builder.symbol(n, Type::Bigint))
            .collect();
        let sources: Vec<PlanNode> = ["a", "b", "c"]
            .iter()
            .zip(&symbols)
            .map(|(table, s)| builder.table_scan(TableRef::new("t", *table), &[(s.clone(), "x")]))
            .collect();
        let filter = Expr::comparison(
            ComparisonOp::LessThan,
            symbols[0].to_expr(),
            symbols[2].to_expr(),
        );
        let PlanNode::JoinGraph(graph) = builder.join_graph(
            sources,
            vec![
                EquiJoinClause::new(symbols[0].clone(), symbols[1].clone()),
                EquiJoinClause::new(symbols[1].clone(), symbols[2].clone()),
            ],
            vec![filter],
            symbols.clone(),
        ) else {
            unreachable!()
        };
        Fixture {
            builder,
            graph,
            symbols,
        }
    }

    #[test]
    fn test_partition_routes_clauses_and_filters() {
        let Fixture {
            mut builder,
            graph,
            symbols,
        } = fixture();
        let join =
            create_join_according_to_partitioning(&graph, &set(&[0, 1]), builder.id_allocator())
                .unwrap();

        assert_eq!(join.distribution_type, Some(DistributionType::Partitioned));
        assert_eq!(
            join.criteria,
            vec![EquiJoinClause::new(symbols[1].clone(), symbols[2].clone())]
        );
        assert!(join.filter.is_some());
        let PlanNode::JoinGraph(nested) = join.left.as_ref() else {
            panic!("expected nested join graph, got {}", join.left);
        };
        assert_eq!(nested.sources.len(), 2);
        assert_eq!(
            nested.criteria,
            vec![EquiJoinClause::new(symbols[0].clone(), symbols[1].clone())]
        );
        assert!(nested.filters.is_empty());
        assert!(matches!(join.right.as_ref(), PlanNode::TableScan(_)));
        assert_eq!(join.output_symbols, symbols);
    }

    #[test]
    fn test_spanning_criteria_are_flipped() {
        let Fixture {
            mut builder,
            graph,
            symbols,
        } = fixture();
        // {a, c} | {b}: both criteria span, b1 = c1 needs flipping
        let join =
            create_join_according_to_partitioning(&graph, &set(&[0, 2]), builder.id_allocator())
                .unwrap();
        assert_eq!(
            join.criteria,
            vec![
                EquiJoinClause::new(symbols[0].clone(), symbols[1].clone()),
                EquiJoinClause::new(symbols[2].clone(), symbols[1].clone()),
            ]
        );
        // a1 < c1 lives entirely on the left
        let PlanNode::JoinGraph(nested) = join.left.as_ref() else {
            panic!("expected nested join graph");
        };
        assert_eq!(nested.filters.len(), 1);
        assert!(join.filter.is_none());
    }

    #[test]
    fn test_single_source_side_gets_filter() {
        let mut builder = PlanBuilder::new();
        let a = builder.symbol("a", Type::Bigint);
        let a2 = builder.symbol("a2", Type::Bigint);
        let b = builder.symbol("b", Type::Bigint);
        let scan_a = builder.table_scan(TableRef::new("t", "a"), &[(a.clone(), "x"), (a2.clone(), "y")]);
        let scan_b = builder.table_scan(TableRef::new("t", "b"), &[(b.clone(), "x")]);
        let PlanNode::JoinGraph(graph) = builder.join_graph(
            vec![scan_a, scan_b],
            vec![
                EquiJoinClause::new(a.clone(), a2.clone()),
                EquiJoinClause::new(b.clone(), a.clone()),
            ],
            vec![Expr::is_not_null(b.to_expr())],
            vec![a.clone(), a2.clone(), b.clone()],
        ) else {
            unreachable!()
        };

        let join =
            create_join_according_to_partitioning(&graph, &set(&[0]), builder.id_allocator())
                .unwrap();
        let PlanNode::Filter(left) = join.left.as_ref() else {
            panic!("expected filter on the left");
        };
        assert_eq!(left.predicate, Expr::eq(a.to_expr(), a2.to_expr()));
        let PlanNode::Filter(right) = join.right.as_ref() else {
            panic!("expected filter on the right");
        };
        assert_eq!(right.predicate, Expr::is_not_null(b.to_expr()));
        assert_eq!(join.criteria, vec![EquiJoinClause::new(a, b)]);
    }

    #[test]
    fn test_invalid_partitions_are_rejected() {
        let Fixture {
            mut builder, graph, ..
        } = fixture();
        for left in [set(&[]), set(&[0, 1, 2]), set(&[0, 5])] {
            let err = create_join_according_to_partitioning(&graph, &left, builder.id_allocator())
                .unwrap_err();
            assert!(matches!(err, OptimizerError::InvalidJoinPartition(_)));
        }
    }

    #[test]
    fn test_queue_orders_by_cost_and_keeps_ties_stable() {
        let session = Session::default();
        let comparator = DefaultCostComparator::new();
        let mut queue = JoinCandidateQueue::new(&comparator, &session);
        let mut ids = PlanNodeIdAllocator::new();
        let mut candidate = |cpu: f64| JoinCandidate {
            plan: PlanNode::Values(cbo_core::plan::ValuesNode {
                id: ids.next_id(),
                output_symbols: vec![],
                rows: vec![],
            }),
            cost: PlanNodeCostEstimate::cpu(cpu),
        };
        let (first_tie, second_tie, cheap, unknown) =
            (candidate(5.0), candidate(5.0), candidate(1.0), JoinCandidate {
                cost: PlanNodeCostEstimate::UNKNOWN,
                ..candidate(0.0)
            });
        let first_id = first_tie.plan.id();
        let second_id = second_tie.plan.id();
        queue.push(unknown);
        queue.push(first_tie);
        queue.push(cheap);
        queue.push(second_tie);

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pop().map(|c| c.cost.cpu_cost), Some(1.0));
        assert_eq!(queue.pop().map(|c| c.plan.id()), Some(first_id));
        assert_eq!(queue.pop().map(|c| c.plan.id()), Some(second_id));
        assert!(queue.pop().is_some_and(|c| c.cost.has_unknown_components()));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_choose_join_order_resolves_nested_graphs() {
        let Fixture {
            mut builder,
            graph,
            symbols,
        } = fixture();
        let mut metadata = InMemoryMetadata::new();
        for (table, rows) in [("a", 100.0), ("b", 10.0), ("c", 1000.0)] {
            metadata.add_table(&TableRef::new("t", table), TableStatistics::new(rows));
        }
        let stats = DefaultStatsCalculator::new(Arc::new(metadata));
        let cost = DefaultCostCalculator::new();
        let lookup = StatelessLookup::new(&stats, &cost);
        let session = Session::default();
        let comparator = DefaultCostComparator::new();
        let types = builder.types().clone();

        let mut enumerator = JoinEnumerator::new(&lookup, &session, &types, &comparator);
        let best = enumerator
            .choose_join_order(&graph, builder.id_allocator())
            .unwrap();

        let PlanNode::Join(top) = &best.plan else {
            panic!("expected join");
        };
        assert_eq!(top.output_symbols, symbols);
        assert!(!best.cost.has_unknown_components());
        fn contains_join_graph(node: &PlanNode) -> bool {
            matches!(node, PlanNode::JoinGraph(_)) || node.sources().into_iter().any(contains_join_graph)
        }
        assert!(!contains_join_graph(&best.plan));

        // a second request for an equal graph is served from the memo
        let again = enumerator
            .choose_join_order(&graph.clone(), builder.id_allocator())
            .unwrap();
        assert_eq!(again.plan, best.plan);
    }

    #[test]
    fn test_single_source_graph_is_rejected() {
        let mut builder = PlanBuilder::new();
        let a = builder.symbol("a", Type::Bigint);
        let scan = builder.table_scan(TableRef::new("t", "a"), &[(a.clone(), "x")]);
        let PlanNode::JoinGraph(graph) = builder.join_graph(vec![scan], vec![], vec![], vec![a]) else {
            unreachable!()
        };
        let stats = DefaultStatsCalculator::new(Arc::new(InMemoryMetadata::new()));
        let cost = DefaultCostCalculator::new();
        let lookup = StatelessLookup::new(&stats, &cost);
        let session = Session::default();
        let comparator = DefaultCostComparator::new();
        let types = builder.types().clone();
        let mut enumerator = JoinEnumerator::new(&lookup, &session, &types, &comparator);
        assert!(enumerator
            .choose_join_order(&graph, builder.id_allocator())
            .is_err());
    }
}
