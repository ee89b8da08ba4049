//! Per-node statistics derivation.
//!
//! [`StatsCalculator::calculate_stats`] receives a node plus the estimates of its
//! sources (in [`PlanNode::sources`] order) and returns the node's own estimate.
//! Resolving sources, including memo group references, is the caller's job; see
//! [`crate::memo::Lookup`].

use super::filter::FilterStatsCalculator;
use super::math::add_stats;
use super::{ColumnStatsEstimate, PlanNodeStatsEstimate};
use crate::catalog::Metadata;
use crate::config::Session;
use crate::expr::{Expr, ScalarValue};
use crate::plan::{
    AggregationNode, JoinGraphNode, JoinNode, JoinType, PlanNode, ProjectNode, TableScanNode,
    UnionNode, ValuesNode,
};
use crate::range::{min_excluding_nan, nan_max, nan_min, ValueRange};
use crate::symbol::{Symbol, Type, TypeProvider};
use std::collections::BTreeSet;
use std::sync::Arc;

pub trait StatsCalculator: Send + Sync {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        source_stats: &[PlanNodeStatsEstimate],
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeStatsEstimate;
}

/// Statistics calculator covering every plan node kind.
pub struct DefaultStatsCalculator {
    metadata: Arc<dyn Metadata>,
}

impl DefaultStatsCalculator {
    pub fn new(metadata: Arc<dyn Metadata>) -> Self {
        Self { metadata }
    }
}

impl StatsCalculator for DefaultStatsCalculator {
    fn calculate_stats(
        &self,
        node: &PlanNode,
        source_stats: &[PlanNodeStatsEstimate],
        session: &Session,
        types: &TypeProvider,
    ) -> PlanNodeStatsEstimate {
        let filters = FilterStatsCalculator::new(session.config());
        let source = |i: usize| {
            source_stats
                .get(i)
                .cloned()
                .unwrap_or_else(PlanNodeStatsEstimate::unknown)
        };
        match node {
            PlanNode::TableScan(n) => self.table_scan_stats(n),
            PlanNode::Values(n) => values_stats(n, types),
            PlanNode::Filter(n) => filters.filter_stats(&source(0), &n.predicate),
            PlanNode::Project(n) => project_stats(n, &source(0)),
            PlanNode::Join(n) => join_stats(n, &source(0), &source(1), &filters),
            PlanNode::Aggregation(n) => aggregation_stats(n, &source(0)),
            PlanNode::Union(n) => union_stats(n, source_stats),
            PlanNode::Limit(n) => {
                let count = n.count as f64;
                source(0).map_output_row_count(|rows| min_excluding_nan(rows, count))
            }
            PlanNode::JoinGraph(n) => join_graph_stats(n, source_stats, &filters),
            PlanNode::GroupReference(_) => PlanNodeStatsEstimate::unknown(),
        }
    }
}

impl DefaultStatsCalculator {
    fn table_scan_stats(&self, node: &TableScanNode) -> PlanNodeStatsEstimate {
        let table_stats = self
            .metadata
            .get_table_statistics(&node.table, node.original_constraint.as_ref());
        let rows = table_stats.row_count;

        let mut builder = PlanNodeStatsEstimate::builder().set_output_row_count(rows);
        for symbol in &node.output_symbols {
            let Some(column) = node.assignments.get(symbol) else {
                continue;
            };
            let Some(stats) = table_stats.column_statistics.get(column) else {
                continue;
            };
            let non_null_rows = rows * (1.0 - stats.nulls_fraction);
            // an inconsistent range from the catalog says nothing about the values
            let (low, high) = match stats.range {
                Some(range) if range.min <= range.max => (range.min, range.max),
                _ => (f64::NEG_INFINITY, f64::INFINITY),
            };
            builder = builder.add_column_statistics(
                symbol.clone(),
                ColumnStatsEstimate::builder()
                    .set_low_value(low)
                    .set_high_value(high)
                    .set_distinct_values_count(stats.distinct_values_count)
                    .set_nulls_fraction(stats.nulls_fraction)
                    .set_average_row_size(stats.data_size / non_null_rows)
                    .build(),
            );
        }
        builder.build()
    }
}

fn literal_width(value: &ScalarValue, ty: Option<&Type>) -> f64 {
    if let Some(width) = ty.and_then(Type::fixed_width) {
        return width;
    }
    match value {
        ScalarValue::Varchar(s) => s.len() as f64,
        ScalarValue::Boolean(_) => 1.0,
        ScalarValue::Date(_) => 4.0,
        ScalarValue::Bigint(_) | ScalarValue::Double(_) => 8.0,
        ScalarValue::Null => 0.0,
    }
}

fn values_stats(node: &ValuesNode, types: &TypeProvider) -> PlanNodeStatsEstimate {
    let rows = node.rows.len() as f64;
    let mut builder = PlanNodeStatsEstimate::builder().set_output_row_count(rows);

    for (column, symbol) in node.output_symbols.iter().enumerate() {
        let cells: Option<Vec<&ScalarValue>> = node
            .rows
            .iter()
            .map(|row| row.get(column).and_then(Expr::as_literal))
            .collect();
        let Some(cells) = cells else {
            builder = builder.add_column_statistics(symbol.clone(), ColumnStatsEstimate::UNKNOWN);
            continue;
        };

        let non_null: Vec<&ScalarValue> = cells.iter().copied().filter(|v| !v.is_null()).collect();
        let distinct: BTreeSet<&ScalarValue> = non_null.iter().copied().collect();
        let numeric: Vec<f64> = non_null.iter().filter_map(|v| v.as_f64()).collect();
        let ordered: Vec<f64> = numeric.iter().copied().filter(|v| !v.is_nan()).collect();

        let range = if non_null.is_empty() {
            ValueRange::empty()
        } else if numeric.len() == non_null.len() && !ordered.is_empty() {
            let low = ordered.iter().copied().fold(f64::INFINITY, f64::min);
            let high = ordered.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            ValueRange::new(low, high, distinct.len() as f64)
        } else {
            ValueRange::new(f64::NEG_INFINITY, f64::INFINITY, distinct.len() as f64)
        };
        let nulls_fraction = if cells.is_empty() {
            0.0
        } else {
            (cells.len() - non_null.len()) as f64 / cells.len() as f64
        };
        let average_row_size = if non_null.is_empty() {
            f64::NAN
        } else {
            non_null
                .iter()
                .map(|v| literal_width(v, types.get(symbol)))
                .sum::<f64>()
                / non_null.len() as f64
        };

        builder = builder.add_column_statistics(
            symbol.clone(),
            ColumnStatsEstimate::builder()
                .set_statistics_range(range)
                .set_nulls_fraction(nulls_fraction)
                .set_average_row_size(average_row_size)
                .build(),
        );
    }
    builder.build()
}

fn project_stats(node: &ProjectNode, source: &PlanNodeStatsEstimate) -> PlanNodeStatsEstimate {
    let mut builder =
        PlanNodeStatsEstimate::builder().set_output_row_count(source.output_row_count());
    for (symbol, expr) in node.assignments.iter() {
        let stats = match expr {
            Expr::Symbol(input) => {
                if !source.has_column_statistics(input) {
                    continue;
                }
                source.column_statistics(input)
            }
            Expr::Literal(value) => literal_column_stats(value),
            _ => ColumnStatsEstimate::UNKNOWN,
        };
        builder = builder.add_column_statistics(symbol.clone(), stats);
    }
    builder.build()
}

fn literal_column_stats(value: &ScalarValue) -> ColumnStatsEstimate {
    if value.is_null() {
        return ColumnStatsEstimate::builder()
            .set_statistics_range(ValueRange::empty())
            .set_nulls_fraction(1.0)
            .build();
    }
    let range = match value.as_f64() {
        Some(v) => ValueRange::point(v, 1.0),
        None => ValueRange::new(f64::NEG_INFINITY, f64::INFINITY, 1.0),
    };
    ColumnStatsEstimate::builder()
        .set_statistics_range(range)
        .set_nulls_fraction(0.0)
        .set_average_row_size(literal_width(value, None))
        .build()
}

/// Cartesian product: row counts multiply, column statistics are unioned.
fn cross_join_stats(left: &PlanNodeStatsEstimate, right: &PlanNodeStatsEstimate) -> PlanNodeStatsEstimate {
    let mut builder = PlanNodeStatsEstimate::builder()
        .set_output_row_count(left.output_row_count() * right.output_row_count());
    for side in [left, right] {
        for symbol in side.symbols_with_known_statistics() {
            let stats = side.column_statistics(&symbol);
            builder = builder.add_column_statistics(symbol, stats);
        }
    }
    builder.build()
}

/// Keep only the statistics of `outputs`.
fn restrict_to(estimate: PlanNodeStatsEstimate, outputs: &[Symbol]) -> PlanNodeStatsEstimate {
    let keep: BTreeSet<&Symbol> = outputs.iter().collect();
    let mut builder = estimate.build_from();
    for symbol in estimate.symbols_with_known_statistics() {
        if !keep.contains(&symbol) {
            builder = builder.remove_column_statistics(&symbol);
        }
    }
    builder.build()
}

fn join_stats(
    node: &JoinNode,
    left: &PlanNodeStatsEstimate,
    right: &PlanNodeStatsEstimate,
    filters: &FilterStatsCalculator,
) -> PlanNodeStatsEstimate {
    let mut stats = cross_join_stats(left, right);
    for clause in &node.criteria {
        stats = filters.filter_stats(&stats, &clause.to_expression());
    }
    if let Some(filter) = &node.filter {
        stats = filters.filter_stats(&stats, filter);
    }

    let left_rows = left.output_row_count();
    let right_rows = right.output_row_count();
    let stats = match node.join_type {
        JoinType::Inner => stats,
        JoinType::Left => stats.map_output_row_count(|rows| nan_max(rows, left_rows)),
        JoinType::Right => stats.map_output_row_count(|rows| nan_max(rows, right_rows)),
        JoinType::Full => {
            stats.map_output_row_count(|rows| nan_max(rows, nan_max(left_rows, right_rows)))
        }
    };
    restrict_to(stats, &node.output_symbols)
}

fn join_graph_stats(
    node: &JoinGraphNode,
    source_stats: &[PlanNodeStatsEstimate],
    filters: &FilterStatsCalculator,
) -> PlanNodeStatsEstimate {
    let Some((first, rest)) = source_stats.split_first() else {
        return PlanNodeStatsEstimate::unknown();
    };
    let mut stats = rest
        .iter()
        .fold(first.clone(), |acc, s| cross_join_stats(&acc, s));
    for clause in &node.criteria {
        stats = filters.filter_stats(&stats, &clause.to_expression());
    }
    for filter in &node.filters {
        stats = filters.filter_stats(&stats, filter);
    }
    restrict_to(stats, &node.output_symbols)
}

fn aggregation_stats(node: &AggregationNode, source: &PlanNodeStatsEstimate) -> PlanNodeStatsEstimate {
    let input_rows = source.output_row_count();
    let rows = if node.group_by.is_empty() {
        1.0
    } else {
        let groups = node.group_by.iter().fold(1.0, |acc, key| {
            let stats = source.column_statistics(key);
            // NULL forms a group of its own
            let null_group = if stats.nulls_fraction() > 0.0 { 1.0 } else { 0.0 };
            acc * (stats.distinct_values_count() + null_group)
        });
        nan_min(groups, input_rows)
    };

    let mut builder = PlanNodeStatsEstimate::builder().set_output_row_count(rows);
    for key in &node.group_by {
        if source.has_column_statistics(key) {
            let stats = source
                .column_statistics(key)
                .map_distinct_values_count(|ndv| nan_min(ndv, rows));
            builder = builder.add_column_statistics(key.clone(), stats);
        }
    }
    for (symbol, _) in &node.aggregations {
        builder = builder.add_column_statistics(symbol.clone(), ColumnStatsEstimate::UNKNOWN);
    }
    builder.build()
}

fn union_stats(node: &UnionNode, source_stats: &[PlanNodeStatsEstimate]) -> PlanNodeStatsEstimate {
    let mut result: Option<PlanNodeStatsEstimate> = None;
    for (inputs, stats) in node.inputs.iter().zip(source_stats) {
        let mut builder =
            PlanNodeStatsEstimate::builder().set_output_row_count(stats.output_row_count());
        for (output, input) in node.outputs.iter().zip(inputs) {
            if stats.has_column_statistics(input) {
                builder = builder.add_column_statistics(output.clone(), stats.column_statistics(input));
            }
        }
        let mapped = builder.build();
        result = Some(match result {
            Some(acc) => add_stats(&acc, &mapped),
            None => mapped,
        });
    }
    result.unwrap_or_else(|| PlanNodeStatsEstimate::builder().set_output_row_count(0.0).build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnHandle, ColumnStatistics, InMemoryMetadata, TableRef, TableStatistics};
    use crate::expr::ComparisonOp;
    use crate::plan::{
        Aggregation, AggregateFunction, Assignments, EquiJoinClause, FilterNode, LimitNode,
        PlanNodeId,
    };
    use std::collections::BTreeMap;

    fn calculator(metadata: InMemoryMetadata) -> DefaultStatsCalculator {
        DefaultStatsCalculator::new(Arc::new(metadata))
    }

    fn session() -> Session {
        Session::default()
    }

    fn values(symbol: &str, rows: Vec<Expr>) -> PlanNode {
        PlanNode::Values(ValuesNode {
            id: PlanNodeId(0),
            output_symbols: vec![Symbol::new(symbol)],
            rows: rows.into_iter().map(|v| vec![v]).collect(),
        })
    }

    #[test]
    fn test_table_scan_stats() {
        let orders = TableRef::new("tpch", "orders");
        let mut metadata = InMemoryMetadata::new();
        metadata.add_table(
            &orders,
            TableStatistics::new(1000.0).with_column(
                "o_orderkey",
                ColumnStatistics::new(1000.0, 0.0)
                    .with_range(1.0, 1000.0)
                    .with_data_size(8000.0),
            ),
        );
        let scan = PlanNode::TableScan(TableScanNode {
            id: PlanNodeId(0),
            table: orders,
            output_symbols: vec![Symbol::new("orderkey"), Symbol::new("comment")],
            assignments: BTreeMap::from([
                (Symbol::new("orderkey"), ColumnHandle::new("o_orderkey")),
                (Symbol::new("comment"), ColumnHandle::new("o_comment")),
            ]),
            original_constraint: None,
        });
        let stats = calculator(metadata).calculate_stats(&scan, &[], &session(), &TypeProvider::new());
        assert_eq!(stats.output_row_count(), 1000.0);
        let key = stats.column_statistics(&Symbol::new("orderkey"));
        assert_eq!((key.low_value(), key.high_value()), (1.0, 1000.0));
        assert_eq!(key.average_row_size(), 8.0);
        assert!(!stats.has_column_statistics(&Symbol::new("comment")));
    }

    #[test]
    fn test_values_stats() {
        let node = values(
            "a",
            vec![Expr::bigint(3), Expr::bigint(1), Expr::bigint(3), Expr::null()],
        );
        let stats = calculator(InMemoryMetadata::new()).calculate_stats(
            &node,
            &[],
            &session(),
            &TypeProvider::new(),
        );
        assert_eq!(stats.output_row_count(), 4.0);
        let a = stats.column_statistics(&Symbol::new("a"));
        assert_eq!((a.low_value(), a.high_value()), (1.0, 3.0));
        assert_eq!(a.distinct_values_count(), 2.0);
        assert_eq!(a.nulls_fraction(), 0.25);
    }

    #[test]
    fn test_values_with_nan_cell() {
        let calc = calculator(InMemoryMetadata::new());
        let only_nan = values("a", vec![Expr::double(f64::NAN)]);
        let stats = calc.calculate_stats(&only_nan, &[], &session(), &TypeProvider::new());
        let a = stats.column_statistics(&Symbol::new("a"));
        assert_eq!(
            (a.low_value(), a.high_value()),
            (f64::NEG_INFINITY, f64::INFINITY)
        );
        assert_eq!(a.distinct_values_count(), 1.0);

        let mixed = values("a", vec![Expr::double(2.0), Expr::double(f64::NAN), Expr::double(-1.0)]);
        let stats = calc.calculate_stats(&mixed, &[], &session(), &TypeProvider::new());
        let a = stats.column_statistics(&Symbol::new("a"));
        assert_eq!((a.low_value(), a.high_value()), (-1.0, 2.0));
    }

    #[test]
    fn test_inconsistent_catalog_range_is_unbounded() {
        let t = TableRef::new("tiny", "t");
        let mut metadata = InMemoryMetadata::new();
        metadata.add_table(
            &t,
            TableStatistics::new(100.0)
                .with_column("a", ColumnStatistics::new(10.0, 0.0).with_range(5.0, 1.0))
                .with_column("b", ColumnStatistics::new(10.0, 0.0).with_range(f64::NAN, 1.0)),
        );
        let scan = PlanNode::TableScan(TableScanNode {
            id: PlanNodeId(0),
            table: t,
            output_symbols: vec![Symbol::new("a"), Symbol::new("b")],
            assignments: BTreeMap::from([
                (Symbol::new("a"), ColumnHandle::new("a")),
                (Symbol::new("b"), ColumnHandle::new("b")),
            ]),
            original_constraint: None,
        });
        let calc = calculator(metadata);
        let stats = calc.calculate_stats(&scan, &[], &session(), &TypeProvider::new());
        for name in ["a", "b"] {
            let column = stats.column_statistics(&Symbol::new(name));
            assert_eq!(
                (column.low_value(), column.high_value()),
                (f64::NEG_INFINITY, f64::INFINITY)
            );
        }

        let filter = PlanNode::Filter(FilterNode {
            id: PlanNodeId(1),
            source: Box::new(scan),
            predicate: Expr::comparison(ComparisonOp::LessThan, Expr::symbol("a"), Expr::double(3.0)),
        });
        let filtered = calc.calculate_stats(&filter, &[stats], &session(), &TypeProvider::new());
        assert!(filtered.output_row_count() > 0.0);
        assert!(filtered.output_row_count() <= 100.0);
    }

    #[test]
    fn test_join_stats() {
        let calc = calculator(InMemoryMetadata::new());
        let left = values("a", (0..100).map(Expr::bigint).collect());
        let right = values("b", (0..10).map(|i| Expr::bigint(i * 10)).collect());
        let left_stats = calc.calculate_stats(&left, &[], &session(), &TypeProvider::new());
        let right_stats = calc.calculate_stats(&right, &[], &session(), &TypeProvider::new());

        let join = PlanNode::Join(JoinNode {
            id: PlanNodeId(2),
            join_type: JoinType::Inner,
            left: Box::new(left),
            right: Box::new(right),
            criteria: vec![EquiJoinClause::new("a", "b")],
            output_symbols: vec![Symbol::new("a")],
            filter: None,
            distribution_type: None,
        });
        let stats = calc.calculate_stats(
            &join,
            &[left_stats, right_stats],
            &session(),
            &TypeProvider::new(),
        );
        // 100 * 10 / max(100, 10)
        assert!((stats.output_row_count() - 10.0).abs() < 1e-9);
        assert!(stats.has_column_statistics(&Symbol::new("a")));
        assert!(!stats.has_column_statistics(&Symbol::new("b")));
    }

    #[test]
    fn test_aggregation_and_limit() {
        let calc = calculator(InMemoryMetadata::new());
        let source = values("k", vec![Expr::bigint(1), Expr::bigint(2), Expr::bigint(2), Expr::null()]);
        let source_stats = calc.calculate_stats(&source, &[], &session(), &TypeProvider::new());
        let agg = PlanNode::Aggregation(AggregationNode {
            id: PlanNodeId(1),
            source: Box::new(source.clone()),
            group_by: vec![Symbol::new("k")],
            aggregations: vec![(
                Symbol::new("cnt"),
                Aggregation {
                    function: AggregateFunction::Count,
                    arguments: vec![],
                    distinct: false,
                },
            )],
        });
        let stats = calc.calculate_stats(&agg, &[source_stats.clone()], &session(), &TypeProvider::new());
        assert_eq!(stats.output_row_count(), 3.0);
        assert!(stats.column_statistics(&Symbol::new("cnt")).is_unknown());

        let limit = PlanNode::Limit(LimitNode {
            id: PlanNodeId(2),
            source: Box::new(source),
            count: 2,
        });
        let stats = calc.calculate_stats(&limit, &[source_stats], &session(), &TypeProvider::new());
        assert_eq!(stats.output_row_count(), 2.0);
        let unknown = calc.calculate_stats(
            &limit,
            &[PlanNodeStatsEstimate::unknown()],
            &session(),
            &TypeProvider::new(),
        );
        assert_eq!(unknown.output_row_count(), 2.0);
    }

    #[test]
    fn test_project_stats() {
        let calc = calculator(InMemoryMetadata::new());
        let source = values("a", vec![Expr::bigint(1), Expr::bigint(5)]);
        let source_stats = calc.calculate_stats(&source, &[], &session(), &TypeProvider::new());
        let project = PlanNode::Project(ProjectNode {
            id: PlanNodeId(1),
            source: Box::new(source),
            assignments: Assignments::new()
                .with("b", Expr::symbol("a"))
                .with("c", Expr::bigint(7))
                .with("d", Expr::function("abs", vec![Expr::symbol("a")])),
        });
        let stats = calc.calculate_stats(&project, &[source_stats], &session(), &TypeProvider::new());
        assert_eq!(stats.output_row_count(), 2.0);
        assert_eq!(stats.column_statistics(&Symbol::new("b")).high_value(), 5.0);
        assert_eq!(stats.column_statistics(&Symbol::new("c")).low_value(), 7.0);
        assert!(stats.column_statistics(&Symbol::new("d")).is_unknown());
    }

    #[test]
    fn test_union_stats() {
        let calc = calculator(InMemoryMetadata::new());
        let first = values("a", vec![Expr::bigint(1), Expr::bigint(2)]);
        let second = values("b", vec![Expr::bigint(10)]);
        let first_stats = calc.calculate_stats(&first, &[], &session(), &TypeProvider::new());
        let second_stats = calc.calculate_stats(&second, &[], &session(), &TypeProvider::new());
        let union = PlanNode::Union(UnionNode {
            id: PlanNodeId(2),
            sources: vec![first, second],
            outputs: vec![Symbol::new("u")],
            inputs: vec![vec![Symbol::new("a")], vec![Symbol::new("b")]],
        });
        let stats = calc.calculate_stats(
            &union,
            &[first_stats, second_stats],
            &session(),
            &TypeProvider::new(),
        );
        assert_eq!(stats.output_row_count(), 3.0);
        let u = stats.column_statistics(&Symbol::new("u"));
        assert_eq!((u.low_value(), u.high_value()), (1.0, 10.0));
        assert_eq!(u.distinct_values_count(), 3.0);
    }
}
