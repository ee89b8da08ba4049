//! Fluent construction of plans.
//!
//! [`PlanBuilder`] owns the id and symbol allocators of a query while the plan is
//! being assembled, then hands them to the optimizer:
//!
//! ```
//! use cbo_core::catalog::TableRef;
//! use cbo_core::expr::{ComparisonOp, Expr};
//! use cbo_core::plan_builder::PlanBuilder;
//! use cbo_core::symbol::Type;
//!
//! let mut p = PlanBuilder::new();
//! let key = p.symbol("orderkey", Type::Bigint);
//! let scan = p.table_scan(TableRef::new("tpch", "orders"), &[(key.clone(), "orderkey")]);
//! let plan = p.filter(
//!     scan,
//!     Expr::comparison(ComparisonOp::LessThan, key.to_expr(), Expr::bigint(100)),
//! );
//! assert_eq!(plan.output_symbols(), vec![key]);
//! ```

use crate::catalog::{ColumnHandle, TableRef};
use crate::expr::Expr;
use crate::plan::{
    AggregationNode, Aggregation, Assignments, EquiJoinClause, FilterNode, JoinGraphNode, JoinNode,
    JoinType, LimitNode, PlanNode, PlanNodeIdAllocator, ProjectNode, TableScanNode, UnionNode,
    ValuesNode,
};
use crate::symbol::{Symbol, SymbolAllocator, Type, TypeProvider};

#[derive(Debug, Default)]
pub struct PlanBuilder {
    ids: PlanNodeIdAllocator,
    symbols: SymbolAllocator,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with its type and return it as a symbol.
    pub fn symbol(&mut self, name: &str, ty: Type) -> Symbol {
        let symbol = Symbol::new(name);
        self.symbols.register(symbol.clone(), ty);
        symbol
    }

    pub fn types(&self) -> &TypeProvider {
        self.symbols.types()
    }

    pub fn id_allocator(&mut self) -> &mut PlanNodeIdAllocator {
        &mut self.ids
    }

    pub fn symbol_allocator(&mut self) -> &mut SymbolAllocator {
        &mut self.symbols
    }

    /// Both allocators at once, e.g. for `IterativeOptimizer::optimize`.
    pub fn allocators(&mut self) -> (&mut SymbolAllocator, &mut PlanNodeIdAllocator) {
        (&mut self.symbols, &mut self.ids)
    }

    pub fn values(&mut self, symbols: &[Symbol], rows: Vec<Vec<Expr>>) -> PlanNode {
        PlanNode::Values(ValuesNode {
            id: self.ids.next_id(),
            output_symbols: symbols.to_vec(),
            rows,
        })
    }

    /// Scan producing one symbol per `(symbol, column name)` pair.
    pub fn table_scan(&mut self, table: TableRef, columns: &[(Symbol, &str)]) -> PlanNode {
        self.table_scan_with_constraint(table, columns, None)
    }

    pub fn table_scan_with_constraint(
        &mut self,
        table: TableRef,
        columns: &[(Symbol, &str)],
        constraint: Option<Expr>,
    ) -> PlanNode {
        PlanNode::TableScan(TableScanNode {
            id: self.ids.next_id(),
            table,
            output_symbols: columns.iter().map(|(s, _)| s.clone()).collect(),
            assignments: columns
                .iter()
                .map(|(s, c)| (s.clone(), ColumnHandle::new(*c)))
                .collect(),
            original_constraint: constraint,
        })
    }

    pub fn filter(&mut self, source: PlanNode, predicate: Expr) -> PlanNode {
        PlanNode::Filter(FilterNode {
            id: self.ids.next_id(),
            source: Box::new(source),
            predicate,
        })
    }

    pub fn project(&mut self, source: PlanNode, assignments: Assignments) -> PlanNode {
        PlanNode::Project(ProjectNode {
            id: self.ids.next_id(),
            source: Box::new(source),
            assignments,
        })
    }

    /// Join producing every left output followed by every right output.
    pub fn join(
        &mut self,
        join_type: JoinType,
        left: PlanNode,
        right: PlanNode,
        criteria: Vec<EquiJoinClause>,
        filter: Option<Expr>,
    ) -> PlanNode {
        let output_symbols = left
            .output_symbols()
            .into_iter()
            .chain(right.output_symbols())
            .collect();
        PlanNode::Join(JoinNode {
            id: self.ids.next_id(),
            join_type,
            left: Box::new(left),
            right: Box::new(right),
            criteria,
            output_symbols,
            filter,
            distribution_type: None,
        })
    }

    pub fn join_graph(
        &mut self,
        sources: Vec<PlanNode>,
        criteria: Vec<EquiJoinClause>,
        filters: Vec<Expr>,
        output_symbols: Vec<Symbol>,
    ) -> PlanNode {
        PlanNode::JoinGraph(JoinGraphNode {
            id: self.ids.next_id(),
            sources,
            criteria,
            filters,
            output_symbols,
        })
    }

    pub fn aggregation(
        &mut self,
        source: PlanNode,
        group_by: Vec<Symbol>,
        aggregations: Vec<(Symbol, Aggregation)>,
    ) -> PlanNode {
        PlanNode::Aggregation(AggregationNode {
            id: self.ids.next_id(),
            source: Box::new(source),
            group_by,
            aggregations,
        })
    }

    /// `inputs[i]` maps the outputs onto the symbols of `sources[i]`.
    pub fn union(
        &mut self,
        sources: Vec<PlanNode>,
        outputs: Vec<Symbol>,
        inputs: Vec<Vec<Symbol>>,
    ) -> PlanNode {
        PlanNode::Union(UnionNode {
            id: self.ids.next_id(),
            sources,
            outputs,
            inputs,
        })
    }

    pub fn limit(&mut self, source: PlanNode, count: u64) -> PlanNode {
        PlanNode::Limit(LimitNode {
            id: self.ids.next_id(),
            source: Box::new(source),
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanNodeId;
    use crate::validate::validate_plan;

    #[test]
    fn test_ids_are_unique_and_plan_is_valid() {
        let mut p = PlanBuilder::new();
        let a = p.symbol("a", Type::Bigint);
        let b = p.symbol("b", Type::Bigint);
        let left = p.values(&[a.clone()], vec![vec![Expr::bigint(1)]]);
        let right = p.table_scan(TableRef::new("s", "t"), &[(b.clone(), "b")]);
        let join = p.join(
            JoinType::Inner,
            left,
            right,
            vec![EquiJoinClause::new(a.clone(), b.clone())],
            None,
        );
        let plan = p.limit(join, 10);

        assert_eq!(plan.id(), PlanNodeId(3));
        assert_eq!(plan.output_symbols(), vec![a, b]);
        assert!(validate_plan(&plan).is_ok());
        assert_eq!(p.types().len(), 2);
    }
}
