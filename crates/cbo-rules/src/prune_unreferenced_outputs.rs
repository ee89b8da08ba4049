//! # Prune Unreferenced Outputs
//!
//! Narrows a child to the symbols its parent actually reads. Less data per row
//! means cheaper filters, joins and shuffles further up, and it lets the cost
//! model see the real row width.
//!
//! ```text
//! Project[p := a]                    Project[p := a]
//!   TableScan[a, b, c]       →         TableScan[a]
//! ```
//!
//! Parents and what they read from their children:
//!
//! | parent      | required input symbols                       |
//! |-------------|----------------------------------------------|
//! | Project     | symbols of the assignment expressions        |
//! | Aggregation | grouping keys and aggregate arguments        |
//! | Join        | outputs, criteria and filter, split per side |
//!
//! Children that can be narrowed: Project (drop assignments), TableScan (drop
//! outputs and their column assignments) and Values (drop columns). The rule
//! fires only when at least one child produces a symbol nobody reads.

use cbo_core::pattern::Pattern;
use cbo_core::plan::{PlanNode, PlanNodeKind, ProjectNode, TableScanNode, ValuesNode};
use cbo_core::rule::{Rule, RuleContext};
use cbo_core::symbol::Symbol;
use std::collections::BTreeSet;

pub struct PruneUnreferencedOutputs;

/// Symbols each source of `node` must keep producing, in source order.
fn required_inputs(node: &PlanNode) -> Option<Vec<BTreeSet<Symbol>>> {
    match node {
        PlanNode::Project(project) => Some(vec![project
            .assignments
            .expressions()
            .flat_map(|e| e.symbols())
            .collect()]),
        PlanNode::Aggregation(agg) => Some(vec![agg
            .group_by
            .iter()
            .cloned()
            .chain(
                agg.aggregations
                    .iter()
                    .flat_map(|(_, a)| a.arguments.iter().cloned()),
            )
            .collect()]),
        PlanNode::Join(join) => {
            let mut referenced: BTreeSet<Symbol> = join.output_symbols.iter().cloned().collect();
            for clause in &join.criteria {
                referenced.insert(clause.left.clone());
                referenced.insert(clause.right.clone());
            }
            if let Some(filter) = &join.filter {
                referenced.extend(filter.symbols());
            }
            let side = |source: &PlanNode| -> BTreeSet<Symbol> {
                source
                    .output_symbol_set()
                    .intersection(&referenced)
                    .cloned()
                    .collect()
            };
            Some(vec![side(&join.left), side(&join.right)])
        }
        _ => None,
    }
}

/// `node` restricted to `required` outputs, if its kind can be narrowed.
fn restrict_outputs(node: &PlanNode, required: &BTreeSet<Symbol>) -> Option<PlanNode> {
    match node {
        PlanNode::Project(project) => Some(PlanNode::Project(ProjectNode {
            assignments: project.assignments.filter(|s| required.contains(s)),
            ..project.clone()
        })),
        PlanNode::TableScan(scan) => Some(PlanNode::TableScan(TableScanNode {
            output_symbols: scan
                .output_symbols
                .iter()
                .filter(|s| required.contains(*s))
                .cloned()
                .collect(),
            assignments: scan
                .assignments
                .iter()
                .filter(|(s, _)| required.contains(*s))
                .map(|(s, c)| (s.clone(), c.clone()))
                .collect(),
            ..scan.clone()
        })),
        PlanNode::Values(values) => {
            let columns: Vec<usize> = (0..values.output_symbols.len())
                .filter(|&i| required.contains(&values.output_symbols[i]))
                .collect();
            Some(PlanNode::Values(ValuesNode {
                id: values.id,
                output_symbols: columns
                    .iter()
                    .map(|&i| values.output_symbols[i].clone())
                    .collect(),
                rows: values
                    .rows
                    .iter()
                    .map(|row| columns.iter().filter_map(|&i| row.get(i).cloned()).collect())
                    .collect(),
            }))
        }
        _ => None,
    }
}

impl Rule for PruneUnreferencedOutputs {
    fn name(&self) -> &str {
        "PruneUnreferencedOutputs"
    }

    fn pattern(&self) -> Pattern {
        Pattern::one_of([
            PlanNodeKind::Project,
            PlanNodeKind::Aggregation,
            PlanNodeKind::Join,
        ])
    }

    fn apply(&self, node: &PlanNode, ctx: &mut RuleContext<'_>) -> Option<PlanNode> {
        let required = required_inputs(node)?;
        let mut modified = false;
        let children: Vec<PlanNode> = node
            .sources()
            .into_iter()
            .zip(&required)
            .map(|(child, required)| {
                if child.output_symbols().iter().all(|s| required.contains(s)) {
                    return child.clone();
                }
                match restrict_outputs(ctx.lookup.resolve(child), required) {
                    Some(narrowed) => {
                        modified = true;
                        narrowed
                    }
                    None => child.clone(),
                }
            })
            .collect();

        modified.then(|| node.replace_children(children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rule_context, run_rule};
    use cbo_core::catalog::{ColumnHandle, TableRef};
    use cbo_core::expr::Expr;
    use cbo_core::plan::{
        AggregateFunction, Aggregation, AggregationNode, Assignments, EquiJoinClause, FilterNode,
        JoinNode, JoinType, PlanNodeId,
    };

    fn scan(id: u64, symbols: &[&str]) -> PlanNode {
        PlanNode::TableScan(TableScanNode {
            id: PlanNodeId(id),
            table: TableRef::new("tpch", "orders"),
            output_symbols: symbols.iter().map(|s| Symbol::new(*s)).collect(),
            assignments: symbols
                .iter()
                .map(|s| (Symbol::new(*s), ColumnHandle::new(*s)))
                .collect(),
            original_constraint: None,
        })
    }

    fn values(id: u64, symbols: &[&str]) -> PlanNode {
        PlanNode::Values(ValuesNode {
            id: PlanNodeId(id),
            output_symbols: symbols.iter().map(|s| Symbol::new(*s)).collect(),
            rows: vec![
                (0..symbols.len() as i64).map(Expr::bigint).collect(),
                (10..10 + symbols.len() as i64).map(Expr::bigint).collect(),
            ],
        })
    }

    fn apply(node: &PlanNode) -> Option<PlanNode> {
        let (mut symbols, mut ids, session) = rule_context();
        run_rule(&PruneUnreferencedOutputs, node, &mut symbols, &mut ids, &session)
    }

    fn project(source: PlanNode, assignments: Assignments) -> PlanNode {
        PlanNode::Project(ProjectNode {
            id: PlanNodeId(10),
            source: Box::new(source),
            assignments,
        })
    }

    #[test]
    fn test_project_over_scan() {
        let plan = project(scan(1, &["a", "b", "c"]), Assignments::new().with("p", Expr::symbol("b")));
        let expected = project(scan(1, &["b"]), Assignments::new().with("p", Expr::symbol("b")));
        assert_eq!(apply(&plan), Some(expected));
    }

    #[test]
    fn test_project_over_values_drops_columns() {
        let plan = project(values(1, &["a", "b"]), Assignments::identity(&[Symbol::new("b")]));
        let Some(PlanNode::Project(p)) = apply(&plan) else {
            panic!("expected project");
        };
        let PlanNode::Values(v) = p.source.as_ref() else {
            panic!("expected values");
        };
        assert_eq!(v.output_symbols, vec![Symbol::new("b")]);
        assert_eq!(v.rows, vec![vec![Expr::bigint(1)], vec![Expr::bigint(11)]]);
    }

    #[test]
    fn test_project_over_project() {
        let inner = project(
            scan(1, &["a", "b"]),
            Assignments::new()
                .with("x", Expr::symbol("a"))
                .with("y", Expr::symbol("b")),
        );
        let plan = PlanNode::Project(ProjectNode {
            id: PlanNodeId(11),
            source: Box::new(inner),
            assignments: Assignments::identity(&[Symbol::new("y")]),
        });
        let Some(PlanNode::Project(p)) = apply(&plan) else {
            panic!("expected project");
        };
        assert_eq!(p.source.output_symbols(), vec![Symbol::new("y")]);
    }

    #[test]
    fn test_join_keeps_criteria_symbols() {
        let plan = PlanNode::Join(JoinNode {
            id: PlanNodeId(3),
            join_type: JoinType::Inner,
            left: Box::new(scan(1, &["a", "a2"])),
            right: Box::new(scan(2, &["b", "b2"])),
            criteria: vec![EquiJoinClause::new("a", "b")],
            output_symbols: vec![Symbol::new("a2")],
            filter: None,
            distribution_type: None,
        });
        let Some(PlanNode::Join(j)) = apply(&plan) else {
            panic!("expected join");
        };
        assert_eq!(j.left.output_symbols(), vec![Symbol::new("a"), Symbol::new("a2")]);
        assert_eq!(j.right.output_symbols(), vec![Symbol::new("b")]);
    }

    #[test]
    fn test_aggregation_over_scan() {
        let plan = PlanNode::Aggregation(AggregationNode {
            id: PlanNodeId(2),
            source: Box::new(scan(1, &["k", "v", "unused"])),
            group_by: vec![Symbol::new("k")],
            aggregations: vec![(
                Symbol::new("total"),
                Aggregation {
                    function: AggregateFunction::Sum,
                    arguments: vec![Symbol::new("v")],
                    distinct: false,
                },
            )],
        });
        let Some(PlanNode::Aggregation(a)) = apply(&plan) else {
            panic!("expected aggregation");
        };
        assert_eq!(a.source.output_symbols(), vec![Symbol::new("k"), Symbol::new("v")]);
    }

    #[test]
    fn test_no_change_when_everything_is_used() {
        let plan = project(
            scan(1, &["a", "b"]),
            Assignments::new().with("p", Expr::eq(Expr::symbol("a"), Expr::symbol("b"))),
        );
        assert_eq!(apply(&plan), None);
    }

    #[test]
    fn test_other_children_are_left_alone() {
        let filter = PlanNode::Filter(FilterNode {
            id: PlanNodeId(2),
            source: Box::new(scan(1, &["a", "b"])),
            predicate: Expr::boolean(true),
        });
        let plan = project(filter, Assignments::identity(&[Symbol::new("a")]));
        assert_eq!(apply(&plan), None);
    }
}
